//! Host-side command relay.
//!
//! A controller process connects over TCP and invokes a fixed table of
//! host operations by sending small JSON commands, optionally receiving a
//! string result back.

pub mod config;
pub mod error;
pub mod logging;
pub mod server;

pub use config::ServerConfig;
pub use error::{CommandError, DecodeError, ServerError};
pub use server::{
    Command, CommandClient, CommandServer, Dispatcher, HandlerRegistry, Notifier, ServerState,
    TaskKind,
};
