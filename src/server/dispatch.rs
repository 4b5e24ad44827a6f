//! Command dispatch.
//!
//! Validates a decoded command against the registry and invokes the selected
//! handler. Checks run in a fixed order and the first failure wins: task kind
//! (enforced when the command is decoded), argument presence, then index.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::debug;

use crate::error::CommandError;

use super::protocol::{self, Command};
use super::registry::{Handler, HandlerRegistry};

/// Executes commands against a frozen handler registry.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    /// Run one command. Returns the handler's output for request-reply tasks,
    /// `None` for the other kinds.
    pub fn execute(&self, command: &Command) -> Result<Option<String>, CommandError> {
        let kind = command.kind;
        let task = command.task;

        if kind.requires_argument() && command.argument.is_none() {
            return Err(CommandError::MissingArgument { kind, task });
        }
        let argument = command.argument.as_deref().unwrap_or_default();

        let handler = self.registry.get(kind, task)?;
        debug!(%kind, task, "Invoking handler");

        panic::catch_unwind(AssertUnwindSafe(|| match handler {
            Handler::Action(action) => {
                action();
                None
            }
            Handler::InputAction(action) => {
                action(argument);
                None
            }
            Handler::Function(function) => Some(function(argument)),
        }))
        .map_err(|payload| CommandError::HandlerPanicked {
            kind,
            task,
            message: panic_message(payload.as_ref()),
        })
    }

    /// Decode one frame and run it.
    pub fn execute_frame(&self, frame: &[u8]) -> Result<Option<String>, CommandError> {
        let command = protocol::decode(frame)?;
        self.execute(&command)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
