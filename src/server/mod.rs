//! Single-connection TCP command server.
//!
//! A controller process connects over TCP and invokes handlers from a fixed,
//! pre-registered table by sending newline-delimited JSON commands.
//!
//! ## Architecture
//!
//! - `protocol`: command/reply wire format
//! - `registry`: index-addressed handler tables
//! - `dispatch`: validation and invocation
//! - `transport`: accept/read loop on a background task
//! - `client`: controller-side client

pub mod client;
pub mod dispatch;
pub mod protocol;
pub mod registry;
mod transport;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use transport::Transport;

pub use client::{ClientError, CommandClient};
pub use dispatch::Dispatcher;
pub use protocol::{Command, TaskKind};
pub use registry::HandlerRegistry;

/// Longest a notification write may wait on the peer.
pub const SEND_TIMEOUT: Duration = Duration::from_millis(250);

/// Lifecycle of the server, observable through [`CommandServer::subscribe_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Listening,
    Connected { peer: SocketAddr },
    /// The last accept failed; the loop retries after a short backoff.
    Faulted,
    Stopped,
}

/// Best-effort write access to the currently connected controller.
///
/// Cheap to clone; hand it to any part of the application that wants to push
/// notifications to the peer.
#[derive(Clone, Default)]
pub struct Notifier {
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
}

impl Notifier {
    /// Write `text` as one line to the connected peer.
    ///
    /// Waits at most [`SEND_TIMEOUT`] on the peer. Returns `false` without
    /// writing when no peer is connected or a reply is being written, and
    /// `false` when the write fails. A write that cannot finish in time means
    /// the peer has stopped reading; its write side is closed, since the line
    /// it was sent is now truncated.
    pub async fn try_send(&self, text: &str) -> bool {
        let Ok(mut guard) = self.writer.try_lock() else {
            debug!("Connection busy, notification dropped");
            return false;
        };
        let Some(writer) = guard.as_mut() else {
            return false;
        };

        let frame = protocol::encode(text);
        let written = timeout(SEND_TIMEOUT, writer.write_all(&frame)).await;
        match written {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "Notification not delivered");
                false
            }
            Err(_) => {
                warn!("Peer is not reading; closing its write side");
                guard.take();
                false
            }
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    pub(crate) async fn send(&self, text: &str) -> io::Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        writer.write_all(&protocol::encode(text)).await
    }

    async fn attach(&self, writer: OwnedWriteHalf) {
        *self.writer.lock().await = Some(writer);
    }

    async fn detach(&self) {
        self.writer.lock().await.take();
    }
}

/// TCP server that dispatches controller commands to a handler registry.
pub struct CommandServer {
    config: Arc<ServerConfig>,
    dispatcher: Dispatcher,
    notifier: Notifier,
    state: Arc<watch::Sender<ServerState>>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl CommandServer {
    /// Create a server. The registry is frozen from here on.
    pub fn new(config: ServerConfig, registry: HandlerRegistry) -> Self {
        let (state, _) = watch::channel(ServerState::Idle);

        Self {
            config: Arc::new(config),
            dispatcher: Dispatcher::new(Arc::new(registry)),
            notifier: Notifier::default(),
            state: Arc::new(state),
            shutdown: CancellationToken::new(),
            task: None,
            local_addr: None,
        }
    }

    /// Bind the listening socket and start the accept loop on a background task.
    ///
    /// Returns the bound address. Bind and resolve failures are the only
    /// errors this server ever surfaces to its owner.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if self.task.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;
        info!(addr = %local_addr, "Command server listening");

        let transport = Transport {
            listener,
            dispatcher: self.dispatcher.clone(),
            connection: self.notifier.clone(),
            state: self.state.clone(),
            max_message_bytes: self.config.max_message_bytes,
            reply_to_requests: self.config.reply_to_requests,
        };

        self.shutdown = CancellationToken::new();
        self.state.send_replace(ServerState::Listening);
        self.task = Some(tokio::spawn(transport.run(self.shutdown.clone())));
        self.local_addr = Some(local_addr);

        Ok(local_addr)
    }

    /// Stop the accept loop and wait for it to finish. Any blocked accept or
    /// read is interrupted; the current connection is closed.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Command server task ended abnormally");
            }
        }
        self.local_addr = None;
        self.state.send_replace(ServerState::Stopped);
    }

    /// Push `text` to the connected controller, if any. See [`Notifier::try_send`].
    pub async fn try_send(&self, text: &str) -> bool {
        self.notifier.try_send(text).await
    }

    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Drop for CommandServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
