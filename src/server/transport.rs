//! TCP transport for the command server.
//!
//! Serves one controller connection at a time with newline-delimited framing.
//! Each message is decoded and dispatched before the next one is read, so
//! commands from a peer run strictly in arrival order.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{CommandError, DecodeError, ServerError};
use crate::logging::LogThrottle;

use super::dispatch::Dispatcher;
use super::{Notifier, ServerState};

const ERROR_BACKOFF: Duration = Duration::from_millis(150);
const ACCEPT_ERROR_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// The accept/read loop, owned by the background task.
pub(crate) struct Transport {
    pub(crate) listener: TcpListener,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) connection: Notifier,
    pub(crate) state: Arc<watch::Sender<ServerState>>,
    pub(crate) max_message_bytes: usize,
    pub(crate) reply_to_requests: bool,
}

impl Transport {
    /// Accept and serve connections until `shutdown` is cancelled.
    pub(crate) async fn run(self, shutdown: CancellationToken) {
        let accept_errors = LogThrottle::new(ACCEPT_ERROR_LOG_INTERVAL);

        loop {
            self.state.send_replace(ServerState::Listening);

            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    accept_errors.reset();
                    info!(peer = %peer, "Controller connected");

                    match self.serve_connection(stream, peer, &shutdown).await {
                        Ok(()) => info!(peer = %peer, "Controller disconnected"),
                        Err(e) => error!(error = %e, "Connection fault"),
                    }
                    self.connection.detach().await;
                    if shutdown.is_cancelled() {
                        break;
                    }
                }
                Err(e) => {
                    self.state.send_replace(ServerState::Faulted);
                    if accept_errors.should_log() {
                        error!(error = %e, "Failed to accept connection");
                    }
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        self.connection.detach().await;
        self.state.send_replace(ServerState::Stopped);
        info!("Command server stopped");
    }

    /// Read, dispatch and reply until the peer closes the stream.
    async fn serve_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: &CancellationToken,
    ) -> Result<(), ServerError> {
        let (reader, writer) = stream.into_split();
        self.connection.attach(writer).await;
        self.state.send_replace(ServerState::Connected { peer });

        let mut reader = BufReader::new(reader);
        let mut frame = Vec::new();
        let fault = |source| ServerError::Connection { peer, source };

        loop {
            frame.clear();
            let read = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                read = read_frame(&mut reader, &mut frame, self.max_message_bytes) => read,
            };

            match read.map_err(fault)? {
                Frame::Eof => return Ok(()),
                Frame::Oversized => {
                    let e = CommandError::from(DecodeError::FrameTooLong {
                        limit: self.max_message_bytes,
                    });
                    warn!(peer = %peer, error = %e, "Dropping message");
                    continue;
                }
                Frame::Line => {}
            }

            let line = trim_line(&frame);
            if line.is_empty() {
                continue;
            }
            debug!(peer = %peer, bytes = line.len(), "Message received");

            match self.dispatcher.execute_frame(line) {
                Ok(Some(output)) if self.reply_to_requests => {
                    // A peer that stops reading must not pin the task past shutdown.
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => return Ok(()),
                        sent = self.connection.send(&output) => sent.map_err(fault)?,
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(peer = %peer, error = %e, "Command rejected"),
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    /// `buf` holds one message, possibly with its trailing newline.
    Line,
    /// A message longer than the limit was skipped.
    Oversized,
    Eof,
}

/// Read one newline-terminated frame into `buf`, never buffering more than
/// `limit + 1` bytes. A final line without a newline still counts as a frame.
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    let cap = limit as u64 + 1;
    let n = (&mut *reader).take(cap).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(Frame::Eof);
    }
    if buf.last() == Some(&b'\n') || n <= limit {
        return Ok(Frame::Line);
    }

    // Skip the rest of the oversized line.
    loop {
        buf.clear();
        let n = (&mut *reader).take(cap).read_until(b'\n', buf).await?;
        if n == 0 || buf.last() == Some(&b'\n') {
            buf.clear();
            return Ok(Frame::Oversized);
        }
    }
}

fn trim_line(frame: &[u8]) -> &[u8] {
    frame.trim_ascii()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_frame_splits_lines() {
        let mut input: &[u8] = b"{\"a\":1}\n{\"b\":2}";
        let mut buf = Vec::new();

        assert_eq!(read_frame(&mut input, &mut buf, 64).await.unwrap(), Frame::Line);
        assert_eq!(buf, b"{\"a\":1}\n");

        buf.clear();
        assert_eq!(read_frame(&mut input, &mut buf, 64).await.unwrap(), Frame::Line);
        assert_eq!(buf, b"{\"b\":2}");

        buf.clear();
        assert_eq!(read_frame(&mut input, &mut buf, 64).await.unwrap(), Frame::Eof);
    }

    #[tokio::test]
    async fn test_read_frame_skips_oversized_line() {
        let mut input: &[u8] = b"0123456789abcdef\nok\n";
        let mut buf = Vec::new();

        assert_eq!(
            read_frame(&mut input, &mut buf, 4).await.unwrap(),
            Frame::Oversized
        );
        assert!(buf.is_empty());

        assert_eq!(read_frame(&mut input, &mut buf, 4).await.unwrap(), Frame::Line);
        assert_eq!(buf, b"ok\n");
    }

    #[tokio::test]
    async fn test_read_frame_exact_limit_fits() {
        let mut input: &[u8] = b"abcd\n";
        let mut buf = Vec::new();

        assert_eq!(read_frame(&mut input, &mut buf, 4).await.unwrap(), Frame::Line);
        assert_eq!(buf, b"abcd\n");
    }

    #[test]
    fn test_trim_line_strips_crlf() {
        assert_eq!(trim_line(b"{}\r\n"), b"{}");
        assert!(trim_line(b"  \n").is_empty());
    }
}
