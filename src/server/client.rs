//! Controller-side client.
//!
//! Holds one connection to the command server, sends commands and reads the
//! newline-delimited replies or notifications the server pushes back.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use super::protocol::{self, Command};

/// Error returned by client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize command: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("communication error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server closed the connection")]
    Closed,
}

/// A connection to the command server.
pub struct CommandClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl CommandClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect { addr, source })?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Send one command without waiting for anything back.
    pub async fn send(&mut self, command: &Command) -> Result<(), ClientError> {
        let frame = protocol::encode_command(command)?;
        self.writer.write_all(&frame).await?;
        Ok(())
    }

    /// Send an arbitrary line, newline appended.
    pub async fn send_raw(&mut self, line: &str) -> Result<(), ClientError> {
        self.writer.write_all(&protocol::encode(line)).await?;
        Ok(())
    }

    /// Invoke a request-reply task and wait for its output.
    pub async fn request(
        &mut self,
        task: usize,
        argument: impl Into<String>,
    ) -> Result<String, ClientError> {
        self.send(&Command::request(task, argument)).await?;
        self.read_line().await?.ok_or(ClientError::Closed)
    }

    /// Read the next line pushed by the server. `None` once the server closes.
    pub async fn read_line(&mut self) -> Result<Option<String>, ClientError> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }

    /// Close the write side so the server sees end-of-stream.
    pub async fn shutdown(&mut self) -> Result<(), ClientError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
