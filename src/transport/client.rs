// src/transport/client.rs
//! Framed transport client
//!
//! Opens one connection per request, sends a single frame and waits for the
//! reply, all under the caller's timeout.

use crate::transport::address::Address;
use crate::transport::codec::{frame_codec, Reply, Request};
use crate::transport::Transport;
use crate::utils::errors::{Result, TreegerError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

/// Transport speaking the length-delimited worker protocol
#[derive(Debug, Clone)]
pub struct FramedTransport {
    socket_dir: PathBuf,
}

impl FramedTransport {
    /// `socket_dir` holds the sockets behind `memory://` addresses
    pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
        }
    }

    async fn exchange(&self, address: &str, request: Request, timeout: Duration) -> Result<Reply> {
        let address: Address = address.parse()?;
        tokio::time::timeout(timeout, self.connect_and_send(&address, request))
            .await
            .map_err(|_| {
                TreegerError::TransportError(format!("Request to {} timed out after {:?}", address, timeout))
            })?
    }

    async fn connect_and_send(&self, address: &Address, request: Request) -> Result<Reply> {
        match address {
            Address::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await.map_err(|e| {
                    TreegerError::TransportError(format!("Failed to connect to {}: {}", address, e))
                })?;
                round_trip(stream, request).await
            }
            Address::Memory(_) => self.connect_local(address, request).await,
        }
    }

    #[cfg(unix)]
    async fn connect_local(&self, address: &Address, request: Request) -> Result<Reply> {
        let path = address
            .socket_path(&self.socket_dir)
            .ok_or_else(|| TreegerError::TransportError(format!("{} has no socket path", address)))?;
        let stream = tokio::net::UnixStream::connect(&path).await.map_err(|e| {
            TreegerError::TransportError(format!("Failed to connect to {}: {}", address, e))
        })?;
        round_trip(stream, request).await
    }

    #[cfg(not(unix))]
    async fn connect_local(&self, address: &Address, _request: Request) -> Result<Reply> {
        Err(TreegerError::TransportError(format!(
            "{} requires Unix domain sockets",
            address
        )))
    }
}

async fn round_trip<S>(stream: S, request: Request) -> Result<Reply>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, frame_codec());
    framed.send(request.encode()).await?;

    let frame = framed
        .next()
        .await
        .ok_or_else(|| TreegerError::TransportError("Connection closed before reply".into()))??;
    Reply::decode(frame)
}

#[async_trait]
impl Transport for FramedTransport {
    async fn ping(&self, address: &str, timeout: Duration) -> bool {
        match self.exchange(address, Request::Ping, timeout).await {
            Ok(Reply::Ok(_)) => true,
            Ok(Reply::Err(message)) => {
                debug!(address, %message, "Ping rejected");
                false
            }
            Err(e) => {
                debug!(address, error = %e, "Ping failed");
                false
            }
        }
    }

    async fn shutdown(&self, address: &str, timeout: Duration) -> bool {
        match self.exchange(address, Request::Shutdown, timeout).await {
            Ok(Reply::Ok(_)) => true,
            Ok(Reply::Err(message)) => {
                debug!(address, %message, "Shutdown rejected");
                false
            }
            Err(e) => {
                debug!(address, error = %e, "Shutdown request failed");
                false
            }
        }
    }

    async fn relay(&self, address: &str, payload: Bytes, timeout: Duration) -> Result<Bytes> {
        match self.exchange(address, Request::Call(payload), timeout).await {
            Ok(Reply::Ok(reply)) => Ok(reply),
            Ok(Reply::Err(message)) => Err(TreegerError::RelayError(message)),
            Err(e) => Err(TreegerError::RelayError(e.to_string())),
        }
    }
}
