// src/transport/server.rs
//! Worker-side server for the framed protocol
//!
//! Answers pings, hands `CALL` payloads to a [`RequestHandler`], and stops
//! accepting connections once a `SHUTDOWN` request has been acknowledged.

use crate::transport::address::Address;
use crate::transport::codec::{frame_codec, Reply, Request};
use crate::utils::errors::{Result, TreegerError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Application logic behind a worker address
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, payload: Bytes) -> Result<Bytes>;
}

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener, PathBuf),
}

/// Bound, not yet serving, worker endpoint
pub struct WorkerServer {
    address: Address,
    listener: Listener,
    shutdown: Arc<Notify>,
}

impl WorkerServer {
    /// Bind `address`; `memory://` addresses become sockets under `socket_dir`
    pub async fn bind(address: &str, socket_dir: &Path) -> Result<Self> {
        let address: Address = address.parse()?;

        let (listener, address) = match &address {
            Address::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port)).await?;
                let local = listener.local_addr()?;
                let bound = Address::Tcp {
                    host: host.clone(),
                    port: local.port(),
                };
                (Listener::Tcp(listener), bound)
            }
            Address::Memory(_) => (bind_local(&address, socket_dir).await?, address.clone()),
        };

        info!(address = %address, "Worker server bound");
        Ok(Self {
            address,
            listener,
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Address actually bound (resolves a requested port 0)
    pub fn local_address(&self) -> &Address {
        &self.address
    }

    /// Handle that stops the accept loop when notified
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Serve until a shutdown request arrives or the handle is notified
    pub async fn serve<H: RequestHandler>(self, handler: Arc<H>) -> Result<()> {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!(address = %self.address, "Worker server stopping");
                    break;
                }

                accepted = accept(&self.listener) => {
                    match accepted {
                        Ok(Connection::Tcp(stream)) => {
                            spawn_connection(stream, handler.clone(), self.shutdown.clone());
                        }
                        #[cfg(unix)]
                        Ok(Connection::Unix(stream)) => {
                            spawn_connection(stream, handler.clone(), self.shutdown.clone());
                        }
                        Err(e) => warn!(error = %e, "Accept failed"),
                    }
                }
            }
        }

        self.listener.cleanup().await;
        Ok(())
    }
}

impl Listener {
    async fn cleanup(&self) {
        match self {
            Listener::Tcp(_) => {}
            #[cfg(unix)]
            Listener::Unix(_, path) => {
                let _ = tokio::fs::remove_file(path).await;
            }
        }
    }
}

#[cfg(unix)]
async fn bind_local(address: &Address, socket_dir: &Path) -> Result<Listener> {
    let path = address
        .socket_path(socket_dir)
        .ok_or_else(|| TreegerError::TransportError(format!("{} has no socket path", address)))?;
    tokio::fs::create_dir_all(socket_dir).await?;
    // A stale socket from a crashed worker would make bind fail.
    if tokio::fs::metadata(&path).await.is_ok() {
        tokio::fs::remove_file(&path).await?;
    }
    let listener = tokio::net::UnixListener::bind(&path)?;
    Ok(Listener::Unix(listener, path))
}

#[cfg(not(unix))]
async fn bind_local(address: &Address, _socket_dir: &Path) -> Result<Listener> {
    Err(TreegerError::TransportError(format!(
        "{} requires Unix domain sockets",
        address
    )))
}

enum Connection {
    Tcp(tokio::net::TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

async fn accept(listener: &Listener) -> std::io::Result<Connection> {
    match listener {
        Listener::Tcp(l) => l.accept().await.map(|(s, _)| Connection::Tcp(s)),
        #[cfg(unix)]
        Listener::Unix(l, _) => l.accept().await.map(|(s, _)| Connection::Unix(s)),
    }
}

fn spawn_connection<S, H>(stream: S, handler: Arc<H>, shutdown: Arc<Notify>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    H: RequestHandler,
{
    tokio::spawn(async move {
        if let Err(e) = serve_connection(stream, handler, shutdown).await {
            debug!(error = %e, "Connection closed with error");
        }
    });
}

async fn serve_connection<S, H>(stream: S, handler: Arc<H>, shutdown: Arc<Notify>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: RequestHandler,
{
    let mut framed = Framed::new(stream, frame_codec());

    while let Some(frame) = framed.next().await {
        let reply = match Request::decode(frame?) {
            Ok(Request::Ping) => Reply::Ok(Bytes::new()),
            Ok(Request::Shutdown) => {
                framed.send(Reply::Ok(Bytes::new()).encode()).await?;
                shutdown.notify_one();
                return Ok(());
            }
            Ok(Request::Call(payload)) => match handler.handle(payload).await {
                Ok(reply) => Reply::Ok(reply),
                Err(e) => Reply::Err(e.to_string()),
            },
            Err(e) => Reply::Err(e.to_string()),
        };
        framed.send(reply.encode()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{FramedTransport, Transport};
    use std::time::Duration;

    struct Upper;

    #[async_trait]
    impl RequestHandler for Upper {
        async fn handle(&self, payload: Bytes) -> Result<Bytes> {
            if payload.is_empty() {
                return Err(TreegerError::RelayError("empty payload".into()));
            }
            Ok(Bytes::from(payload.to_ascii_uppercase()))
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_tcp_round_trip_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let server = WorkerServer::bind("tcp://127.0.0.1:0", dir.path()).await.unwrap();
        let address = server.local_address().to_string();
        let task = tokio::spawn(server.serve(Arc::new(Upper)));

        let transport = FramedTransport::new(dir.path());
        assert!(transport.ping(&address, TIMEOUT).await);

        let reply = transport
            .relay(&address, Bytes::from_static(b"topo"), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(&reply[..], b"TOPO");

        let err = transport.relay(&address, Bytes::new(), TIMEOUT).await.unwrap_err();
        assert!(err.to_string().contains("empty payload"));

        assert!(transport.shutdown(&address, TIMEOUT).await);
        tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap().unwrap();
        assert!(!transport.ping(&address, Duration::from_millis(500)).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_memory_address_uses_socket_dir() {
        let dir = tempfile::tempdir().unwrap();
        let address = Address::memory_for_node("root/topo").to_string();
        let server = WorkerServer::bind(&address, dir.path()).await.unwrap();
        let handle = server.shutdown_handle();
        let task = tokio::spawn(server.serve(Arc::new(Upper)));

        assert!(dir.path().join("root_topo.sock").exists());

        let transport = FramedTransport::new(dir.path());
        assert!(transport.ping(&address, TIMEOUT).await);

        handle.notify_one();
        tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap().unwrap();
        assert!(!dir.path().join("root_topo.sock").exists());
    }

    #[tokio::test]
    async fn test_unreachable_address() {
        let transport = FramedTransport::new(std::env::temp_dir());
        assert!(!transport.ping("memory://treeger_no_such_worker", TIMEOUT).await);
        assert!(matches!(
            transport.relay("tcp://127.0.0.1:1", Bytes::new(), TIMEOUT).await,
            Err(TreegerError::RelayError(_))
        ));
    }
}
