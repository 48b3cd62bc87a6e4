// channel.rs: the radio link as send / receive-with-timeout
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, broadcast};
use tracing::warn;

use crate::ChannelError;

pub const MAX_DATAGRAM: usize = 4096;

#[async_trait]
pub trait Channel: Send + Sync {
    async fn send(&self, frame: &[u8]) -> Result<(), ChannelError>;

    /// `Ok(None)` when nothing arrived within `timeout`.
    async fn receive(&self, timeout: Duration) -> Result<Option<Vec<u8>>, ChannelError>;
}

// ================================== UDP =====================================

/// UDP stand-in for the RF link. Receivers share the port (SO_REUSEADDR) so
/// the ECU and an eavesdropper can listen side by side.
pub struct UdpChannel {
    sock: UdpSocket,
    target: Option<SocketAddr>,
}

impl UdpChannel {
    pub fn bind_receiver(addr: &str) -> Result<Self, ChannelError> {
        let addr: SocketAddr = addr.parse()?;
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        let sock = UdpSocket::from_std(socket.into())?;
        Ok(Self { sock, target: None })
    }

    /// Ephemeral local port, broadcast enabled, datagrams go to `target`.
    pub async fn broadcaster(target: &str) -> Result<Self, ChannelError> {
        let target: SocketAddr = target.parse()?;
        let sock = UdpSocket::bind("0.0.0.0:0").await?;
        sock.set_broadcast(true)?;
        Ok(Self {
            sock,
            target: Some(target),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ChannelError> {
        Ok(self.sock.local_addr()?)
    }
}

#[async_trait]
impl Channel for UdpChannel {
    async fn send(&self, frame: &[u8]) -> Result<(), ChannelError> {
        let target = self.target.ok_or(ChannelError::NoTarget)?;
        self.sock.send_to(frame, target).await?;
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Vec<u8>>, ChannelError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match tokio::time::timeout(timeout, self.sock.recv_from(&mut buf)).await {
            Err(_) => Ok(None),
            Ok(Ok((n, _from))) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }
}

// ================================ In-memory =================================

/// Broadcast bus: every endpoint sees every frame, including its own.
#[derive(Clone)]
pub struct MemoryChannel {
    tx: broadcast::Sender<Vec<u8>>,
    rx: Arc<Mutex<broadcast::Receiver<Vec<u8>>>>,
}

impl MemoryChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = broadcast::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Another endpoint on the same bus with its own receive cursor.
    pub fn endpoint(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: Arc::new(Mutex::new(self.tx.subscribe())),
        }
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send(&self, frame: &[u8]) -> Result<(), ChannelError> {
        self.tx
            .send(frame.to_vec())
            .map(|_| ())
            .map_err(|_| ChannelError::Closed)
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Vec<u8>>, ChannelError> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Err(_) => Ok(None),
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                warn!(skipped = n, "memory channel lagged; frames dropped");
                Ok(None)
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => Err(ChannelError::Closed),
        }
    }
}
