//! SIP transport layer - a single UDP flow toward the registrar
//!
//! Unlike a server transport this owns exactly one socket, connected to the
//! SIP server the account registers against. Inbound messages are parsed and
//! pushed into an mpsc channel consumed by the user-agent event loop.

use super::message::{SipError, SipMessage};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Reconnect backoff bounds
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Incoming SIP message with source information
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub message: SipMessage,
    pub source: SocketAddr,
}

/// Transport seam between the managers and the network.
///
/// `send` fails with a transport error whenever no usable socket exists.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the flow toward `server` (host:port). Replaces any previous flow.
    async fn open(&self, server: &str) -> Result<(), SipError>;

    /// Tear the flow down; subsequent sends fail until reopened.
    async fn close(&self);

    /// Send a message over the flow.
    async fn send(&self, message: &SipMessage) -> Result<(), SipError>;

    /// Local socket address, once open
    fn local_addr(&self) -> SocketAddr;

    /// Hint whether a registration is live. While active, the transport
    /// reconnects with exponential backoff after unexpected socket failures.
    fn set_active(&self, active: bool);
}

type SocketSlot = Arc<RwLock<Option<Arc<UdpSocket>>>>;

/// UDP transport implementation
pub struct UdpTransport {
    socket: SocketSlot,
    local_addr: StdRwLock<Option<SocketAddr>>,
    active: Arc<AtomicBool>,
    tx: mpsc::Sender<IncomingMessage>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl UdpTransport {
    /// Create the transport plus the receiver side of its inbound channel.
    ///
    /// The transport keeps its sender for its whole lifetime, so the
    /// receiver never observes a closed channel while the transport lives.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<IncomingMessage>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                socket: Arc::new(RwLock::new(None)),
                local_addr: StdRwLock::new(None),
                active: Arc::new(AtomicBool::new(false)),
                tx,
                task: StdMutex::new(None),
            },
            rx,
        )
    }

    async fn bind_and_connect(server: &str) -> Result<Arc<UdpSocket>, SipError> {
        let server_addr = lookup_host(server)
            .await
            .map_err(|e| SipError::TransportError(format!("Failed to resolve {}: {}", server, e)))?
            .next()
            .ok_or_else(|| {
                SipError::TransportError(format!("No address found for {}", server))
            })?;

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| SipError::TransportError(format!("Failed to bind UDP socket: {}", e)))?;
        socket
            .connect(server_addr)
            .await
            .map_err(|e| {
                SipError::TransportError(format!("Failed to connect to {}: {}", server_addr, e))
            })?;

        Ok(Arc::new(socket))
    }

    async fn receive_loop(
        slot: SocketSlot,
        server: String,
        tx: mpsc::Sender<IncomingMessage>,
        active: Arc<AtomicBool>,
    ) {
        let mut buf = vec![0u8; 65535];

        loop {
            let socket = { slot.read().await.clone() };
            let Some(socket) = socket else {
                debug!("Socket gone, stopping receive loop");
                break;
            };

            match socket.recv_from(&mut buf).await {
                Ok((size, source)) => {
                    debug!("Received {} bytes from {} via UDP", size, source);

                    match SipMessage::parse(&buf[..size]) {
                        Ok(message) => {
                            let incoming = IncomingMessage { message, source };
                            if let Err(e) = tx.send(incoming).await {
                                error!("Failed to send incoming message to channel: {}", e);
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Failed to parse SIP message from {}: {}", source, e);
                        }
                    }
                }
                Err(e) => {
                    warn!("UDP receive failed: {}", e);
                    if !active.load(Ordering::SeqCst) {
                        break;
                    }
                    if !Self::reconnect(&slot, &server, &active).await {
                        break;
                    }
                }
            }
        }
    }

    /// Re-establish the flow with exponential backoff. Returns false when
    /// the transport went inactive before a socket came back.
    async fn reconnect(slot: &SocketSlot, server: &str, active: &AtomicBool) -> bool {
        let mut delay = BACKOFF_BASE;

        loop {
            if !active.load(Ordering::SeqCst) {
                return false;
            }

            info!("Reconnecting to {} in {:?}", server, delay);
            tokio::time::sleep(delay).await;

            match Self::bind_and_connect(server).await {
                Ok(socket) => {
                    info!("Reconnected to {}", server);
                    *slot.write().await = Some(socket);
                    return true;
                }
                Err(e) => {
                    warn!("Reconnect to {} failed: {}", server, e);
                    delay = (delay * 2).min(BACKOFF_CAP);
                }
            }
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn open(&self, server: &str) -> Result<(), SipError> {
        info!("Opening UDP flow to {}", server);

        let socket = Self::bind_and_connect(server).await?;
        let local = socket.local_addr().map_err(|e| {
            SipError::TransportError(format!("Failed to read local address: {}", e))
        })?;
        info!("UDP flow bound on {}", local);

        *self.socket.write().await = Some(socket);
        *self.local_addr.write().expect("local_addr lock") = Some(local);

        let task = tokio::spawn(Self::receive_loop(
            self.socket.clone(),
            server.to_string(),
            self.tx.clone(),
            self.active.clone(),
        ));
        if let Some(previous) = self.task.lock().expect("task lock").replace(task) {
            previous.abort();
        }

        Ok(())
    }

    async fn close(&self) {
        info!("Closing UDP flow");
        self.active.store(false, Ordering::SeqCst);
        *self.socket.write().await = None;
        if let Some(task) = self.task.lock().expect("task lock").take() {
            task.abort();
        }
    }

    async fn send(&self, message: &SipMessage) -> Result<(), SipError> {
        let socket = { self.socket.read().await.clone() };
        let socket = socket
            .ok_or_else(|| SipError::TransportError("Socket unavailable".to_string()))?;

        let data = message.to_bytes();
        debug!("Sending {} bytes via UDP", data.len());

        socket
            .send(&data)
            .await
            .map_err(|e| SipError::TransportError(format!("Failed to send UDP packet: {}", e)))?;

        Ok(())
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
            .read()
            .expect("local_addr lock")
            .unwrap_or_else(|| "0.0.0.0:0".parse().expect("default addr"))
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }
}
