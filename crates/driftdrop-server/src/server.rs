//! UDP rendezvous server.
//!
//! Accepts coordination requests as bincode datagrams, tracks connected
//! clients, and pushes notifications back out over the same socket. All
//! session semantics live in `driftdrop-core`; this module only does
//! datagram plumbing and client liveness.

use driftdrop_core::coordinator::{Coordinator, MessageBus};
use driftdrop_core::protocol::{CoordRequest, CoordResponse, Notification, ServerMessage};
use driftdrop_core::session::ConnectionId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc};

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket operation failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection id to socket address mapping, shared with the bus.
type AddrBook = Arc<RwLock<HashMap<ConnectionId, SocketAddr>>>;

/// Outbound datagrams, drained by the forwarder task.
type Outbound = mpsc::UnboundedSender<(SocketAddr, Vec<u8>)>;

/// Bus that resolves connection ids to addresses and queues datagrams.
///
/// Delivery to an unknown connection is dropped silently; the peer is
/// already gone and notifications are at-least-once by contract.
struct UdpBus {
    book: AddrBook,
    outbound: Outbound,
}

impl MessageBus for UdpBus {
    fn deliver(&self, to: ConnectionId, notification: Notification) {
        let addr = match self.book.read() {
            Ok(book) => book.get(&to).copied(),
            Err(_) => None,
        };
        let Some(addr) = addr else {
            tracing::trace!(%to, "notification for unknown connection dropped");
            return;
        };
        match ServerMessage::Notification(notification).to_bytes() {
            Ok(bytes) => {
                let _ = self.outbound.send((addr, bytes));
            }
            Err(err) => tracing::warn!(%to, %err, "notification encode failed"),
        }
    }
}

/// Client connection information
#[derive(Debug, Clone)]
struct ClientConnection {
    /// Client's socket address
    addr: SocketAddr,
    /// Last seen time
    last_seen: Instant,
}

impl ClientConnection {
    fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            last_seen: Instant::now(),
        }
    }

    /// Update last seen time
    fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Check if connection is alive
    fn is_alive(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() < timeout
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of concurrent clients
    pub max_clients: usize,
    /// Client timeout duration
    pub client_timeout: Duration,
    /// Cleanup interval
    pub cleanup_interval: Duration,
    /// Session time-to-live
    pub session_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_clients: 10_000,
            client_timeout: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(30),
            session_ttl: Duration::from_secs(3600),
        }
    }
}

/// Mutable server state: the coordinator plus client bookkeeping.
struct State {
    coordinator: Coordinator<UdpBus>,
    clients: HashMap<ConnectionId, ClientConnection>,
    by_addr: HashMap<SocketAddr, ConnectionId>,
    next_id: u64,
}

/// UDP rendezvous server for driftdrop shares.
pub struct RendezvousServer {
    socket: Arc<UdpSocket>,
    state: Arc<Mutex<State>>,
    book: AddrBook,
    outbound: Outbound,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<(SocketAddr, Vec<u8>)>>>,
    config: ServerConfig,
}

impl RendezvousServer {
    /// Bind the server with default configuration.
    ///
    /// # Errors
    ///
    /// Returns error if socket binding fails.
    pub async fn bind(bind_addr: SocketAddr) -> Result<Self, ServerError> {
        Self::bind_with_config(bind_addr, ServerConfig::default()).await
    }

    /// Bind the server with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns error if socket binding fails.
    pub async fn bind_with_config(
        bind_addr: SocketAddr,
        config: ServerConfig,
    ) -> Result<Self, ServerError> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let book: AddrBook = Arc::new(RwLock::new(HashMap::new()));

        let bus = UdpBus {
            book: book.clone(),
            outbound: tx.clone(),
        };

        Ok(Self {
            socket: Arc::new(socket),
            state: Arc::new(Mutex::new(State {
                coordinator: Coordinator::new(bus),
                clients: HashMap::new(),
                by_addr: HashMap::new(),
                next_id: 0,
            })),
            book,
            outbound: tx,
            outbound_rx: Mutex::new(Some(rx)),
            config,
        })
    }

    /// The address the server is actually bound to.
    ///
    /// # Errors
    ///
    /// Returns error if the local address cannot be determined.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    /// Run the server: the main receive loop plus forwarder and cleanup
    /// tasks.
    ///
    /// # Errors
    ///
    /// Returns error if socket operations fail.
    pub async fn run(&self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.local_addr()?, "rendezvous server listening");

        self.spawn_forwarder().await;
        self.spawn_cleanup_task();

        let mut buf = vec![0u8; 65536];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, from)) => {
                    self.handle_datagram(&buf[..len], from).await;
                }
                Err(err) => {
                    tracing::warn!(%err, "receive error");
                }
            }
        }
    }

    /// Number of connected clients.
    pub async fn client_count(&self) -> usize {
        self.state.lock().await.clients.len()
    }

    async fn handle_datagram(&self, packet: &[u8], from: SocketAddr) {
        let request = match CoordRequest::from_bytes(packet) {
            Ok(request) => request,
            Err(err) => {
                tracing::trace!(%from, %err, "undecodable datagram ignored");
                return;
            }
        };

        let mut state = self.state.lock().await;
        let conn = state.by_addr.get(&from).copied();
        if let Some(conn) = conn {
            if let Some(client) = state.clients.get_mut(&conn) {
                client.touch();
            }
        }

        match request {
            CoordRequest::Hello => {
                if let Some(conn) = conn {
                    // Duplicate hello from a known address: same identity
                    self.respond(from, CoordResponse::Welcome { connection_id: conn });
                    return;
                }
                if state.clients.len() >= self.config.max_clients {
                    self.respond(
                        from,
                        CoordResponse::Error {
                            message: "server at capacity".to_string(),
                        },
                    );
                    return;
                }
                state.next_id += 1;
                let conn = ConnectionId(state.next_id);
                state.clients.insert(conn, ClientConnection::new(from));
                state.by_addr.insert(from, conn);
                if let Ok(mut book) = self.book.write() {
                    book.insert(conn, from);
                }
                tracing::info!(%conn, %from, "client connected");
                self.respond(from, CoordResponse::Welcome { connection_id: conn });
            }
            CoordRequest::CreateShare => {
                let Some(conn) = conn else {
                    self.respond_not_connected(from);
                    return;
                };
                let share_id = state.coordinator.create_share(conn);
                self.respond(from, CoordResponse::ShareCreated { share_id });
            }
            CoordRequest::JoinShare { share_id } => {
                let Some(conn) = conn else {
                    self.respond_not_connected(from);
                    return;
                };
                let reply = state.coordinator.join_share(conn, &share_id);
                self.respond(
                    from,
                    CoordResponse::JoinResult {
                        ok: reply.ok,
                        message: reply.message,
                        metadata: reply.metadata,
                    },
                );
            }
            CoordRequest::PublishOwnerId {
                share_id,
                rendezvous_id,
            } => {
                // Fire-and-forget; ignored from unknown addresses
                if conn.is_some() {
                    state.coordinator.publish_owner_id(&share_id, rendezvous_id);
                }
            }
            CoordRequest::PublishReceiverId {
                share_id,
                rendezvous_id,
            } => {
                if let Some(conn) = conn {
                    state
                        .coordinator
                        .publish_receiver_id(&share_id, conn, rendezvous_id);
                }
            }
            CoordRequest::PublishMetadata { share_id, metadata } => {
                let Some(conn) = conn else {
                    self.respond_not_connected(from);
                    return;
                };
                if let Err(err) = state.coordinator.publish_metadata(conn, &share_id, metadata) {
                    self.respond(
                        from,
                        CoordResponse::Error {
                            message: err.to_string(),
                        },
                    );
                }
            }
            CoordRequest::RequestDownload {
                share_id,
                rendezvous_id,
            } => {
                let Some(conn) = conn else {
                    self.respond_not_connected(from);
                    return;
                };
                if let Err(err) = state
                    .coordinator
                    .request_download(conn, &share_id, rendezvous_id)
                {
                    self.respond(
                        from,
                        CoordResponse::Error {
                            message: err.to_string(),
                        },
                    );
                }
            }
            CoordRequest::Goodbye => {
                if let Some(conn) = conn {
                    tracing::info!(%conn, %from, "client disconnected");
                    Self::drop_client(&mut state, &self.book, conn);
                }
            }
        }
    }

    /// Remove a client and let the coordinator react to the disconnect.
    ///
    /// The address book entry goes first so termination notifications for
    /// the departing client are dropped rather than echoed back.
    fn drop_client(state: &mut State, book: &AddrBook, conn: ConnectionId) {
        if let Some(client) = state.clients.remove(&conn) {
            state.by_addr.remove(&client.addr);
        }
        if let Ok(mut book) = book.write() {
            book.remove(&conn);
        }
        state.coordinator.connection_closed(conn);
    }

    fn respond(&self, addr: SocketAddr, response: CoordResponse) {
        match ServerMessage::Response(response).to_bytes() {
            Ok(bytes) => {
                let _ = self.outbound.send((addr, bytes));
            }
            Err(err) => tracing::warn!(%addr, %err, "response encode failed"),
        }
    }

    fn respond_not_connected(&self, addr: SocketAddr) {
        self.respond(
            addr,
            CoordResponse::Error {
                message: "not connected".to_string(),
            },
        );
    }

    /// Spawn the task that drains queued datagrams onto the socket.
    async fn spawn_forwarder(&self) {
        let rx = self.outbound_rx.lock().await.take();
        if let Some(mut rx) = rx {
            let socket = self.socket.clone();
            tokio::spawn(async move {
                while let Some((addr, bytes)) = rx.recv().await {
                    if let Err(err) = socket.send_to(&bytes, addr).await {
                        tracing::debug!(%addr, %err, "outbound send failed");
                    }
                }
            });
        }
    }

    /// Spawn the task that drops stale clients and expires old sessions.
    fn spawn_cleanup_task(&self) {
        let state = self.state.clone();
        let book = self.book.clone();
        let timeout = self.config.client_timeout;
        let session_ttl = self.config.session_ttl;
        let interval = self.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;

                let mut state = state.lock().await;
                let stale: Vec<ConnectionId> = state
                    .clients
                    .iter()
                    .filter(|(_, client)| !client.is_alive(timeout))
                    .map(|(conn, _)| *conn)
                    .collect();
                for conn in stale {
                    tracing::info!(%conn, "client timed out");
                    Self::drop_client(&mut state, &book, conn);
                }

                state.coordinator.expire_stale(session_ttl);
            }
        });
    }
}
