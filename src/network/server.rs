//! WebSocket Round Server
//!
//! Transport adapter around the round engine. Every connection subscribes to
//! the hub on arrival and receives a snapshot followed by live events.
//! Spectators need no auth; betting and cashing out require a validated
//! token.
//!
//! ```text
//!  ws frame ──► ClientMessage ──► hub.place_bet / hub.cash_out ──► reply
//!  hub subscription ──► SubscriptionItem ──► ServerMessage ──► ws frame
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::game::hub::{BroadcastHub, Subscription, SubscriptionItem};
use crate::network::auth::{AuthError, Authenticator};
use crate::network::protocol::{BetRequest, ClientMessage, ErrorCode, ServerMessage};
use crate::network::session::{new_connection_id, ConnectionId, ConnectionRegistry, SessionError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Connections silent for longer than this are closed.
    pub idle_timeout: Duration,
    /// How often idle connections are swept.
    pub cleanup_interval: Duration,
    /// Outbound messages buffered per connection.
    pub outbound_buffer: usize,
    /// Default and maximum number of history entries per request.
    pub history_limit: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
            outbound_buffer: 256,
            history_limit: 50,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("CRASH_BIND_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind_addr),
            max_connections: std::env::var("CRASH_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            idle_timeout: std::env::var("CRASH_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            ..defaults
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection registry error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Auth misconfiguration.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),
}

/// Per-server state shared by every connection task.
struct Shared {
    config: ServerConfig,
    hub: BroadcastHub,
    auth: Authenticator,
    registry: ConnectionRegistry,
}

/// The game server.
pub struct GameServer {
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server in front of a running round engine.
    pub fn new(config: ServerConfig, hub: BroadcastHub, auth: Authenticator) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let registry = ConnectionRegistry::new(config.max_connections);
        Self {
            shared: Arc::new(Shared {
                config,
                hub,
                auth,
                registry,
            }),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.shared.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Round server listening on {}", listener.local_addr()?);

        let cleanup_shared = self.shared.clone();
        let cleanup_handle = tokio::spawn(async move {
            run_cleanup_loop(cleanup_shared).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        cleanup_handle.abort();
        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let shared = self.shared.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            match accept_async(stream).await {
                Ok(ws) => run_connection(shared, ws, addr, shutdown_rx).await,
                Err(e) => warn!("WebSocket handshake failed for {}: {}", addr, e),
            }
        });
    }

    /// Signal the server and every connection to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.shared.registry.count().await
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

async fn run_connection(shared: Arc<Shared>, ws: WsStream, addr: SocketAddr, mut shutdown_rx: broadcast::Receiver<()>) {
    let (mut ws_sender, mut ws_receiver) = ws.split();
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(shared.config.outbound_buffer.max(1));

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let id = new_connection_id();
    let kick = match shared.registry.register(id, msg_tx.clone()).await {
        Ok(kick) => kick,
        Err(e) => {
            warn!("Rejecting {}: {}", addr, e);
            let _ = msg_tx.send(ServerMessage::error(ErrorCode::ServerOverloaded, e)).await;
            drop(msg_tx);
            let _ = sender_task.await;
            return;
        }
    };

    let mut subscription = match shared.hub.subscribe().await {
        Ok(subscription) => subscription,
        Err(e) => {
            let _ = msg_tx.send(ServerMessage::error(ErrorCode::from(&e), e)).await;
            shared.registry.remove(&id).await;
            drop(msg_tx);
            let _ = sender_task.await;
            return;
        }
    };

    let connection = Connection {
        id,
        shared: shared.clone(),
        sender: msg_tx,
    };

    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        shared.registry.touch(&id).await;
                        match ClientMessage::from_json(&text) {
                            Ok(msg) => connection.handle(msg, &mut subscription).await,
                            Err(e) => {
                                debug!("Invalid message from {}: {}", addr, e);
                                connection
                                    .send(ServerMessage::error(ErrorCode::InvalidMessage, "Invalid message format"))
                                    .await;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        shared.registry.touch(&id).await;
                        connection
                            .send(ServerMessage::error(ErrorCode::InvalidMessage, "Binary frames not supported"))
                            .await;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        shared.registry.touch(&id).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client {} disconnected", addr);
                        break;
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error for {}: {}", addr, e);
                        break;
                    }
                    _ => {}
                }
            }
            item = subscription.next() => {
                match item {
                    Some(item) => connection.forward(item, &subscription).await,
                    None => {
                        connection
                            .send(ServerMessage::Shutdown { reason: "Round engine stopped".to_string() })
                            .await;
                        break;
                    }
                }
            }
            _ = kick.notified() => {
                debug!("Closing idle connection {}", addr);
                connection.send(ServerMessage::Shutdown { reason: "Idle timeout".to_string() }).await;
                break;
            }
            _ = shutdown_rx.recv() => {
                connection.send(ServerMessage::Shutdown { reason: "Server shutting down".to_string() }).await;
                break;
            }
        }
    }

    shared.registry.remove(&id).await;
    drop(connection);
    let _ = tokio::time::timeout(Duration::from_secs(1), sender_task).await;
    debug!("Client {} cleaned up", addr);
}

/// One client's view of the server.
struct Connection {
    id: ConnectionId,
    shared: Arc<Shared>,
    sender: mpsc::Sender<ServerMessage>,
}

impl Connection {
    async fn send(&self, msg: ServerMessage) {
        let _ = self.sender.send(msg).await;
    }

    async fn forward(&self, item: SubscriptionItem, subscription: &Subscription) {
        let msg = match item {
            SubscriptionItem::Snapshot(round) => ServerMessage::Snapshot {
                round,
                history: subscription.history().to_vec(),
            },
            SubscriptionItem::Event(event) => ServerMessage::from(event),
        };
        self.send(msg).await;
    }

    async fn handle(&self, msg: ClientMessage, subscription: &mut Subscription) {
        match msg {
            ClientMessage::Auth { token } => self.handle_auth(&token).await,
            ClientMessage::PlaceBet {
                stake,
                auto_cash_out_threshold,
            } => self.handle_place_bet(stake, auto_cash_out_threshold).await,
            ClientMessage::CashOut => self.handle_cash_out().await,
            ClientMessage::SyncRequest => match self.shared.hub.subscribe().await {
                Ok(fresh) => {
                    *subscription = fresh;
                }
                Err(e) => self.send(ServerMessage::error(ErrorCode::from(&e), e)).await,
            },
            ClientMessage::History { limit } => {
                let max = self.shared.config.history_limit;
                let entries = self.shared.hub.recent_history(limit.unwrap_or(max).min(max));
                self.send(ServerMessage::History { entries }).await;
            }
            ClientMessage::Ping { timestamp } => {
                self.send(ServerMessage::Pong {
                    timestamp,
                    server_time: chrono::Utc::now().timestamp_millis().max(0) as u64,
                })
                .await;
            }
        }
    }

    async fn handle_auth(&self, token: &str) {
        let reply = match self.shared.auth.authenticate(token) {
            Ok(identity) => {
                let participant_id = identity.participant_id;
                match self.shared.registry.authenticate(&self.id, identity).await {
                    Ok(()) => {
                        info!(participant = %participant_id.short(), "Client authenticated");
                        ServerMessage::AuthResult {
                            success: true,
                            participant_id: Some(participant_id),
                            error: None,
                            server_version: self.shared.config.version.clone(),
                        }
                    }
                    Err(e) => ServerMessage::error(ErrorCode::AuthFailed, e),
                }
            }
            Err(e) => {
                debug!("Auth failed: {}", e);
                let code = match e {
                    AuthError::Expired => ErrorCode::TokenExpired,
                    _ => ErrorCode::AuthFailed,
                };
                self.send(ServerMessage::error(code, &e)).await;
                ServerMessage::AuthResult {
                    success: false,
                    participant_id: None,
                    error: Some(e.to_string()),
                    server_version: self.shared.config.version.clone(),
                }
            }
        };
        self.send(reply).await;
    }

    async fn handle_place_bet(&self, stake: f64, auto_cash_out_threshold: Option<f64>) {
        let Some(participant_id) = self.shared.registry.participant(&self.id).await else {
            self.send(ServerMessage::error(ErrorCode::NotAuthenticated, "Authenticate before betting"))
                .await;
            return;
        };
        let request = match BetRequest::from_wire(stake, auto_cash_out_threshold) {
            Ok(request) => request,
            Err(rejection) => {
                self.send(ServerMessage::error(ErrorCode::from(&rejection), rejection)).await;
                return;
            }
        };

        let reply = match self
            .shared
            .hub
            .place_bet(participant_id, request.stake, request.auto_cash_out)
            .await
        {
            Ok(receipt) => ServerMessage::BetAccepted {
                round_id: receipt.round_id,
                stake: receipt.stake,
            },
            Err(e) => ServerMessage::error(ErrorCode::from(&e), e),
        };
        self.send(reply).await;
    }

    async fn handle_cash_out(&self) {
        let Some(participant_id) = self.shared.registry.participant(&self.id).await else {
            self.send(ServerMessage::error(ErrorCode::NotAuthenticated, "Authenticate before cashing out"))
                .await;
            return;
        };
        let reply = match self.shared.hub.cash_out(participant_id).await {
            Ok(cash_out) => ServerMessage::CashOutAccepted {
                multiplier: cash_out.multiplier,
                payout: cash_out.payout,
            },
            Err(e) => ServerMessage::error(ErrorCode::from(&e), e),
        };
        self.send(reply).await;
    }
}

async fn run_cleanup_loop(shared: Arc<Shared>) {
    let mut interval = interval(shared.config.cleanup_interval);
    loop {
        interval.tick().await;
        let evicted = shared.registry.evict_idle(shared.config.idle_timeout).await;
        if !evicted.is_empty() {
            info!(count = evicted.len(), "Removed idle clients");
        }
    }
}
