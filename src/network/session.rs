//! Connection Registry
//!
//! Tracks every open WebSocket connection: who it is authenticated as, when
//! it was last active, and how to reach it. The round engine knows nothing
//! about connections; this is purely transport bookkeeping.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify, RwLock};
use tokio::time::Instant;

use crate::game::state::ParticipantId;
use crate::network::auth::Identity;
use crate::network::protocol::ServerMessage;

/// Unique connection identifier.
pub type ConnectionId = [u8; 16];

/// Generate a fresh connection id.
pub fn new_connection_id() -> ConnectionId {
    uuid::Uuid::new_v4().into_bytes()
}

/// One open connection.
#[derive(Debug)]
pub struct ConnectedClient {
    /// Identity once authenticated. Spectators stay `None`.
    pub identity: Option<Identity>,
    /// When the connection was opened.
    pub connected_at: Instant,
    /// Last inbound frame.
    pub last_activity: Instant,
    /// Outbound queue.
    pub sender: mpsc::Sender<ServerMessage>,
    /// Signalled to make the connection close itself.
    pub kick: Arc<Notify>,
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Connection limit reached.
    #[error("connection limit reached ({0})")]
    Full(usize),

    /// No such connection.
    #[error("connection not found")]
    NotFound,
}

/// All open connections.
pub struct ConnectionRegistry {
    clients: RwLock<BTreeMap<ConnectionId, ConnectedClient>>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a registry admitting at most `max_connections`.
    pub fn new(max_connections: usize) -> Self {
        Self {
            clients: RwLock::new(BTreeMap::new()),
            max_connections,
        }
    }

    /// Register a new connection. Returns the handle it should wait on to be
    /// kicked.
    pub async fn register(
        &self,
        id: ConnectionId,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<Arc<Notify>, SessionError> {
        let mut clients = self.clients.write().await;
        if clients.len() >= self.max_connections {
            return Err(SessionError::Full(self.max_connections));
        }
        let now = Instant::now();
        let kick = Arc::new(Notify::new());
        clients.insert(
            id,
            ConnectedClient {
                identity: None,
                connected_at: now,
                last_activity: now,
                sender,
                kick: kick.clone(),
            },
        );
        Ok(kick)
    }

    /// Attach an authenticated identity. Re-authenticating replaces it.
    pub async fn authenticate(&self, id: &ConnectionId, identity: Identity) -> Result<(), SessionError> {
        let mut clients = self.clients.write().await;
        let client = clients.get_mut(id).ok_or(SessionError::NotFound)?;
        client.identity = Some(identity);
        Ok(())
    }

    /// Participant the connection is authenticated as.
    pub async fn participant(&self, id: &ConnectionId) -> Option<ParticipantId> {
        let clients = self.clients.read().await;
        clients
            .get(id)
            .and_then(|c| c.identity.as_ref())
            .map(|identity| identity.participant_id)
    }

    /// Record inbound activity.
    pub async fn touch(&self, id: &ConnectionId) {
        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get_mut(id) {
            client.last_activity = Instant::now();
        }
    }

    /// Remove a connection.
    pub async fn remove(&self, id: &ConnectionId) -> Option<ConnectedClient> {
        self.clients.write().await.remove(id)
    }

    /// Number of open connections.
    pub async fn count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Number of authenticated connections.
    pub async fn authenticated_count(&self) -> usize {
        let clients = self.clients.read().await;
        clients.values().filter(|c| c.identity.is_some()).count()
    }

    /// Kick and remove connections idle for longer than `timeout`.
    pub async fn evict_idle(&self, timeout: Duration) -> Vec<ConnectionId> {
        let now = Instant::now();
        let mut clients = self.clients.write().await;
        let idle: Vec<ConnectionId> = clients
            .iter()
            .filter(|(_, c)| now.saturating_duration_since(c.last_activity) > timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in &idle {
            if let Some(client) = clients.remove(id) {
                client.kick.notify_one();
            }
        }
        idle
    }

    /// Send a message to every open connection.
    pub async fn broadcast(&self, message: ServerMessage) {
        let clients = self.clients.read().await;
        for client in clients.values() {
            let _ = client.sender.try_send(message.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(subject: &str) -> Identity {
        Identity {
            participant_id: ParticipantId::from_subject(subject),
            subject: subject.into(),
        }
    }

    #[tokio::test]
    async fn test_register_and_remove() {
        let registry = ConnectionRegistry::new(10);
        let (tx, _rx) = mpsc::channel(4);
        let id = new_connection_id();

        registry.register(id, tx).await.unwrap();
        assert_eq!(registry.count().await, 1);
        assert_eq!(registry.participant(&id).await, None);

        assert!(registry.remove(&id).await.is_some());
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let registry = ConnectionRegistry::new(1);
        let (tx, _rx) = mpsc::channel(4);
        registry.register(new_connection_id(), tx.clone()).await.unwrap();
        assert_eq!(
            registry.register(new_connection_id(), tx).await.unwrap_err(),
            SessionError::Full(1)
        );
    }

    #[tokio::test]
    async fn test_authenticate() {
        let registry = ConnectionRegistry::new(10);
        let (tx, _rx) = mpsc::channel(4);
        let id = new_connection_id();
        registry.register(id, tx).await.unwrap();

        registry.authenticate(&id, identity("alice")).await.unwrap();
        assert_eq!(registry.participant(&id).await, Some(ParticipantId::from_subject("alice")));
        assert_eq!(registry.authenticated_count().await, 1);

        assert_eq!(
            registry.authenticate(&new_connection_id(), identity("bob")).await,
            Err(SessionError::NotFound)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_idle() {
        let registry = ConnectionRegistry::new(10);
        let (tx, _rx) = mpsc::channel(4);
        let stale = new_connection_id();
        let fresh = new_connection_id();
        let kick = registry.register(stale, tx.clone()).await.unwrap();
        registry.register(fresh, tx).await.unwrap();

        tokio::time::advance(Duration::from_secs(200)).await;
        registry.touch(&fresh).await;
        tokio::time::advance(Duration::from_secs(200)).await;

        let evicted = registry.evict_idle(Duration::from_secs(300)).await;
        assert_eq!(evicted, vec![stale]);
        assert_eq!(registry.count().await, 1);

        // The stored permit wakes the connection immediately
        kick.notified().await;
    }

    #[tokio::test]
    async fn test_broadcast() {
        let registry = ConnectionRegistry::new(10);
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        registry.register(new_connection_id(), tx1).await.unwrap();
        registry.register(new_connection_id(), tx2).await.unwrap();

        registry
            .broadcast(ServerMessage::Shutdown { reason: "bye".into() })
            .await;
        assert!(matches!(rx1.recv().await, Some(ServerMessage::Shutdown { .. })));
        assert!(matches!(rx2.recv().await, Some(ServerMessage::Shutdown { .. })));
    }
}
