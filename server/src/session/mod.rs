//! Registry of connected clients

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::RwLock;

/// Connected client information
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: u64,
    pub peer_addr: SocketAddr,
    pub connected_at: Instant,
    pub last_seen: Instant,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
}

/// Session manager
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<u64, Session>>>,
    next_id: AtomicU64,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            max_sessions,
        }
    }

    /// Register a new connection, or `None` when the server is full
    pub async fn create_session(&self, peer_addr: SocketAddr) -> Option<u64> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.max_sessions {
            return None;
        }

        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        sessions.insert(
            session_id,
            Session {
                session_id,
                peer_addr,
                connected_at: now,
                last_seen: now,
                packets_received: 0,
                bytes_received: 0,
                packets_sent: 0,
            },
        );

        Some(session_id)
    }

    /// Count an inbound packet and update last_seen
    pub async fn record_packet(&self, session_id: u64, bytes: usize) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&session_id) {
            session.last_seen = Instant::now();
            session.packets_received += 1;
            session.bytes_received += bytes as u64;
        }
    }

    pub async fn record_sent(&self, session_id: u64) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&session_id) {
            session.packets_sent += 1;
        }
    }

    /// Drop a session, returning its final state
    pub async fn remove_session(&self, session_id: u64) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&session_id)
    }

    #[allow(dead_code)]
    pub async fn get_session(&self, session_id: u64) -> Option<Session> {
        let sessions = self.sessions.read().await;
        sessions.get(&session_id).cloned()
    }

    /// Get number of active sessions
    pub async fn active_sessions(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_session_limit() {
        let manager = SessionManager::new(2);
        let first = manager.create_session(addr(1000)).await.unwrap();
        let second = manager.create_session(addr(1001)).await.unwrap();
        assert_ne!(first, second);
        assert!(manager.create_session(addr(1002)).await.is_none());
        assert_eq!(manager.active_sessions().await, 2);

        manager.remove_session(first).await.unwrap();
        assert!(manager.create_session(addr(1002)).await.is_some());
    }

    #[tokio::test]
    async fn test_packet_accounting() {
        let manager = SessionManager::new(4);
        let id = manager.create_session(addr(2000)).await.unwrap();

        manager.record_packet(id, 20).await;
        manager.record_packet(id, 30).await;
        manager.record_sent(id).await;

        let session = manager.get_session(id).await.unwrap();
        assert_eq!(session.peer_addr, addr(2000));
        assert_eq!(session.packets_received, 2);
        assert_eq!(session.bytes_received, 50);
        assert_eq!(session.packets_sent, 1);
        assert!(session.last_seen >= session.connected_at);

        let removed = manager.remove_session(id).await.unwrap();
        assert_eq!(removed.session_id, id);
        assert!(manager.get_session(id).await.is_none());
        assert!(manager.remove_session(id).await.is_none());
    }
}
