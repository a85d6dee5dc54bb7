use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::{SessionId, SessionOutbox};
use crate::server::types::ServerEvent;

/// 接続中セッションの一覧
pub struct SessionRegistry {
    peers: RwLock<HashMap<SessionId, SessionOutbox>>,
    next_session_id: AtomicUsize,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            next_session_id: AtomicUsize::new(0),
        }
    }

    /// 新しいセッションIDを取得
    pub fn next_id(&self) -> SessionId {
        self.next_session_id.fetch_add(1, Ordering::SeqCst)
    }

    pub async fn add_session(&self, outbox: SessionOutbox) {
        let mut peers = self.peers.write().await;
        let session_id = outbox.session_id();
        peers.insert(session_id, outbox);
        log::info!("Session {} connected. Total sessions: {}", session_id, peers.len());
    }

    pub async fn remove_session(&self, session_id: SessionId) {
        let mut peers = self.peers.write().await;
        if peers.remove(&session_id).is_some() {
            log::info!("Session {} disconnected. Total sessions: {}", session_id, peers.len());
        }
    }

    pub async fn session_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// 全セッションにイベントをブロードキャストし、届いた数を返す
    pub async fn broadcast(&self, event: ServerEvent) -> usize {
        let peers = self.peers.read().await;
        let mut delivered = 0;

        for (session_id, outbox) in peers.iter() {
            if outbox.send(event.clone()) {
                delivered += 1;
            } else {
                log::warn!("Failed to send broadcast to session {}", session_id);
            }
        }

        log::debug!("Broadcasted to {}/{} sessions: {:?}", delivered, peers.len(), event);
        delivered
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
