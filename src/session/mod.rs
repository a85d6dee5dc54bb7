//! 接続クライアント（セッション）の管理

mod manager;
mod registry;
mod slot;

pub use manager::{Session, SessionManager};
pub use registry::SessionRegistry;
pub use slot::PlatformSlot;

use tokio::sync::mpsc;

use crate::server::types::ServerEvent;

/// セッションID（接続ごとに採番）
pub type SessionId = usize;

/// セッションへの送信口
///
/// 受信側はWebSocketの送信タスクが持つ。
#[derive(Debug, Clone)]
pub struct SessionOutbox {
    session_id: SessionId,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl SessionOutbox {
    pub fn channel(session_id: SessionId) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { session_id, tx }, rx)
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// 送信。切断済みならfalse
    pub fn send(&self, event: ServerEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Session {} is gone, dropping event: {:?}", self.session_id, e.0);
                false
            }
        }
    }
}
