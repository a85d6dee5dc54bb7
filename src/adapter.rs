//! チャットソースアダプター共通のライフサイクル管理
//!
//! Twitch（プッシュ型）とYouTube（ポーリング型）のアダプターはどちらも
//! 専用タスクで動作し、以下の共通ルールに従う：
//! - 停止時は生存フラグを落として停止シグナルを送る（次の待機点でタスク終了）
//! - 実行中のリクエストは完了させるが、結果は生存チェックで破棄する
//! - 破棄済みアダプターからはイベントを一切送信しない

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::server::types::ServerEvent;
use crate::session::{SessionId, SessionOutbox};
use crate::tts::Voice;

/// アダプターの生存フラグと停止シグナル
#[derive(Debug, Clone)]
pub struct AdapterLifecycle {
    alive: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
}

impl AdapterLifecycle {
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
            stop_signal: Arc::new(Notify::new()),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// 停止を要求する（冪等）
    pub fn stop(&self) {
        self.alive.store(false, Ordering::SeqCst);
        // 待機中でなくてもpermitが残るので取りこぼさない
        self.stop_signal.notify_one();
    }

    /// 停止要求を待つ
    pub async fn stopped(&self) {
        if !self.is_alive() {
            return;
        }
        self.stop_signal.notified().await;
    }
}

impl Default for AdapterLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// アダプタータスクに渡すセッション側のコンテキスト
#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub session_id: SessionId,
    pub outbox: SessionOutbox,
    /// 現在の音声設定（処理時点の値を読む）
    pub voice: watch::Receiver<Voice>,
    pub lifecycle: AdapterLifecycle,
}

impl AdapterContext {
    pub fn new(session_id: SessionId, outbox: SessionOutbox, voice: watch::Receiver<Voice>) -> Self {
        Self {
            session_id,
            outbox,
            voice,
            lifecycle: AdapterLifecycle::new(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.lifecycle.is_alive()
    }

    pub fn current_voice(&self) -> Voice {
        *self.voice.borrow()
    }

    /// アダプターが生きている場合のみセッションへ送信する
    ///
    /// 送信した場合はtrueを返す
    pub fn emit(&self, event: ServerEvent) -> bool {
        if !self.is_alive() {
            log::debug!(
                "Session {}: dropping event from torn-down adapter: {:?}",
                self.session_id,
                event
            );
            return false;
        }
        self.outbox.send(event)
    }

    pub fn system_msg(&self, text: impl Into<String>) -> bool {
        self.emit(ServerEvent::SystemMsg(text.into()))
    }
}

/// 実行中アダプタータスクのハンドル
///
/// ドロップ時にも停止を要求する。
#[derive(Debug)]
pub struct AdapterHandle {
    lifecycle: AdapterLifecycle,
    task: JoinHandle<()>,
}

impl AdapterHandle {
    /// コンテキストのライフサイクルに紐づけてタスクを起動
    pub fn spawn<F>(lifecycle: AdapterLifecycle, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            lifecycle,
            task: tokio::spawn(future),
        }
    }

    /// 停止要求前で、かつタスクがまだ終了していない
    pub fn is_active(&self) -> bool {
        self.lifecycle.is_alive() && !self.task.is_finished()
    }

    /// 停止を要求し、停止前にアクティブだったかを返す
    pub fn stop(&self) -> bool {
        let was_active = self.is_active();
        self.lifecycle.stop();
        was_active
    }

    /// タスクの終了を待つ（テスト用、1回だけ呼ぶこと）
    #[cfg(test)]
    pub async fn wait_finished(&mut self) {
        let _ = (&mut self.task).await;
    }
}

impl Drop for AdapterHandle {
    fn drop(&mut self) {
        self.lifecycle.stop();
    }
}
