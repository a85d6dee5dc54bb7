use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use super::{
    client::{YouTubeApi, MAX_PAGE_SIZE},
    locator::LiveChatLocator,
    resolver::VideoResolver,
    state::PollState,
};
use crate::adapter::{AdapterContext, AdapterHandle};
use crate::chat::{ChatMessage, MessagePipeline, Platform, ProcessOutcome};
use crate::server::types::ServerEvent;

/// ポーラーの状態
///
/// `Idle → Resolving → Polling → Stopped`、解決失敗時は `Resolving → Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerPhase {
    Idle,
    Resolving,
    Polling,
    Stopped,
}

/// ポーリング終了理由
#[derive(Debug, Clone, PartialEq, Eq)]
enum StopReason {
    /// leave / disconnect による停止
    Cancelled,
    /// クォータ超過・アクセス拒否・配信終了
    Fatal(String),
}

/// 実行中ポーラーのハンドル
#[derive(Debug)]
pub struct PollHandle {
    adapter: AdapterHandle,
    phase: watch::Receiver<PollerPhase>,
}

impl PollHandle {
    pub fn phase(&self) -> PollerPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<PollerPhase> {
        self.phase.clone()
    }

    /// 解決中またはポーリング中
    pub fn is_active(&self) -> bool {
        self.adapter.is_active()
    }

    /// 停止を要求する。以後タイマーは発火しない
    pub fn stop(&self) -> bool {
        self.adapter.stop()
    }
}

/// YouTubeライブチャットのポーラー
pub struct ChatPoller {
    api: Arc<dyn YouTubeApi>,
    pipeline: Arc<MessagePipeline>,
    ctx: AdapterContext,
    phase: watch::Sender<PollerPhase>,
}

impl ChatPoller {
    pub fn new(api: Arc<dyn YouTubeApi>, pipeline: Arc<MessagePipeline>, ctx: AdapterContext) -> Self {
        let (phase, _) = watch::channel(PollerPhase::Idle);
        Self {
            api,
            pipeline,
            ctx,
            phase,
        }
    }

    /// 解決とポーリングを専用タスクで開始
    pub fn spawn(self, identifier: String) -> PollHandle {
        self.phase.send_replace(PollerPhase::Resolving);
        let phase = self.phase.subscribe();
        let lifecycle = self.ctx.lifecycle.clone();
        let adapter = AdapterHandle::spawn(lifecycle, async move {
            self.run(identifier).await;
        });
        PollHandle { adapter, phase }
    }

    async fn run(self, identifier: String) {
        let session_id = self.ctx.session_id;

        let Some((video_id, live_chat_id)) = self.resolve(&identifier).await else {
            self.phase.send_replace(PollerPhase::Stopped);
            return;
        };

        if !self.ctx.is_alive() {
            log::debug!("Session {}: YouTube join for {} abandoned", session_id, identifier);
            self.phase.send_replace(PollerPhase::Stopped);
            return;
        }

        self.ctx
            .system_msg(format!("YouTube chat connected (video: {})", video_id));
        self.ctx.emit(ServerEvent::YoutubeConnected(video_id));
        self.phase.send_replace(PollerPhase::Polling);

        let state = PollState::new(live_chat_id.clone(), Utc::now());
        let reason = self.poll_loop(state).await;

        if let StopReason::Fatal(message) = &reason {
            self.ctx.system_msg(message.clone());
            self.ctx.emit(ServerEvent::YoutubeDisconnected);
        }
        self.phase.send_replace(PollerPhase::Stopped);
        log::info!(
            "Session {}: polling of {} ended ({:?})",
            session_id,
            live_chat_id,
            reason
        );
    }

    /// 入力 → 動画ID → ライブチャットID
    async fn resolve(&self, identifier: &str) -> Option<(String, String)> {
        let resolver = VideoResolver::new(Arc::clone(&self.api));
        let Some(video_id) = resolver.resolve(identifier).await else {
            self.ctx
                .system_msg("Could not find a live video ID. Please enter the video ID directly.");
            return None;
        };
        log::info!("Video ID resolved: {} -> {}", identifier, video_id);

        let locator = LiveChatLocator::new(Arc::clone(&self.api));
        let Some(live_chat_id) = locator.locate(&video_id).await else {
            self.ctx.system_msg("No active live chat found for this video.");
            return None;
        };

        Some((video_id, live_chat_id))
    }

    async fn poll_loop(&self, mut state: PollState) -> StopReason {
        // 初回は待たずに取得
        if let Err(reason) = self.tick(&mut state).await {
            return reason;
        }

        let mut ticker = new_ticker(state.polling_interval());

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.ctx.lifecycle.stopped() => return StopReason::Cancelled,
            }
            if !self.ctx.is_alive() {
                return StopReason::Cancelled;
            }

            match self.tick(&mut state).await {
                Ok(true) => {
                    // 間隔を書き換えずにタイマーを作り直す
                    log::debug!(
                        "Polling interval changed to {}ms for {}",
                        state.polling_interval_millis,
                        state.live_chat_id
                    );
                    ticker = new_ticker(state.polling_interval());
                }
                Ok(false) => {}
                Err(reason) => return reason,
            }
        }
    }

    /// 1回分の取得と転送。間隔が変わった場合は`Ok(true)`
    async fn tick(&self, state: &mut PollState) -> Result<bool, StopReason> {
        let result = self
            .api
            .list_chat_messages(&state.live_chat_id, state.next_page_token.as_deref(), MAX_PAGE_SIZE)
            .await;

        // 取得中に破棄された場合は結果を捨てる
        if !self.ctx.is_alive() {
            return Err(StopReason::Cancelled);
        }

        match result {
            Ok(response) => {
                let interval_changed =
                    state.apply_page(response.next_page_token, response.polling_interval_millis);
                log::debug!(
                    "Poll #{} for {}: {} items",
                    state.poll_count,
                    state.live_chat_id,
                    response.items.len()
                );

                for message in state.select_fresh(&response.items) {
                    log::debug!("Forwarding YouTube message {} from {}", message.id, message.user);
                    let chat = ChatMessage::new(Platform::Youtube, message.user, message.text);
                    if self.pipeline.process(chat, &self.ctx).await == ProcessOutcome::Discarded {
                        return Err(StopReason::Cancelled);
                    }
                }
                Ok(interval_changed)
            }
            Err(e) if e.is_fatal() => {
                log::error!("YouTube chat poll error for {}: {}", state.live_chat_id, e);
                Err(StopReason::Fatal(e.stop_message()))
            }
            Err(e) => {
                // 一時的なエラー: 次のティックで再試行
                log::warn!("YouTube chat poll error for {} (retrying): {}", state.live_chat_id, e);
                Ok(false)
            }
        }
    }
}

fn new_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
