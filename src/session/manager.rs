//! セッションごとのコマンド処理とアダプター管理
//!
//! 各セッションはプラットフォームごとに最大1つのアダプターを持つ。
//! 同じプラットフォームへの再joinは既存アダプターを停止してから置き換える。

use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use super::{PlatformSlot, SessionId, SessionOutbox, SessionRegistry};
use crate::adapter::AdapterContext;
use crate::chat::{Blocklist, MessagePipeline};
use crate::server::types::{ClientCommand, ServerEvent};
use crate::tts::Voice;
use crate::twitch::{PushChatAdapter, PushChatClient};
use crate::youtube::{ChatPoller, YouTubeApi};

/// セッションの生成と共有リソースの保持
#[derive(Clone)]
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    blocklist: Arc<Blocklist>,
    pipeline: Arc<MessagePipeline>,
    /// APIキー未設定ならNone
    youtube: Option<Arc<dyn YouTubeApi>>,
    twitch: Arc<dyn PushChatClient>,
}

impl SessionManager {
    pub fn new(
        blocklist: Arc<Blocklist>,
        pipeline: Arc<MessagePipeline>,
        youtube: Option<Arc<dyn YouTubeApi>>,
        twitch: Arc<dyn PushChatClient>,
    ) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            blocklist,
            pipeline,
            youtube,
            twitch,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// 新しいセッションを登録し、現在のブロックリストを送る
    pub async fn open_session(&self) -> (Session, mpsc::UnboundedReceiver<ServerEvent>) {
        let id = self.registry.next_id();
        let (outbox, rx) = SessionOutbox::channel(id);
        self.blocklist.subscribe(&self.registry, outbox.clone()).await;

        let (voice, _) = watch::channel(Voice::default());
        let session = Session {
            id,
            outbox,
            voice,
            twitch: PlatformSlot::Empty,
            youtube: PlatformSlot::Empty,
            manager: self.clone(),
            closed: false,
        };
        (session, rx)
    }
}

/// 接続中クライアント1つ分の状態
///
/// コマンドは接続タスクから順番に渡される。
pub struct Session {
    id: SessionId,
    outbox: SessionOutbox,
    voice: watch::Sender<Voice>,
    twitch: PlatformSlot,
    youtube: PlatformSlot,
    manager: SessionManager,
    /// `close` 済みならtrue
    closed: bool,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn voice(&self) -> Voice {
        *self.voice.borrow()
    }

    pub fn twitch_slot(&self) -> &PlatformSlot {
        &self.twitch
    }

    pub fn youtube_slot(&self) -> &PlatformSlot {
        &self.youtube
    }

    pub async fn handle(&mut self, command: ClientCommand) {
        log::debug!("Session {}: command {:?}", self.id, command);
        match command {
            ClientCommand::JoinTwitch(channel) => self.join_twitch(&channel),
            ClientCommand::LeaveTwitch => self.leave_twitch(),
            ClientCommand::JoinYoutube(identifier) => self.join_youtube(&identifier),
            ClientCommand::LeaveYoutube => self.leave_youtube(),
            ClientCommand::DisconnectChannels => self.disconnect_channels(),
            ClientCommand::ChangeVoice(voice) => self.change_voice(&voice),
            ClientCommand::MuteUser(user) => self.mute_user(&user).await,
            ClientCommand::UnmuteUser(user) => self.unmute_user(&user).await,
        }
    }

    /// 切断時の後始末（通知は送らない）
    pub async fn close(mut self) {
        self.twitch.teardown();
        self.youtube.teardown();
        self.manager.registry.remove_session(self.id).await;
        self.closed = true;
        log::info!("Session {} closed", self.id);
    }

    fn send(&self, event: ServerEvent) {
        self.outbox.send(event);
    }

    fn system_msg(&self, text: impl Into<String>) {
        self.send(ServerEvent::SystemMsg(text.into()));
    }

    fn adapter_context(&self) -> AdapterContext {
        AdapterContext::new(self.id, self.outbox.clone(), self.voice.subscribe())
    }

    fn join_twitch(&mut self, channel: &str) {
        let channel = channel.trim();
        if channel.is_empty() {
            log::debug!("Session {}: ignoring join_twitch without channel", self.id);
            return;
        }

        let adapter = PushChatAdapter::new(
            Arc::clone(&self.manager.twitch),
            Arc::clone(&self.manager.pipeline),
            self.adapter_context(),
        );
        // 旧アダプターを止めてから新しいものを起動する
        self.twitch.teardown();
        self.twitch = PlatformSlot::PushActive(adapter.spawn(channel.to_string()));
        log::info!("Session {}: joining Twitch {}", self.id, channel);
    }

    fn leave_twitch(&mut self) {
        if self.twitch.teardown() {
            self.system_msg("Twitch connection closed.");
            self.send(ServerEvent::TwitchDisconnected);
            log::info!("Session {}: left Twitch", self.id);
        }
    }

    fn join_youtube(&mut self, identifier: &str) {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            log::debug!("Session {}: ignoring join_youtube without identifier", self.id);
            return;
        }

        let Some(api) = self.manager.youtube.clone() else {
            log::warn!("Session {}: join_youtube rejected, API key not configured", self.id);
            self.system_msg("YouTube error: API key not configured");
            return;
        };

        let poller = ChatPoller::new(api, Arc::clone(&self.manager.pipeline), self.adapter_context());
        self.youtube.teardown();
        self.youtube = PlatformSlot::PollActive(poller.spawn(identifier.to_string()));
        log::info!("Session {}: joining YouTube {}", self.id, identifier);
    }

    fn leave_youtube(&mut self) {
        if self.youtube.teardown() {
            self.system_msg("YouTube connection closed.");
            self.send(ServerEvent::YoutubeDisconnected);
            log::info!("Session {}: left YouTube", self.id);
        }
    }

    fn disconnect_channels(&mut self) {
        if self.twitch.teardown() {
            self.send(ServerEvent::TwitchDisconnected);
        }
        if self.youtube.teardown() {
            self.send(ServerEvent::YoutubeDisconnected);
        }
        self.system_msg("All connections closed and TTS stopped.");
        log::info!("Session {}: disconnected all channels", self.id);
    }

    /// 許可された音声のみ受け付ける。それ以外は無視
    fn change_voice(&mut self, voice: &str) {
        match voice.parse::<Voice>() {
            Ok(voice) => {
                self.voice.send_replace(voice);
                log::info!("Session {}: voice changed to {}", self.id, voice);
            }
            Err(e) => log::warn!("Session {}: {}", self.id, e),
        }
    }

    async fn mute_user(&self, user: &str) {
        if user.trim().is_empty() {
            return;
        }
        log::info!("Session {}: muting {}", self.id, user);
        self.manager.blocklist.mute(user, &self.manager.registry).await;
    }

    async fn unmute_user(&self, user: &str) {
        if user.trim().is_empty() {
            return;
        }
        log::info!("Session {}: unmuting {}", self.id, user);
        self.manager.blocklist.unmute(user, &self.manager.registry).await;
    }
}

/// `close` を経ずに破棄された場合もレジストリから外す
impl Drop for Session {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        log::warn!("Session {} dropped without close", self.id);
        let registry = Arc::clone(&self.manager.registry);
        let session_id = self.id;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                registry.remove_session(session_id).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::pipeline::test_support::RecordingSynthesizer;
    use crate::twitch::test_support::FakePushClient;
    use crate::youtube::test_support::{chat_item, page, FakeYouTube};
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;

    struct Fixture {
        manager: SessionManager,
        youtube: Arc<FakeYouTube>,
        twitch: Arc<FakePushClient>,
        synthesizer: Arc<RecordingSynthesizer>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::build(true)
        }

        fn without_youtube() -> Self {
            Self::build(false)
        }

        fn build(with_youtube: bool) -> Self {
            let youtube = Arc::new(FakeYouTube::default());
            youtube.set_live_chat("videoAAAAAA", "chat-a");
            youtube.set_live_chat("videoBBBBBB", "chat-b");
            let twitch = Arc::new(FakePushClient::default());
            let synthesizer = Arc::new(RecordingSynthesizer::default());
            let blocklist = Arc::new(Blocklist::with_users(["nightbot"]));
            let pipeline = Arc::new(MessagePipeline::new(blocklist.clone(), synthesizer.clone()));
            let api: Option<Arc<dyn YouTubeApi>> = if with_youtube {
                Some(youtube.clone())
            } else {
                None
            };
            let manager = SessionManager::new(blocklist, pipeline, api, twitch.clone());
            Self {
                manager,
                youtube,
                twitch,
                synthesizer,
            }
        }

        /// 初回のblocklist_updateを読み捨てたセッションを返す
        async fn open(&self) -> (Session, mpsc::UnboundedReceiver<ServerEvent>) {
            let (session, mut rx) = self.manager.open_session().await;
            assert!(matches!(rx.recv().await, Some(ServerEvent::BlocklistUpdate(_))));
            (session, rx)
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("outbox closed")
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_new_session_receives_blocklist() {
        let f = Fixture::new();
        let (session, mut rx) = f.manager.open_session().await;

        assert!(matches!(rx.recv().await, Some(ServerEvent::BlocklistUpdate(users)) if users == vec!["nightbot"]));
        assert_eq!(session.voice(), Voice::DeDeNeural2F);
        assert!(session.twitch_slot().is_empty());
        assert!(session.youtube_slot().is_empty());
        assert_eq!(f.manager.registry().session_count().await, 1);
    }

    #[tokio::test]
    async fn test_change_voice_accepts_only_known_voices() {
        let f = Fixture::new();
        let (mut session, mut rx) = f.open().await;

        session.handle(ClientCommand::ChangeVoice("en-US-Neural2-C".to_string())).await;
        assert_eq!(session.voice(), Voice::EnUsNeural2C);

        session.handle(ClientCommand::ChangeVoice("robot-voice".to_string())).await;
        assert_eq!(session.voice(), Voice::EnUsNeural2C);

        session.handle(ClientCommand::ChangeVoice("local".to_string())).await;
        assert_eq!(session.voice(), Voice::Local);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_mute_is_broadcast_to_other_sessions() {
        let f = Fixture::new();
        let (session_x, mut rx_x) = f.open().await;
        let (_session_y, mut rx_y) = f.open().await;

        session_x.mute_user("Bob").await;

        for rx in [&mut rx_x, &mut rx_y] {
            match next_event(rx).await {
                ServerEvent::BlocklistUpdate(users) => assert!(users.contains(&"bob".to_string())),
                other => panic!("unexpected event: {:?}", other),
            }
        }

        session_x.unmute_user("BOB").await;
        assert!(matches!(next_event(&mut rx_y).await, ServerEvent::BlocklistUpdate(u) if !u.contains(&"bob".to_string())));
    }

    #[tokio::test]
    async fn test_blank_arguments_are_ignored() {
        let f = Fixture::new();
        let (mut session, mut rx) = f.open().await;

        session.handle(ClientCommand::JoinTwitch("   ".to_string())).await;
        session.handle(ClientCommand::JoinYoutube("".to_string())).await;
        session.handle(ClientCommand::MuteUser(" ".to_string())).await;

        assert!(session.twitch_slot().is_empty());
        assert!(session.youtube_slot().is_empty());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_youtube_without_api_key() {
        let f = Fixture::without_youtube();
        let (mut session, mut rx) = f.open().await;

        session.handle(ClientCommand::JoinYoutube("videoAAAAAA".to_string())).await;

        assert!(matches!(next_event(&mut rx).await, ServerEvent::SystemMsg(t) if t == "YouTube error: API key not configured"));
        assert!(session.youtube_slot().is_empty());
    }

    #[tokio::test]
    async fn test_twitch_join_and_leave_is_idempotent() {
        let f = Fixture::new();
        let (mut session, mut rx) = f.open().await;

        session.handle(ClientCommand::JoinTwitch("Streamer".to_string())).await;
        assert!(matches!(next_event(&mut rx).await, ServerEvent::SystemMsg(_)));
        assert!(matches!(next_event(&mut rx).await, ServerEvent::TwitchConnected(c) if c == "streamer"));

        session.handle(ClientCommand::LeaveTwitch).await;
        assert!(matches!(next_event(&mut rx).await, ServerEvent::SystemMsg(t) if t == "Twitch connection closed."));
        assert!(matches!(next_event(&mut rx).await, ServerEvent::TwitchDisconnected));

        session.handle(ClientCommand::LeaveTwitch).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_twitch_rejoin_replaces_connection() {
        let f = Fixture::new();
        let (mut session, mut rx) = f.open().await;

        session.handle(ClientCommand::JoinTwitch("first".to_string())).await;
        next_event(&mut rx).await;
        next_event(&mut rx).await;

        session.handle(ClientCommand::JoinTwitch("second".to_string())).await;
        next_event(&mut rx).await;
        assert!(matches!(next_event(&mut rx).await, ServerEvent::TwitchConnected(c) if c == "second"));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(f.twitch.channels(), vec!["first", "second"]);
        assert!(f.twitch.closed_locally(0));
        assert!(!f.twitch.closed_locally(1));
    }

    #[tokio::test]
    async fn test_disconnect_channels_reports_occupied_slots() {
        let f = Fixture::new();
        let (mut session, mut rx) = f.open().await;

        session.handle(ClientCommand::JoinTwitch("streamer".to_string())).await;
        next_event(&mut rx).await;
        next_event(&mut rx).await;

        session.handle(ClientCommand::DisconnectChannels).await;
        assert!(matches!(next_event(&mut rx).await, ServerEvent::TwitchDisconnected));
        assert!(matches!(
            next_event(&mut rx).await,
            ServerEvent::SystemMsg(t) if t == "All connections closed and TTS stopped."
        ));

        // 何もない状態でも確認メッセージは送る
        session.handle(ClientCommand::DisconnectChannels).await;
        assert!(matches!(next_event(&mut rx).await, ServerEvent::SystemMsg(_)));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_youtube_rejoin_replaces_poller() {
        let f = Fixture::new();
        let (mut session, mut rx) = f.open().await;
        session.handle(ClientCommand::ChangeVoice("local".to_string())).await;

        session.handle(ClientCommand::JoinYoutube("videoAAAAAA".to_string())).await;
        tokio::time::sleep(Duration::from_millis(12_000)).await;
        let calls_a = f.youtube.list_calls_for("chat-a");
        assert!(calls_a >= 2);

        session.handle(ClientCommand::JoinYoutube("videoBBBBBB".to_string())).await;
        let future = Utc::now() + ChronoDuration::hours(1);
        f.youtube.push_response("chat-a", Ok(page(vec![chat_item("a1", "Ann", "stale", future)], None, None)));
        f.youtube.push_response("chat-b", Ok(page(vec![chat_item("b1", "Ben", "fresh", future)], None, None)));
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(f.youtube.list_calls_for("chat-a"), calls_a);
        assert!(f.youtube.list_calls_for("chat-b") >= 2);

        let texts: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::ChatMessage(m) => Some(m.text),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["fresh"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_youtube_leave_notifies_only_when_running() {
        let f = Fixture::new();
        let (mut session, mut rx) = f.open().await;

        session.handle(ClientCommand::JoinYoutube("videoAAAAAA".to_string())).await;
        assert!(matches!(next_event(&mut rx).await, ServerEvent::SystemMsg(_)));
        assert!(matches!(next_event(&mut rx).await, ServerEvent::YoutubeConnected(v) if v == "videoAAAAAA"));

        session.handle(ClientCommand::LeaveYoutube).await;
        assert!(matches!(next_event(&mut rx).await, ServerEvent::SystemMsg(t) if t == "YouTube connection closed."));
        assert!(matches!(next_event(&mut rx).await, ServerEvent::YoutubeDisconnected));

        let calls = f.youtube.list_calls_for("chat-a");
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(f.youtube.list_calls_for("chat-a"), calls);

        session.handle(ClientCommand::LeaveYoutube).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_youtube_join_leaves_nothing_to_tear_down() {
        let f = Fixture::new();
        let (mut session, mut rx) = f.open().await;

        session.handle(ClientCommand::JoinYoutube("@nobody".to_string())).await;
        assert!(matches!(next_event(&mut rx).await, ServerEvent::SystemMsg(_)));
        tokio::time::sleep(Duration::from_millis(10)).await;

        session.handle(ClientCommand::LeaveYoutube).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_close_tears_down_silently() {
        let f = Fixture::new();
        let (mut session, mut rx) = f.open().await;
        session.handle(ClientCommand::ChangeVoice("local".to_string())).await;

        session.handle(ClientCommand::JoinTwitch("streamer".to_string())).await;
        next_event(&mut rx).await;
        next_event(&mut rx).await;

        session.close().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(f.twitch.closed_locally(0));
        assert!(!f.twitch.push("alice", None, "anyone there?"));
        assert_eq!(f.manager.registry().session_count().await, 0);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(f.synthesizer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_blocked_twitch_user_is_not_relayed() {
        let f = Fixture::new();
        let (mut session, mut rx) = f.open().await;
        session.handle(ClientCommand::JoinTwitch("streamer".to_string())).await;
        next_event(&mut rx).await;
        next_event(&mut rx).await;

        f.twitch.push("nightbot", Some("Nightbot"), "follow the rules");
        f.twitch.push("alice", Some("Alice"), "hello");

        match next_event(&mut rx).await {
            ServerEvent::ChatMessage(event) => {
                assert_eq!(event.user, "Alice");
                assert_eq!(event.audio.as_deref(), Some("bXAz"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(f.synthesizer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_session_leaves_registry() {
        let f = Fixture::new();
        let (mut session, _rx) = f.open().await;
        let (_other, mut other_rx) = f.open().await;
        session.handle(ClientCommand::JoinTwitch("streamer".to_string())).await;
        assert_eq!(f.manager.registry().session_count().await, 2);

        // 接続タスクがcloseを呼ばずに終了した場合
        drop(session);
        for _ in 0..50 {
            if f.manager.registry().session_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.manager.registry().session_count().await, 1);

        // 以後のブロードキャストは残ったセッションだけに届く
        assert_eq!(f.manager.registry().broadcast(ServerEvent::TwitchDisconnected).await, 1);
        assert_eq!(next_event(&mut other_rx).await, ServerEvent::TwitchDisconnected);
    }
}
