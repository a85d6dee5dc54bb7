//! メッセージ処理パイプライン
//!
//! 1. ブロックリストに含まれるユーザーは破棄
//! 2. コマンドプレフィックス（`!` `/` `$`）で始まる発言は破棄
//! 3. 音声が`local`以外なら合成し、Base64で添付
//! 4. 送信元アダプターが生きている場合のみ`chat_message`を送信

use base64::Engine;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use super::{Blocklist, ChatEvent, ChatMessage};
use crate::adapter::AdapterContext;
use crate::server::types::ServerEvent;
use crate::tts::{SpeechSynthesizer, SynthesisRequest};

/// Botコマンドとして扱う先頭文字
pub const COMMAND_PREFIXES: &[char] = &['!', '/', '$'];

/// 1メッセージの処理結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Emitted,
    Blocked,
    Command,
    /// 合成失敗（メッセージごと破棄）
    SynthesisFailed,
    /// 処理中にアダプターが破棄された
    Discarded,
}

/// 先頭がコマンドプレフィックスかどうか（文字列先頭のみ判定）
pub fn is_command(text: &str) -> bool {
    text.starts_with(COMMAND_PREFIXES)
}

/// イベントID生成（現在時刻ミリ秒、同一ミリ秒内でも単調増加）
#[derive(Debug, Default)]
pub struct EventIdGenerator {
    last: AtomicI64,
}

impl EventIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(previous + 1)
    }
}

pub struct MessagePipeline {
    blocklist: Arc<Blocklist>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    ids: EventIdGenerator,
}

impl MessagePipeline {
    pub fn new(blocklist: Arc<Blocklist>, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        Self {
            blocklist,
            synthesizer,
            ids: EventIdGenerator::new(),
        }
    }

    pub async fn process(&self, message: ChatMessage, ctx: &AdapterContext) -> ProcessOutcome {
        if self.blocklist.contains(&message.user).await {
            log::debug!("Dropping message from blocked user: {}", message.user);
            return ProcessOutcome::Blocked;
        }
        if is_command(&message.text) {
            log::debug!("Dropping command message from {}: {}", message.user, message.text);
            return ProcessOutcome::Command;
        }

        let voice = ctx.current_voice();
        log::info!(
            "Session {}: processing ({}) {}: {}",
            ctx.session_id,
            voice,
            message.user,
            message.text
        );

        let audio = if voice.is_local() {
            None
        } else {
            let request = SynthesisRequest::for_chat(voice, &message.user, &message.text);
            match self.synthesizer.synthesize(request).await {
                Ok(bytes) => Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
                Err(e) => {
                    log::error!("TTS error for message from {}: {}", message.user, e);
                    return ProcessOutcome::SynthesisFailed;
                }
            }
        };

        // 合成中にleave/disconnectされた場合は送らない
        if !ctx.is_alive() {
            return ProcessOutcome::Discarded;
        }

        let event = ChatEvent {
            platform: message.platform,
            user: message.user,
            text: message.text,
            audio,
            id: self.ids.next_id(),
        };
        if ctx.emit(ServerEvent::ChatMessage(event)) {
            ProcessOutcome::Emitted
        } else {
            ProcessOutcome::Discarded
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::tts::TtsError;
    use std::sync::Mutex;

    /// 呼び出しを記録する合成バックエンド
    #[derive(Default)]
    pub struct RecordingSynthesizer {
        pub requests: Mutex<Vec<SynthesisRequest>>,
        pub fail: bool,
    }

    impl RecordingSynthesizer {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl SpeechSynthesizer for RecordingSynthesizer {
        async fn synthesize(&self, request: SynthesisRequest) -> Result<Vec<u8>, TtsError> {
            self.requests.lock().unwrap().push(request);
            if self.fail {
                Err(TtsError::ApiError {
                    status: 500,
                    message: "backend down".to_string(),
                })
            } else {
                Ok(b"mp3".to_vec())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingSynthesizer;
    use super::*;
    use crate::chat::Platform;
    use crate::session::SessionOutbox;
    use crate::tts::Voice;
    use tokio::sync::{mpsc, watch};

    struct Fixture {
        pipeline: MessagePipeline,
        synthesizer: Arc<RecordingSynthesizer>,
        ctx: AdapterContext,
        voice: watch::Sender<Voice>,
        rx: mpsc::UnboundedReceiver<ServerEvent>,
    }

    fn fixture(synthesizer: RecordingSynthesizer) -> Fixture {
        let synthesizer = Arc::new(synthesizer);
        let pipeline = MessagePipeline::new(Arc::new(Blocklist::new()), synthesizer.clone());
        let (outbox, rx) = SessionOutbox::channel(7);
        let (voice, voice_rx) = watch::channel(Voice::default());
        Fixture {
            pipeline,
            synthesizer,
            ctx: AdapterContext::new(7, outbox, voice_rx),
            voice,
            rx,
        }
    }

    fn twitch(user: &str, text: &str) -> ChatMessage {
        ChatMessage::new(Platform::Twitch, user, text)
    }

    #[test]
    fn test_is_command() {
        assert!(is_command("!uptime"));
        assert!(is_command("/me dances"));
        assert!(is_command("$balance"));
        assert!(!is_command("hello!"));
        assert!(!is_command(" !spaced"));
        assert!(!is_command(""));
    }

    #[test]
    fn test_event_ids_are_strictly_increasing() {
        let ids = EventIdGenerator::new();
        let mut previous = ids.next_id();
        for _ in 0..1000 {
            let id = ids.next_id();
            assert!(id > previous);
            previous = id;
        }
    }

    #[tokio::test]
    async fn test_blocked_user_is_dropped_in_any_case() {
        let mut f = fixture(RecordingSynthesizer::default());
        for user in ["Nightbot", "NIGHTBOT", "nightbot"] {
            let outcome = f.pipeline.process(twitch(user, "hello"), &f.ctx).await;
            assert_eq!(outcome, ProcessOutcome::Blocked);
        }
        assert!(f.rx.try_recv().is_err());
        assert_eq!(f.synthesizer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_command_prefixes_are_dropped() {
        let mut f = fixture(RecordingSynthesizer::default());
        for text in ["!uptime", "/color red", "$points"] {
            let outcome = f.pipeline.process(twitch("alice", text), &f.ctx).await;
            assert_eq!(outcome, ProcessOutcome::Command);
        }
        assert!(f.rx.try_recv().is_err());

        let outcome = f.pipeline.process(twitch("alice", "hello!"), &f.ctx).await;
        assert_eq!(outcome, ProcessOutcome::Emitted);
    }

    #[tokio::test]
    async fn test_synthesized_audio_is_attached() {
        let mut f = fixture(RecordingSynthesizer::default());
        let outcome = f.pipeline.process(twitch("Alice", "hi there"), &f.ctx).await;
        assert_eq!(outcome, ProcessOutcome::Emitted);

        match f.rx.recv().await {
            Some(ServerEvent::ChatMessage(event)) => {
                assert_eq!(event.platform, Platform::Twitch);
                assert_eq!(event.user, "Alice");
                assert_eq!(event.text, "hi there");
                assert_eq!(event.audio.as_deref(), Some("bXAz"));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let requests = f.synthesizer.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].text, "Alice: hi there");
        assert_eq!(requests[0].voice_name, "de-DE-Neural2-F");
        assert_eq!(requests[0].language_code, "de-DE");
    }

    #[tokio::test]
    async fn test_local_voice_skips_synthesis() {
        let mut f = fixture(RecordingSynthesizer::default());
        f.voice.send(Voice::Local).unwrap();

        for text in ["one", "two"] {
            f.pipeline.process(twitch("alice", text), &f.ctx).await;
        }

        for _ in 0..2 {
            match f.rx.recv().await {
                Some(ServerEvent::ChatMessage(event)) => assert!(event.audio.is_none()),
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert_eq!(f.synthesizer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_synthesis_failure_drops_message() {
        let mut f = fixture(RecordingSynthesizer::failing());
        let outcome = f.pipeline.process(twitch("alice", "hello"), &f.ctx).await;
        assert_eq!(outcome, ProcessOutcome::SynthesisFailed);
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_torn_down_adapter_emits_nothing() {
        let mut f = fixture(RecordingSynthesizer::default());
        f.ctx.lifecycle.stop();
        let outcome = f.pipeline.process(twitch("alice", "late"), &f.ctx).await;
        assert_eq!(outcome, ProcessOutcome::Discarded);
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_identical_messages_get_distinct_ids() {
        let mut f = fixture(RecordingSynthesizer::default());
        f.voice.send(Voice::Local).unwrap();
        f.pipeline.process(twitch("alice", "spam"), &f.ctx).await;
        f.pipeline.process(twitch("alice", "spam"), &f.ctx).await;

        let first = f.rx.recv().await;
        let second = f.rx.recv().await;
        match (first, second) {
            (Some(ServerEvent::ChatMessage(a)), Some(ServerEvent::ChatMessage(b))) => {
                assert_ne!(a.id, b.id)
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }
}
