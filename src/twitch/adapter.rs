use std::sync::Arc;

use super::client::{normalize_channel, PushChatClient};
use crate::adapter::{AdapterContext, AdapterHandle};
use crate::chat::{ChatMessage, MessagePipeline, Platform, ProcessOutcome};
use crate::server::types::ServerEvent;

/// Twitchチャンネル1つ分の受信アダプター
pub struct PushChatAdapter {
    client: Arc<dyn PushChatClient>,
    pipeline: Arc<MessagePipeline>,
    ctx: AdapterContext,
}

impl PushChatAdapter {
    pub fn new(client: Arc<dyn PushChatClient>, pipeline: Arc<MessagePipeline>, ctx: AdapterContext) -> Self {
        Self { client, pipeline, ctx }
    }

    /// 接続と受信を専用タスクで開始
    pub fn spawn(self, channel: String) -> AdapterHandle {
        let lifecycle = self.ctx.lifecycle.clone();
        AdapterHandle::spawn(lifecycle, self.run(channel))
    }

    async fn run(self, channel: String) {
        let session_id = self.ctx.session_id;
        let channel = normalize_channel(&channel);
        log::info!("Session {}: connecting to Twitch #{}", session_id, channel);

        let connected = tokio::select! {
            result = self.client.connect(&channel) => result,
            _ = self.ctx.lifecycle.stopped() => {
                log::debug!("Session {}: Twitch connect to #{} abandoned", session_id, channel);
                return;
            }
        };

        let mut conn = match connected {
            Ok(conn) => conn,
            Err(e) => {
                log::error!("Session {}: Twitch connect to #{} failed: {}", session_id, channel, e);
                self.ctx.system_msg(format!("Twitch error: {}", e));
                return;
            }
        };

        if !self.ctx.is_alive() {
            return;
        }
        self.ctx.system_msg(format!("Connected to Twitch: {}", channel));
        self.ctx.emit(ServerEvent::TwitchConnected(channel.clone()));

        loop {
            tokio::select! {
                incoming = conn.recv() => {
                    let Some(chat) = incoming else {
                        log::info!("Session {}: Twitch #{} closed by remote", session_id, channel);
                        if self.ctx.system_msg("Twitch connection closed.") {
                            self.ctx.emit(ServerEvent::TwitchDisconnected);
                        }
                        break;
                    };

                    // 自分自身の発言は読み上げない
                    if chat.login.eq_ignore_ascii_case(conn.identity()) {
                        continue;
                    }

                    let message = ChatMessage::new(Platform::Twitch, chat.user(), chat.text.as_str());
                    if self.pipeline.process(message, &self.ctx).await == ProcessOutcome::Discarded {
                        break;
                    }
                }
                _ = self.ctx.lifecycle.stopped() => break,
            }
        }

        conn.close();
        log::info!("Session {}: Twitch #{} adapter finished", session_id, channel);
    }
}
