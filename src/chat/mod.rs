//! チャットメッセージの共通型とフィルタリング・読み上げパイプライン

pub mod blocklist;
pub mod pipeline;

pub use blocklist::Blocklist;
pub use pipeline::{MessagePipeline, ProcessOutcome};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// チャットの取得元プラットフォーム
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitch,
    Youtube,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitch => "twitch",
            Platform::Youtube => "youtube",
        }
    }

    /// ユーザー向けメッセージ用の表示名
    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Twitch => "Twitch",
            Platform::Youtube => "YouTube",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// アダプターからパイプラインに渡される受信メッセージ（保存しない）
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub platform: Platform,
    pub user: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(platform: Platform, user: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            platform,
            user: user.into(),
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

/// クライアントへ送るチャットイベント（`chat_message`のペイロード）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub platform: Platform,
    pub user: String,
    pub text: String,
    /// Base64エンコード済みMP3。ローカル音声の場合はnull
    pub audio: Option<String>,
    pub id: i64,
}
