//! 音声合成（Text-to-Speech）
//!
//! 選択可能な音声は固定の列挙値のみ。任意の音声名での合成リクエストは受け付けない。

mod google;

pub use google::GoogleTts;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// チャット読み上げの話速
pub const CHAT_SPEAKING_RATE: f32 = 1.1;

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("Text-to-Speech API key not configured")]
    NotConfigured,

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Text-to-Speech API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Failed to decode audio content: {0}")]
    DecodeError(String),
}

/// 選択可能な音声
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Voice {
    /// サーバーでは合成せず、クライアント側（ブラウザ）で読み上げる
    Local,
    #[default]
    DeDeNeural2F,
    DeDeNeural2B,
    EnUsNeural2C,
    EnUsNeural2D,
}

impl Voice {
    pub const ALL: [Voice; 5] = [
        Voice::Local,
        Voice::DeDeNeural2F,
        Voice::DeDeNeural2B,
        Voice::EnUsNeural2C,
        Voice::EnUsNeural2D,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Local => "local",
            Voice::DeDeNeural2F => "de-DE-Neural2-F",
            Voice::DeDeNeural2B => "de-DE-Neural2-B",
            Voice::EnUsNeural2C => "en-US-Neural2-C",
            Voice::EnUsNeural2D => "en-US-Neural2-D",
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Voice::Local)
    }

    /// 音声名の先頭2セグメント（例: `de-DE-Neural2-F` → `de-DE`）
    pub fn language_code(&self) -> String {
        self.as_str().split('-').take(2).collect::<Vec<_>>().join("-")
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unsupported voice: {0}")]
pub struct UnknownVoice(pub String);

impl FromStr for Voice {
    type Err = UnknownVoice;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Voice::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| UnknownVoice(s.to_string()))
    }
}

/// 出力音声フォーマット
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioEncoding {
    #[default]
    Mp3,
    OggOpus,
    Linear16,
}

/// 合成リクエスト
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub language_code: String,
    pub voice_name: String,
    pub encoding: AudioEncoding,
    pub pitch: f32,
    pub speaking_rate: f32,
}

impl SynthesisRequest {
    /// チャット読み上げ用リクエスト（"{user}: {text}"、MP3、ピッチ0、話速1.1）
    pub fn for_chat(voice: Voice, user: &str, text: &str) -> Self {
        Self {
            text: format!("{}: {}", user, text),
            language_code: voice.language_code(),
            voice_name: voice.as_str().to_string(),
            encoding: AudioEncoding::Mp3,
            pitch: 0.0,
            speaking_rate: CHAT_SPEAKING_RATE,
        }
    }
}

/// 音声合成バックエンド
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// 合成して音声バイト列を返す
    async fn synthesize(&self, request: SynthesisRequest) -> Result<Vec<u8>, TtsError>;
}
