//! Google Cloud Text-to-Speech クライアント

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{AudioEncoding, SpeechSynthesizer, SynthesisRequest, TtsError};
use crate::config::http_timeout;

const API_BASE: &str = "https://texttospeech.googleapis.com/v1";

pub struct GoogleTts {
    client: Client,
    api_key: Option<String>,
    api_base: String,
}

impl GoogleTts {
    pub fn new(api_key: Option<String>) -> Result<Self, TtsError> {
        Self::with_base_url(api_key, API_BASE)
    }

    /// エンドポイントを差し替えて作成（テスト用モックサーバー向け）
    pub fn with_base_url(api_key: Option<String>, api_base: &str) -> Result<Self, TtsError> {
        let client = Client::builder().timeout(http_timeout()).build()?;
        Ok(Self {
            client,
            api_key: api_key.filter(|k| !k.is_empty()),
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleTts {
    async fn synthesize(&self, request: SynthesisRequest) -> Result<Vec<u8>, TtsError> {
        let api_key = self.api_key.as_deref().ok_or(TtsError::NotConfigured)?;

        let body = SynthesizeRequestBody {
            input: SynthesisInput {
                text: request.text,
            },
            voice: VoiceSelectionParams {
                language_code: request.language_code,
                name: request.voice_name,
            },
            audio_config: AudioConfig {
                audio_encoding: request.encoding,
                pitch: request.pitch,
                speaking_rate: request.speaking_rate,
            },
        };

        let url = format!("{}/text:synthesize", self.api_base);
        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TtsError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let data: SynthesizeResponse = response.json().await?;
        base64::engine::general_purpose::STANDARD
            .decode(&data.audio_content)
            .map_err(|e| TtsError::DecodeError(e.to_string()))
    }
}

// API リクエスト/レスポンス型

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeRequestBody {
    input: SynthesisInput,
    voice: VoiceSelectionParams,
    audio_config: AudioConfig,
}

#[derive(Serialize)]
struct SynthesisInput {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceSelectionParams {
    language_code: String,
    name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioConfig {
    audio_encoding: AudioEncoding,
    pitch: f32,
    speaking_rate: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: String,
}
