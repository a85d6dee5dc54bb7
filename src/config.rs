// =============================================================================
// 設定モジュール
// =============================================================================
// 環境変数（.envを含む）から起動時の設定値を読み込む
// =============================================================================

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// HTTPリクエストのデフォルトタイムアウト（秒）
///
/// YouTube Data API、ライブページ取得、Text-to-Speech APIで共通使用。
pub const HTTP_TIMEOUT_SECS: u64 = 10;

/// デフォルトの待ち受けポート
pub const DEFAULT_PORT: u16 = 8080;

/// Twitch IRC（WebSocket版）のエンドポイント
pub const DEFAULT_TWITCH_IRC_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

/// 静的ファイルのデフォルトディレクトリ
const DEFAULT_PUBLIC_DIR: &str = "public";

/// HTTPリクエストのデフォルトタイムアウト（Duration）
pub fn http_timeout() -> Duration {
    Duration::from_secs(HTTP_TIMEOUT_SECS)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid PORT value: {0}")]
    InvalidPort(String),
}

/// アプリケーション設定
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub youtube_api_key: Option<String>,
    /// キーがWebオリジンで制限されている場合に送るRefererヘッダー
    pub youtube_referer: Option<String>,
    pub tts_api_key: Option<String>,
    pub public_dir: PathBuf,
    pub twitch_irc_url: String,
}

impl Config {
    /// プロセス環境変数から読み込む
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意のルックアップ関数から読み込む（テストで環境変数を汚さないため）
    ///
    /// 空文字列の値は未設定として扱う。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = match get("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(raw.clone()))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            port,
            youtube_api_key: get("YOUTUBE_API_KEY"),
            youtube_referer: get("YOUTUBE_API_REFERER"),
            tts_api_key: get("GOOGLE_TTS_API_KEY").or_else(|| get("GOOGLE_API_KEY")),
            public_dir: get("PUBLIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PUBLIC_DIR)),
            twitch_irc_url: get("TWITCH_IRC_URL")
                .unwrap_or_else(|| DEFAULT_TWITCH_IRC_URL.to_string()),
        })
    }

    /// ログ出力用のサマリー（APIキーはマスク済み）
    pub fn summary(&self) -> String {
        format!(
            "port={}, youtube_api_key={}, tts_api_key={}, public_dir={}",
            self.port,
            self.youtube_api_key
                .as_deref()
                .map(mask_api_key)
                .unwrap_or_else(|| "(none)".to_string()),
            self.tts_api_key
                .as_deref()
                .map(mask_api_key)
                .unwrap_or_else(|| "(none)".to_string()),
            self.public_dir.display()
        )
    }
}

/// APIキーをマスキングしてログ出力用の文字列を生成
///
/// 最初の4文字と最後の4文字のみを残す。8文字以下は全体をマスクする。
pub fn mask_api_key(api_key: &str) -> String {
    let chars: Vec<char> = api_key.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }

    let prefix: String = chars[..4].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("{}***{}", prefix, suffix)
}
