use thiserror::Error;

#[derive(Error, Debug)]
pub enum YouTubeError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Quota exceeded - please try again tomorrow")]
    QuotaExceeded,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Live chat not found - stream may have ended")]
    LiveChatNotFound,

    #[error("Too many redirects (limit: {limit})")]
    TooManyRedirects { limit: u32 },

    #[error("Invalid redirect target: {0}")]
    InvalidRedirect(String),

    #[error("Unexpected API response: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl YouTubeError {
    /// ポーリングを終了すべきエラーか（403相当 / 404相当）
    ///
    /// それ以外は一時的なエラーとして次回のティックで再試行する。
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            YouTubeError::QuotaExceeded
                | YouTubeError::AccessDenied(_)
                | YouTubeError::LiveChatNotFound
        )
    }

    /// セッションに表示する停止理由
    pub fn stop_message(&self) -> String {
        match self {
            YouTubeError::QuotaExceeded | YouTubeError::AccessDenied(_) => {
                "YouTube API quota exhausted or access denied.".to_string()
            }
            YouTubeError::LiveChatNotFound => {
                "Live chat no longer available (stream ended?).".to_string()
            }
            other => format!("YouTube error: {}", other),
        }
    }
}
