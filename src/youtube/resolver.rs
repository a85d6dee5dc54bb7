//! 入力（動画ID / @ハンドル / チャンネルID）からライブ動画IDを解決する
//!
//! 公式APIには「ハンドルの現在のライブ動画」を返すエンドポイントがないため、
//! ハンドルは `/@handle/live` ページのHTMLから動画IDを抜き出す。
//! HTML構造に依存する抽出処理は `extract_video_id` に閉じ込めている。

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use super::client::YouTubeApi;

static VIDEO_ID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""videoId":"([a-zA-Z0-9_-]{11})""#).expect("Failed to compile videoId regex")
});

/// 動画IDの長さ
const VIDEO_ID_LENGTH: usize = 11;

/// 入力の解釈
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveTarget {
    /// 既に動画ID
    VideoId(String),
    /// `@`付きハンドル（裸の名前は`@`を補う）
    Handle(String),
    /// `UC`で始まるチャンネルID
    ChannelId(String),
}

impl ResolveTarget {
    /// 入力を分類する
    ///
    /// 11文字で`@`/`UC`で始まらなければ動画IDとみなす。
    /// 11文字ちょうどのハンドル名も動画IDと誤判定される（既知の制約）。
    pub fn classify(input: &str) -> Self {
        if input.chars().count() == VIDEO_ID_LENGTH
            && !input.starts_with('@')
            && !input.starts_with("UC")
        {
            ResolveTarget::VideoId(input.to_string())
        } else if input.starts_with("UC") {
            ResolveTarget::ChannelId(input.to_string())
        } else if input.starts_with('@') {
            ResolveTarget::Handle(input.to_string())
        } else {
            ResolveTarget::Handle(format!("@{}", input))
        }
    }
}

/// ライブページのHTMLから最初の動画IDを抽出
pub fn extract_video_id(html: &str) -> Option<String> {
    VIDEO_ID_REGEX
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub struct VideoResolver {
    api: Arc<dyn YouTubeApi>,
}

impl VideoResolver {
    pub fn new(api: Arc<dyn YouTubeApi>) -> Self {
        Self { api }
    }

    /// 入力をライブ動画IDに解決する
    ///
    /// 通信・APIエラーはログに残して「見つからない」として扱う。
    pub async fn resolve(&self, input: &str) -> Option<String> {
        match ResolveTarget::classify(input) {
            ResolveTarget::VideoId(id) => Some(id),
            ResolveTarget::Handle(handle) => match self.api.fetch_live_page(&handle).await {
                Ok(html) => {
                    let video_id = extract_video_id(&html);
                    match &video_id {
                        Some(id) => log::info!("Video ID found for {}: {}", handle, id),
                        None => log::info!("No video ID on live page of {}", handle),
                    }
                    video_id
                }
                Err(e) => {
                    log::error!("Handle resolution failed for {}: {}", handle, e);
                    None
                }
            },
            ResolveTarget::ChannelId(channel_id) => {
                match self.api.search_live_video(&channel_id).await {
                    Ok(video_id) => video_id,
                    Err(e) => {
                        log::error!("Channel live search failed for {}: {}", channel_id, e);
                        None
                    }
                }
            }
        }
    }
}
