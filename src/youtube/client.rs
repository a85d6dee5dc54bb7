use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, LOCATION, REFERER};
use reqwest::{redirect, Client, Response, StatusCode, Url};

use super::{errors::YouTubeError, types::*};
use crate::config::http_timeout;

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const WEB_BASE: &str = "https://www.youtube.com";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// ライブページ取得時に追跡するリダイレクトの上限
pub const MAX_REDIRECTS: u32 = 5;

/// liveChatMessages.list の1回あたり最大取得件数
pub const MAX_PAGE_SIZE: u32 = 200;

/// YouTubeへのアクセス手段
///
/// 解決・ポーリングのロジックはこのトレイト越しにのみ通信する。
#[async_trait]
pub trait YouTubeApi: Send + Sync {
    /// `@handle/live` ページのHTMLを取得
    async fn fetch_live_page(&self, handle: &str) -> Result<String, YouTubeError>;

    /// チャンネルで配信中の動画IDを検索（search.list, eventType=live）
    async fn search_live_video(&self, channel_id: &str) -> Result<Option<String>, YouTubeError>;

    /// 動画のactiveLiveChatIdを取得（videos.list, liveStreamingDetails）
    async fn active_live_chat_id(&self, video_id: &str) -> Result<Option<String>, YouTubeError>;

    /// ライブチャットメッセージを取得
    async fn list_chat_messages(
        &self,
        live_chat_id: &str,
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<LiveChatMessagesResponse, YouTubeError>;
}

pub struct YouTubeClient {
    api_client: Client,
    /// リダイレクトを自前で追跡するためのクライアント
    page_client: Client,
    api_key: String,
    api_base: String,
    web_base: String,
}

impl YouTubeClient {
    pub fn new(api_key: String, referer: Option<&str>) -> Result<Self, YouTubeError> {
        Self::with_base_urls(api_key, referer, API_BASE, WEB_BASE)
    }

    /// エンドポイントを差し替えて作成（テスト用モックサーバー向け）
    pub fn with_base_urls(
        api_key: String,
        referer: Option<&str>,
        api_base: &str,
        web_base: &str,
    ) -> Result<Self, YouTubeError> {
        let mut api_headers = HeaderMap::new();
        if let Some(referer) = referer {
            let value = HeaderValue::from_str(referer)
                .map_err(|e| YouTubeError::ParseError(format!("Invalid referer: {}", e)))?;
            api_headers.insert(REFERER, value);
        }

        let api_client = Client::builder()
            .timeout(http_timeout())
            .default_headers(api_headers)
            .build()?;

        let mut page_headers = HeaderMap::new();
        page_headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        page_headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let page_client = Client::builder()
            .timeout(http_timeout())
            .user_agent(USER_AGENT)
            .default_headers(page_headers)
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self {
            api_client,
            page_client,
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            web_base: web_base.trim_end_matches('/').to_string(),
        })
    }

    /// URLを取得し、リダイレクトを最大`MAX_REDIRECTS`回まで追跡する
    pub async fn fetch_page(&self, url: &str) -> Result<String, YouTubeError> {
        self.fetch_page_with_limit(url, MAX_REDIRECTS).await
    }

    /// リダイレクト回数を指定してURLを取得
    ///
    /// 上限を超えるリダイレクトは`TooManyRedirects`。相対Locationは現在のURL基準で解決する。
    /// リダイレクト以外のレスポンスはステータスに関わらず本文を返す。
    pub async fn fetch_page_with_limit(
        &self,
        url: &str,
        max_redirects: u32,
    ) -> Result<String, YouTubeError> {
        let mut current =
            Url::parse(url).map_err(|e| YouTubeError::InvalidRedirect(format!("{}: {}", url, e)))?;
        let mut remaining = max_redirects;

        loop {
            log::debug!("Fetching URL: {}", current);
            let response = self.page_client.get(current.clone()).send().await?;
            let status = response.status();
            log::debug!("Response status: {}", status);

            if status.is_redirection() {
                if let Some(location) = response.headers().get(LOCATION) {
                    if remaining == 0 {
                        log::warn!("Redirect limit reached while fetching {}", url);
                        return Err(YouTubeError::TooManyRedirects {
                            limit: max_redirects,
                        });
                    }
                    let location = location
                        .to_str()
                        .map_err(|e| YouTubeError::InvalidRedirect(e.to_string()))?;
                    current = current
                        .join(location)
                        .map_err(|e| YouTubeError::InvalidRedirect(format!("{}: {}", location, e)))?;
                    remaining -= 1;
                    log::debug!("Redirecting to: {}", current);
                    continue;
                }
            }

            let body = response.text().await?;
            log::debug!("Received {} bytes", body.len());
            return Ok(body);
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, YouTubeError> {
        let url = format!("{}/{}", self.api_base, path);
        let response = self
            .api_client
            .get(&url)
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(classify_error_response(response).await);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| YouTubeError::ParseError(e.to_string()))
    }
}

/// エラーレスポンスを分類（全エンドポイント共通）
///
/// - 403: quotaExceeded / dailyLimitExceeded ならQuotaExceeded、それ以外はAccessDenied
/// - 404: LiveChatNotFound
async fn classify_error_response(response: Response) -> YouTubeError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    match status {
        StatusCode::FORBIDDEN => {
            if body.contains("quotaExceeded") || body.contains("dailyLimitExceeded") {
                log::error!("Quota exceeded - daily limit reached");
                YouTubeError::QuotaExceeded
            } else {
                log::error!("YouTube API forbidden error: {}", body);
                YouTubeError::AccessDenied(body)
            }
        }
        StatusCode::NOT_FOUND => {
            log::warn!("YouTube API returned 404 - resource not found");
            YouTubeError::LiveChatNotFound
        }
        status => {
            log::error!("Unexpected API response - status: {}, body: {}", status, body);
            YouTubeError::ApiError {
                status: status.as_u16(),
                message: body,
            }
        }
    }
}

#[async_trait]
impl YouTubeApi for YouTubeClient {
    async fn fetch_live_page(&self, handle: &str) -> Result<String, YouTubeError> {
        let url = format!("{}/{}/live", self.web_base, handle);
        log::info!("Loading live page: {}", url);
        self.fetch_page(&url).await
    }

    async fn search_live_video(&self, channel_id: &str) -> Result<Option<String>, YouTubeError> {
        log::info!("Searching live video for channel: {} (quota cost: 100 units)", channel_id);

        let data: SearchResponse = self
            .get_json(
                "search",
                &[
                    ("part", "id"),
                    ("channelId", channel_id),
                    ("eventType", "live"),
                    ("type", "video"),
                    ("maxResults", "1"),
                ],
            )
            .await?;

        Ok(data.items.into_iter().next().and_then(|item| item.id.video_id))
    }

    async fn active_live_chat_id(&self, video_id: &str) -> Result<Option<String>, YouTubeError> {
        log::info!(
            "Fetching live chat ID for video: {} (quota cost: 1 unit)",
            video_id
        );

        let data: VideoResponse = self
            .get_json("videos", &[("part", "liveStreamingDetails"), ("id", video_id)])
            .await?;

        Ok(data
            .items
            .into_iter()
            .next()
            .and_then(|item| item.live_streaming_details)
            .and_then(|details| details.active_live_chat_id))
    }

    async fn list_chat_messages(
        &self,
        live_chat_id: &str,
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<LiveChatMessagesResponse, YouTubeError> {
        let max_results = max_results.min(MAX_PAGE_SIZE).to_string();
        let mut query = vec![
            ("liveChatId", live_chat_id),
            ("part", "snippet,authorDetails"),
            ("maxResults", max_results.as_str()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
            log::debug!("Using page token: {}", token);
        }

        let data: LiveChatMessagesResponse = self.get_json("liveChat/messages", &query).await?;
        log::debug!(
            "Fetched {} messages (polling interval: {:?}ms)",
            data.items.len(),
            data.polling_interval_millis
        );
        Ok(data)
    }
}
