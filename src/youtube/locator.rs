use std::sync::Arc;

use super::client::YouTubeApi;

/// 動画IDからアクティブなライブチャットIDを探す
pub struct LiveChatLocator {
    api: Arc<dyn YouTubeApi>,
}

impl LiveChatLocator {
    pub fn new(api: Arc<dyn YouTubeApi>) -> Self {
        Self { api }
    }

    /// 配信中でない・フィールドがない場合はNone（エラーではない）
    pub async fn locate(&self, video_id: &str) -> Option<String> {
        match self.api.active_live_chat_id(video_id).await {
            Ok(Some(chat_id)) => {
                log::info!("Live chat ID found for {}: {}", video_id, chat_id);
                Some(chat_id)
            }
            Ok(None) => {
                log::info!("Video {} has no active live chat", video_id);
                None
            }
            Err(e) => {
                log::error!("Failed to look up live chat for {}: {}", video_id, e);
                None
            }
        }
    }
}
