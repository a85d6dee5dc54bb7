//! Twitch / YouTube のライブチャットを集約し、読み上げ音声付きで
//! WebSocket クライアントへ配信するサーバー

pub mod adapter;
pub mod chat;
pub mod config;
pub mod server;
pub mod session;
pub mod tts;
pub mod twitch;
pub mod youtube;

use std::sync::Arc;

use chat::{Blocklist, MessagePipeline};
use config::Config;
use server::HttpState;
use session::SessionManager;
use tts::GoogleTts;
use twitch::TwitchIrcClient;
use youtube::{YouTubeApi, YouTubeClient};

/// 共有リソースを組み立ててサーバーを起動する
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    log::info!("Starting chatterli: {}", config.summary());

    let tts = GoogleTts::new(config.tts_api_key.clone())?;
    if !tts.is_configured() {
        log::warn!("GOOGLE_TTS_API_KEY is not set; messages for synthesized voices will be dropped");
    }

    let youtube: Option<Arc<dyn YouTubeApi>> = match &config.youtube_api_key {
        Some(api_key) => {
            let client = YouTubeClient::new(api_key.clone(), config.youtube_referer.as_deref())?;
            Some(Arc::new(client) as Arc<dyn YouTubeApi>)
        }
        None => {
            log::warn!("YOUTUBE_API_KEY is not set; YouTube joins will be rejected");
            None
        }
    };

    let blocklist = Arc::new(Blocklist::new());
    let pipeline = Arc::new(MessagePipeline::new(Arc::clone(&blocklist), Arc::new(tts)));
    let twitch = Arc::new(TwitchIrcClient::new(config.twitch_irc_url.clone()));
    let sessions = SessionManager::new(blocklist, pipeline, youtube, twitch);

    server::start_http_server(HttpState { sessions }, config.port, &config.public_dir).await
}
