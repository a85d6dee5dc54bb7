//! YouTube ライブチャット連携
//!
//! 入力（ハンドル / チャンネルID / 動画ID）→ 動画ID → ライブチャットID と解決し、
//! Data API の liveChatMessages.list をサーバー推奨間隔でポーリングする。

pub mod client;
pub mod errors;
pub mod locator;
pub mod poller;
pub mod resolver;
pub mod state;
pub mod types;

pub use client::{YouTubeApi, YouTubeClient};
pub use errors::YouTubeError;
pub use locator::LiveChatLocator;
pub use poller::{ChatPoller, PollHandle, PollerPhase};
pub use resolver::VideoResolver;
