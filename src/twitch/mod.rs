//! Twitch チャット連携（プッシュ型）

pub mod adapter;
pub mod client;
pub mod irc;

pub use adapter::PushChatAdapter;
pub use client::{normalize_channel, IncomingChat, PushChatClient, PushConnection, TwitchError, TwitchIrcClient};
