use chrono::{DateTime, Utc};
use std::time::Duration;

use super::types::LiveChatMessageItem;

/// サーバーから間隔が返らなかった場合のポーリング間隔（ミリ秒）
pub const DEFAULT_POLLING_INTERVAL_MILLIS: u64 = 5000;

/// 重複排除・時刻フィルタを通過したメッセージ
#[derive(Debug, Clone, PartialEq)]
pub struct FreshMessage {
    pub id: String,
    pub user: String,
    pub text: String,
}

/// ポーリング状態（ポーラー1つにつき1つ）
#[derive(Debug, Clone)]
pub struct PollState {
    pub live_chat_id: String,
    /// 次回リクエスト用のページトークン
    pub next_page_token: Option<String>,
    /// 前回のティックで最後に処理したメッセージID
    pub last_seen_id: Option<String>,
    /// サーバー推奨のポーリング間隔（ミリ秒）
    pub polling_interval_millis: u64,
    /// 接続開始時刻。これより前のメッセージは再生しない
    pub connected_at: DateTime<Utc>,
    pub poll_count: u64,
}

impl PollState {
    pub fn new(live_chat_id: String, connected_at: DateTime<Utc>) -> Self {
        Self {
            live_chat_id,
            next_page_token: None,
            last_seen_id: None,
            polling_interval_millis: DEFAULT_POLLING_INTERVAL_MILLIS,
            connected_at,
            poll_count: 0,
        }
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_millis)
    }

    /// レスポンス受信後にページトークンと間隔を更新
    ///
    /// 間隔が変わった場合はtrueを返す（タイマーの作り直しが必要）
    pub fn apply_page(&mut self, next_page_token: Option<String>, polling_interval_millis: Option<u64>) -> bool {
        self.next_page_token = next_page_token;
        self.poll_count += 1;

        let interval = polling_interval_millis
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_POLLING_INTERVAL_MILLIS);
        let changed = interval != self.polling_interval_millis;
        self.polling_interval_millis = interval;
        changed
    }

    /// 1バッチ分のメッセージから転送すべきものを選ぶ
    ///
    /// - 前回ティックの最終IDと同じIDはスキップ（ページ境界での再送対策）
    /// - 接続開始より前に投稿されたものはスキップ
    /// - 本文が空のもの、投稿時刻が解釈できないものはスキップ
    ///
    /// バッチが空でなければ最後のIDを新しい境界として記録する。
    pub fn select_fresh(&mut self, items: &[LiveChatMessageItem]) -> Vec<FreshMessage> {
        let mut fresh = Vec::new();

        for item in items {
            if self.last_seen_id.as_deref() == Some(item.id.as_str()) {
                continue;
            }

            let published_at = match DateTime::parse_from_rfc3339(&item.snippet.published_at) {
                Ok(dt) => dt.with_timezone(&Utc),
                Err(e) => {
                    log::warn!(
                        "Failed to parse publishedAt for message {}: {}. Skipping message.",
                        item.id,
                        e
                    );
                    continue;
                }
            };

            if published_at < self.connected_at {
                log::debug!(
                    "Ignoring old message from {} ({})",
                    item.author_details.display_name,
                    item.snippet.published_at
                );
                continue;
            }

            let text = item.text();
            if text.is_empty() {
                continue;
            }

            fresh.push(FreshMessage {
                id: item.id.clone(),
                user: item.author_details.display_name.clone(),
                text: text.to_string(),
            });
        }

        if let Some(last) = items.last() {
            self.last_seen_id = Some(last.id.clone());
        }

        fresh
    }
}
