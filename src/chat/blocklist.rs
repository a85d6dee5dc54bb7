//! プロセス全体で共有するミュートユーザー一覧
//!
//! 変更は常に「集合全体の置き換え＋全セッションへのブロードキャスト」として扱う。
//! 書き込みロックを保持したままブロードキャストするため、
//! どのセッションも同じ順序で完全な一覧を受け取る。

use std::collections::BTreeSet;
use tokio::sync::RwLock;

use crate::server::types::ServerEvent;
use crate::session::{SessionOutbox, SessionRegistry};

/// 既知のBotアカウント（初期状態でミュート）
pub const DEFAULT_BLOCKED_USERS: &[&str] = &["streamlabs", "nightbot", "moobot", "streamelements"];

/// ブロックリストのスナップショット
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlocklistSnapshot {
    /// 実際に内容が変わるたびに増える
    pub version: u64,
    pub users: Vec<String>,
}

#[derive(Debug)]
struct BlocklistState {
    version: u64,
    users: BTreeSet<String>,
}

impl BlocklistState {
    fn snapshot(&self) -> BlocklistSnapshot {
        BlocklistSnapshot {
            version: self.version,
            users: self.users.iter().cloned().collect(),
        }
    }
}

#[derive(Debug)]
pub struct Blocklist {
    state: RwLock<BlocklistState>,
}

fn normalize(user: &str) -> String {
    user.trim().to_lowercase()
}

impl Blocklist {
    /// 既定のBotアカウントで初期化
    pub fn new() -> Self {
        Self::with_users(DEFAULT_BLOCKED_USERS.iter().copied())
    }

    pub fn with_users<'a>(users: impl IntoIterator<Item = &'a str>) -> Self {
        let users = users
            .into_iter()
            .map(normalize)
            .filter(|u| !u.is_empty())
            .collect();
        Self {
            state: RwLock::new(BlocklistState { version: 0, users }),
        }
    }

    /// 大文字小文字を区別せずに判定
    pub async fn contains(&self, user: &str) -> bool {
        self.state.read().await.users.contains(&normalize(user))
    }

    pub async fn snapshot(&self) -> BlocklistSnapshot {
        self.state.read().await.snapshot()
    }

    /// セッションを登録し、現在の一覧を送る
    ///
    /// 読み取りロック中に登録するため、更新のブロードキャストと順序が逆転しない。
    pub async fn subscribe(&self, registry: &SessionRegistry, outbox: SessionOutbox) {
        let state = self.state.read().await;
        registry.add_session(outbox.clone()).await;
        outbox.send(ServerEvent::BlocklistUpdate(state.snapshot().users));
    }

    /// ユーザーをミュートし、全セッションへ一覧をブロードキャスト
    pub async fn mute(&self, user: &str, registry: &SessionRegistry) -> BlocklistSnapshot {
        let user = normalize(user);
        self.mutate_and_publish(registry, |users| users.insert(user))
            .await
    }

    /// ミュート解除し、全セッションへ一覧をブロードキャスト
    pub async fn unmute(&self, user: &str, registry: &SessionRegistry) -> BlocklistSnapshot {
        let user = normalize(user);
        self.mutate_and_publish(registry, |users| users.remove(&user))
            .await
    }

    async fn mutate_and_publish<F>(&self, registry: &SessionRegistry, mutate: F) -> BlocklistSnapshot
    where
        F: FnOnce(&mut BTreeSet<String>) -> bool,
    {
        let mut state = self.state.write().await;
        if mutate(&mut state.users) {
            state.version += 1;
        }
        let snapshot = state.snapshot();

        // 変化がなくても全体を送る
        registry
            .broadcast(ServerEvent::BlocklistUpdate(snapshot.users.clone()))
            .await;

        log::info!(
            "Blocklist updated (version {}): {} users",
            snapshot.version,
            snapshot.users.len()
        );
        snapshot
    }
}

impl Default for Blocklist {
    fn default() -> Self {
        Self::new()
    }
}
