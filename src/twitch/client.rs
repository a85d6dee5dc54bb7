//! Twitch チャット（IRC over WebSocket）クライアント
//!
//! 匿名ログイン（`justinfan<乱数>`）で読み取り専用接続し、
//! JOIN の確認を受けた時点で接続成功とする。
//! 以降の受信は専用タスクで行い、PRIVMSG をチャネル経由で渡す。

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::irc::IrcMessage;

type IrcSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 接続〜JOIN確認までのタイムアウト（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 匿名ログイン時のパスワード（任意の値でよい）
const ANONYMOUS_PASS: &str = "SCHMOOPIIE";

#[derive(Debug, Error)]
pub enum TwitchError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connection timed out")]
    ConnectTimeout,

    #[error("Login rejected: {0}")]
    LoginRejected(String),

    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Connection closed by server")]
    ConnectionClosed,

    #[error("Invalid channel name: {0:?}")]
    InvalidChannel(String),
}

/// 受信したチャットメッセージ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingChat {
    /// 送信者のログイン名（小文字）
    pub login: String,
    /// `display-name` タグ（空なら None）
    pub display_name: Option<String>,
    pub text: String,
}

impl IncomingChat {
    /// 表示用のユーザー名。display-nameがなければログイン名
    pub fn user(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.login)
    }
}

/// 確立済みのプッシュ接続
///
/// ドロップまたは `close` で接続を閉じる。
/// 相手側から切断された場合は `recv` が None を返す。
#[derive(Debug)]
pub struct PushConnection {
    identity: String,
    messages: mpsc::UnboundedReceiver<IncomingChat>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl PushConnection {
    pub fn new(
        identity: impl Into<String>,
        messages: mpsc::UnboundedReceiver<IncomingChat>,
        shutdown: oneshot::Sender<()>,
    ) -> Self {
        Self {
            identity: identity.into(),
            messages,
            shutdown: Some(shutdown),
        }
    }

    /// 接続に使用した自分のログイン名
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub async fn recv(&mut self) -> Option<IncomingChat> {
        self.messages.recv().await
    }

    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl Drop for PushConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// プッシュ型チャットへの接続
#[async_trait]
pub trait PushChatClient: Send + Sync {
    async fn connect(&self, channel: &str) -> Result<PushConnection, TwitchError>;
}

/// チャンネル名を正規化（前後空白・先頭`#`を除去し小文字化）
pub fn normalize_channel(name: &str) -> String {
    name.trim().trim_start_matches('#').to_lowercase()
}

fn anonymous_nick() -> String {
    format!("justinfan{}", rand::thread_rng().gen_range(10_000..100_000))
}

fn is_login_failure(notice: &str) -> bool {
    notice.contains("Login authentication failed") || notice.contains("Improperly formatted auth")
}

/// PRIVMSG を受信メッセージに変換
fn chat_from(msg: &IrcMessage) -> Option<IncomingChat> {
    let login = msg.nick()?.to_lowercase();
    let raw = msg.trailing()?;
    // `/me` は CTCP ACTION で届く
    let text = raw
        .strip_prefix("\u{1}ACTION ")
        .map(|t| t.trim_end_matches('\u{1}'))
        .unwrap_or(raw);
    let display_name = msg
        .tag("display-name")
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    Some(IncomingChat {
        login,
        display_name,
        text: text.to_string(),
    })
}

pub struct TwitchIrcClient {
    url: String,
    connect_timeout: Duration,
}

impl TwitchIrcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// 接続・ログイン・JOINし、JOINの確認を待つ
    async fn handshake(&self, channel: &str, identity: &str) -> Result<IrcSocket, TwitchError> {
        let (mut socket, _response) = connect_async(self.url.as_str()).await?;
        log::debug!("WebSocket connected to {}", self.url);

        let commands = [
            "CAP REQ :twitch.tv/tags twitch.tv/commands".to_string(),
            format!("PASS {}", ANONYMOUS_PASS),
            format!("NICK {}", identity),
            format!("JOIN #{}", channel),
        ];
        for command in commands {
            socket.send(Message::Text(command)).await?;
        }

        loop {
            let Some(frame) = socket.next().await else {
                return Err(TwitchError::ConnectionClosed);
            };

            match frame? {
                Message::Text(text) => {
                    for line in text.lines() {
                        let Some(msg) = IrcMessage::parse(line) else {
                            continue;
                        };
                        match msg.command.as_str() {
                            "PING" => {
                                let pong = format!("PONG :{}", msg.trailing().unwrap_or("tmi.twitch.tv"));
                                socket.send(Message::Text(pong)).await?;
                            }
                            "JOIN" if msg.nick().is_some_and(|nick| nick.eq_ignore_ascii_case(identity)) => {
                                return Ok(socket);
                            }
                            "NOTICE" => {
                                let notice = msg.trailing().unwrap_or_default();
                                if is_login_failure(notice) {
                                    return Err(TwitchError::LoginRejected(notice.to_string()));
                                }
                                if msg.tag("msg-id") == Some("msg_channel_suspended") {
                                    return Err(TwitchError::ChannelUnavailable(notice.to_string()));
                                }
                                log::debug!("Twitch notice during join: {}", notice);
                            }
                            _ => {}
                        }
                    }
                }
                Message::Ping(payload) => socket.send(Message::Pong(payload)).await?,
                Message::Close(_) => return Err(TwitchError::ConnectionClosed),
                _ => {}
            }
        }
    }
}

#[async_trait]
impl PushChatClient for TwitchIrcClient {
    async fn connect(&self, name: &str) -> Result<PushConnection, TwitchError> {
        let channel = normalize_channel(name);
        if channel.is_empty() {
            return Err(TwitchError::InvalidChannel(name.to_string()));
        }

        let identity = anonymous_nick();
        let socket = tokio::time::timeout(self.connect_timeout, self.handshake(&channel, &identity))
            .await
            .map_err(|_| TwitchError::ConnectTimeout)??;
        log::info!("Joined Twitch channel #{} as {}", channel, identity);

        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(read_loop(socket, channel, tx, shutdown_rx));

        Ok(PushConnection::new(identity, rx, shutdown_tx))
    }
}

/// 受信ループ。終了すると送信側がドロップされ、受け手はNoneを受け取る
async fn read_loop(
    socket: IrcSocket,
    channel: String,
    tx: mpsc::UnboundedSender<IncomingChat>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = sink.send(Message::Text(format!("PART #{}", channel))).await;
                let _ = sink.close().await;
                log::info!("Left Twitch channel #{}", channel);
                return;
            }
            frame = stream.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        log::warn!("Twitch WebSocket error on #{}: {}", channel, e);
                        break;
                    }
                    None => break,
                };

                match frame {
                    Message::Text(text) => {
                        for line in text.lines() {
                            let Some(msg) = IrcMessage::parse(line) else {
                                continue;
                            };
                            match msg.command.as_str() {
                                "PRIVMSG" => {
                                    if let Some(chat) = chat_from(&msg) {
                                        if tx.send(chat).is_err() {
                                            // 受け手がいない
                                            let _ = sink.close().await;
                                            return;
                                        }
                                    }
                                }
                                "PING" => {
                                    let pong = format!("PONG :{}", msg.trailing().unwrap_or("tmi.twitch.tv"));
                                    if let Err(e) = sink.send(Message::Text(pong)).await {
                                        log::warn!("Failed to answer PING on #{}: {}", channel, e);
                                    }
                                }
                                "RECONNECT" => {
                                    log::info!("Twitch requested reconnect on #{}", channel);
                                    let _ = sink.close().await;
                                    return;
                                }
                                _ => {}
                            }
                        }
                    }
                    Message::Ping(payload) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Message::Close(frame) => {
                        log::info!("Twitch closed the connection on #{}: {:?}", channel, frame);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    log::info!("Twitch connection for #{} ended", channel);
}
