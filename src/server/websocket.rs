use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};

use super::http::HttpState;
use super::types::ClientCommand;
use crate::session::SessionManager;

/// WebSocketアップグレード
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<HttpState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.sessions))
}

/// WebSocket接続を処理
///
/// 送信は専用タスク、受信コマンドはこのタスクで順番に処理する。
async fn handle_socket(socket: WebSocket, sessions: SessionManager) {
    let (mut session, mut rx) = sessions.open_session().await;
    let session_id = session.id();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // 送信タスク: セッションのイベントをJSONにしてWebSocketに送信
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    log::error!("Failed to serialize event for session {}: {}", session_id, e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientCommand>(&text) {
                        Ok(command) => session.handle(command).await,
                        Err(e) => log::warn!("Session {}: ignoring invalid frame ({}): {}", session_id, e, text),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Session {} sent close frame", session_id);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("WebSocket error from session {}: {}", session_id, e);
                        break;
                    }
                }
            }
            _ = &mut send_task => break,
        }
    }

    send_task.abort();
    session.close().await;
}
