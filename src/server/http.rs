use axum::{
    extract::State,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::path::Path;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use super::websocket::ws_handler;
use crate::session::SessionManager;

/// HTTPサーバー用の共有状態
#[derive(Clone)]
pub struct HttpState {
    pub sessions: SessionManager,
}

/// ルーターを構築
///
/// - `GET /api/health` ヘルスチェック
/// - `GET /ws` WebSocket（1接続 = 1セッション）
/// - それ以外は `public_dir` の静的ファイル
pub fn router(state: HttpState, public_dir: &Path) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/ws", get(ws_handler))
        .fallback_service(ServeDir::new(public_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTPサーバーを起動
pub async fn start_http_server(
    state: HttpState,
    port: u16,
    public_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(state, public_dir);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("HTTP server listening on http://{}", addr);
    log::info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// ヘルスチェックエンドポイント
async fn health_check(State(state): State<HttpState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "server": "chatterli",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.registry().session_count().await,
    }))
}
