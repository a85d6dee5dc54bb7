mod http;
pub mod types;
mod websocket;

pub use http::{router, start_http_server, HttpState};
