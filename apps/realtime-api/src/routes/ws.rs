//! WebSocket upgrade endpoint.
//!
//! The token is resolved through the auth collaborator before the
//! upgrade; the session never sees credentials.

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use crate::error::ApiError;
use crate::hub::session::serve_socket;
use crate::AppState;

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let user_id = state
        .auth
        .resolve(&query.token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired token"))?;

    Ok(ws.on_upgrade(move |socket| serve_socket(socket, state, user_id)))
}
