pub mod health;
pub mod ws;

use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().merge(health::router()).merge(ws::router())
}
