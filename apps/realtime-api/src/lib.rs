pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod hub;
pub mod models;
pub mod notify;
pub mod routes;
pub mod store;

use std::sync::Arc;

use auth::TokenResolver;
use config::Config;
use hub::hub::HubHandle;
use notify::dispatcher::NotificationDispatcher;
use store::ChatStore;

/// Shared application state available to all route handlers and sessions.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ChatStore>,
    pub auth: Arc<dyn TokenResolver>,
    pub hub: HubHandle,
    pub notifier: Arc<NotificationDispatcher>,
}
