use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use realtime_api::auth::{MemoryTokenResolver, TokenResolver};
use realtime_api::config::Config;
use realtime_api::hub::hub::Hub;
use realtime_api::notify::NotificationDispatcher;
use realtime_api::store::{ChatStore, PgStore};
use realtime_api::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing — env vars may be set externally)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    // Connect to PostgreSQL.
    let pool = realtime_api::db::pool::connect(&config.database_url).await;
    let store: Arc<dyn ChatStore> = Arc::new(PgStore::new(pool));

    // Session tokens are validated by the platform's auth service; this
    // process only resolves them.
    let auth: Arc<dyn TokenResolver> = Arc::new(MemoryTokenResolver::new());

    let (hub, hub_handle) = Hub::new(store.clone());
    tokio::spawn(hub.run());

    let notifier = Arc::new(NotificationDispatcher::new(store.clone(), hub_handle.clone()));

    let state = AppState {
        config: Arc::new(config),
        store,
        auth,
        hub: hub_handle,
        notifier,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(realtime_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "realtime-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
