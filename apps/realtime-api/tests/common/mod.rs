#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use realtime_api::auth::{MemoryTokenResolver, TokenResolver};
use realtime_api::config::Config;
use realtime_api::hub::hub::Hub;
use realtime_api::notify::NotificationDispatcher;
use realtime_api::store::{ChatStore, MemoryStore};
use realtime_api::AppState;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestBackend {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub auth: Arc<MemoryTokenResolver>,
}

/// Build an AppState over the in-memory store with a running hub.
pub fn test_state() -> TestBackend {
    let store = Arc::new(MemoryStore::new());
    let auth = Arc::new(MemoryTokenResolver::new());

    let dyn_store: Arc<dyn ChatStore> = store.clone();
    let dyn_auth: Arc<dyn TokenResolver> = auth.clone();

    let (hub, hub_handle) = Hub::new(dyn_store.clone());
    tokio::spawn(hub.run());

    let notifier = Arc::new(NotificationDispatcher::new(dyn_store.clone(), hub_handle.clone()));

    let state = AppState {
        config: Arc::new(Config {
            database_url: String::new(),
            port: 0,
            media_allowed_domains: vec!["tenor.com".to_string()],
        }),
        store: dyn_store,
        auth: dyn_auth,
        hub: hub_handle,
        notifier,
    };

    TestBackend { state, store, auth }
}

/// Seed three users with tokens `tok_<id>` and return a started backend.
pub fn seeded_backend() -> TestBackend {
    let backend = test_state();
    backend.store.add_user("u1", "Ada", "Lovelace", Some("/avatars/ada.png"));
    backend.store.add_user("u2", "Alan", "Turing", None);
    backend.store.add_user("u3", "Grace", "Hopper", None);
    for user in ["u1", "u2", "u3"] {
        backend.auth.insert(format!("tok_{user}"), user);
    }
    backend
}

/// Start an actual TCP server for WebSocket testing. The server runs in
/// the background.
pub async fn start_server(state: AppState) -> SocketAddr {
    let app = realtime_api::routes::router().with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

/// Connect a client through the upgrade endpoint.
pub async fn connect(addr: SocketAddr, token: &str) -> WsClient {
    let url = format!("ws://{addr}/ws?token={token}");
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    ws
}

pub async fn send_frame(ws: &mut WsClient, kind: &str, data: serde_json::Value) {
    let frame = serde_json::json!({ "type": kind, "data": data });
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .expect("send frame");
}

/// Read frames until one of the given kind arrives. Panics after 5s.
pub async fn recv_kind(ws: &mut WsClient, kind: &str) -> serde_json::Value {
    let deadline = Duration::from_secs(5);
    time::timeout(deadline, async {
        loop {
            let msg = ws
                .next()
                .await
                .expect("stream ended")
                .expect("ws read error");
            if let Message::Text(text) = msg {
                let value: serde_json::Value = serde_json::from_str(&text).expect("frame json");
                if value["type"] == kind {
                    return value;
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {kind} frame"))
}

/// Assert that no frame of the given kind arrives within the window.
pub async fn assert_no_frame_of_kind(ws: &mut WsClient, kind: &str, window_ms: u64) {
    let result = time::timeout(Duration::from_millis(window_ms), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let value: serde_json::Value =
                        serde_json::from_str(&text).expect("frame json");
                    if value["type"] == kind {
                        return value;
                    }
                }
                Some(Ok(_)) => continue,
                // Stream ended: nothing more can arrive; wait out the window.
                _ => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(
        result.is_err(),
        "unexpected {kind} frame: {:?}",
        result.unwrap()
    );
}
