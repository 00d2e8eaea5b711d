//! The connection hub: single source of truth for who is connected and
//! where to route frames.
//!
//! All mutation of the routing tables happens on one control task fed by
//! three channels (register, unregister, broadcast-all). A narrow
//! `parking_lot::RwLock` serves the read-mostly fast paths (per-user
//! send, typing and presence reads) and is never held across an await.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time;

use crate::error::StoreError;
use crate::store::{ChatStore, Conversation};

use super::presence::PresenceTable;
use super::wire::{ChatListPayload, MessageKind, ServerFrame, TypingPayload, UserStatusPayload};

pub type SessionId = String;

/// Capacity of the register/unregister control channels.
const CONTROL_QUEUE: usize = 1000;
/// Capacity of the broadcast-all channel.
const BROADCAST_QUEUE: usize = 10_000;
/// How long a connection handshake waits for the hub to accept it.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("hub is shutting down")]
    Shutdown,
    #[error("hub did not accept the session in time")]
    Timeout,
}

/// Routing entry for one live connection. The hub owns the only long-lived
/// sender for the session's outbound queue, so removing the entry closes
/// the queue exactly once.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub user_id: String,
    tx: mpsc::Sender<Arc<str>>,
}

impl SessionHandle {
    pub fn new(id: SessionId, user_id: String, tx: mpsc::Sender<Arc<str>>) -> Self {
        Self { id, user_id, tx }
    }

    fn try_deliver(&self, frame: &Arc<str>) -> Result<(), mpsc::error::TrySendError<Arc<str>>> {
        self.tx.try_send(frame.clone())
    }
}

#[derive(Default)]
struct RoutingState {
    registry: HashMap<SessionId, SessionHandle>,
    user_connections: HashMap<String, Vec<SessionId>>,
    typing: HashMap<i64, HashSet<String>>,
    presence: PresenceTable,
}

struct Shared {
    state: RwLock<RoutingState>,
    store: Arc<dyn ChatStore>,
}

/// The control task. Consumes register/unregister/broadcast events for
/// the life of the process, or until [`HubHandle::stop`] is called.
pub struct Hub {
    handle: HubHandle,
    register_rx: mpsc::Receiver<SessionHandle>,
    unregister_rx: mpsc::Receiver<SessionId>,
    broadcast_rx: mpsc::Receiver<Arc<str>>,
    stop_rx: mpsc::Receiver<()>,
}

/// Cloneable handle used by sessions, dispatch handlers, and the
/// notification dispatcher.
#[derive(Clone)]
pub struct HubHandle {
    shared: Arc<Shared>,
    register_tx: mpsc::Sender<SessionHandle>,
    unregister_tx: mpsc::Sender<SessionId>,
    broadcast_tx: mpsc::Sender<Arc<str>>,
    stop_tx: mpsc::Sender<()>,
}

impl Hub {
    pub fn new(store: Arc<dyn ChatStore>) -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::channel(CONTROL_QUEUE);
        let (unregister_tx, unregister_rx) = mpsc::channel(CONTROL_QUEUE);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_QUEUE);
        let (stop_tx, stop_rx) = mpsc::channel(1);

        let handle = HubHandle {
            shared: Arc::new(Shared {
                state: RwLock::new(RoutingState::default()),
                store,
            }),
            register_tx,
            unregister_tx,
            broadcast_tx,
            stop_tx,
        };

        (
            Self {
                handle: handle.clone(),
                register_rx,
                unregister_rx,
                broadcast_rx,
                stop_rx,
            },
            handle,
        )
    }

    /// Control loop.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(session) = self.register_rx.recv() => self.handle_register(session),
                Some(session_id) = self.unregister_rx.recv() => self.handle_unregister(session_id),
                Some(frame) = self.broadcast_rx.recv() => self.handle_broadcast(frame),
                _ = self.stop_rx.recv() => {
                    tracing::info!("hub stopping");
                    break;
                }
            }
        }
    }

    fn handle_register(&self, session: SessionHandle) {
        let session_id = session.id.clone();
        let user_id = session.user_id.clone();

        let (first_connection, total) = {
            let mut guard = self.handle.shared.state.write();
            let state = &mut *guard;
            let connections = state.user_connections.entry(user_id.clone()).or_default();
            connections.push(session_id.clone());
            let first = connections.len() == 1;
            state.registry.insert(session_id.clone(), session);
            if first {
                state.presence.set_online(&user_id);
            }
            (first, state.registry.len())
        };

        tracing::info!(%session_id, %user_id, total, "session registered");

        // Deliver the user's conversation list without blocking the
        // handshake.
        let handle = self.handle.clone();
        let uid = user_id.clone();
        tokio::spawn(async move {
            if let Err(err) = handle.send_chat_list(&uid).await {
                tracing::warn!(?err, user_id = %uid, "failed to deliver chat list");
            }
        });

        if first_connection {
            let handle = self.handle.clone();
            tokio::spawn(async move {
                handle.broadcast_presence(&user_id, true).await;
            });
        }
    }

    fn handle_unregister(&self, session_id: SessionId) {
        let went_offline = {
            let mut guard = self.handle.shared.state.write();
            let state = &mut *guard;
            // Double-unregister is a no-op; the registry entry holds the
            // queue's only sender, so removing it closes the queue once.
            let Some(session) = state.registry.remove(&session_id) else {
                return;
            };
            let user_id = session.user_id.clone();

            let last_connection = match state.user_connections.get_mut(&user_id) {
                Some(connections) => {
                    connections.retain(|s| s != &session_id);
                    connections.is_empty()
                }
                None => false,
            };
            if last_connection {
                state.user_connections.remove(&user_id);
                state.presence.remove(&user_id);
                state.typing.retain(|_, users| {
                    users.remove(&user_id);
                    !users.is_empty()
                });
            }

            tracing::info!(%session_id, %user_id, total = state.registry.len(), "session unregistered");
            last_connection.then_some(user_id)
        };

        if let Some(user_id) = went_offline {
            let handle = self.handle.clone();
            tokio::spawn(async move {
                handle.broadcast_presence(&user_id, false).await;
            });
        }
    }

    fn handle_broadcast(&self, frame: Arc<str>) {
        let sessions: Vec<SessionHandle> = {
            let state = self.handle.shared.state.read();
            state.registry.values().cloned().collect()
        };
        for session in sessions {
            self.handle.deliver_or_unregister(&session, &frame);
        }
    }
}

impl HubHandle {
    /// Add a session to the routing tables. Called once per connection
    /// before its loops start.
    pub async fn register(&self, session: SessionHandle) -> Result<(), HubError> {
        match time::timeout(REGISTER_TIMEOUT, self.register_tx.send(session)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(HubError::Shutdown),
            Err(_) => Err(HubError::Timeout),
        }
    }

    /// Remove a session. Safe to call more than once.
    pub async fn unregister(&self, session_id: SessionId) {
        let _ = self.unregister_tx.send(session_id).await;
    }

    /// Non-blocking unregistration used from delivery fast paths.
    fn schedule_unregister(&self, session_id: SessionId) {
        if self.unregister_tx.try_send(session_id).is_err() {
            tracing::warn!("unregister queue full — session cleanup delayed");
        }
    }

    fn deliver_or_unregister(&self, session: &SessionHandle, frame: &Arc<str>) {
        match session.try_deliver(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                // A slow consumer never blocks the sender; the session is
                // torn down instead.
                tracing::warn!(
                    session_id = %session.id,
                    user_id = %session.user_id,
                    "outbound queue full — scheduling unregistration"
                );
                self.schedule_unregister(session.id.clone());
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.schedule_unregister(session.id.clone());
            }
        }
    }

    /// Best-effort delivery to every live session of a user. Zero sessions
    /// is not an error.
    pub fn send_to_user(&self, user_id: &str, frame: &Arc<str>) {
        let sessions: Vec<SessionHandle> = {
            let state = self.shared.state.read();
            state
                .user_connections
                .get(user_id)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| state.registry.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default()
        };
        for session in sessions {
            self.deliver_or_unregister(&session, frame);
        }
    }

    /// Independent per-user fan-out of [`Self::send_to_user`].
    pub fn send_to_users(&self, user_ids: &[String], frame: &Arc<str>) {
        for user_id in user_ids {
            self.send_to_user(user_id, frame);
        }
    }

    /// Deliver to one specific session only.
    pub fn send_to_session(&self, session_id: &SessionId, frame: &Arc<str>) {
        let session = {
            let state = self.shared.state.read();
            state.registry.get(session_id).cloned()
        };
        if let Some(session) = session {
            self.deliver_or_unregister(&session, frame);
        }
    }

    /// Enqueue a frame for every registered session.
    pub fn broadcast_all(&self, frame: Arc<str>) {
        if self.broadcast_tx.try_send(frame).is_err() {
            tracing::warn!("broadcast queue full — frame dropped");
        }
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.shared.state.read().user_connections.contains_key(user_id)
    }

    /// Ask the control loop to exit.
    pub fn stop(&self) {
        let _ = self.stop_tx.try_send(());
    }

    /// Broadcast a typing event to the conversation's participants, then
    /// update the typing table. The broadcast goes first so observers
    /// always see the event that corresponds to the state transition.
    pub async fn handle_typing(
        &self,
        chat_id: i64,
        user_id: &str,
        user_name: &str,
        is_typing: bool,
    ) {
        let payload = TypingPayload {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            chat_id: chat_id.to_string(),
            is_typing,
        };
        let frame = ServerFrame::new(MessageKind::Typing, vec![payload]).encode();

        let participants = match self.shared.store.participants(chat_id).await {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(?err, chat_id, "failed to load participants for typing event");
                return;
            }
        };
        self.send_to_users(&participants, &frame);

        let mut state = self.shared.state.write();
        if is_typing {
            state
                .typing
                .entry(chat_id)
                .or_default()
                .insert(user_id.to_string());
        } else {
            let now_empty = state
                .typing
                .get_mut(&chat_id)
                .map(|users| {
                    users.remove(user_id);
                    users.is_empty()
                })
                .unwrap_or(false);
            if now_empty {
                state.typing.remove(&chat_id);
            }
        }
    }

    /// The requester's related users who are currently online. Unrelated
    /// users are never revealed, whatever their status.
    pub async fn online_users(&self, requesting_user_id: &str) -> Result<Vec<String>, StoreError> {
        let related = self.shared.store.related_users(requesting_user_id).await?;
        let state = self.shared.state.read();
        Ok(related
            .into_iter()
            .filter(|user| user != requesting_user_id && state.presence.is_online(user))
            .collect())
    }

    /// Record a client-driven presence change for a still-connected user.
    pub fn set_presence(&self, user_id: &str, is_online: bool) {
        let mut state = self.shared.state.write();
        if is_online {
            state.presence.set_online(user_id);
        } else {
            state.presence.set_offline(user_id);
        }
    }

    /// Conversation list annotated with live online flags.
    pub async fn conversations_with_presence(
        &self,
        user_id: &str,
    ) -> Result<Vec<Conversation>, StoreError> {
        let mut chats = self.shared.store.list_conversations(user_id).await?;
        {
            let state = self.shared.state.read();
            state.presence.annotate(&mut chats, user_id);
        }
        Ok(chats)
    }

    /// Deliver a fresh annotated chat list to all of a user's sessions.
    /// No-op for offline users.
    pub async fn send_chat_list(&self, user_id: &str) -> Result<(), StoreError> {
        if !self.is_connected(user_id) {
            return Ok(());
        }
        let chats = self.conversations_with_presence(user_id).await?;
        let frame = ServerFrame::new(MessageKind::ChatList, ChatListPayload { chats }).encode();
        self.send_to_user(user_id, &frame);
        Ok(())
    }

    /// Tell a user's social-graph neighbors about a presence change, each
    /// with a refreshed chat list so they get a self-contained snapshot.
    pub async fn broadcast_presence(&self, user_id: &str, is_online: bool) {
        let related = match self.shared.store.related_users(user_id).await {
            Ok(users) => users,
            Err(err) => {
                tracing::warn!(?err, %user_id, "failed to load related users for presence broadcast");
                return;
            }
        };

        let payload = UserStatusPayload {
            user_id: user_id.to_string(),
            is_online,
            last_seen: Utc::now(),
        };
        let frame = ServerFrame::new(MessageKind::UserStatusUpdate, payload).encode();
        self.send_to_users(&related, &frame);

        for related_user in related {
            if let Err(err) = self.send_chat_list(&related_user).await {
                tracing::warn!(?err, user_id = %related_user, "failed to refresh chat list");
            }
        }
    }
}
