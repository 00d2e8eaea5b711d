//! Inbound frame dispatch, one handler per message kind.
//!
//! Mutating kinds (chat, media, read receipts, membership sync) are
//! handled in arrival order so persistence order matches send order;
//! read-only requests are answered on their own tasks and go back to the
//! requesting session only.

use tracing::{debug, warn};

use crate::notify::dispatcher::NotificationKind;
use crate::AppState;

use super::hub::SessionId;
use super::media;
use super::wire::{
    normalize_message_type, ChatHistoryRequest, ChatHistoryResponse, ChatListPayload,
    ChatMessagePayload, ClientFrame, ErrorPayload, GroupInvitationPayload, GroupSyncPayload,
    MessageKind, MessagesReadPayload, NotificationAck, NotificationRequest, ServerFrame,
    TypingPayload, UserStatusPayload,
};

/// Default page size for chat history requests.
const DEFAULT_HISTORY_LIMIT: i64 = 50;
/// Upper bound a client may request.
const MAX_HISTORY_LIMIT: i64 = 100;

enum ChatTarget {
    Private(String),
    Group(String),
}

/// Everything a handler needs about the connection it serves.
#[derive(Clone)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub user_id: String,
    pub state: AppState,
}

impl SessionContext {
    /// Decode and route one inbound frame. Malformed frames are dropped
    /// and logged; the connection stays open.
    pub async fn dispatch(&self, raw: &str) {
        let frame: ClientFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(?err, user_id = %self.user_id, "dropping malformed frame");
                return;
            }
        };

        match frame.kind {
            MessageKind::Chat => self.handle_chat(frame.data).await,
            MessageKind::Media => self.handle_media(frame.data).await,
            MessageKind::Typing => self.handle_typing(frame.data).await,
            MessageKind::MessagesRead => self.handle_messages_read(frame.data).await,
            MessageKind::UserStatusUpdate => self.handle_status_update(frame.data).await,
            MessageKind::GroupInvitation => self.handle_group_invitation(frame.data),
            MessageKind::Notification => self.handle_notification(frame.data).await,
            MessageKind::JoinGroup => self.handle_join_group(frame.data).await,
            MessageKind::LeaveGroup => self.handle_leave_group(frame.data).await,
            MessageKind::OnlineUsers => {
                let ctx = self.clone();
                tokio::spawn(async move { ctx.handle_online_users().await });
            }
            MessageKind::ChatList => {
                let ctx = self.clone();
                tokio::spawn(async move { ctx.send_chat_list().await });
            }
            MessageKind::ChatMessages => {
                let ctx = self.clone();
                let data = frame.data;
                tokio::spawn(async move { ctx.handle_chat_messages(data).await });
            }
            MessageKind::GroupEventCreated | MessageKind::Unknown => {
                debug!(user_id = %self.user_id, "ignoring unrecognized message kind");
            }
        }
    }

    fn reply(&self, frame: &ServerFrame) {
        self.state
            .hub
            .send_to_session(&self.session_id, &frame.encode());
    }

    fn reply_error(&self, kind: MessageKind, category: &'static str, message: &str) {
        self.reply(&ServerFrame::new(kind, ErrorPayload::new(category, message)));
    }

    // ----- chat & media -----

    async fn handle_chat(&self, data: serde_json::Value) {
        let Ok(payload) = serde_json::from_value::<ChatMessagePayload>(data) else {
            debug!(user_id = %self.user_id, "dropping malformed chat payload");
            return;
        };
        let message_type = normalize_message_type(&payload.message_type);
        self.persist_and_fan_out(MessageKind::Chat, payload, message_type)
            .await;
    }

    /// Media frames carry a URL which must point at an allow-listed
    /// domain. Invalid payloads are bounced back to the sender only.
    async fn handle_media(&self, data: serde_json::Value) {
        let Ok(payload) = serde_json::from_value::<ChatMessagePayload>(data) else {
            debug!(user_id = %self.user_id, "dropping malformed media payload");
            return;
        };
        if !media::is_allowed_media(&payload.content, &self.state.config.media_allowed_domains) {
            debug!(user_id = %self.user_id, "rejecting media message");
            self.reply_error(MessageKind::Media, "invalid_media", "Invalid media message");
            return;
        }
        self.persist_and_fan_out(MessageKind::Media, payload, "media")
            .await;
    }

    async fn persist_and_fan_out(
        &self,
        kind: MessageKind,
        payload: ChatMessagePayload,
        message_type: &str,
    ) {
        let target = match (
            payload.recipient_id.as_deref().filter(|r| !r.is_empty()),
            payload.group_id.as_deref().filter(|g| !g.is_empty()),
        ) {
            (Some(recipient), _) => ChatTarget::Private(recipient.to_string()),
            (None, Some(group)) => ChatTarget::Group(group.to_string()),
            (None, None) => {
                debug!(user_id = %self.user_id, "chat message without recipient or group");
                return;
            }
        };

        let store = &self.state.store;
        let thread_id = match &target {
            ChatTarget::Private(recipient) => {
                store
                    .find_or_create_private_thread(&self.user_id, recipient)
                    .await
            }
            ChatTarget::Group(group) => store.find_or_create_group_thread(group).await,
        };
        let thread_id = match thread_id {
            Ok(id) => id,
            Err(err) => {
                warn!(?err, user_id = %self.user_id, "failed to resolve chat thread");
                self.reply_error(kind, "internal_error", "Failed to save message");
                return;
            }
        };

        // A message that cannot be persisted is never broadcast.
        let record = match store
            .append_message(thread_id, &self.user_id, &payload.content, message_type)
            .await
        {
            Ok(record) => record,
            Err(err) => {
                warn!(?err, user_id = %self.user_id, chat_id = thread_id, "failed to persist message");
                self.reply_error(kind, "internal_error", "Failed to save message");
                return;
            }
        };

        let out = ChatMessagePayload::from_record(
            &record,
            match &target {
                ChatTarget::Private(recipient) => Some(recipient.clone()),
                ChatTarget::Group(_) => None,
            },
            match &target {
                ChatTarget::Group(group) => Some(group.clone()),
                ChatTarget::Private(_) => None,
            },
        );
        let frame = ServerFrame::new(kind, out).encode();

        match target {
            ChatTarget::Private(recipient) => {
                self.state.hub.send_to_user(&recipient, &frame);
                // Echo to the sender's sessions as the delivery ack.
                self.state.hub.send_to_user(&self.user_id, &frame);
            }
            ChatTarget::Group(_) => {
                // Fan out to current chat participants, not group members:
                // kicked users are already gone from the participant set.
                match store.participants(thread_id).await {
                    Ok(participants) => self.state.hub.send_to_users(&participants, &frame),
                    Err(err) => {
                        warn!(?err, chat_id = thread_id, "failed to load participants for fan-out");
                    }
                }
            }
        }
    }

    // ----- typing & presence -----

    async fn handle_typing(&self, data: serde_json::Value) {
        let Ok(payload) = serde_json::from_value::<TypingPayload>(data) else {
            debug!(user_id = %self.user_id, "dropping malformed typing payload");
            return;
        };
        let Ok(chat_id) = payload.chat_id.parse::<i64>() else {
            debug!(user_id = %self.user_id, chat_id = %payload.chat_id, "typing event with bad chat id");
            return;
        };
        self.state
            .hub
            .handle_typing(chat_id, &self.user_id, &payload.user_name, payload.is_typing)
            .await;
    }

    async fn handle_status_update(&self, data: serde_json::Value) {
        let Ok(payload) = serde_json::from_value::<UserStatusPayload>(data) else {
            debug!(user_id = %self.user_id, "dropping malformed status payload");
            return;
        };
        self.state.hub.set_presence(&self.user_id, payload.is_online);
        self.state
            .hub
            .broadcast_presence(&self.user_id, payload.is_online)
            .await;
    }

    async fn handle_online_users(&self) {
        match self.state.hub.online_users(&self.user_id).await {
            Ok(users) => self.reply(&ServerFrame::new(MessageKind::OnlineUsers, users)),
            Err(err) => warn!(?err, user_id = %self.user_id, "failed to compute online users"),
        }
    }

    // ----- read receipts -----

    async fn handle_messages_read(&self, data: serde_json::Value) {
        let Ok(mut payload) = serde_json::from_value::<MessagesReadPayload>(data) else {
            debug!(user_id = %self.user_id, "dropping malformed read receipt");
            return;
        };
        let Ok(chat_id) = payload.chat_id.parse::<i64>() else {
            debug!(user_id = %self.user_id, "read receipt with bad chat id");
            return;
        };
        payload.user_id = self.user_id.clone();

        for raw_id in &payload.message_ids {
            let Ok(message_id) = raw_id.parse::<i64>() else {
                continue;
            };
            if let Err(err) = self.state.store.record_read(message_id, &self.user_id).await {
                warn!(?err, message_id, user_id = %self.user_id, "failed to record read receipt");
            }
        }

        // Tell everyone in the conversation about the new read state.
        match self.state.store.participants(chat_id).await {
            Ok(participants) => {
                let frame = ServerFrame::new(MessageKind::MessagesRead, payload).encode();
                self.state.hub.send_to_users(&participants, &frame);
            }
            Err(err) => warn!(?err, chat_id, "failed to load participants for read broadcast"),
        }
    }

    // ----- chat list & history -----

    async fn send_chat_list(&self) {
        match self.state.hub.conversations_with_presence(&self.user_id).await {
            Ok(chats) => {
                self.reply(&ServerFrame::new(
                    MessageKind::ChatList,
                    ChatListPayload { chats },
                ));
            }
            Err(err) => warn!(?err, user_id = %self.user_id, "failed to build chat list"),
        }
    }

    async fn handle_chat_messages(&self, data: serde_json::Value) {
        let Ok(request) = serde_json::from_value::<ChatHistoryRequest>(data) else {
            self.reply_error(
                MessageKind::ChatMessages,
                "invalid_request",
                "Invalid request format",
            );
            return;
        };
        if request.chat_id.is_empty() {
            self.reply_error(
                MessageKind::ChatMessages,
                "invalid_request",
                "Chat ID is required",
            );
            return;
        }
        let Ok(chat_id) = request.chat_id.parse::<i64>() else {
            self.reply_error(
                MessageKind::ChatMessages,
                "invalid_request",
                "Chat ID is required",
            );
            return;
        };

        let limit = if request.limit <= 0 || request.limit > MAX_HISTORY_LIMIT {
            DEFAULT_HISTORY_LIMIT
        } else {
            request.limit
        };
        let offset = request.offset.max(0);

        // History is only served to participants.
        match self.state.store.is_participant(chat_id, &self.user_id).await {
            Ok(true) => {}
            Ok(false) => {
                self.reply_error(
                    MessageKind::ChatMessages,
                    "access_denied",
                    "Access denied: you are not a participant of this chat",
                );
                return;
            }
            Err(err) => {
                warn!(?err, chat_id, "failed to check chat access");
                self.reply_error(
                    MessageKind::ChatMessages,
                    "internal_error",
                    "Error checking chat access",
                );
                return;
            }
        }

        let messages = match self
            .state
            .store
            .list_messages(chat_id, &self.user_id, limit, offset)
            .await
        {
            Ok(messages) => messages,
            Err(err) => {
                warn!(?err, chat_id, "failed to load chat history");
                self.reply_error(
                    MessageKind::ChatMessages,
                    "internal_error",
                    "Error retrieving chat messages",
                );
                return;
            }
        };
        let total = match self.state.store.message_count(chat_id).await {
            Ok(total) => total,
            Err(_) => messages.len() as i64,
        };
        let has_more = offset + (messages.len() as i64) < total;

        self.reply(&ServerFrame::new(
            MessageKind::ChatMessages,
            ChatHistoryResponse {
                chat_id: request.chat_id,
                messages,
                has_more,
                total,
            },
        ));
    }

    // ----- group membership sync -----

    async fn handle_join_group(&self, data: serde_json::Value) {
        let Ok(payload) = serde_json::from_value::<GroupSyncPayload>(data) else {
            return;
        };
        if payload.group_id.is_empty() {
            return;
        }

        let thread_id = match self
            .state
            .store
            .find_or_create_group_thread(&payload.group_id)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                debug!(?err, group_id = %payload.group_id, "failed to resolve group thread");
                return;
            }
        };
        if let Err(err) = self.state.store.add_participant(thread_id, &self.user_id).await {
            warn!(?err, chat_id = thread_id, user_id = %self.user_id, "failed to join group chat");
            return;
        }
        self.send_chat_list().await;
    }

    async fn handle_leave_group(&self, data: serde_json::Value) {
        let Ok(payload) = serde_json::from_value::<GroupSyncPayload>(data) else {
            return;
        };
        if payload.group_id.is_empty() {
            return;
        }

        match self.state.store.group_thread_id(&payload.group_id).await {
            Ok(Some(thread_id)) => {
                if let Err(err) = self
                    .state
                    .store
                    .remove_participant(thread_id, &self.user_id)
                    .await
                {
                    warn!(?err, chat_id = thread_id, user_id = %self.user_id, "failed to leave group chat");
                }
            }
            Ok(None) => {}
            Err(err) => warn!(?err, group_id = %payload.group_id, "failed to look up group thread"),
        }
        self.send_chat_list().await;
    }

    // ----- invitations & notifications -----

    fn handle_group_invitation(&self, data: serde_json::Value) {
        let Ok(payload) = serde_json::from_value::<GroupInvitationPayload>(data) else {
            debug!(user_id = %self.user_id, "dropping malformed group invitation");
            return;
        };
        let frame = ServerFrame::new(MessageKind::GroupInvitation, &payload).encode();
        match payload.action.as_str() {
            "notify_invitation" => self.state.hub.send_to_user(&payload.invitee_id, &frame),
            "notify_response" => self.state.hub.send_to_user(&payload.inviter_id, &frame),
            other => debug!(action = %other, "unknown group invitation action"),
        }
    }

    /// Peer-authored notification: persist, push to the recipient, ack
    /// the sender with the persisted id.
    async fn handle_notification(&self, data: serde_json::Value) {
        let Ok(request) = serde_json::from_value::<NotificationRequest>(data) else {
            debug!(user_id = %self.user_id, "dropping malformed notification");
            return;
        };
        if request.recipient_id.is_empty() {
            debug!(user_id = %self.user_id, "notification missing recipient");
            return;
        }
        let Some(kind) = NotificationKind::parse(&request.kind) else {
            debug!(user_id = %self.user_id, kind = %request.kind, "notification with unknown type");
            return;
        };

        match self
            .state
            .notifier
            .deliver_now(
                kind,
                &self.user_id,
                &request.recipient_id,
                &request.ref_id,
                &request.message,
            )
            .await
        {
            Ok(record) => {
                self.reply(&ServerFrame::new(
                    MessageKind::Notification,
                    NotificationAck {
                        status: "sent",
                        message: "Notification sent successfully",
                        id: record.id,
                    },
                ));
            }
            Err(err) => {
                warn!(?err, user_id = %self.user_id, "failed to persist notification");
            }
        }
    }
}
