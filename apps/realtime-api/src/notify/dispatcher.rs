//! Notification dispatcher: exactly one persisted record and one push per
//! social event, decorated with resolved sender display data.
//!
//! Dispatch is fire-and-forget relative to whatever triggered it; a REST
//! handler's success never waits on push delivery.

use std::sync::Arc;

use crate::error::StoreError;
use crate::hub::hub::HubHandle;
use crate::hub::wire::{MessageKind, ServerFrame};
use crate::store::{ChatStore, NotificationRecord, DEFAULT_AVATAR, DEFAULT_GROUP_ICON};

/// Closed set of notification types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    FollowRequest,
    Follow,
    Unfollow,
    FollowAccepted,
    FollowRejected,
    GroupInvitation,
    GroupInvitationResponse,
    GroupJoinRequest,
    GroupKick,
    GroupEventCreated,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FollowRequest => "follow_request",
            Self::Follow => "follow",
            Self::Unfollow => "unfollow",
            Self::FollowAccepted => "follow_accepted",
            Self::FollowRejected => "follow_rejected",
            Self::GroupInvitation => "group_invitation",
            Self::GroupInvitationResponse => "group_invitation_response",
            Self::GroupJoinRequest => "group_join_request",
            Self::GroupKick => "group_kick",
            Self::GroupEventCreated => "group_event_created",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "follow_request" => Self::FollowRequest,
            "follow" => Self::Follow,
            "unfollow" => Self::Unfollow,
            "follow_accepted" => Self::FollowAccepted,
            "follow_rejected" => Self::FollowRejected,
            "group_invitation" => Self::GroupInvitation,
            "group_invitation_response" => Self::GroupInvitationResponse,
            "group_join_request" => Self::GroupJoinRequest,
            "group_kick" => Self::GroupKick,
            "group_event_created" => Self::GroupEventCreated,
            _ => return None,
        })
    }

    /// Group-authored system events carry the fixed group icon instead of
    /// a user avatar.
    pub fn is_group_authored(self) -> bool {
        matches!(self, Self::GroupKick | Self::GroupEventCreated)
    }
}

pub struct NotificationDispatcher {
    store: Arc<dyn ChatStore>,
    hub: HubHandle,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn ChatStore>, hub: HubHandle) -> Self {
        Self { store, hub }
    }

    /// Persist and push one notification, returning the stored record
    /// (with its real id) so callers can acknowledge.
    pub async fn deliver_now(
        &self,
        kind: NotificationKind,
        sender_id: &str,
        recipient_id: &str,
        ref_id: &str,
        message: &str,
    ) -> Result<NotificationRecord, StoreError> {
        deliver(&self.store, &self.hub, kind, sender_id, recipient_id, ref_id, message).await
    }

    /// Fire-and-forget dispatch with its own error boundary.
    pub fn dispatch(
        &self,
        kind: NotificationKind,
        sender_id: String,
        recipient_id: String,
        ref_id: String,
        message: String,
    ) {
        let store = self.store.clone();
        let hub = self.hub.clone();
        tokio::spawn(async move {
            if let Err(err) =
                deliver(&store, &hub, kind, &sender_id, &recipient_id, &ref_id, &message).await
            {
                tracing::warn!(
                    ?err,
                    kind = kind.as_str(),
                    recipient_id = %recipient_id,
                    "failed to dispatch notification"
                );
            }
        });
    }

    /// A user asked to follow another.
    pub fn follow_request(&self, follower_id: &str, followee_id: &str, follower_name: &str) {
        self.dispatch(
            NotificationKind::FollowRequest,
            follower_id.to_string(),
            followee_id.to_string(),
            follower_id.to_string(),
            format!("{follower_name} wants to follow you"),
        );
    }

    /// A user was invited to a group.
    pub fn group_invitation(
        &self,
        inviter_id: &str,
        invitee_id: &str,
        group_id: &str,
        group_name: &str,
        inviter_name: &str,
    ) {
        self.dispatch(
            NotificationKind::GroupInvitation,
            inviter_id.to_string(),
            invitee_id.to_string(),
            group_id.to_string(),
            format!("{inviter_name} has invited you to join the group {group_name}"),
        );
    }

    /// A member was removed from a group.
    pub fn group_kick(&self, group_id: &str, removed_user_id: &str, group_name: &str) {
        self.dispatch(
            NotificationKind::GroupKick,
            group_id.to_string(),
            removed_user_id.to_string(),
            group_id.to_string(),
            format!("You have been removed from the group {group_name}"),
        );
    }

    /// Fan out an event-created notification to every group member except
    /// the creator.
    pub fn group_event_created(
        &self,
        group_id: &str,
        event_id: &str,
        creator_id: &str,
        title: &str,
    ) {
        let store = self.store.clone();
        let hub = self.hub.clone();
        let group_id = group_id.to_string();
        let event_id = event_id.to_string();
        let creator_id = creator_id.to_string();
        let title = title.to_string();

        tokio::spawn(async move {
            let creator_name = match store.user_profile(&creator_id).await {
                Ok(Some(profile)) => profile.display_name,
                Ok(None) => {
                    tracing::warn!(%creator_id, "event creator not found");
                    return;
                }
                Err(err) => {
                    tracing::warn!(?err, %creator_id, "failed to load event creator");
                    return;
                }
            };
            let members = match store.group_members(&group_id).await {
                Ok(members) => members,
                Err(err) => {
                    tracing::warn!(?err, %group_id, "failed to load group members");
                    return;
                }
            };

            let message = format!("{creator_name} created a new event: {title}");
            for member in members.into_iter().filter(|m| *m != creator_id) {
                if let Err(err) = deliver(
                    &store,
                    &hub,
                    NotificationKind::GroupEventCreated,
                    &creator_id,
                    &member,
                    &event_id,
                    &message,
                )
                .await
                {
                    tracing::warn!(?err, recipient_id = %member, "failed to notify group member");
                }
            }
        });
    }
}

async fn deliver(
    store: &Arc<dyn ChatStore>,
    hub: &HubHandle,
    kind: NotificationKind,
    sender_id: &str,
    recipient_id: &str,
    ref_id: &str,
    message: &str,
) -> Result<NotificationRecord, StoreError> {
    let mut record = store
        .append_notification(recipient_id, sender_id, kind.as_str(), ref_id, message)
        .await?;
    record.sender_avatar = sender_avatar(store, sender_id, kind).await;

    let frame = ServerFrame::new(MessageKind::Notification, &record).encode();
    hub.send_to_user(recipient_id, &frame);
    Ok(record)
}

async fn sender_avatar(store: &Arc<dyn ChatStore>, sender_id: &str, kind: NotificationKind) -> String {
    if kind.is_group_authored() {
        return DEFAULT_GROUP_ICON.to_string();
    }
    match store.user_profile(sender_id).await {
        Ok(Some(profile)) => profile.avatar_or_default(),
        _ => DEFAULT_AVATAR.to_string(),
    }
}
