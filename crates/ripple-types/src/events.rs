use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{MessageResponse, MessageStatus, ReactionEntry, StatusResponse};

/// Events sent from server to client over the WebSocket gateway.
///
/// Wire format: `{"type": "<snake_case name>", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Identify succeeded; the connection is live.
    Ready { user_id: Uuid, username: String },

    /// A user came online or went offline. `last_seen` accompanies the
    /// offline transition and presence queries.
    UserStatus {
        user_id: Uuid,
        is_online: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_seen: Option<chrono::DateTime<chrono::Utc>>,
    },

    /// Counterpart started or stopped typing in a conversation.
    UserTyping {
        user_id: Uuid,
        conversation_id: Uuid,
        is_typing: bool,
    },

    /// A new message addressed to this user.
    ReceiveMessage(MessageResponse),

    /// A message this user sent advanced to delivered/read.
    MessageStatusUpdate {
        message_id: Uuid,
        message_status: MessageStatus,
    },

    /// The merged reaction list for a message changed.
    ReactionUpdate {
        message_id: Uuid,
        reactions: Vec<ReactionEntry>,
    },

    /// Someone posted a new status.
    NewStatus(StatusResponse),

    /// Someone viewed this user's status.
    StatusViewed {
        status_id: Uuid,
        viewer_id: Uuid,
        total_viewers: usize,
        viewers: Vec<Uuid>,
    },

    /// A status was deleted by its owner.
    StatusDeleted { status_id: Uuid },
}

/// Commands sent from client to server over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Authenticate the connection with a JWT.
    Identify { token: String },

    /// Relay an already-persisted message to its receiver if online.
    SendMessage { message_id: Uuid },

    /// Mark messages addressed to this user as read.
    MessageRead { message_ids: Vec<Uuid> },

    /// Begin typing in a conversation; auto-stops after 3 seconds.
    TypingStart {
        conversation_id: Uuid,
        receiver_id: Uuid,
    },

    /// Explicitly stop typing.
    TypingStop {
        conversation_id: Uuid,
        receiver_id: Uuid,
    },

    /// Toggle/replace this user's reaction on a message.
    AddReaction { message_id: Uuid, emoji: String },

    /// Ask for a user's presence; answered with a targeted `user_status`.
    GetUserStatus { user_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_wire_names_are_snake_case() {
        let cases = [
            (
                serde_json::to_value(ClientCommand::SendMessage {
                    message_id: Uuid::nil(),
                })
                .unwrap(),
                "send_message",
            ),
            (
                serde_json::to_value(ClientCommand::MessageRead {
                    message_ids: vec![],
                })
                .unwrap(),
                "message_read",
            ),
            (
                serde_json::to_value(ClientCommand::TypingStart {
                    conversation_id: Uuid::nil(),
                    receiver_id: Uuid::nil(),
                })
                .unwrap(),
                "typing_start",
            ),
            (
                serde_json::to_value(ClientCommand::TypingStop {
                    conversation_id: Uuid::nil(),
                    receiver_id: Uuid::nil(),
                })
                .unwrap(),
                "typing_stop",
            ),
            (
                serde_json::to_value(ClientCommand::AddReaction {
                    message_id: Uuid::nil(),
                    emoji: "👍".into(),
                })
                .unwrap(),
                "add_reaction",
            ),
            (
                serde_json::to_value(ClientCommand::GetUserStatus {
                    user_id: Uuid::nil(),
                })
                .unwrap(),
                "get_user_status",
            ),
        ];

        for (value, expected) in cases {
            assert_eq!(value["type"], expected);
        }
    }

    #[test]
    fn event_wire_names_are_snake_case() {
        let event = ServerEvent::UserTyping {
            user_id: Uuid::nil(),
            conversation_id: Uuid::nil(),
            is_typing: true,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "user_typing");
        assert_eq!(value["data"]["is_typing"], true);

        let event = ServerEvent::MessageStatusUpdate {
            message_id: Uuid::nil(),
            message_status: MessageStatus::Read,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "message_status_update");
        assert_eq!(value["data"]["message_status"], "read");
    }

    #[test]
    fn offline_user_status_carries_last_seen() {
        let ts = chrono::Utc::now();
        let event = ServerEvent::UserStatus {
            user_id: Uuid::nil(),
            is_online: false,
            last_seen: Some(ts),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "user_status");
        assert_eq!(value["data"]["is_online"], false);
        assert!(value["data"]["last_seen"].is_string());
    }

    #[test]
    fn command_round_trips() {
        let cmd = ClientCommand::AddReaction {
            message_id: Uuid::new_v4(),
            emoji: "🔥".into(),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        let back: ClientCommand = serde_json::from_str(&json).unwrap();
        match back {
            ClientCommand::AddReaction { emoji, .. } => assert_eq!(emoji, "🔥"),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
