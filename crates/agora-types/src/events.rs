use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{ChatType, DeleteType, Message, MessageType, OnlineMember, TypingUser};

/// Socket event names, as spelled on the wire.
pub mod names {
    // client -> server
    pub const JOIN_COMMUNITY_ROOMS: &str = "join_community_rooms";
    pub const SEND_COMMUNITY_MESSAGE: &str = "send_community_message";
    pub const EDIT_MESSAGE: &str = "edit_message";
    pub const DELETE_MESSAGE: &str = "delete_message";
    pub const REACT_TO_MESSAGE: &str = "react_to_message";
    pub const TYPING_INDICATOR: &str = "typing_indicator";
    pub const STOP_TYPING: &str = "stop_typing";

    // server -> client
    pub const CONNECTION_SUCCESS: &str = "connection_success";
    pub const NEW_COMMUNITY_MESSAGE: &str = "new_community_message";
    pub const MESSAGE_EDITED: &str = "message_edited";
    pub const MESSAGE_DELETED: &str = "message_deleted";
    pub const MESSAGE_REACTION_UPDATED: &str = "message_reaction_updated";
    pub const USER_ONLINE: &str = "user_online";
    pub const USER_OFFLINE: &str = "user_offline";
    pub const USER_TYPING: &str = "user_typing";
    pub const USER_STOPPED_TYPING: &str = "user_stopped_typing";
    pub const UPLOAD_PROGRESS: &str = "upload_progress";
}

/// Events received from the chat server, already normalized.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Server confirms the authenticated socket session.
    ConnectionSuccess {
        user_id: Option<String>,
        user_name: Option<String>,
    },

    /// A community or direct message was posted (possibly our own echo).
    NewMessage(Box<Message>),

    MessageEdited {
        message_id: String,
        content: String,
    },

    MessageDeleted {
        message_id: String,
        delete_type: DeleteType,
    },

    /// The full reaction map of a message after a change.
    ReactionUpdated {
        message_id: String,
        reactions: BTreeMap<String, String>,
    },

    UserOnline(OnlineMember),

    UserOffline {
        user_id: String,
        community_id: Option<String>,
    },

    UserTyping(TypingSignal),

    UserStoppedTyping(TypingSignal),

    /// Upload progress percentage reported by the server.
    UploadProgress(u8),
}

impl InboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionSuccess { .. } => names::CONNECTION_SUCCESS,
            Self::NewMessage(_) => names::NEW_COMMUNITY_MESSAGE,
            Self::MessageEdited { .. } => names::MESSAGE_EDITED,
            Self::MessageDeleted { .. } => names::MESSAGE_DELETED,
            Self::ReactionUpdated { .. } => names::MESSAGE_REACTION_UPDATED,
            Self::UserOnline(_) => names::USER_ONLINE,
            Self::UserOffline { .. } => names::USER_OFFLINE,
            Self::UserTyping(_) => names::USER_TYPING,
            Self::UserStoppedTyping(_) => names::USER_STOPPED_TYPING,
            Self::UploadProgress(_) => names::UPLOAD_PROGRESS,
        }
    }
}

/// A typing start/stop notification and the conversation it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingSignal {
    pub user: TypingUser,
    pub community_id: String,
    pub chat_type: ChatType,
    /// Set when the signal is scoped to a direct conversation.
    pub recipient_user_id: Option<String>,
}

// -- Outbound payloads --

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomsPayload {
    pub community_ids: Vec<String>,
}

/// Payload of `send_community_message`. Field spellings follow the server,
/// which mixes camelCase with two snake_case routing fields.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessagePayload {
    #[serde(rename = "communityId")]
    pub community_id: String,
    pub content: String,
    #[serde(rename = "messageType", skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
    #[serde(rename = "fileUrl", skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(rename = "fileName", skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(rename = "fileType", skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(rename = "replyToMessageId", skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_type: Option<ChatType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessagePayload {
    pub message_id: String,
    pub new_content: String,
    pub community_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessagePayload {
    pub message_id: String,
    pub delete_type: DeleteType,
    pub community_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactPayload {
    pub message_id: String,
    pub emoji: String,
    pub community_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypingPayload {
    #[serde(rename = "communityId")]
    pub community_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_user_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_payload_uses_server_spellings() {
        let payload = SendMessagePayload {
            community_id: "c1".into(),
            content: "hello".into(),
            message_type: Some(MessageType::Text),
            file_url: None,
            file_name: None,
            file_type: None,
            reply_to_message_id: None,
            chat_type: Some(ChatType::Direct),
            recipient_user_id: Some("u2".into()),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["communityId"], "c1");
        assert_eq!(json["messageType"], "text");
        assert_eq!(json["chat_type"], "direct");
        assert_eq!(json["recipient_user_id"], "u2");
        assert!(json.get("fileUrl").is_none());
    }

    #[test]
    fn delete_type_serializes_snake_case() {
        let payload = DeleteMessagePayload {
            message_id: "m1".into(),
            delete_type: DeleteType::ForEveryone,
            community_id: "c1".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["deleteType"], "for_everyone");
        assert_eq!(json["messageId"], "m1");
    }
}
