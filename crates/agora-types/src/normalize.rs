//! Wire-to-canonical adapter.
//!
//! The chat server spells the same logical field either in camelCase or in
//! snake_case depending on the code path that produced the payload. Every
//! inbound payload goes through this module exactly once; nothing past it
//! sees a wire spelling. When both spellings are present the camelCase one
//! wins, and `null` is treated as absent.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::api::{DirectConversationPage, Pagination};
use crate::events::{InboundEvent, TypingSignal, names};
use crate::grouping::group_by_date;
use crate::models::{
    ChatType, DeleteType, DirectChatUser, FileAttachment, Message, MessageGroup, MessageType,
    OnlineMember, ReplySnapshot, Sender, TypingUser,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("expected a JSON object for {0}")]
    NotAnObject(&'static str),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("unknown event: {0}")]
    UnknownEvent(String),
}

/// snake_case spelling of a camelCase field name.
fn snake_case(camel: &str) -> String {
    let mut out = String::with_capacity(camel.len() + 4);
    for ch in camel.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Read-only view over a wire object that resolves both field spellings.
#[derive(Clone, Copy)]
pub struct Fields<'a> {
    obj: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    pub fn new(value: &'a Value, context: &'static str) -> Result<Self, NormalizeError> {
        value
            .as_object()
            .map(|obj| Self { obj })
            .ok_or(NormalizeError::NotAnObject(context))
    }

    /// Look a field up by its camelCase name, falling back to snake_case.
    pub fn get(&self, camel: &str) -> Option<&'a Value> {
        let non_null = |v: &&Value| !v.is_null();
        self.obj.get(camel).filter(non_null).or_else(|| {
            let snake = snake_case(camel);
            if snake == camel {
                None
            } else {
                self.obj.get(&snake).filter(non_null)
            }
        })
    }

    /// First present field among several logical aliases.
    pub fn any(&self, names: &[&str]) -> Option<&'a Value> {
        names.iter().find_map(|n| self.get(n))
    }

    /// String value; numbers are accepted and stringified (numeric ids).
    pub fn string(&self, names: &[&str]) -> Option<String> {
        self.any(names).and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    pub fn bool(&self, names: &[&str]) -> Option<bool> {
        self.any(names).and_then(|v| match v {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            Value::String(s) => match s.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        })
    }

    pub fn object(&self, names: &[&str]) -> Option<Fields<'a>> {
        self.any(names)
            .and_then(Value::as_object)
            .map(|obj| Fields { obj })
    }

    fn require(&self, names: &[&str], field: &'static str) -> Result<String, NormalizeError> {
        self.string(names)
            .filter(|s| !s.is_empty())
            .ok_or(NormalizeError::MissingField(field))
    }
}

/// Parse a timestamp given either as RFC 3339 text or epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn timestamp_field(
    fields: &Fields<'_>,
    names: &[&str],
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, NormalizeError> {
    match fields.any(names) {
        None => Ok(None),
        Some(raw) => parse_timestamp(raw)
            .map(Some)
            .ok_or_else(|| NormalizeError::InvalidField {
                field,
                reason: format!("unrecognized timestamp {raw}"),
            }),
    }
}

/// Reactions arrive either as `{ user_id: emoji }` or as a list of
/// `{ userId, emoji }` entries. Later entries overwrite earlier ones.
pub fn normalize_reactions(value: &Value) -> BTreeMap<String, String> {
    let mut reactions = BTreeMap::new();
    match value {
        Value::Object(map) => {
            for (user_id, emoji) in map {
                if let Some(emoji) = emoji.as_str() {
                    reactions.insert(user_id.clone(), emoji.to_string());
                }
            }
        }
        Value::Array(entries) => {
            for entry in entries {
                let Ok(fields) = Fields::new(entry, "reaction") else {
                    continue;
                };
                if let (Some(user_id), Some(emoji)) =
                    (fields.string(&["userId", "user"]), fields.string(&["emoji"]))
                {
                    reactions.insert(user_id, emoji);
                }
            }
        }
        _ => {}
    }
    reactions
}

fn normalize_read_by(value: &Value) -> BTreeSet<String> {
    let Some(entries) = value.as_array() else {
        return BTreeSet::new();
    };
    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(s) => Some(s.clone()),
            Value::Object(_) => Fields::new(entry, "readBy")
                .ok()
                .and_then(|f| f.string(&["userId", "id"])),
            _ => None,
        })
        .collect()
}

fn normalize_sender(fields: &Fields<'_>) -> Result<Sender, NormalizeError> {
    if let Some(sender) = fields.object(&["sender"]) {
        return Ok(Sender {
            id: sender.require(&["id", "_id", "userId"], "sender.id")?,
            name: sender
                .string(&["name", "userName", "fullName"])
                .unwrap_or_else(|| "Unknown".to_string()),
            avatar: sender.string(&["avatar", "profilePicture"]),
        });
    }

    Ok(Sender {
        id: fields.require(&["senderId", "userId"], "sender.id")?,
        name: fields
            .string(&["senderName", "userName"])
            .unwrap_or_else(|| "Unknown".to_string()),
        avatar: fields.string(&["senderAvatar", "senderProfilePicture"]),
    })
}

fn normalize_file(fields: &Fields<'_>) -> Option<FileAttachment> {
    let (url, name, mime) = match fields.object(&["file"]) {
        Some(file) => (
            file.string(&["url"])?,
            file.string(&["name"]),
            file.string(&["mimeType", "type"]),
        ),
        None => (
            fields.string(&["fileUrl"])?,
            fields.string(&["fileName"]),
            fields.string(&["fileType"]),
        ),
    };

    let name = name.unwrap_or_else(|| {
        url.rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("attachment")
            .to_string()
    });

    Some(FileAttachment {
        url,
        name,
        mime_type: mime.unwrap_or_else(|| "application/octet-stream".to_string()),
    })
}

fn normalize_reply(fields: &Fields<'_>) -> Option<ReplySnapshot> {
    let reply = fields.object(&["replyTo"])?;
    let message_id = reply.string(&["messageId", "id", "_id"])?;
    let sender_name = reply.string(&["senderName"]).or_else(|| {
        reply
            .object(&["sender"])
            .and_then(|s| s.string(&["name", "userName"]))
    });

    Some(ReplySnapshot {
        message_id,
        content: reply.string(&["content"]).unwrap_or_default(),
        sender_name,
        message_type: reply
            .string(&["messageType"])
            .and_then(|t| MessageType::parse(&t))
            .unwrap_or_default(),
    })
}

/// Normalize a chat message from either spelling of the wire format.
///
/// Requires an id and a sender id. A direct message must name its
/// recipient, otherwise it cannot be placed in a conversation.
pub fn normalize_message(value: &Value) -> Result<Message, NormalizeError> {
    let fields = Fields::new(value, "message")?;

    // Some emitters wrap the record: `{ message: {...} }`.
    if fields.any(&["id", "_id"]).is_none() {
        if let Some(inner) = fields.any(&["message"]).filter(|v| v.is_object()) {
            return normalize_message(inner);
        }
    }

    let id = fields.require(&["id", "_id", "messageId"], "id")?;
    let sender = normalize_sender(&fields)?;
    let community_id = fields.require(&["communityId"], "communityId")?;

    let file = normalize_file(&fields);
    let message_type = fields
        .string(&["messageType"])
        .and_then(|t| MessageType::parse(&t))
        .unwrap_or_else(|| match &file {
            Some(f) => MessageType::from_mime(&f.mime_type),
            None => MessageType::Text,
        });

    let chat_type = match fields.string(&["chatType"]) {
        Some(raw) => ChatType::parse(&raw).ok_or(NormalizeError::InvalidField {
            field: "chatType",
            reason: format!("unknown chat type {raw:?}"),
        })?,
        None => ChatType::Community,
    };

    let recipient_user_id = fields.string(&["recipientUserId", "recipientId"]);
    if chat_type == ChatType::Direct && recipient_user_id.is_none() {
        return Err(NormalizeError::MissingField("recipientUserId"));
    }

    let created_at = timestamp_field(&fields, &["createdAt", "timestamp"], "createdAt")?
        .unwrap_or_else(Utc::now);

    let mut message = Message {
        id,
        community_id,
        content: fields.string(&["content"]).unwrap_or_default(),
        message_type,
        file,
        sender,
        reply_to: normalize_reply(&fields),
        reactions: fields
            .get("reactions")
            .map(normalize_reactions)
            .unwrap_or_default(),
        edited: fields.bool(&["edited", "isEdited"]).unwrap_or(false),
        created_at,
        deleted_for_everyone: fields.bool(&["deletedForEveryone"]).unwrap_or(false),
        chat_type,
        recipient_user_id: recipient_user_id.filter(|_| chat_type == ChatType::Direct),
        read_by: fields.get("readBy").map(normalize_read_by).unwrap_or_default(),
    };

    if message.deleted_for_everyone {
        message.tombstone();
    }
    Ok(message)
}

/// Normalize a list of messages given either as `{ date, messages }`
/// groups or flat. The result is regrouped locally so the ordering
/// invariant holds whatever grouping the server applied. Records that fail
/// normalization are logged and skipped.
pub fn normalize_message_groups(value: &Value) -> Result<Vec<MessageGroup>, NormalizeError> {
    let entries = value.as_array().ok_or(NormalizeError::InvalidField {
        field: "messages",
        reason: "expected an array".to_string(),
    })?;

    let mut messages = Vec::new();
    for entry in entries {
        let nested = entry
            .as_object()
            .and_then(|o| o.get("messages"))
            .and_then(Value::as_array);

        let records: Vec<&Value> = match nested {
            Some(list) => list.iter().collect(),
            None => vec![entry],
        };

        for record in records {
            match normalize_message(record) {
                Ok(m) => messages.push(m),
                Err(e) => warn!("Skipping malformed history message: {}", e),
            }
        }
    }

    Ok(group_by_date(messages))
}

pub fn normalize_direct_chat_user(value: &Value) -> Result<DirectChatUser, NormalizeError> {
    let fields = Fields::new(value, "user")?;
    Ok(DirectChatUser {
        user_id: fields.require(&["userId", "id", "_id"], "userId")?,
        name: fields
            .string(&["name", "fullName", "userName"])
            .unwrap_or_else(|| "Unknown".to_string()),
        avatar: fields.string(&["avatar", "profilePicture"]),
        account_type: fields.string(&["accountType"]),
        is_online: fields.bool(&["isOnline"]).unwrap_or(false),
        last_message_time: timestamp_field(&fields, &["lastMessageTime"], "lastMessageTime")?,
        unread_count: fields
            .any(&["unreadCount"])
            .and_then(Value::as_u64)
            .map(|n| n.min(u32::MAX as u64) as u32)
            .unwrap_or(0),
    })
}

pub fn normalize_pagination(value: &Value) -> Pagination {
    fn num(fields: &Fields<'_>, names: &[&str]) -> Option<u64> {
        fields.any(names).and_then(Value::as_u64)
    }

    let Ok(fields) = Fields::new(value, "pagination") else {
        return Pagination::default();
    };

    let page = num(&fields, &["page", "currentPage"]).unwrap_or(1) as u32;
    let limit = num(&fields, &["limit"]).unwrap_or(0) as u32;
    let has_more = fields.bool(&["hasMore", "hasNextPage"]).unwrap_or_else(|| {
        num(&fields, &["totalPages"]).is_some_and(|total| u64::from(page) < total)
    });

    Pagination {
        page,
        limit,
        total: num(&fields, &["total", "totalMessages"]),
        has_more,
    }
}

/// Normalize a direct-conversation REST response, with or without a
/// `{ success, data }` envelope.
pub fn normalize_conversation_page(value: &Value) -> Result<DirectConversationPage, NormalizeError> {
    let fields = Fields::new(value, "conversation page")?;
    let body = match fields.object(&["data"]) {
        Some(data) if data.get("messages").is_some() => data,
        _ => fields,
    };

    let groups = match body.get("messages") {
        Some(raw) => normalize_message_groups(raw)?,
        None => Vec::new(),
    };

    let other_user = match body.get("otherUser") {
        Some(raw) => match normalize_direct_chat_user(raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!("Ignoring malformed otherUser: {}", e);
                None
            }
        },
        None => None,
    };

    Ok(DirectConversationPage {
        groups,
        other_user,
        pagination: body
            .get("pagination")
            .map(normalize_pagination)
            .unwrap_or_default(),
    })
}

/// Normalize the REST response of a file upload into an attachment.
pub fn normalize_uploaded_file(value: &Value) -> Result<FileAttachment, NormalizeError> {
    let fields = Fields::new(value, "upload")?;
    let body = fields.object(&["data"]).unwrap_or(fields);
    normalize_file(&body).ok_or(NormalizeError::MissingField("fileUrl"))
}

fn typing_signal(fields: &Fields<'_>) -> Result<TypingSignal, NormalizeError> {
    let recipient_user_id = fields.string(&["recipientUserId"]);
    let chat_type = fields
        .string(&["chatType"])
        .and_then(|t| ChatType::parse(&t))
        .unwrap_or(if recipient_user_id.is_some() {
            ChatType::Direct
        } else {
            ChatType::Community
        });

    Ok(TypingSignal {
        user: TypingUser {
            user_id: fields.require(&["userId"], "userId")?,
            user_name: fields.string(&["userName"]).unwrap_or_default(),
        },
        community_id: fields.require(&["communityId"], "communityId")?,
        chat_type,
        recipient_user_id,
    })
}

fn upload_percentage(value: &Value) -> Result<u8, NormalizeError> {
    let raw = match value {
        Value::Number(n) => n.as_f64(),
        Value::Object(_) => Fields::new(value, "upload_progress")?
            .any(&["progress", "percentage", "percent"])
            .and_then(Value::as_f64),
        _ => None,
    }
    .ok_or(NormalizeError::MissingField("progress"))?;

    Ok(raw.clamp(0.0, 100.0).round() as u8)
}

impl InboundEvent {
    /// Parse a named socket event into its canonical form.
    pub fn parse(name: &str, payload: &Value) -> Result<Self, NormalizeError> {
        match name {
            names::CONNECTION_SUCCESS => {
                let fields = Fields::new(payload, "event payload")?;
                let user = fields.object(&["user"]);
                Ok(Self::ConnectionSuccess {
                    user_id: fields
                        .string(&["userId"])
                        .or_else(|| user.and_then(|u| u.string(&["id", "_id", "userId"]))),
                    user_name: fields
                        .string(&["userName"])
                        .or_else(|| user.and_then(|u| u.string(&["name", "userName"]))),
                })
            }

            names::NEW_COMMUNITY_MESSAGE => Ok(Self::NewMessage(Box::new(normalize_message(payload)?))),

            names::MESSAGE_EDITED => {
                let fields = Fields::new(payload, "event payload")?;
                if let Some(message) = fields.object(&["message"]) {
                    return Ok(Self::MessageEdited {
                        message_id: message.require(&["id", "_id", "messageId"], "messageId")?,
                        content: message.string(&["content"]).unwrap_or_default(),
                    });
                }
                Ok(Self::MessageEdited {
                    message_id: fields.require(&["messageId", "id"], "messageId")?,
                    content: fields
                        .string(&["newContent", "content"])
                        .unwrap_or_default(),
                })
            }

            names::MESSAGE_DELETED => {
                let fields = Fields::new(payload, "event payload")?;
                let delete_type = match fields.string(&["deleteType"]) {
                    Some(raw) => DeleteType::parse(&raw).ok_or(NormalizeError::InvalidField {
                        field: "deleteType",
                        reason: format!("unknown delete type {raw:?}"),
                    })?,
                    None => DeleteType::ForEveryone,
                };
                Ok(Self::MessageDeleted {
                    message_id: fields.require(&["messageId", "id"], "messageId")?,
                    delete_type,
                })
            }

            names::MESSAGE_REACTION_UPDATED => {
                let fields = Fields::new(payload, "event payload")?;
                Ok(Self::ReactionUpdated {
                    message_id: fields.require(&["messageId", "id"], "messageId")?,
                    reactions: fields
                        .get("reactions")
                        .map(normalize_reactions)
                        .unwrap_or_default(),
                })
            }

            names::USER_ONLINE => {
                let fields = Fields::new(payload, "event payload")?;
                Ok(Self::UserOnline(OnlineMember {
                    user_id: fields.require(&["userId"], "userId")?,
                    user_name: fields.string(&["userName"]).unwrap_or_default(),
                    community_id: fields.require(&["communityId"], "communityId")?,
                    profile_picture: fields.string(&["profilePicture", "avatar"]),
                }))
            }

            names::USER_OFFLINE => {
                let fields = Fields::new(payload, "event payload")?;
                Ok(Self::UserOffline {
                    user_id: fields.require(&["userId"], "userId")?,
                    community_id: fields.string(&["communityId"]),
                })
            }

            names::USER_TYPING => {
                let fields = Fields::new(payload, "event payload")?;
                Ok(Self::UserTyping(typing_signal(&fields)?))
            }

            names::USER_STOPPED_TYPING => {
                let fields = Fields::new(payload, "event payload")?;
                Ok(Self::UserStoppedTyping(typing_signal(&fields)?))
            }

            names::UPLOAD_PROGRESS => Ok(Self::UploadProgress(upload_percentage(payload)?)),

            other => Err(NormalizeError::UnknownEvent(other.to_string())),
        }
    }
}
