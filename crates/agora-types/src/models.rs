use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Video,
    Audio,
    Document,
}

impl MessageType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "document" | "file" => Some(Self::Document),
            _ => None,
        }
    }

    /// Infer the message type of an attachment from its mime type.
    pub fn from_mime(mime: &str) -> Self {
        match mime.split('/').next().unwrap_or_default() {
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            _ => Self::Document,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    #[default]
    Community,
    Direct,
}

impl ChatType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "community" => Some(Self::Community),
            "direct" => Some(Self::Direct),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Community => "community",
            Self::Direct => "direct",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteType {
    ForEveryone,
    ForMe,
}

impl DeleteType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "for_everyone" | "forEveryone" | "everyone" => Some(Self::ForEveryone),
            "for_me" | "forMe" | "me" => Some(Self::ForMe),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment {
    pub url: String,
    pub name: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
}

/// Denormalized copy of the quoted message, frozen at reply time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplySnapshot {
    pub message_id: String,
    pub content: String,
    pub sender_name: Option<String>,
    pub message_type: MessageType,
}

/// A single chat line in its canonical client-side shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub community_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub file: Option<FileAttachment>,
    pub sender: Sender,
    pub reply_to: Option<ReplySnapshot>,
    /// user_id -> emoji, one reaction per user.
    pub reactions: BTreeMap<String, String>,
    pub edited: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_for_everyone: bool,
    pub chat_type: ChatType,
    pub recipient_user_id: Option<String>,
    pub read_by: BTreeSet<String>,
}

impl Message {
    pub fn is_direct(&self) -> bool {
        self.chat_type == ChatType::Direct
    }

    /// The participant of a direct message that is not `current_user_id`.
    ///
    /// Returns `None` for community messages and for direct messages the
    /// current user takes no part in.
    pub fn other_party(&self, current_user_id: &str) -> Option<&str> {
        if !self.is_direct() {
            return None;
        }
        let recipient = self.recipient_user_id.as_deref()?;
        if self.sender.id == current_user_id {
            Some(recipient)
        } else if recipient == current_user_id {
            Some(self.sender.id.as_str())
        } else {
            None
        }
    }

    /// Calendar day (UTC) this message is bucketed under.
    pub fn date(&self) -> NaiveDate {
        self.created_at.date_naive()
    }

    /// Turn the message into a tombstone. Reply snapshots elsewhere keep
    /// pointing at it, so the id and ordering stay.
    pub fn tombstone(&mut self) {
        self.deleted_for_everyone = true;
        self.content.clear();
        self.file = None;
        self.reactions.clear();
    }
}

/// Messages of one calendar day, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageGroup {
    pub date: NaiveDate,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConversationKey {
    Community(String),
    Direct { community_id: String, peer_id: String },
}

impl ConversationKey {
    pub fn direct(community_id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self::Direct {
            community_id: community_id.into(),
            peer_id: peer_id.into(),
        }
    }

    pub fn community_id(&self) -> &str {
        match self {
            Self::Community(id) => id,
            Self::Direct { community_id, .. } => community_id,
        }
    }

    pub fn peer_id(&self) -> Option<&str> {
        match self {
            Self::Community(_) => None,
            Self::Direct { peer_id, .. } => Some(peer_id),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Community(id) => write!(f, "community:{id}"),
            Self::Direct {
                community_id,
                peer_id,
            } => write!(f, "direct:{community_id}:{peer_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineMember {
    pub user_id: String,
    pub user_name: String,
    pub community_id: String,
    pub profile_picture: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUser {
    pub user_id: String,
    pub user_name: String,
}

/// Roster entry for someone the current user can message directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectChatUser {
    pub user_id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub account_type: Option<String>,
    pub is_online: bool,
    pub last_message_time: Option<DateTime<Utc>>,
    pub unread_count: u32,
}

impl DirectChatUser {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            avatar: None,
            account_type: None,
            is_online: false,
            last_message_time: None,
            unread_count: 0,
        }
    }
}
