//! Date bucketing of messages into [`MessageGroup`]s.
//!
//! Groups are ordered oldest to newest, and so are the messages inside a
//! group. Every helper here preserves that invariant.

use crate::models::{Message, MessageGroup};

/// Bucket messages by calendar day. Input order does not matter; messages
/// with equal timestamps keep their relative input order.
pub fn group_by_date(messages: impl IntoIterator<Item = Message>) -> Vec<MessageGroup> {
    let mut sorted: Vec<Message> = messages.into_iter().collect();
    sorted.sort_by_key(|m| m.created_at);

    let mut groups: Vec<MessageGroup> = Vec::new();
    for message in sorted {
        let date = message.date();
        match groups.last_mut() {
            Some(group) if group.date == date => group.messages.push(message),
            _ => groups.push(MessageGroup {
                date,
                messages: vec![message],
            }),
        }
    }
    groups
}

/// Flatten groups back into one chronological list.
pub fn flatten(groups: &[MessageGroup]) -> Vec<Message> {
    groups
        .iter()
        .flat_map(|g| g.messages.iter().cloned())
        .collect()
}

/// Place a message into its date bucket, after any message with the same
/// or an earlier timestamp.
pub fn insert_sorted(groups: &mut Vec<MessageGroup>, message: Message) {
    let date = message.date();
    match groups.binary_search_by(|g| g.date.cmp(&date)) {
        Ok(idx) => {
            let messages = &mut groups[idx].messages;
            let pos = messages.partition_point(|m| m.created_at <= message.created_at);
            messages.insert(pos, message);
        }
        Err(idx) => groups.insert(
            idx,
            MessageGroup {
                date,
                messages: vec![message],
            },
        ),
    }
}

pub fn contains(groups: &[MessageGroup], message_id: &str) -> bool {
    groups
        .iter()
        .any(|g| g.messages.iter().any(|m| m.id == message_id))
}

pub fn find_mut<'a>(groups: &'a mut [MessageGroup], message_id: &str) -> Option<&'a mut Message> {
    groups
        .iter_mut()
        .flat_map(|g| g.messages.iter_mut())
        .find(|m| m.id == message_id)
}

/// Remove a message by id, dropping its group if it becomes empty.
pub fn remove(groups: &mut Vec<MessageGroup>, message_id: &str) -> Option<Message> {
    for idx in 0..groups.len() {
        if let Some(pos) = groups[idx].messages.iter().position(|m| m.id == message_id) {
            let removed = groups[idx].messages.remove(pos);
            if groups[idx].messages.is_empty() {
                groups.remove(idx);
            }
            return Some(removed);
        }
    }
    None
}

pub fn oldest(groups: &[MessageGroup]) -> Option<&Message> {
    groups.first().and_then(|g| g.messages.first())
}

pub fn message_count(groups: &[MessageGroup]) -> usize {
    groups.iter().map(|g| g.messages.len()).sum()
}
