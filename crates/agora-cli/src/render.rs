//! Turns store changes into lines for the terminal.

use std::collections::HashSet;
use std::time::Instant;

use agora_store::{ChatStore, StoreChange};
use agora_types::grouping;
use agora_types::models::Message;

pub fn format_message(message: &Message) -> String {
    let mut line = format!(
        "[{}] {}: ",
        message.created_at.format("%Y-%m-%d %H:%M"),
        message.sender.name
    );
    if message.deleted_for_everyone {
        line.push_str("(message deleted)");
    } else {
        if let Some(reply) = &message.reply_to {
            line.push_str(&format!("> {} | ", reply.content));
        }
        line.push_str(&message.content);
        if let Some(file) = &message.file {
            line.push_str(&format!(" [{}: {}]", file.name, file.url));
        }
        if message.edited {
            line.push_str(" (edited)");
        }
        if !message.reactions.is_empty() {
            let emojis: Vec<&str> = message.reactions.values().map(String::as_str).collect();
            line.push_str(&format!(" {}", emojis.join("")));
        }
    }
    line.push_str(&format!("  #{}", message.id));
    line
}

/// Prints each message of the active conversation once, plus short status
/// lines for everything else worth showing.
#[derive(Default)]
pub struct Renderer {
    printed: HashSet<String>,
}

impl Renderer {
    pub fn on_change(&mut self, change: &StoreChange, store: &ChatStore) -> Vec<String> {
        match change {
            StoreChange::Messages(key) if store.active_key().as_ref() == Some(key) => {
                grouping::flatten(store.conversation(key))
                    .into_iter()
                    .filter(|m| self.printed.insert(m.id.clone()))
                    .map(|m| format_message(&m))
                    .collect()
            }
            StoreChange::Unread(key) if store.active_key().as_ref() != Some(key) => {
                match store.unread_count(key) {
                    0 => Vec::new(),
                    n => vec![format!("* {n} unread in {key}")],
                }
            }
            StoreChange::ActiveChat => {
                // reprint the conversation we just switched to
                self.printed.clear();
                let Some(key) = store.active_key() else {
                    return Vec::new();
                };
                let mut lines = vec![format!("* now in {key}")];
                lines.extend(self.on_change(&StoreChange::Messages(key), store));
                lines
            }
            StoreChange::LoadStatus(key) if store.show_spinner(key) => {
                vec![format!("* loading {key}...")]
            }
            StoreChange::Typing(key) if store.active_key().as_ref() == Some(key) => {
                let names: Vec<String> = store
                    .typing_users(Instant::now())
                    .into_iter()
                    .map(|u| u.user_name)
                    .collect();
                match names.len() {
                    0 => Vec::new(),
                    1 => vec![format!("* {} is typing", names[0])],
                    _ => vec![format!("* {} are typing", names.join(", "))],
                }
            }
            StoreChange::Presence(community_id) => {
                let names: Vec<&str> = store
                    .online_members(community_id)
                    .iter()
                    .map(|m| m.user_name.as_str())
                    .collect();
                vec![format!("* online in {community_id}: {}", names.join(", "))]
            }
            StoreChange::Connection(true) => vec!["* connected".to_string()],
            StoreChange::Connection(false) => vec!["* disconnected".to_string()],
            StoreChange::UploadProgress(Some(percent)) if percent % 25 == 0 => {
                vec![format!("* upload {percent}%")]
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use agora_types::models::{ChatType, MessageType, Sender};

    use super::*;

    fn message(id: &str, sender: &str, recipient: Option<&str>) -> Message {
        Message {
            id: id.into(),
            community_id: "c1".into(),
            content: format!("hello from {sender}"),
            message_type: MessageType::Text,
            file: None,
            sender: Sender {
                id: sender.into(),
                name: sender.to_uppercase(),
                avatar: None,
            },
            reply_to: None,
            reactions: Default::default(),
            edited: false,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
            deleted_for_everyone: false,
            chat_type: if recipient.is_some() {
                ChatType::Direct
            } else {
                ChatType::Community
            },
            recipient_user_id: recipient.map(str::to_string),
            read_by: Default::default(),
        }
    }

    fn render(renderer: &mut Renderer, store: &mut ChatStore) -> Vec<String> {
        store
            .take_changes()
            .iter()
            .flat_map(|c| renderer.on_change(c, store))
            .collect()
    }

    #[test]
    fn formats_tombstones_and_edits() {
        let mut m = message("m1", "bob", None);
        m.edited = true;
        assert_eq!(
            format_message(&m),
            "[2024-05-01 09:30] BOB: hello from bob (edited)  #m1"
        );
        m.tombstone();
        assert!(format_message(&m).contains("(message deleted)"));
    }

    #[test]
    fn active_messages_print_once() {
        let mut store = ChatStore::with_current_user("alice");
        store.set_active_community("c1");
        let mut renderer = Renderer::default();
        render(&mut renderer, &mut store);

        store.insert_message(message("m1", "bob", None));
        let lines = render(&mut renderer, &mut store);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("#m1"));

        store.insert_message(message("m2", "bob", None));
        let lines = render(&mut renderer, &mut store);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("#m2"));
    }

    #[test]
    fn background_direct_message_shows_unread() {
        let mut store = ChatStore::with_current_user("alice");
        store.set_active_community("c1");
        let mut renderer = Renderer::default();
        render(&mut renderer, &mut store);

        store.insert_message(message("d1", "bob", Some("alice")));
        let lines = render(&mut renderer, &mut store);
        assert!(lines.iter().any(|l| l.starts_with("* 1 unread in")));
        assert!(!lines.iter().any(|l| l.ends_with("#d1")));
    }
}
