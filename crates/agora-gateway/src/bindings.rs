use std::time::Instant;

use serde_json::Value;
use tracing::{debug, trace, warn};

use agora_store::{ChatStoreHandle, InsertOutcome};
use agora_types::NormalizeError;
use agora_types::events::InboundEvent;

/// Translates inbound socket events into store actions.
///
/// Built once per client and shared by every connection it opens, so a
/// reconnect never registers a second set of handlers.
#[derive(Clone)]
pub struct EventBindings {
    store: ChatStoreHandle,
}

impl EventBindings {
    pub fn new(store: ChatStoreHandle) -> Self {
        Self { store }
    }

    /// Normalize and apply one raw event. Malformed payloads are logged and
    /// dropped; they never reach the store.
    pub fn handle(&self, name: &str, args: &[Value]) {
        let payload = args.first().unwrap_or(&Value::Null);
        match InboundEvent::parse(name, payload) {
            Ok(event) => self.apply(event),
            Err(NormalizeError::UnknownEvent(name)) => trace!("Ignoring event {}", name),
            Err(e) => warn!("Dropping malformed {} payload: {}", name, e),
        }
    }

    pub fn apply(&self, event: InboundEvent) {
        trace!("Applying {}", event.name());
        match event {
            InboundEvent::ConnectionSuccess { user_id, user_name } => {
                debug!("Session confirmed for {:?} ({:?})", user_name, user_id);
                if let Some(user_id) = user_id {
                    self.store.dispatch(|s| s.set_current_user(Some(user_id)));
                }
            }
            InboundEvent::NewMessage(message) => {
                let id = message.id.clone();
                if self.store.dispatch(|s| s.insert_message(*message)) == InsertOutcome::Duplicate {
                    trace!("Message {} already stored", id);
                }
            }
            InboundEvent::MessageEdited {
                message_id,
                content,
            } => {
                if !self.store.dispatch(|s| s.edit_message(&message_id, &content)) {
                    debug!("Edit for unknown message {}", message_id);
                }
            }
            InboundEvent::MessageDeleted {
                message_id,
                delete_type,
            } => {
                if !self
                    .store
                    .dispatch(|s| s.delete_message(&message_id, delete_type))
                {
                    debug!("Delete for unknown message {}", message_id);
                }
            }
            InboundEvent::ReactionUpdated {
                message_id,
                reactions,
            } => {
                self.store
                    .dispatch(|s| s.update_reactions(&message_id, reactions));
            }
            InboundEvent::UserOnline(member) => {
                self.store.dispatch(|s| s.user_online(member));
            }
            InboundEvent::UserOffline {
                user_id,
                community_id,
            } => {
                self.store
                    .dispatch(|s| s.user_offline(&user_id, community_id.as_deref()));
            }
            InboundEvent::UserTyping(signal) => {
                self.store
                    .dispatch(|s| s.user_typing(&signal, Instant::now()));
            }
            InboundEvent::UserStoppedTyping(signal) => {
                self.store.dispatch(|s| s.user_stopped_typing(&signal));
            }
            InboundEvent::UploadProgress(percent) => {
                self.store.dispatch(|s| s.set_upload_progress(percent));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use agora_store::ChatStore;
    use agora_types::grouping;

    use super::*;

    fn bindings() -> (EventBindings, ChatStoreHandle) {
        let mut store = ChatStore::with_current_user("alice");
        store.set_active_community("c1");
        let handle = ChatStoreHandle::new(store);
        (EventBindings::new(handle.clone()), handle)
    }

    fn snake_case_message(id: &str) -> Value {
        json!({
            "_id": id,
            "community_id": "c1",
            "content": "hello",
            "message_type": "text",
            "sender_id": "bob",
            "sender_name": "Bob",
            "created_at": "2024-05-01T12:00:00Z",
            "chat_type": "direct",
            "recipient_user_id": "alice",
        })
    }

    #[test]
    fn snake_case_message_lands_in_direct_conversation() {
        let (bindings, store) = bindings();
        bindings.handle("new_community_message", &[snake_case_message("m1")]);
        bindings.handle("new_community_message", &[snake_case_message("m1")]);

        store.read(|s| {
            assert_eq!(grouping::message_count(s.direct_messages("bob")), 1);
            assert_eq!(s.unread_direct_count("bob"), 1);
        });
    }

    #[test]
    fn malformed_payload_is_dropped() {
        let (bindings, store) = bindings();
        bindings.handle("new_community_message", &[json!({ "content": "no id" })]);
        bindings.handle("new_community_message", &[]);
        bindings.handle("some_future_event", &[json!({})]);

        assert!(store.read(|s| s.find_message("no id").is_none()));
        assert_eq!(store.read(|s| s.total_unread_direct()), 0);
    }

    #[test]
    fn edit_delete_and_reactions_follow_events() {
        let (bindings, store) = bindings();
        bindings.handle("new_community_message", &[snake_case_message("m1")]);

        bindings.handle(
            "message_edited",
            &[json!({ "message_id": "m1", "new_content": "hello again" })],
        );
        bindings.handle(
            "message_reaction_updated",
            &[json!({ "messageId": "m1", "reactions": { "alice": "👍" } })],
        );
        store.read(|s| {
            let m = s.find_message("m1").unwrap();
            assert_eq!(m.content, "hello again");
            assert!(m.edited);
            assert_eq!(m.reactions["alice"], "👍");
        });

        bindings.handle(
            "message_deleted",
            &[json!({ "messageId": "m1", "deleteType": "for_everyone" })],
        );
        assert!(store.read(|s| s.find_message("m1").unwrap().deleted_for_everyone));
    }

    #[test]
    fn presence_and_typing_events() {
        let (bindings, store) = bindings();
        bindings.handle(
            "user_online",
            &[json!({ "user_id": "bob", "user_name": "Bob", "community_id": "c1" })],
        );
        bindings.handle(
            "user_typing",
            &[json!({ "userId": "bob", "userName": "Bob", "communityId": "c1" })],
        );
        store.read(|s| {
            assert_eq!(s.online_members("c1").len(), 1);
            assert_eq!(s.typing_users(Instant::now()).len(), 1);
        });

        bindings.handle(
            "user_stopped_typing",
            &[json!({ "userId": "bob", "communityId": "c1" })],
        );
        bindings.handle("user_offline", &[json!({ "userId": "bob", "communityId": "c1" })]);
        store.read(|s| {
            assert!(s.online_members("c1").is_empty());
            assert!(s.typing_users(Instant::now()).is_empty());
        });
    }

    #[test]
    fn upload_progress_and_session_events() {
        let (bindings, store) = bindings();
        bindings.handle("upload_progress", &[json!({ "progress": 42 })]);
        bindings.handle("connection_success", &[json!({ "userId": "alice-2" })]);

        assert_eq!(store.read(|s| s.upload_progress()), Some(42));
        assert_eq!(store.read(|s| s.current_user_id().map(str::to_string)).as_deref(), Some("alice-2"));
    }
}
