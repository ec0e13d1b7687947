use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use agora_store::ChatStoreHandle;
use agora_types::api::AckResponse;
use agora_types::events::{
    DeleteMessagePayload, EditMessagePayload, ReactPayload, SendMessagePayload, TypingPayload,
    names,
};
use agora_types::models::{ChatType, DeleteType, FileAttachment, Message, MessageType};
use agora_types::normalize::{normalize_message, normalize_reactions};

use crate::ack::Emitter;
use crate::error::GatewayError;
use crate::notice::Notice;

/// A message to send, before validation.
#[derive(Debug, Clone, Default)]
pub struct SendMessageRequest {
    pub community_id: String,
    pub content: String,
    /// Set by a prior upload; the file itself never travels over the socket.
    pub attachment: Option<FileAttachment>,
    /// Derived from the attachment when not given.
    pub message_type: Option<MessageType>,
    pub reply_to_message_id: Option<String>,
    pub chat_type: ChatType,
    pub recipient_user_id: Option<String>,
}

impl SendMessageRequest {
    pub fn community(community_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            community_id: community_id.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn direct(
        community_id: impl Into<String>,
        recipient_user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            community_id: community_id.into(),
            content: content.into(),
            chat_type: ChatType::Direct,
            recipient_user_id: Some(recipient_user_id.into()),
            ..Self::default()
        }
    }

    pub fn with_attachment(mut self, attachment: FileAttachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn replying_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to_message_id = Some(message_id.into());
        self
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.content.trim().is_empty() && self.attachment.is_none() {
            return Err(GatewayError::Validation(
                "Message must have content or an attachment".into(),
            ));
        }
        if self.chat_type == ChatType::Direct
            && self
                .recipient_user_id
                .as_deref()
                .is_none_or(|r| r.trim().is_empty())
        {
            return Err(GatewayError::Validation(
                "Direct messages need a recipient".into(),
            ));
        }
        Ok(())
    }

    fn into_payload(self) -> SendMessagePayload {
        let message_type = self.message_type.unwrap_or_else(|| match &self.attachment {
            Some(file) => MessageType::from_mime(&file.mime_type),
            None => MessageType::Text,
        });
        let (file_url, file_name, file_type) = match self.attachment {
            Some(file) => (Some(file.url), Some(file.name), Some(file.mime_type)),
            None => (None, None, None),
        };
        let direct = self.chat_type == ChatType::Direct;

        SendMessagePayload {
            community_id: self.community_id,
            content: self.content,
            message_type: Some(message_type),
            file_url,
            file_name,
            file_type,
            reply_to_message_id: self.reply_to_message_id,
            chat_type: direct.then_some(ChatType::Direct),
            recipient_user_id: if direct { self.recipient_user_id } else { None },
        }
    }
}

/// Acknowledged chat commands. Confirmed results are applied to the store;
/// failures are returned and also raised as notices.
#[derive(Clone)]
pub struct ChatCommands {
    emitter: Emitter,
    store: ChatStoreHandle,
    notices: broadcast::Sender<Notice>,
}

impl ChatCommands {
    pub fn new(emitter: Emitter, store: ChatStoreHandle, notices: broadcast::Sender<Notice>) -> Self {
        Self {
            emitter,
            store,
            notices,
        }
    }

    /// Send a message. Invalid requests fail before anything is emitted.
    ///
    /// The stored copy comes from the ack; the broadcast echo of the same
    /// message is deduplicated by id, whichever arrives first.
    pub async fn send_community_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<Option<Message>, GatewayError> {
        if let Err(e) = request.validate() {
            self.notify_error(&e);
            return Err(e);
        }

        let response = self
            .request(names::SEND_COMMUNITY_MESSAGE, &request.into_payload())
            .await?;

        let Some(data) = response.data else {
            debug!("Send acknowledged without a message body");
            return Ok(None);
        };
        match normalize_message(&data) {
            Ok(message) => {
                self.store.dispatch(|s| s.insert_message(message.clone()));
                Ok(Some(message))
            }
            Err(e) => {
                warn!("Acknowledged message could not be normalized: {}", e);
                Ok(None)
            }
        }
    }

    pub async fn edit_message(
        &self,
        message_id: &str,
        new_content: &str,
        community_id: &str,
    ) -> Result<(), GatewayError> {
        let payload = EditMessagePayload {
            message_id: message_id.to_string(),
            new_content: new_content.to_string(),
            community_id: community_id.to_string(),
        };
        self.request(names::EDIT_MESSAGE, &payload).await?;
        self.store
            .dispatch(|s| s.edit_message(message_id, new_content));
        Ok(())
    }

    pub async fn delete_message(
        &self,
        message_id: &str,
        delete_type: DeleteType,
        community_id: &str,
    ) -> Result<(), GatewayError> {
        let payload = DeleteMessagePayload {
            message_id: message_id.to_string(),
            delete_type,
            community_id: community_id.to_string(),
        };
        self.request(names::DELETE_MESSAGE, &payload).await?;
        self.store
            .dispatch(|s| s.delete_message(message_id, delete_type));
        Ok(())
    }

    pub async fn react_to_message(
        &self,
        message_id: &str,
        emoji: &str,
        community_id: &str,
    ) -> Result<(), GatewayError> {
        let payload = ReactPayload {
            message_id: message_id.to_string(),
            emoji: emoji.to_string(),
            community_id: community_id.to_string(),
        };
        let response = self.request(names::REACT_TO_MESSAGE, &payload).await?;

        // The ack may carry the new reaction map; otherwise the broadcast
        // `message_reaction_updated` brings it.
        if let Some(reactions) = response
            .data
            .as_ref()
            .and_then(|d| d.get("reactions"))
            .filter(|r| !r.is_null())
        {
            let reactions = normalize_reactions(reactions);
            self.store
                .dispatch(|s| s.update_reactions(message_id, reactions));
        }
        Ok(())
    }

    pub fn send_typing_indicator(
        &self,
        community_id: &str,
        recipient_user_id: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.emitter.emit(
            names::TYPING_INDICATOR,
            &typing_payload(community_id, recipient_user_id),
        )
    }

    pub fn stop_typing_indicator(
        &self,
        community_id: &str,
        recipient_user_id: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.emitter.emit(
            names::STOP_TYPING,
            &typing_payload(community_id, recipient_user_id),
        )
    }

    async fn request<P: Serialize>(&self, event: &str, payload: &P) -> Result<AckResponse, GatewayError> {
        match self.emitter.request(event, payload).await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!("{} failed: {}", event, e);
                self.notify_error(&e);
                Err(e)
            }
        }
    }

    fn notify_error(&self, err: &GatewayError) {
        let _ = self.notices.send(Notice::error(err.to_string()));
    }
}

fn typing_payload(community_id: &str, recipient_user_id: Option<&str>) -> TypingPayload {
    TypingPayload {
        community_id: community_id.to_string(),
        recipient_user_id: recipient_user_id.map(str::to_string),
    }
}
