use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use agora_store::TYPING_TIMEOUT;

use crate::commands::ChatCommands;

/// Debounces typing signals for one conversation.
///
/// The first keystroke emits `typing_indicator`; every keystroke restarts
/// an idle timer that emits `stop_typing` when it runs out. Must be used
/// from within a tokio runtime.
pub struct TypingIndicator {
    commands: ChatCommands,
    community_id: String,
    recipient_user_id: Option<String>,
    idle: Duration,
    typing: Arc<AtomicBool>,
    timer: Option<JoinHandle<()>>,
}

impl TypingIndicator {
    pub fn new(
        commands: ChatCommands,
        community_id: impl Into<String>,
        recipient_user_id: Option<String>,
    ) -> Self {
        Self {
            commands,
            community_id: community_id.into(),
            recipient_user_id,
            idle: TYPING_TIMEOUT,
            typing: Arc::new(AtomicBool::new(false)),
            timer: None,
        }
    }

    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    /// Whether this indicator signals into the given conversation.
    pub fn is_for(&self, community_id: &str, recipient_user_id: Option<&str>) -> bool {
        self.community_id == community_id && self.recipient_user_id.as_deref() == recipient_user_id
    }

    pub fn is_typing(&self) -> bool {
        self.typing.load(Ordering::Acquire)
    }

    pub fn keystroke(&mut self) {
        if !self.typing.swap(true, Ordering::AcqRel) {
            if let Err(e) = self
                .commands
                .send_typing_indicator(&self.community_id, self.recipient_user_id.as_deref())
            {
                debug!("Typing indicator not sent: {}", e);
            }
        }

        self.cancel_timer();
        let commands = self.commands.clone();
        let typing = self.typing.clone();
        let community_id = self.community_id.clone();
        let recipient = self.recipient_user_id.clone();
        let idle = self.idle;
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            if typing.swap(false, Ordering::AcqRel) {
                if let Err(e) = commands.stop_typing_indicator(&community_id, recipient.as_deref()) {
                    debug!("Stop typing not sent: {}", e);
                }
            }
        }));
    }

    /// Stop right away (e.g. the message was sent).
    pub fn stop(&mut self) {
        self.cancel_timer();
        if self.typing.swap(false, Ordering::AcqRel) {
            if let Err(e) = self
                .commands
                .stop_typing_indicator(&self.community_id, self.recipient_user_id.as_deref())
            {
                debug!("Stop typing not sent: {}", e);
            }
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for TypingIndicator {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
