use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::error::GatewayError;

/// Frame queue of the live connection, if any.
///
/// The connection task attaches a fresh sender for every session and
/// detaches it when the session ends; commands only ever see this handle.
#[derive(Clone, Default)]
pub struct Outbound {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
}

impl Outbound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, tx: mpsc::UnboundedSender<String>) {
        *self.slot() = Some(tx);
    }

    pub fn detach(&self) {
        self.slot().take();
    }

    pub fn is_connected(&self) -> bool {
        self.slot().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    pub fn send(&self, frame: String) -> Result<(), GatewayError> {
        match self.slot().as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| GatewayError::NotConnected),
            None => Err(GatewayError::NotConnected),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<String>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_requires_attached_queue() {
        let outbound = Outbound::new();
        assert_eq!(outbound.send("2".into()), Err(GatewayError::NotConnected));

        let (tx, mut rx) = mpsc::unbounded_channel();
        outbound.attach(tx);
        assert!(outbound.is_connected());
        outbound.send("3".into()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "3");

        outbound.detach();
        assert!(!outbound.is_connected());
    }

    #[test]
    fn closed_receiver_counts_as_disconnected() {
        let outbound = Outbound::new();
        let (tx, rx) = mpsc::unbounded_channel();
        outbound.attach(tx);
        drop(rx);
        assert!(!outbound.is_connected());
        assert_eq!(outbound.send("3".into()), Err(GatewayError::NotConnected));
    }
}
