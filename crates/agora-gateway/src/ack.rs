//! Request/acknowledgement correlation over the event socket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use agora_types::api::AckResponse;

use crate::codec::SocketPacket;
use crate::error::GatewayError;
use crate::outbound::Outbound;

type Waiters = HashMap<u64, oneshot::Sender<Vec<Value>>>;

/// Pending acknowledgements keyed by Socket.IO ack id.
#[derive(Clone, Default)]
pub struct AckRegistry {
    inner: Arc<AckRegistryInner>,
}

#[derive(Default)]
struct AckRegistryInner {
    next_id: AtomicU64,
    waiters: Mutex<Waiters>,
}

impl AckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> (u64, oneshot::Receiver<Vec<Value>>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiters().insert(id, tx);
        (id, rx)
    }

    /// Hand the ack arguments to whoever waits on `id`.
    pub fn resolve(&self, id: u64, args: Vec<Value>) -> bool {
        match self.waiters().remove(&id) {
            Some(tx) => tx.send(args).is_ok(),
            None => {
                debug!("Ack {} has no waiter (timed out or unknown)", id);
                false
            }
        }
    }

    pub fn cancel(&self, id: u64) {
        self.waiters().remove(&id);
    }

    /// Fail every pending request; used when the connection drops.
    pub fn fail_all(&self) {
        let dropped = std::mem::take(&mut *self.waiters());
        if !dropped.is_empty() {
            warn!("Failing {} pending request(s) on disconnect", dropped.len());
        }
    }

    pub fn pending(&self) -> usize {
        self.waiters().len()
    }

    fn waiters(&self) -> MutexGuard<'_, Waiters> {
        self.inner.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Emits events on the live connection, optionally awaiting the ack.
#[derive(Clone)]
pub struct Emitter {
    outbound: Outbound,
    acks: AckRegistry,
    default_timeout: Option<Duration>,
}

impl Emitter {
    pub fn new(outbound: Outbound, acks: AckRegistry, default_timeout: Option<Duration>) -> Self {
        Self {
            outbound,
            acks,
            default_timeout,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.outbound.is_connected()
    }

    /// Fire-and-forget.
    pub fn emit<P: Serialize>(&self, event: &str, payload: &P) -> Result<(), GatewayError> {
        let packet = SocketPacket::event(event, serde_json::to_value(payload)?, None);
        trace!("emit {}", event);
        self.outbound.send(packet.to_frame())
    }

    /// Emit and wait for the acknowledgement, using the default timeout.
    pub async fn request<P: Serialize>(
        &self,
        event: &str,
        payload: &P,
    ) -> Result<AckResponse, GatewayError> {
        self.request_with_timeout(event, payload, self.default_timeout)
            .await
    }

    /// Emit and wait for the acknowledgement. A `{ success: false }` ack
    /// becomes [`GatewayError::Rejected`].
    pub async fn request_with_timeout<P: Serialize>(
        &self,
        event: &str,
        payload: &P,
        timeout: Option<Duration>,
    ) -> Result<AckResponse, GatewayError> {
        if !self.outbound.is_connected() {
            return Err(GatewayError::NotConnected);
        }
        let payload = serde_json::to_value(payload)?;

        let (id, rx) = self.acks.register();
        // Removes the waiter however this future ends, including being dropped.
        let _waiter = WaiterGuard {
            acks: &self.acks,
            id,
        };
        self.outbound
            .send(SocketPacket::event(event, payload, Some(id)).to_frame())?;
        trace!("emit {} (ack {})", event, id);

        let args = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("{} not acknowledged within {:?}", event, limit);
                    return Err(GatewayError::AckTimeout {
                        event: event.to_string(),
                        timeout: limit,
                    });
                }
            },
            None => rx.await,
        }
        .map_err(|_| GatewayError::ConnectionClosed)?;

        let response = AckResponse::from_args(&args);
        if !response.success {
            return Err(GatewayError::Rejected(response.error_message()));
        }
        Ok(response)
    }
}

struct WaiterGuard<'a> {
    acks: &'a AckRegistry,
    id: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.acks.cancel(self.id);
    }
}
