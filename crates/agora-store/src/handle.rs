use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::state::{ChatStore, StoreChange};

/// Shared, cloneable access to one [`ChatStore`].
///
/// Actions run under the write lock through [`dispatch`](Self::dispatch);
/// the changes they record are broadcast once the lock is released.
#[derive(Clone)]
pub struct ChatStoreHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    state: RwLock<ChatStore>,
    changes_tx: broadcast::Sender<StoreChange>,
}

impl ChatStoreHandle {
    pub fn new(store: ChatStore) -> Self {
        let (changes_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(HandleInner {
                state: RwLock::new(store),
                changes_tx,
            }),
        }
    }

    /// Subscribe to store changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.changes_tx.subscribe()
    }

    /// Run an action against the store and publish its changes.
    pub fn dispatch<T>(&self, action: impl FnOnce(&mut ChatStore) -> T) -> T {
        let (out, changes) = {
            let mut state = self.write();
            let out = action(&mut *state);
            (out, state.take_changes())
        };
        for change in changes {
            let _ = self.inner.changes_tx.send(change);
        }
        out
    }

    /// Evaluate a selector against the current state.
    pub fn read<T>(&self, selector: impl FnOnce(&ChatStore) -> T) -> T {
        let state = self.state();
        selector(&*state)
    }

    /// Sweep expired typing entries on a fixed interval until the returned
    /// task is aborted.
    pub fn spawn_typing_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let expired = handle.dispatch(|s| s.expire_typing(Instant::now()));
                if expired > 0 {
                    debug!("Expired {} typing indicator(s)", expired);
                }
            }
        })
    }

    // A panic inside an action leaves the state as the action left it;
    // keep serving it rather than poisoning every later caller.
    fn state(&self) -> RwLockReadGuard<'_, ChatStore> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ChatStore> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ChatStoreHandle {
    fn default() -> Self {
        Self::new(ChatStore::new())
    }
}
