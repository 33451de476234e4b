// Subscription Lifecycle - Handles and per-key exclusivity for live queries
//
// A live query is a background task pumping store snapshots into a callback.
// The handle is the only way to stop it. Once `unsubscribe` returns, the
// callback is guaranteed not to run again.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppResult;
use crate::infrastructure::store::{Document, QuerySnapshots};

/// Shared between the handle and the delivery task
#[derive(Debug)]
struct DeliveryState {
    active: AtomicBool,
    /// Held for the duration of each callback invocation
    delivering: Mutex<()>,
}

struct HandleInner {
    id: Uuid,
    label: String,
    state: Arc<DeliveryState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HandleInner {
    fn teardown(&self) -> bool {
        if !self.state.active.swap(false, Ordering::SeqCst) {
            return false;
        }
        // Wait out a callback that is mid-flight on another thread
        drop(
            self.state
                .delivering
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        );
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            // Aborting drops the snapshot receiver, which closes the store feed
            task.abort();
        }
        true
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if self.state.active.load(Ordering::SeqCst) {
            warn!(
                "subscription {} ({}) dropped without unsubscribe; tearing down",
                self.label, self.id
            );
            self.teardown();
        }
    }
}

/// Cancellation handle for a live query.
///
/// Clones share one subscription. `unsubscribe` is idempotent. It must not
/// be called from inside the subscription's own callback.
#[derive(Clone)]
#[must_use = "dropping the handle tears the subscription down"]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("active", &self.is_active())
            .finish()
    }
}

impl SubscriptionHandle {
    /// Stop delivery and release the underlying store channel.
    ///
    /// Returns false if the subscription was already stopped.
    pub fn unsubscribe(&self) -> bool {
        let stopped = self.inner.teardown();
        if stopped {
            debug!("unsubscribed {} ({})", self.inner.label, self.inner.id);
        }
        stopped
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.active.load(Ordering::SeqCst)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }
}

/// Pump every snapshot from `snapshots` into `deliver` until unsubscribed or
/// the store closes the feed.
pub fn spawn_delivery<F>(
    label: impl Into<String>,
    mut snapshots: QuerySnapshots,
    mut deliver: F,
) -> SubscriptionHandle
where
    F: FnMut(AppResult<Vec<Document>>) + Send + 'static,
{
    let label = label.into();
    let state = Arc::new(DeliveryState {
        active: AtomicBool::new(true),
        delivering: Mutex::new(()),
    });

    let task_state = Arc::clone(&state);
    let task_label = label.clone();
    let task = tokio::spawn(async move {
        while let Some(snapshot) = snapshots.next().await {
            let _delivering = task_state
                .delivering
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if !task_state.active.load(Ordering::SeqCst) {
                break;
            }
            deliver(snapshot);
        }
        debug!("delivery task for {} finished", task_label);
    });

    SubscriptionHandle {
        inner: Arc::new(HandleInner {
            id: Uuid::new_v4(),
            label,
            state,
            task: Mutex::new(Some(task)),
        }),
    }
}

/// At most one live subscription per key.
///
/// `replace` tears the previous subscription down before establishing the
/// new one, and is serialized per registry so two concurrent replacements
/// never leave two live subscriptions behind.
#[derive(Debug)]
pub struct SubscriptionRegistry<K> {
    active: tokio::sync::Mutex<HashMap<K, SubscriptionHandle>>,
}

impl<K> Default for SubscriptionRegistry<K> {
    fn default() -> Self {
        Self {
            active: tokio::sync::Mutex::new(HashMap::new()),
        }
    }
}

impl<K> SubscriptionRegistry<K>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn replace<F, Fut>(&self, key: K, establish: F) -> AppResult<SubscriptionHandle>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<SubscriptionHandle>>,
    {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.remove(&key) {
            info!("replacing live subscription for {}", key);
            previous.unsubscribe();
        }
        let handle = establish().await?;
        active.insert(key, handle.clone());
        Ok(handle)
    }

    /// Tear down the subscription for `key`; false if none was live
    pub async fn release(&self, key: &K) -> bool {
        let handle = self.active.lock().await.remove(key);
        match handle {
            Some(handle) => handle.unsubscribe(),
            None => false,
        }
    }

    pub async fn release_all(&self) -> usize {
        let drained: Vec<_> = self.active.lock().await.drain().collect();
        drained
            .into_iter()
            .filter(|(_, handle)| handle.unsubscribe())
            .count()
    }

    pub async fn is_active(&self, key: &K) -> bool {
        self.active
            .lock()
            .await
            .get(key)
            .is_some_and(SubscriptionHandle::is_active)
    }

    pub async fn len(&self) -> usize {
        self.active.lock().await.len()
    }
}
