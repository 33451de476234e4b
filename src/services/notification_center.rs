// Notification Center - live notification mirror for one session
//
// Holds the current user's notifications as delivered by the store's push
// query. Every snapshot replaces the mirror wholesale. Filtering and unread
// counts are derived from the mirror and never touch the store.

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::core::strong_types::{NotificationId, UserId};
use crate::error::{AppError, AppResult};
use crate::infrastructure::store::{collections, Document, DocumentStore, Query, SortDirection};
use crate::models::notification::{Notification, NotificationFilter};
use crate::services::optimistic::{settle, RevertPolicy};
use crate::services::subscriptions::{spawn_delivery, SubscriptionHandle, SubscriptionRegistry};

#[derive(Debug, Default)]
struct NotificationMirror {
    active_user: Option<UserId>,
    items: Vec<Notification>,
    filter: NotificationFilter,
}

impl NotificationMirror {
    fn replace(&mut self, items: Vec<Notification>) {
        self.items = items;
    }

    fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.is_read).count()
    }

    fn filtered(&self) -> Vec<Notification> {
        self.items
            .iter()
            .filter(|n| self.filter.matches(n.kind()))
            .cloned()
            .collect()
    }
}

fn decode_snapshot(docs: &[Document]) -> Vec<Notification> {
    docs.iter()
        .filter_map(|doc| match doc.decode::<Notification>() {
            Ok(notification) => Some(notification),
            Err(error) => {
                warn!("Skipping malformed notification {}: {}", doc.id, error);
                None
            }
        })
        .collect()
}

#[derive(Debug)]
pub struct NotificationCenter {
    store: Arc<dyn DocumentStore>,
    snapshot_limit: usize,
    mirror: Arc<Mutex<NotificationMirror>>,
    subscriptions: SubscriptionRegistry<UserId>,
}

impl NotificationCenter {
    pub fn new(store: Arc<dyn DocumentStore>, snapshot_limit: usize) -> Self {
        Self {
            store,
            snapshot_limit,
            mirror: Arc::new(Mutex::new(NotificationMirror::default())),
            subscriptions: SubscriptionRegistry::new(),
        }
    }

    fn mirror(&self) -> MutexGuard<'_, NotificationMirror> {
        self.mirror.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start mirroring `user_id`'s notifications.
    ///
    /// Any previous subscription for the user is torn down first. Switching
    /// to a different user also drops the other user's subscription and
    /// clears the mirror. `on_snapshot` receives the full newest-first list
    /// on every change; a permission failure delivers an empty list, and
    /// other failures go to `on_error`.
    #[instrument(skip(self, on_snapshot, on_error))]
    pub async fn subscribe<S, E>(
        &self,
        user_id: &UserId,
        on_snapshot: S,
        on_error: E,
    ) -> AppResult<SubscriptionHandle>
    where
        S: FnMut(Vec<Notification>) + Send + 'static,
        E: FnMut(AppError) + Send + 'static,
    {
        let switching = self
            .mirror()
            .active_user
            .as_ref()
            .is_some_and(|current| current != user_id);
        if switching {
            let released = self.subscriptions.release_all().await;
            debug!("Switching notification user, released {} subscriptions", released);
        }
        {
            let mut mirror = self.mirror();
            if mirror.active_user.as_ref() != Some(user_id) {
                mirror.items.clear();
                mirror.active_user = Some(user_id.clone());
            }
        }

        let query = Query::new()
            .where_eq("recipientId", user_id.as_str())
            .order_by("createdAt", SortDirection::Descending)
            .limit(self.snapshot_limit);
        let store = Arc::clone(&self.store);
        let mirror = Arc::clone(&self.mirror);
        let owner = user_id.clone();

        self.subscriptions
            .replace(user_id.clone(), || async move {
                let snapshots = store.subscribe(collections::NOTIFICATIONS, query).await?;
                let label = format!("notifications for {}", owner);
                let mut on_snapshot = on_snapshot;
                let mut on_error = on_error;
                Ok(spawn_delivery(label, snapshots, move |snapshot| {
                    let items = match snapshot {
                        Ok(docs) => decode_snapshot(&docs),
                        Err(error) if error.is_permission_denied() => {
                            info!("Notifications for {} not readable, showing none", owner);
                            Vec::new()
                        }
                        Err(error) => {
                            on_error(error);
                            return;
                        }
                    };
                    {
                        let mut mirror = mirror.lock().unwrap_or_else(|e| e.into_inner());
                        if mirror.active_user.as_ref() != Some(&owner) {
                            return;
                        }
                        mirror.replace(items.clone());
                    }
                    on_snapshot(items);
                }))
            })
            .await
    }

    /// Stop the live query for `user_id`; false if none was running
    pub async fn unsubscribe(&self, user_id: &UserId) -> bool {
        self.subscriptions.release(user_id).await
    }

    /// Release every live query and forget the mirrored user
    pub async fn shutdown(&self) {
        let released = self.subscriptions.release_all().await;
        let mut mirror = self.mirror();
        mirror.active_user = None;
        mirror.items.clear();
        info!("Notification center shut down, released {} subscriptions", released);
    }

    pub async fn is_subscribed(&self, user_id: &UserId) -> bool {
        self.subscriptions.is_active(user_id).await
    }

    /// =========================================================================
    /// DERIVED STATE
    /// =========================================================================

    pub fn notifications(&self) -> Vec<Notification> {
        self.mirror().items.clone()
    }

    pub fn unread_count(&self) -> usize {
        self.mirror().unread_count()
    }

    pub fn current_filter(&self) -> NotificationFilter {
        self.mirror().filter
    }

    pub fn filtered_view(&self) -> Vec<Notification> {
        self.mirror().filtered()
    }

    /// Change the view filter. Purely local.
    pub fn set_filter(&self, filter: NotificationFilter) -> Vec<Notification> {
        let mut mirror = self.mirror();
        mirror.filter = filter;
        mirror.filtered()
    }

    /// =========================================================================
    /// READ STATE
    /// =========================================================================

    /// Mark one notification read. The local change is kept even if the
    /// store write fails.
    #[instrument(skip(self))]
    pub async fn mark_as_read(&self, notification_id: &NotificationId) {
        {
            let mut mirror = self.mirror();
            if let Some(item) = mirror.items.iter_mut().find(|n| &n.id == notification_id) {
                item.is_read = true;
            }
        }

        let fields = serde_json::json!({ "isRead": true });
        let outcome = settle(
            &format!("mark {} read", notification_id),
            RevertPolicy::None,
            self.store
                .update(collections::NOTIFICATIONS, notification_id.as_str(), fields),
            || {},
        )
        .await;
        if let Some(error) = outcome.error() {
            debug!("read state for {} stays local: {}", notification_id, error);
        }
    }

    /// Mark every unread notification of `user_id` read in one batched write.
    ///
    /// Returns how many documents changed. Unread documents the user may not
    /// read count as none.
    #[instrument(skip(self))]
    pub async fn mark_all_as_read(&self, user_id: &UserId) -> AppResult<usize> {
        let query = Query::new()
            .where_eq("recipientId", user_id.as_str())
            .where_eq("isRead", false);
        let unread = match self.store.query(collections::NOTIFICATIONS, &query).await {
            Ok(docs) => docs,
            Err(error) if error.is_permission_denied() => {
                info!("Unread notifications for {} not readable", user_id);
                Vec::new()
            }
            Err(error) => return Err(error),
        };

        let changed = if unread.is_empty() {
            0
        } else {
            let updates = unread
                .into_iter()
                .map(|doc| (doc.id, serde_json::json!({ "isRead": true })))
                .collect();
            self.store
                .batch_update(collections::NOTIFICATIONS, updates)
                .await?
        };

        let mut mirror = self.mirror();
        if mirror.active_user.as_ref() == Some(user_id) {
            for item in mirror.items.iter_mut() {
                item.is_read = true;
            }
        }
        info!("Marked {} notifications read for {}", changed, user_id);
        Ok(changed)
    }
}
