// Optimistic Mutation Engine - likes and reposts
//
// A toggle is applied to the local mirror synchronously, then written to the
// store behind a per-(post, user, kind) lock. Queued calls for the same pair
// coalesce: whoever holds the lock writes the difference between the latest
// local state and the last confirmed state, so a rapid like/unlike never
// reaches the store out of order and never double counts.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::core::clock::Clock;
use crate::core::strong_types::{PostId, UserId};
use crate::error::{AppError, AppResult};
use crate::infrastructure::identity::{resolve_actor, IdentityProvider};
use crate::infrastructure::store::{collections, CreateOutcome, DocumentStore};
use crate::models::notification::NotificationEvent;
use crate::models::post::{Post, PresenceRecord, ToggleKind};
use crate::services::notification_service::NotificationService;
use crate::services::optimistic::{settle, OptimisticOutcome, RevertPolicy};

type ToggleKey = (PostId, UserId, ToggleKind);

#[derive(Debug, Clone)]
struct TrackedPost {
    author_id: UserId,
    like_count: u64,
    repost_count: u64,
}

impl TrackedPost {
    fn counter(&self, kind: ToggleKind) -> u64 {
        match kind {
            ToggleKind::Like => self.like_count,
            ToggleKind::Repost => self.repost_count,
        }
    }

    fn counter_mut(&mut self, kind: ToggleKind) -> &mut u64 {
        match kind {
            ToggleKind::Like => &mut self.like_count,
            ToggleKind::Repost => &mut self.repost_count,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ToggleState {
    local: bool,
    confirmed: bool,
    /// Counter value before the first unconfirmed local change
    revert_count: Option<u64>,
    /// Target of an in-flight write whose counter change already landed
    committed: Option<bool>,
}

impl ToggleState {
    fn pending_delta(&self) -> i64 {
        i64::from(self.local) - i64::from(self.confirmed)
    }

    /// What the store has counted for this toggle
    fn counted(&self) -> bool {
        self.committed.unwrap_or(self.confirmed)
    }

    /// Local change not yet reflected in the store's counter
    fn uncounted_delta(&self) -> i64 {
        i64::from(self.local) - i64::from(self.counted())
    }

    /// Counter change already in the store but not yet confirmed
    fn counted_delta(&self) -> i64 {
        i64::from(self.counted()) - i64::from(self.confirmed)
    }
}

/// Counter and flag view of one post for one viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostEngagement {
    pub post_id: PostId,
    pub like_count: u64,
    pub repost_count: u64,
    pub liked: bool,
    pub reposted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WriteIntent {
    target: bool,
}

impl WriteIntent {
    fn delta(self) -> i64 {
        if self.target {
            1
        } else {
            -1
        }
    }
}

/// Local mirror of feed counters and the session's toggle flags.
///
/// Only the engine mutates it; readers get copies.
#[derive(Debug, Default)]
pub struct FeedMirror {
    posts: HashMap<PostId, TrackedPost>,
    toggles: HashMap<ToggleKey, ToggleState>,
}

impl FeedMirror {
    /// Adopt server counters for a post, re-applying unconfirmed local
    /// toggles whose counter change has not reached the store yet. A change
    /// the store already counted is part of the fresh value and is not
    /// applied twice.
    fn track(&mut self, post: &Post) {
        let fresh = TrackedPost {
            author_id: post.author_id.clone(),
            like_count: post.like_count,
            repost_count: post.repost_count,
        };
        let mut tracked = fresh.clone();
        for ((post_id, _, kind), state) in self.toggles.iter_mut() {
            if post_id != &post.id {
                continue;
            }
            if state.local != state.confirmed {
                state.revert_count =
                    Some(apply_delta(fresh.counter(*kind), -state.counted_delta()));
            }
            let delta = state.uncounted_delta();
            if delta != 0 {
                let counter = tracked.counter_mut(*kind);
                *counter = apply_delta(*counter, delta);
            }
        }
        self.posts.insert(post.id.clone(), tracked);
    }

    /// Record the server-known flag; ignored while a local change is pending
    fn seed_flag(&mut self, key: ToggleKey, value: bool) {
        let state = self.toggles.entry(key).or_default();
        if state.pending_delta() == 0 && state.committed.is_none() {
            state.local = value;
            state.confirmed = value;
        }
    }

    /// Returns false when the flag already equals `desired`
    fn apply_local(&mut self, key: &ToggleKey, desired: bool) -> AppResult<bool> {
        let (post_id, _, kind) = key;
        let post = self
            .posts
            .get_mut(post_id)
            .ok_or_else(|| AppError::NotFound(format!("post {} is not loaded", post_id)))?;
        let state = self.toggles.entry(key.clone()).or_default();
        if state.local == desired {
            return Ok(false);
        }

        let counter = post.counter_mut(*kind);
        if state.local == state.confirmed {
            state.revert_count = Some(*counter);
        }
        *counter = if desired {
            counter.saturating_add(1)
        } else {
            counter.saturating_sub(1)
        };
        state.local = desired;
        if state.local == state.confirmed {
            state.revert_count = None;
        }
        Ok(true)
    }

    /// What still has to reach the store for `key`, if anything
    fn begin_write(&mut self, key: &ToggleKey) -> Option<WriteIntent> {
        let state = self.toggles.get_mut(key)?;
        if state.local == state.confirmed {
            state.revert_count = None;
            return None;
        }
        Some(WriteIntent {
            target: state.local,
        })
    }

    /// The store counted the write for `target`; its presence record is
    /// still outstanding
    fn mark_counted(&mut self, key: &ToggleKey, target: bool) {
        if let Some(state) = self.toggles.get_mut(key) {
            state.committed = Some(target);
        }
    }

    fn clear_counted(&mut self, key: &ToggleKey) {
        if let Some(state) = self.toggles.get_mut(key) {
            state.committed = None;
        }
    }

    fn confirm(&mut self, key: &ToggleKey, target: bool) {
        if let Some(state) = self.toggles.get_mut(key) {
            state.confirmed = target;
            state.committed = None;
            if state.local == state.confirmed {
                state.revert_count = None;
            }
        }
    }

    /// Restore the flag and counter to their values before the unconfirmed
    /// change began.
    fn rollback(&mut self, key: &ToggleKey) {
        let (post_id, _, kind) = key;
        let Some(state) = self.toggles.get_mut(key) else {
            return;
        };
        let delta = state.pending_delta();
        let revert_count = state.revert_count.take();
        state.local = state.confirmed;
        state.committed = None;
        if let Some(post) = self.posts.get_mut(post_id) {
            let counter = post.counter_mut(*kind);
            *counter = revert_count.unwrap_or_else(|| apply_delta(*counter, -delta));
        }
    }

    fn engagement(&self, post_id: &PostId, viewer: &UserId) -> Option<PostEngagement> {
        let post = self.posts.get(post_id)?;
        let flag = |kind: ToggleKind| {
            self.toggles
                .get(&(post_id.clone(), viewer.clone(), kind))
                .is_some_and(|state| state.local)
        };
        Some(PostEngagement {
            post_id: post_id.clone(),
            like_count: post.like_count,
            repost_count: post.repost_count,
            liked: flag(ToggleKind::Like),
            reposted: flag(ToggleKind::Repost),
        })
    }
}

fn apply_delta(value: u64, delta: i64) -> u64 {
    if delta >= 0 {
        value.saturating_add(delta.unsigned_abs())
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleOutcome {
    /// Local state already matched the request; nothing to do
    Unchanged,
    /// The store now reflects the request
    Confirmed,
    /// A later call for the same pair undid this one before it was written
    Superseded,
    /// The remote write failed and the local change was reverted
    RolledBack,
}

#[derive(Debug)]
pub struct ToggleEngine {
    store: Arc<dyn DocumentStore>,
    notifications: NotificationService,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    mirror: Arc<Mutex<FeedMirror>>,
    slots: Mutex<HashMap<ToggleKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ToggleEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        notifications: NotificationService,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            notifications,
            identity,
            clock,
            mirror: Arc::new(Mutex::new(FeedMirror::default())),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn mirror(&self) -> MutexGuard<'_, FeedMirror> {
        self.mirror.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// =========================================================================
    /// MIRROR ACCESS
    /// =========================================================================

    /// Start mirroring a post's counters
    pub fn track_post(&self, post: &Post) {
        self.mirror().track(post);
    }

    /// Stop mirroring a post that no longer exists
    pub fn forget_post(&self, post_id: &PostId) {
        let mut mirror = self.mirror();
        mirror.posts.remove(post_id);
        mirror.toggles.retain(|(id, _, _), _| id != post_id);
    }

    /// Seed the viewer's flag from a server read
    pub fn seed_flag(&self, post_id: &PostId, user_id: &UserId, kind: ToggleKind, value: bool) {
        self.mirror()
            .seed_flag((post_id.clone(), user_id.clone(), kind), value);
    }

    pub fn engagement(&self, post_id: &PostId, viewer: &UserId) -> Option<PostEngagement> {
        self.mirror().engagement(post_id, viewer)
    }

    pub fn is_active(&self, post_id: &PostId, user_id: &UserId, kind: ToggleKind) -> bool {
        self.mirror()
            .toggles
            .get(&(post_id.clone(), user_id.clone(), kind))
            .is_some_and(|state| state.local)
    }

    /// =========================================================================
    /// TOGGLES
    /// =========================================================================

    pub async fn like(&self, post_id: &PostId, user_id: &UserId) -> AppResult<ToggleOutcome> {
        self.apply_toggle(post_id, user_id, ToggleKind::Like, true).await
    }

    pub async fn unlike(&self, post_id: &PostId, user_id: &UserId) -> AppResult<ToggleOutcome> {
        self.apply_toggle(post_id, user_id, ToggleKind::Like, false).await
    }

    pub async fn repost(&self, post_id: &PostId, user_id: &UserId) -> AppResult<ToggleOutcome> {
        self.apply_toggle(post_id, user_id, ToggleKind::Repost, true).await
    }

    pub async fn unrepost(&self, post_id: &PostId, user_id: &UserId) -> AppResult<ToggleOutcome> {
        self.apply_toggle(post_id, user_id, ToggleKind::Repost, false).await
    }

    /// Flip the current local flag
    pub async fn toggle(
        &self,
        post_id: &PostId,
        user_id: &UserId,
        kind: ToggleKind,
    ) -> AppResult<ToggleOutcome> {
        let desired = !self.is_active(post_id, user_id, kind);
        self.apply_toggle(post_id, user_id, kind, desired).await
    }

    /// Set the (post, user, kind) toggle to `desired`.
    ///
    /// The local mirror changes before this function first yields. Transient
    /// and permission failures are absorbed by rolling back; a post that no
    /// longer exists is rolled back and reported as `NotFound`.
    #[instrument(skip(self), fields(post = %post_id, user = %user_id, kind = kind.as_str()))]
    pub async fn apply_toggle(
        &self,
        post_id: &PostId,
        user_id: &UserId,
        kind: ToggleKind,
        desired: bool,
    ) -> AppResult<ToggleOutcome> {
        let key: ToggleKey = (post_id.clone(), user_id.clone(), kind);

        if !self.mirror().apply_local(&key, desired)? {
            return Ok(ToggleOutcome::Unchanged);
        }

        let slot = self.slot(&key);
        let outcome = {
            let _serial = slot.lock().await;
            self.write_serialized(&key, desired).await
        };
        drop(slot);
        self.release_slot(&key);
        outcome
    }

    /// Runs while holding the (post, user, kind) write slot
    async fn write_serialized(&self, key: &ToggleKey, desired: bool) -> AppResult<ToggleOutcome> {
        let (post_id, user_id, kind) = key;
        let intent = self.mirror().begin_write(key);
        let Some(intent) = intent else {
            debug!("toggle superseded before write");
            return Ok(ToggleOutcome::Superseded);
        };

        let label = format!("{} {} by {}", kind.as_str(), post_id, user_id);
        let outcome = settle(
            &label,
            RevertPolicy::Strict,
            self.write_remote(key, intent),
            || self.mirror().rollback(key),
        )
        .await;

        match outcome {
            OptimisticOutcome::Confirmed(()) => {
                self.mirror().confirm(key, intent.target);
                if intent.target == desired {
                    Ok(ToggleOutcome::Confirmed)
                } else {
                    Ok(ToggleOutcome::Superseded)
                }
            }
            OptimisticOutcome::Reverted(error) | OptimisticOutcome::Kept(error) => {
                if error.is_not_found() {
                    Err(error)
                } else {
                    Ok(ToggleOutcome::RolledBack)
                }
            }
        }
    }

    fn slot(&self, key: &ToggleKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    /// Drop the slot once no call holds or waits on it
    fn release_slot(&self, key: &ToggleKey) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(key);
        }
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Counter first, then the presence record. The record id is the
    /// idempotency key: if it already exists (or is already gone) the
    /// counter change is compensated so counts keep matching records.
    async fn write_remote(&self, key: &ToggleKey, intent: WriteIntent) -> AppResult<()> {
        let (post_id, user_id, kind) = key;
        let record_id = PresenceRecord::document_id(user_id, post_id);

        self.store
            .increment(
                collections::POSTS,
                post_id.as_str(),
                kind.counter_field(),
                intent.delta(),
            )
            .await?;
        self.mirror().mark_counted(key, intent.target);

        let counted = if intent.target {
            let record = PresenceRecord {
                user_id: user_id.clone(),
                post_id: post_id.clone(),
                created_at: self.clock.now(),
            };
            match self
                .store
                .create_if_absent(
                    kind.record_collection(),
                    &record_id,
                    serde_json::to_value(&record)?,
                )
                .await
            {
                Ok(CreateOutcome::Created(_)) => true,
                Ok(CreateOutcome::AlreadyExists(_)) => false,
                Err(error) => {
                    self.compensate(key, -intent.delta()).await;
                    self.mirror().clear_counted(key);
                    return Err(error);
                }
            }
        } else {
            match self.store.delete(kind.record_collection(), &record_id).await {
                Ok(removed) => removed,
                Err(error) => {
                    self.compensate(key, -intent.delta()).await;
                    self.mirror().clear_counted(key);
                    return Err(error);
                }
            }
        };

        if !counted {
            // Another session already made this transition
            info!(
                "{} record for {} already in target state, compensating counter",
                kind.as_str(),
                record_id
            );
            self.compensate(key, -intent.delta()).await;
            self.mirror().clear_counted(key);
            return Ok(());
        }

        if intent.target {
            self.notify_author(key).await;
        }
        Ok(())
    }

    async fn compensate(&self, key: &ToggleKey, delta: i64) {
        let (post_id, _, kind) = key;
        if let Err(error) = self
            .store
            .increment(collections::POSTS, post_id.as_str(), kind.counter_field(), delta)
            .await
        {
            warn!(
                "Counter compensation {:+} on {} failed: {}",
                delta, post_id, error
            );
        }
    }

    async fn notify_author(&self, key: &ToggleKey) {
        let (post_id, user_id, kind) = key;
        let author = self
            .mirror()
            .posts
            .get(post_id)
            .map(|post| post.author_id.clone());
        let Some(author) = author else {
            return;
        };
        if &author == user_id {
            return;
        }

        let actor = resolve_actor(self.identity.as_ref(), user_id).await;
        let event = match kind {
            ToggleKind::Like => NotificationEvent::Like {
                actor,
                post_id: post_id.clone(),
            },
            ToggleKind::Repost => NotificationEvent::Repost {
                actor,
                post_id: post_id.clone(),
            },
        };
        if let Err(error) = self.notifications.create_notification(&author, event).await {
            warn!("Failed to notify {} about {}: {}", author, kind.as_str(), error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::infrastructure::identity::StaticIdentityProvider;
    use crate::infrastructure::memory_store::InMemoryDocumentStore;
    use crate::infrastructure::store::Query;
    use crate::models::post::NewPost;

    struct Fixture {
        store: Arc<InMemoryDocumentStore>,
        engine: Arc<ToggleEngine>,
        post: Post,
    }

    async fn fixture(like_count: u64) -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_epoch_seconds(1_700_000_000));
        let store = Arc::new(InMemoryDocumentStore::new(clock.clone()));
        let new_post = NewPost {
            author_id: UserId::new("author"),
            content: "EP4 was peak".to_string(),
            like_count,
            repost_count: 0,
            reply_count: 0,
            parent_id: None,
            anime: None,
            media_url: None,
        };
        let doc = store
            .create(collections::POSTS, serde_json::to_value(&new_post).unwrap())
            .await
            .unwrap();
        let post: Post = doc.decode().unwrap();
        let engine = Arc::new(ToggleEngine::new(
            store.clone(),
            NotificationService::new(store.clone()),
            Arc::new(StaticIdentityProvider::new()),
            clock,
        ));
        engine.track_post(&post);
        Fixture { store, engine, post }
    }

    async fn stored_likes(store: &InMemoryDocumentStore, post_id: &PostId) -> i64 {
        let doc = store
            .get(collections::POSTS, post_id.as_str())
            .await
            .unwrap()
            .unwrap();
        doc.data["likeCount"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_like_then_unlike_restores_count() {
        let f = fixture(5).await;
        let viewer = UserId::new("viewer");

        assert_eq!(f.engine.like(&f.post.id, &viewer).await.unwrap(), ToggleOutcome::Confirmed);
        let liked = f.engine.engagement(&f.post.id, &viewer).unwrap();
        assert_eq!(liked.like_count, 6);
        assert!(liked.liked);
        assert_eq!(stored_likes(&f.store, &f.post.id).await, 6);

        assert_eq!(f.engine.unlike(&f.post.id, &viewer).await.unwrap(), ToggleOutcome::Confirmed);
        let unliked = f.engine.engagement(&f.post.id, &viewer).unwrap();
        assert_eq!(unliked.like_count, 5);
        assert!(!unliked.liked);
        assert_eq!(stored_likes(&f.store, &f.post.id).await, 5);
    }

    #[tokio::test]
    async fn test_local_change_is_visible_before_remote_write_completes() {
        let f = fixture(0).await;
        let viewer = UserId::new("viewer");
        f.store.hold_writes();

        let engine = f.engine.clone();
        let post_id = f.post.id.clone();
        let task_viewer = viewer.clone();
        let pending = tokio::spawn(async move { engine.like(&post_id, &task_viewer).await });

        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let during = f.engine.engagement(&f.post.id, &viewer).unwrap();
        assert_eq!(during.like_count, 1);
        assert!(during.liked);
        assert_eq!(stored_likes(&f.store, &f.post.id).await, 0);

        f.store.release_writes();
        assert_eq!(pending.await.unwrap().unwrap(), ToggleOutcome::Confirmed);
        assert_eq!(stored_likes(&f.store, &f.post.id).await, 1);
    }

    #[tokio::test]
    async fn test_failed_write_restores_exact_previous_state() {
        let f = fixture(0).await;
        let viewer = UserId::new("viewer");
        // Server says liked, counter already floored at zero
        f.engine.seed_flag(&f.post.id, &viewer, ToggleKind::Like, true);

        f.store.set_offline(true);
        let outcome = f.engine.unlike(&f.post.id, &viewer).await.unwrap();
        assert_eq!(outcome, ToggleOutcome::RolledBack);

        let after = f.engine.engagement(&f.post.id, &viewer).unwrap();
        assert_eq!(after.like_count, 0);
        assert!(after.liked);
    }

    #[tokio::test]
    async fn test_rollback_on_like_failure() {
        let f = fixture(3).await;
        let viewer = UserId::new("viewer");
        f.store.fail_next_write(AppError::PermissionDenied("rules".into()));

        let outcome = f.engine.like(&f.post.id, &viewer).await.unwrap();
        assert_eq!(outcome, ToggleOutcome::RolledBack);
        let after = f.engine.engagement(&f.post.id, &viewer).unwrap();
        assert_eq!(after.like_count, 3);
        assert!(!after.liked);
        assert_eq!(stored_likes(&f.store, &f.post.id).await, 3);
    }

    #[tokio::test]
    async fn test_rapid_like_unlike_is_serialized_and_coalesced() {
        let f = fixture(10).await;
        let viewer = UserId::new("viewer");
        f.store.hold_writes();

        let (e1, e2, e3) = (f.engine.clone(), f.engine.clone(), f.engine.clone());
        let (p1, p2, p3) = (f.post.id.clone(), f.post.id.clone(), f.post.id.clone());
        let (v1, v2, v3) = (viewer.clone(), viewer.clone(), viewer.clone());
        let first = tokio::spawn(async move { e1.like(&p1, &v1).await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let second = tokio::spawn(async move { e2.unlike(&p2, &v2).await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let third = tokio::spawn(async move { e3.like(&p3, &v3).await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let during = f.engine.engagement(&f.post.id, &viewer).unwrap();
        assert_eq!(during.like_count, 11);
        assert!(during.liked);

        f.store.release_writes();
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        third.await.unwrap().unwrap();

        assert_eq!(stored_likes(&f.store, &f.post.id).await, 11);
        let increments: Vec<_> = f
            .store
            .write_log()
            .into_iter()
            .filter(|w| w.starts_with("increment"))
            .collect();
        assert_eq!(increments.len(), 1);
        let records = f.store.query("likes", &Query::new()).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_post_is_reported_after_rollback() {
        let f = fixture(1).await;
        let viewer = UserId::new("viewer");
        f.store.delete(collections::POSTS, f.post.id.as_str()).await.unwrap();

        let err = f.engine.like(&f.post.id, &viewer).await.unwrap_err();
        assert!(err.is_not_found());
        let after = f.engine.engagement(&f.post.id, &viewer).unwrap();
        assert_eq!(after.like_count, 1);
        assert!(!after.liked);
    }

    #[tokio::test]
    async fn test_untracked_post_fails_without_io() {
        let f = fixture(0).await;
        let writes_before = f.store.write_log().len();
        let err = f
            .engine
            .like(&PostId::new("never-loaded"), &UserId::new("viewer"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(f.store.write_log().len(), writes_before);
    }

    #[tokio::test]
    async fn test_like_notifies_author_but_not_self() {
        let f = fixture(0).await;
        f.engine.like(&f.post.id, &UserId::new("fan")).await.unwrap();
        f.engine.like(&f.post.id, &UserId::new("author")).await.unwrap();

        let notifications = f
            .store
            .query(collections::NOTIFICATIONS, &Query::new())
            .await
            .unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].data["recipientId"], "author");
        assert_eq!(notifications[0].data["type"], "like");
        assert_eq!(notifications[0].data["actor"]["id"], "fan");
    }

    #[tokio::test]
    async fn test_repost_uses_its_own_counter() {
        let f = fixture(2).await;
        let viewer = UserId::new("viewer");
        f.engine.repost(&f.post.id, &viewer).await.unwrap();
        let view = f.engine.engagement(&f.post.id, &viewer).unwrap();
        assert_eq!(view.repost_count, 1);
        assert_eq!(view.like_count, 2);
        assert!(view.reposted);
        assert!(!view.liked);
    }

    async fn reload(f: &Fixture) {
        let doc = f
            .store
            .get(collections::POSTS, f.post.id.as_str())
            .await
            .unwrap()
            .unwrap();
        f.engine.track_post(&doc.decode().unwrap());
    }

    async fn wait_for_stored_likes(store: &InMemoryDocumentStore, post_id: &PostId, expected: i64) {
        for _ in 0..100 {
            if stored_likes(store, post_id).await == expected {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("likeCount never reached {}", expected);
    }

    #[tokio::test]
    async fn test_reload_after_counter_landed_does_not_double_count() {
        let f = fixture(5).await;
        let viewer = UserId::new("viewer");
        // The counter lands, the presence record stays parked
        f.store.hold_writes_matching("create likes/");

        let engine = f.engine.clone();
        let post_id = f.post.id.clone();
        let task_viewer = viewer.clone();
        let pending = tokio::spawn(async move { engine.like(&post_id, &task_viewer).await });
        wait_for_stored_likes(&f.store, &f.post.id, 6).await;

        reload(&f).await;
        let during = f.engine.engagement(&f.post.id, &viewer).unwrap();
        assert_eq!(during.like_count, 6);
        assert!(during.liked);

        f.store.release_writes();
        assert_eq!(pending.await.unwrap().unwrap(), ToggleOutcome::Confirmed);
        let after = f.engine.engagement(&f.post.id, &viewer).unwrap();
        assert_eq!(after.like_count, 6);
        assert_eq!(stored_likes(&f.store, &f.post.id).await, 6);
    }

    #[tokio::test]
    async fn test_reload_before_counter_lands_keeps_local_change() {
        let f = fixture(5).await;
        let viewer = UserId::new("viewer");
        f.store.hold_writes();

        let engine = f.engine.clone();
        let post_id = f.post.id.clone();
        let task_viewer = viewer.clone();
        let pending = tokio::spawn(async move { engine.like(&post_id, &task_viewer).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        reload(&f).await;
        assert_eq!(f.engine.engagement(&f.post.id, &viewer).unwrap().like_count, 6);

        f.store.release_writes();
        assert_eq!(pending.await.unwrap().unwrap(), ToggleOutcome::Confirmed);
        assert_eq!(f.engine.engagement(&f.post.id, &viewer).unwrap().like_count, 6);
    }

    #[tokio::test]
    async fn test_record_failure_after_reload_restores_original_count() {
        let f = fixture(5).await;
        let viewer = UserId::new("viewer");
        f.store.hold_writes_matching("create likes/");
        f.store
            .fail_write_matching("create likes/", AppError::Unavailable("dropped".into()));

        let engine = f.engine.clone();
        let post_id = f.post.id.clone();
        let task_viewer = viewer.clone();
        let pending = tokio::spawn(async move { engine.like(&post_id, &task_viewer).await });
        wait_for_stored_likes(&f.store, &f.post.id, 6).await;
        reload(&f).await;

        f.store.release_writes();
        assert_eq!(pending.await.unwrap().unwrap(), ToggleOutcome::RolledBack);
        let after = f.engine.engagement(&f.post.id, &viewer).unwrap();
        assert_eq!(after.like_count, 5);
        assert!(!after.liked);
        assert_eq!(stored_likes(&f.store, &f.post.id).await, 5);
    }

    #[tokio::test]
    async fn test_write_slots_are_released_after_each_toggle() {
        let f = fixture(0).await;
        for n in 0..5 {
            let viewer = UserId::new(format!("viewer-{}", n));
            f.engine.like(&f.post.id, &viewer).await.unwrap();
            f.engine.unlike(&f.post.id, &viewer).await.unwrap();
        }
        assert_eq!(f.engine.slot_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_record_compensates_counter() {
        let f = fixture(0).await;
        let viewer = UserId::new("viewer");
        // Another device already liked and counted
        f.store
            .increment(collections::POSTS, f.post.id.as_str(), "likeCount", 1)
            .await
            .unwrap();
        f.store
            .create_if_absent(
                "likes",
                &PresenceRecord::document_id(&viewer, &f.post.id),
                serde_json::json!({"userId": "viewer", "postId": f.post.id.as_str()}),
            )
            .await
            .unwrap();

        f.engine.like(&f.post.id, &viewer).await.unwrap();
        assert_eq!(stored_likes(&f.store, &f.post.id).await, 1);
    }
}
