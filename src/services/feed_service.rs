// Feed Service - posts, replies and the viewer's feed
// Posts enter the toggle engine's mirror as soon as they are created or
// loaded, so like/repost toggles always act on tracked counters.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::core::strong_types::{PostId, UserId};
use crate::error::{AppError, AppResult};
use crate::infrastructure::identity::{resolve_actor, IdentityProvider};
use crate::infrastructure::store::{collections, DocumentStore, Query, SortDirection};
use crate::models::notification::NotificationEvent;
use crate::models::post::{AnimeReference, NewPost, Post, PresenceRecord, ToggleKind};
use crate::services::notification_service::NotificationService;
use crate::services::toggle_engine::{PostEngagement, ToggleEngine};

static MENTION: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?:^|[^A-Za-z0-9_])@([A-Za-z0-9_]{1,32})").ok());

/// Handles mentioned in `content`, first occurrence order, without repeats
pub fn extract_mentions(content: &str) -> Vec<UserId> {
    let Some(pattern) = MENTION.as_ref() else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    pattern
        .captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .map(|handle| handle.as_str())
        .filter(|handle| seen.insert(handle.to_string()))
        .map(UserId::from)
        .collect()
}

/// A post as shown to one viewer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub post: Post,
    pub engagement: PostEngagement,
}

#[derive(Debug)]
pub struct FeedService {
    store: Arc<dyn DocumentStore>,
    engine: Arc<ToggleEngine>,
    notifications: NotificationService,
    identity: Arc<dyn IdentityProvider>,
}

impl FeedService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        engine: Arc<ToggleEngine>,
        notifications: NotificationService,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            store,
            engine,
            notifications,
            identity,
        }
    }

    pub fn engine(&self) -> &Arc<ToggleEngine> {
        &self.engine
    }

    pub fn identity(&self) -> &dyn IdentityProvider {
        self.identity.as_ref()
    }

    #[instrument(skip(self, content))]
    pub async fn create_post(
        &self,
        author_id: &UserId,
        content: &str,
        anime: Option<AnimeReference>,
        media_url: Option<String>,
    ) -> AppResult<Post> {
        let post = self
            .insert_post(author_id, content, None, anime, media_url)
            .await?;
        self.fan_out_mentions(&post).await;
        Ok(post)
    }

    /// Reply to `parent_id`, bumping its reply counter and telling its
    /// author (unless they reply to themselves).
    #[instrument(skip(self, content))]
    pub async fn reply_to_post(
        &self,
        parent_id: &PostId,
        author_id: &UserId,
        content: &str,
    ) -> AppResult<Post> {
        let parent = self.get_post(parent_id).await?;
        let reply = self
            .insert_post(author_id, content, Some(parent_id.clone()), parent.anime.clone(), None)
            .await?;
        if let Err(error) = self
            .store
            .increment(collections::POSTS, parent_id.as_str(), "replyCount", 1)
            .await
        {
            // Keep replies and the parent's counter in step
            if let Err(cleanup) = self.store.delete(collections::POSTS, reply.id.as_str()).await {
                warn!("Failed to remove orphaned reply {}: {}", reply.id, cleanup);
            }
            self.engine.forget_post(&reply.id);
            return Err(error);
        }

        let actor = resolve_actor(self.identity.as_ref(), author_id).await;
        let event = NotificationEvent::Comment {
            actor,
            post_id: parent_id.clone(),
        };
        if let Err(error) = self
            .notifications
            .create_notification(&parent.author_id, event)
            .await
        {
            warn!("Failed to notify {} about reply: {}", parent.author_id, error);
        }

        self.fan_out_mentions(&reply).await;
        Ok(reply)
    }

    pub async fn get_post(&self, post_id: &PostId) -> AppResult<Post> {
        self.store
            .get(collections::POSTS, post_id.as_str())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("post {}", post_id)))?
            .decode()
    }

    /// Newest posts for `viewer`, with the viewer's like and repost flags.
    ///
    /// Loaded posts are tracked by the toggle engine; toggles still in
    /// flight stay applied on top of the fresh counters.
    #[instrument(skip(self))]
    pub async fn load_feed(&self, viewer: &UserId, limit: usize) -> AppResult<Vec<FeedItem>> {
        let query = Query::new()
            .order_by("createdAt", SortDirection::Descending)
            .limit(limit);
        let docs = match self.store.query(collections::POSTS, &query).await {
            Ok(docs) => docs,
            Err(error) if error.is_permission_denied() => Vec::new(),
            Err(error) => return Err(error),
        };

        let mut feed = Vec::with_capacity(docs.len());
        for doc in docs {
            let post: Post = match doc.decode() {
                Ok(post) => post,
                Err(error) => {
                    warn!("Skipping malformed post {}: {}", doc.id, error);
                    continue;
                }
            };
            self.engine.track_post(&post);
            let (liked, reposted) = futures::future::try_join(
                self.has_record(ToggleKind::Like, viewer, &post.id),
                self.has_record(ToggleKind::Repost, viewer, &post.id),
            )
            .await?;
            self.engine.seed_flag(&post.id, viewer, ToggleKind::Like, liked);
            self.engine.seed_flag(&post.id, viewer, ToggleKind::Repost, reposted);
            if let Some(engagement) = self.engine.engagement(&post.id, viewer) {
                feed.push(FeedItem { post, engagement });
            }
        }
        Ok(feed)
    }

    async fn has_record(&self, kind: ToggleKind, user_id: &UserId, post_id: &PostId) -> AppResult<bool> {
        match self
            .store
            .get(
                kind.record_collection(),
                &PresenceRecord::document_id(user_id, post_id),
            )
            .await
        {
            Ok(doc) => Ok(doc.is_some()),
            Err(error) if error.is_permission_denied() => Ok(false),
            Err(error) => Err(error),
        }
    }

    async fn insert_post(
        &self,
        author_id: &UserId,
        content: &str,
        parent_id: Option<PostId>,
        anime: Option<AnimeReference>,
        media_url: Option<String>,
    ) -> AppResult<Post> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::Validation("post content is empty".to_string()));
        }
        let new_post = NewPost {
            author_id: author_id.clone(),
            content: content.to_string(),
            like_count: 0,
            repost_count: 0,
            reply_count: 0,
            parent_id,
            anime,
            media_url,
        };
        let post: Post = self
            .store
            .create(collections::POSTS, serde_json::to_value(&new_post)?)
            .await?
            .decode()?;
        self.engine.track_post(&post);
        info!("Post {} created by {}", post.id, author_id);
        Ok(post)
    }

    async fn fan_out_mentions(&self, post: &Post) {
        let mentioned = extract_mentions(&post.content);
        if mentioned.is_empty() {
            return;
        }
        let actor = resolve_actor(self.identity.as_ref(), &post.author_id).await;
        for user_id in mentioned {
            if user_id == post.author_id {
                continue;
            }
            if let Err(error) = self
                .notifications
                .notify_mention(actor.clone(), &user_id, post.id.clone())
                .await
            {
                warn!("Failed to notify {} about mention: {}", user_id, error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::{Clock, ManualClock};
    use crate::infrastructure::identity::StaticIdentityProvider;
    use crate::infrastructure::memory_store::InMemoryDocumentStore;
    use crate::models::notification::{Actor, Notification, NotificationType};

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<InMemoryDocumentStore>,
        feed: FeedService,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::at_epoch_seconds(1_700_000_000));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let store = Arc::new(InMemoryDocumentStore::new(dyn_clock.clone()));
        let identity = Arc::new(StaticIdentityProvider::new());
        identity.register(Actor::new(UserId::new("alice"), "Alice"));
        let notifications = NotificationService::new(store.clone());
        let engine = Arc::new(ToggleEngine::new(
            store.clone(),
            notifications.clone(),
            identity.clone(),
            dyn_clock,
        ));
        Fixture {
            clock,
            feed: FeedService::new(store.clone(), engine, notifications, identity),
            store,
        }
    }

    async fn notifications_for(store: &InMemoryDocumentStore, user: &str) -> Vec<Notification> {
        store
            .query(
                collections::NOTIFICATIONS,
                &Query::new().where_eq("recipientId", user),
            )
            .await
            .unwrap()
            .iter()
            .map(|doc| doc.decode().unwrap())
            .collect()
    }

    #[test]
    fn test_extract_mentions_dedupes_in_order() {
        let found = extract_mentions("@bob did you see this @carol? cc @bob mail@example.com");
        assert_eq!(found, vec![UserId::new("bob"), UserId::new("carol")]);
        assert!(extract_mentions("no mentions here").is_empty());
    }

    #[tokio::test]
    async fn test_mentions_notify_everyone_but_the_author() {
        let f = fixture();
        f.feed
            .create_post(&UserId::new("alice"), "@bob @alice @bob ep 4!", None, None)
            .await
            .unwrap();

        let bob = notifications_for(&f.store, "bob").await;
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].kind(), NotificationType::Mention);
        assert_eq!(bob[0].event.actor().unwrap().display_name, "Alice");
        assert!(notifications_for(&f.store, "alice").await.is_empty());
    }

    #[tokio::test]
    async fn test_reply_bumps_counter_and_notifies_parent_author() {
        let f = fixture();
        let parent = f
            .feed
            .create_post(&UserId::new("bob"), "thoughts on ep 4?", None, None)
            .await
            .unwrap();

        let reply = f
            .feed
            .reply_to_post(&parent.id, &UserId::new("alice"), "loved it")
            .await
            .unwrap();
        assert_eq!(reply.parent_id.as_ref(), Some(&parent.id));
        assert_eq!(f.feed.get_post(&parent.id).await.unwrap().reply_count, 1);

        let bob = notifications_for(&f.store, "bob").await;
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].kind(), NotificationType::Comment);

        f.feed
            .reply_to_post(&parent.id, &UserId::new("bob"), "me too")
            .await
            .unwrap();
        assert_eq!(notifications_for(&f.store, "bob").await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_reply_counter_leaves_no_reply_behind() {
        let f = fixture();
        let parent = f
            .feed
            .create_post(&UserId::new("bob"), "thoughts on ep 4?", None, None)
            .await
            .unwrap();
        f.store
            .fail_write_matching("replyCount", AppError::Unavailable("dropped".into()));

        let err = f
            .feed
            .reply_to_post(&parent.id, &UserId::new("alice"), "loved it")
            .await
            .unwrap_err();
        assert!(err.is_transient());

        let posts = f.store.query(collections::POSTS, &Query::new()).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(f.feed.get_post(&parent.id).await.unwrap().reply_count, 0);
        assert!(notifications_for(&f.store, "bob").await.is_empty());
    }

    #[tokio::test]
    async fn test_reply_to_missing_post_is_not_found() {
        let f = fixture();
        let err = f
            .feed
            .reply_to_post(&PostId::new("gone"), &UserId::new("alice"), "hello?")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_load_feed_seeds_flags_newest_first() {
        let f = fixture();
        let bob = UserId::new("bob");
        let older = f.feed.create_post(&bob, "first", None, None).await.unwrap();
        f.clock.advance(chrono::Duration::seconds(5));
        let newer = f.feed.create_post(&bob, "second", None, None).await.unwrap();

        let viewer = UserId::new("viewer");
        f.feed.engine().like(&older.id, &viewer).await.unwrap();

        let other_session = fixture_sharing(&f);
        let feed = other_session.load_feed(&viewer, 10).await.unwrap();
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].post.id, newer.id);
        assert!(!feed[0].engagement.liked);
        assert_eq!(feed[1].post.id, older.id);
        assert!(feed[1].engagement.liked);
        assert_eq!(feed[1].engagement.like_count, 1);
    }

    fn fixture_sharing(f: &Fixture) -> FeedService {
        let dyn_clock: Arc<dyn Clock> = f.clock.clone();
        let identity: Arc<dyn IdentityProvider> = Arc::new(StaticIdentityProvider::new());
        let notifications = NotificationService::new(f.store.clone());
        let engine = Arc::new(ToggleEngine::new(
            f.store.clone(),
            notifications.clone(),
            identity.clone(),
            dyn_clock,
        ));
        FeedService::new(f.store.clone(), engine, notifications, identity)
    }

    #[tokio::test]
    async fn test_empty_post_is_rejected() {
        let f = fixture();
        let err = f
            .feed
            .create_post(&UserId::new("alice"), "   ", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(f.store.write_log().is_empty());
    }
}
