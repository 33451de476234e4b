// Notification fan-out writer
// Every interaction-derived notification passes the self-notification guard
// here before it reaches the store.

use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::core::strong_types::{AnimeId, NotificationId, PostId, UserId};
use crate::error::AppResult;
use crate::infrastructure::store::{collections, DocumentStore};
use crate::models::notification::{Actor, NewNotification, NotificationEvent};

#[derive(Debug, Clone)]
pub struct NotificationService {
    store: Arc<dyn DocumentStore>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Append an unread notification for `recipient_id`.
    ///
    /// Returns `None` without writing when the actor is the recipient.
    /// System events carry no actor and are never suppressed.
    #[instrument(skip(self, event), fields(kind = event.kind().as_str()))]
    pub async fn create_notification(
        &self,
        recipient_id: &UserId,
        event: NotificationEvent,
    ) -> AppResult<Option<NotificationId>> {
        if let Some(actor) = event.actor() {
            if &actor.id == recipient_id {
                debug!("Suppressing self-notification for {}", recipient_id);
                return Ok(None);
            }
        }

        let notification = NewNotification {
            recipient_id: recipient_id.clone(),
            event,
            is_read: false,
        };
        let doc = self
            .store
            .create(collections::NOTIFICATIONS, serde_json::to_value(&notification)?)
            .await?;
        info!(
            "Notification {} ({}) sent to {}",
            doc.id,
            notification.event.kind().as_str(),
            recipient_id
        );
        Ok(Some(NotificationId::new(doc.id)))
    }

    pub async fn notify_follow(
        &self,
        follower: Actor,
        followee: &UserId,
    ) -> AppResult<Option<NotificationId>> {
        self.create_notification(followee, NotificationEvent::Follow { actor: follower })
            .await
    }

    pub async fn notify_mention(
        &self,
        actor: Actor,
        mentioned: &UserId,
        post_id: PostId,
    ) -> AppResult<Option<NotificationId>> {
        self.create_notification(mentioned, NotificationEvent::Mention { actor, post_id })
            .await
    }

    pub async fn notify_episode_release(
        &self,
        recipient_id: &UserId,
        anime_id: AnimeId,
        episode: u32,
    ) -> AppResult<Option<NotificationId>> {
        self.create_notification(
            recipient_id,
            NotificationEvent::EpisodeRelease { anime_id, episode },
        )
        .await
    }

    pub async fn notify_new_season(
        &self,
        recipient_id: &UserId,
        anime_id: AnimeId,
        title: Option<String>,
    ) -> AppResult<Option<NotificationId>> {
        self.create_notification(recipient_id, NotificationEvent::NewSeason { anime_id, title })
            .await
    }

    pub async fn notify_anime_airing(
        &self,
        recipient_id: &UserId,
        anime_id: AnimeId,
        episode: u32,
        airing_at_epoch_seconds: i64,
    ) -> AppResult<Option<NotificationId>> {
        self.create_notification(
            recipient_id,
            NotificationEvent::AnimeAiring {
                anime_id,
                episode,
                airing_at_epoch_seconds,
            },
        )
        .await
    }
}
