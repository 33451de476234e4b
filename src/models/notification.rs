use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::strong_types::{AnimeId, NotificationId, PostId, UserId};

/// The user who caused an interaction-derived notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl Actor {
    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            avatar_url: None,
        }
    }

    /// Fallback used when the identity provider has no profile for a user
    pub fn anonymous(id: UserId) -> Self {
        let display_name = id.to_string();
        Self::new(id, display_name)
    }
}

/// Notification payload, tagged by `type`.
///
/// Interaction variants always carry an actor; system variants never do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum NotificationEvent {
    Like {
        actor: Actor,
        post_id: PostId,
    },
    Comment {
        actor: Actor,
        post_id: PostId,
    },
    Follow {
        actor: Actor,
    },
    Mention {
        actor: Actor,
        post_id: PostId,
    },
    Repost {
        actor: Actor,
        post_id: PostId,
    },
    EpisodeRelease {
        anime_id: AnimeId,
        episode: u32,
    },
    NewSeason {
        anime_id: AnimeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    AnimeAiring {
        anime_id: AnimeId,
        episode: u32,
        airing_at_epoch_seconds: i64,
    },
}

impl NotificationEvent {
    pub fn kind(&self) -> NotificationType {
        match self {
            NotificationEvent::Like { .. } => NotificationType::Like,
            NotificationEvent::Comment { .. } => NotificationType::Comment,
            NotificationEvent::Follow { .. } => NotificationType::Follow,
            NotificationEvent::Mention { .. } => NotificationType::Mention,
            NotificationEvent::Repost { .. } => NotificationType::Repost,
            NotificationEvent::EpisodeRelease { .. } => NotificationType::EpisodeRelease,
            NotificationEvent::NewSeason { .. } => NotificationType::NewSeason,
            NotificationEvent::AnimeAiring { .. } => NotificationType::AnimeAiring,
        }
    }

    pub fn actor(&self) -> Option<&Actor> {
        match self {
            NotificationEvent::Like { actor, .. }
            | NotificationEvent::Comment { actor, .. }
            | NotificationEvent::Follow { actor }
            | NotificationEvent::Mention { actor, .. }
            | NotificationEvent::Repost { actor, .. } => Some(actor),
            NotificationEvent::EpisodeRelease { .. }
            | NotificationEvent::NewSeason { .. }
            | NotificationEvent::AnimeAiring { .. } => None,
        }
    }

    pub fn post_id(&self) -> Option<&PostId> {
        match self {
            NotificationEvent::Like { post_id, .. }
            | NotificationEvent::Comment { post_id, .. }
            | NotificationEvent::Mention { post_id, .. }
            | NotificationEvent::Repost { post_id, .. } => Some(post_id),
            _ => None,
        }
    }

    pub fn anime_id(&self) -> Option<AnimeId> {
        match self {
            NotificationEvent::EpisodeRelease { anime_id, .. }
            | NotificationEvent::NewSeason { anime_id, .. }
            | NotificationEvent::AnimeAiring { anime_id, .. } => Some(*anime_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Like,
    Comment,
    Follow,
    Mention,
    Repost,
    EpisodeRelease,
    NewSeason,
    AnimeAiring,
}

impl NotificationType {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationType::Like => "like",
            NotificationType::Comment => "comment",
            NotificationType::Follow => "follow",
            NotificationType::Mention => "mention",
            NotificationType::Repost => "repost",
            NotificationType::EpisodeRelease => "episode_release",
            NotificationType::NewSeason => "new_season",
            NotificationType::AnimeAiring => "anime_airing",
        }
    }

    pub fn is_episode_related(self) -> bool {
        matches!(
            self,
            NotificationType::EpisodeRelease
                | NotificationType::NewSeason
                | NotificationType::AnimeAiring
        )
    }
}

/// Stored notification document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub recipient_id: UserId,
    #[serde(flatten)]
    pub event: NotificationEvent,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

impl Notification {
    pub fn kind(&self) -> NotificationType {
        self.event.kind()
    }
}

/// Notification as written; id and `createdAt` come from the store
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    pub recipient_id: UserId,
    #[serde(flatten)]
    pub event: NotificationEvent,
    pub is_read: bool,
}

/// Client-side view filter over the mirrored notification set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationFilter {
    #[default]
    All,
    Mentions,
    Follows,
    Episodes,
}

impl NotificationFilter {
    pub fn matches(self, kind: NotificationType) -> bool {
        match self {
            NotificationFilter::All => true,
            NotificationFilter::Mentions => kind == NotificationType::Mention,
            NotificationFilter::Follows => kind == NotificationType::Follow,
            NotificationFilter::Episodes => kind.is_episode_related(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_round_trips_through_tagged_json() {
        let raw = json!({
            "id": "n1",
            "recipientId": "bob",
            "type": "like",
            "actor": { "id": "alice", "displayName": "Alice" },
            "postId": "p1",
            "createdAt": "2026-01-01T00:00:00Z",
            "isRead": false
        });
        let notification: Notification = serde_json::from_value(raw).unwrap();
        assert_eq!(notification.kind(), NotificationType::Like);
        assert_eq!(notification.event.actor().unwrap().id, UserId::new("alice"));
        assert_eq!(notification.event.post_id(), Some(&PostId::new("p1")));

        let back = serde_json::to_value(&notification).unwrap();
        assert_eq!(back["type"], "like");
        assert_eq!(back["postId"], "p1");
    }

    #[test]
    fn test_system_events_have_no_actor() {
        let event = NotificationEvent::EpisodeRelease {
            anime_id: AnimeId::new(21),
            episode: 1100,
        };
        assert!(event.actor().is_none());
        assert_eq!(event.anime_id(), Some(AnimeId::new(21)));
        assert_eq!(event.kind().as_str(), "episode_release");
    }

    #[test]
    fn test_episodes_filter_selects_release_season_and_airing() {
        let filter = NotificationFilter::Episodes;
        assert!(filter.matches(NotificationType::EpisodeRelease));
        assert!(filter.matches(NotificationType::NewSeason));
        assert!(filter.matches(NotificationType::AnimeAiring));
        assert!(!filter.matches(NotificationType::Like));
        assert!(!filter.matches(NotificationType::Mention));
        assert!(NotificationFilter::All.matches(NotificationType::Repost));
        assert!(NotificationFilter::Mentions.matches(NotificationType::Mention));
        assert!(!NotificationFilter::Follows.matches(NotificationType::Mention));
    }
}
