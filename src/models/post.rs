use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::strong_types::{AnimeId, PostId, UserId};

/// A user-authored feed item. Replies carry `parent_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,
    pub author_id: UserId,
    pub content: String,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub repost_count: u64,
    #[serde(default)]
    pub reply_count: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<PostId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anime: Option<AnimeReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

impl Post {
    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }

    pub fn counter(&self, kind: ToggleKind) -> u64 {
        match kind {
            ToggleKind::Like => self.like_count,
            ToggleKind::Repost => self.repost_count,
        }
    }
}

/// Post fields written on creation; the store assigns id and `createdAt`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    pub author_id: UserId,
    pub content: String,
    pub like_count: u64,
    pub repost_count: u64,
    pub reply_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<PostId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anime: Option<AnimeReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimeReference {
    pub anime_id: AnimeId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
}

/// Which presence-based toggle a mutation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleKind {
    Like,
    Repost,
}

impl ToggleKind {
    /// Counter field on the post document
    pub fn counter_field(self) -> &'static str {
        match self {
            ToggleKind::Like => "likeCount",
            ToggleKind::Repost => "repostCount",
        }
    }

    /// Collection holding the presence records
    pub fn record_collection(self) -> &'static str {
        match self {
            ToggleKind::Like => "likes",
            ToggleKind::Repost => "reposts",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToggleKind::Like => "like",
            ToggleKind::Repost => "repost",
        }
    }
}

/// Evidence that a user liked or reposted a post. Its document id is
/// `{user}_{post}`, so at most one exists per pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub post_id: PostId,
    pub created_at: DateTime<Utc>,
}

impl PresenceRecord {
    pub fn document_id(user_id: &UserId, post_id: &PostId) -> String {
        format!("{}_{}", user_id, post_id)
    }
}

pub type LikeRecord = PresenceRecord;
pub type RepostRecord = PresenceRecord;
