use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::clock::{from_epoch_seconds, Clock};
use crate::core::strong_types::{AnimeId, MessageId, RoomId, UserId};

/// Discussion space for one episode.
///
/// Aired status is never stored: it is recomputed from `airing_at_epoch_seconds`
/// on every read, so a room cannot get stuck in the pre-air state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: RoomId,
    pub anime_id: AnimeId,
    pub episode: u32,
    pub airing_at_epoch_seconds: i64,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub participant_count: u64,
    pub created_at: DateTime<Utc>,
}

impl ChatRoom {
    pub fn is_aired_at(&self, now_epoch_seconds: i64) -> bool {
        now_epoch_seconds >= self.airing_at_epoch_seconds
    }

    pub fn is_aired(&self, clock: &dyn Clock) -> bool {
        self.is_aired_at(clock.now_epoch_seconds())
    }

    /// Zero once aired
    pub fn seconds_until_airing(&self, clock: &dyn Clock) -> i64 {
        self.airing_at_epoch_seconds
            .saturating_sub(clock.now_epoch_seconds())
            .max(0)
    }

    pub fn airing_at(&self) -> DateTime<Utc> {
        from_epoch_seconds(self.airing_at_epoch_seconds)
    }

    pub fn status(&self, clock: &dyn Clock) -> RoomStatus {
        RoomStatus {
            room_id: self.id.clone(),
            is_aired: self.is_aired(clock),
            seconds_until_airing: self.seconds_until_airing(clock),
            message_count: self.message_count,
            participant_count: self.participant_count,
        }
    }
}

/// Read model exposed to presentation layers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatus {
    pub room_id: RoomId,
    pub is_aired: bool,
    pub seconds_until_airing: i64,
    pub message_count: u64,
    pub participant_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub author_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub spoiler_verified: bool,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

impl ChatMessage {
    /// Record `user_id` reacting with `emoji`.
    ///
    /// Returns false when the user already contributed to that emoji.
    pub fn add_reaction(&mut self, emoji: &str, user_id: &UserId) -> bool {
        match self.reactions.iter_mut().find(|r| r.emoji == emoji) {
            Some(reaction) => reaction.add_user(user_id),
            None => {
                self.reactions.push(Reaction::first(emoji, user_id.clone()));
                true
            }
        }
    }

    pub fn reaction(&self, emoji: &str) -> Option<&Reaction> {
        self.reactions.iter().find(|r| r.emoji == emoji)
    }
}

/// Aggregated emoji reaction. `count` always equals `user_ids.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji: String,
    pub count: u32,
    pub user_ids: Vec<UserId>,
}

impl Reaction {
    fn first(emoji: &str, user_id: UserId) -> Self {
        Self {
            emoji: emoji.to_string(),
            count: 1,
            user_ids: vec![user_id],
        }
    }

    fn add_user(&mut self, user_id: &UserId) -> bool {
        if self.user_ids.contains(user_id) {
            return false;
        }
        self.user_ids.push(user_id.clone());
        self.count = u32::try_from(self.user_ids.len()).unwrap_or(u32::MAX);
        true
    }
}

/// Grants a user access to a room before its episode airs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpoilerVerification {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub verified_at: DateTime<Utc>,
}

impl SpoilerVerification {
    pub fn document_id(room_id: &RoomId, user_id: &UserId) -> String {
        format!("{}_{}", room_id, user_id)
    }
}
