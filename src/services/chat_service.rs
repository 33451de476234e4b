// Episode Chat - rooms gated by airing time
//
// A room opens for everyone once its episode has aired. Before that, only
// senders who hold a spoiler verification (or assert one on the call) may
// post. Aired status is always recomputed from the clock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::core::clock::Clock;
use crate::core::strong_types::{AnimeId, MessageId, RoomId, UserId};
use crate::error::{AppError, AppResult};
use crate::infrastructure::airing_schedule::AiringSchedule;
use crate::infrastructure::store::{
    collections, Document, DocumentMutator, DocumentStore, Query, SortDirection,
};
use crate::models::chat::{ChatMessage, ChatRoom, RoomStatus};
use crate::services::spoiler_ledger::SpoilerLedger;
use crate::services::subscriptions::{spawn_delivery, SubscriptionHandle};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomBody {
    anime_id: AnimeId,
    episode: u32,
    airing_at_epoch_seconds: i64,
    message_count: u64,
    participant_count: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageBody<'a> {
    room_id: &'a RoomId,
    author_id: &'a UserId,
    content: &'a str,
    created_at: DateTime<Utc>,
    spoiler_verified: bool,
    reactions: Vec<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantBody<'a> {
    user_id: &'a UserId,
    joined_at: DateTime<Utc>,
}

fn decode_messages(docs: &[Document]) -> Vec<ChatMessage> {
    docs.iter()
        .filter_map(|doc| match doc.decode::<ChatMessage>() {
            Ok(message) => Some(message),
            Err(error) => {
                warn!("Skipping malformed message {}: {}", doc.id, error);
                None
            }
        })
        .collect()
}

#[derive(Debug)]
pub struct ChatService {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    ledger: Arc<SpoilerLedger>,
    schedule: Arc<dyn AiringSchedule>,
    default_window: usize,
    /// Latest `createdAt` this instance wrote per room
    watermarks: Mutex<HashMap<RoomId, DateTime<Utc>>>,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        ledger: Arc<SpoilerLedger>,
        schedule: Arc<dyn AiringSchedule>,
        default_window: usize,
    ) -> Self {
        Self {
            store,
            clock,
            ledger,
            schedule,
            default_window,
            watermarks: Mutex::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<SpoilerLedger> {
        &self.ledger
    }

    /// =========================================================================
    /// ROOMS
    /// =========================================================================

    /// Create the room for an episode, or return the existing one.
    ///
    /// Concurrent callers converge on a single document; the first
    /// writer's airing time wins.
    #[instrument(skip(self))]
    pub async fn get_or_create_room(
        &self,
        anime_id: AnimeId,
        episode: u32,
        airing_at_epoch_seconds: i64,
    ) -> AppResult<ChatRoom> {
        let room_id = RoomId::for_episode(anime_id, episode);
        let body = RoomBody {
            anime_id,
            episode,
            airing_at_epoch_seconds,
            message_count: 0,
            participant_count: 0,
        };
        let outcome = self
            .store
            .create_if_absent(
                collections::CHAT_ROOMS,
                room_id.as_str(),
                serde_json::to_value(&body)?,
            )
            .await?;
        if outcome.was_created() {
            info!("Opened chat room {}", room_id);
        }
        outcome.document().decode()
    }

    /// Look up the airing time and open the room for an episode
    pub async fn open_episode_room(&self, anime_id: AnimeId, episode: u32) -> AppResult<ChatRoom> {
        let airing_at = self
            .schedule
            .airing_at(anime_id, episode)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no airing time known for anime {} episode {}",
                    anime_id, episode
                ))
            })?;
        self.get_or_create_room(anime_id, episode, airing_at).await
    }

    pub async fn get_room(&self, room_id: &RoomId) -> AppResult<ChatRoom> {
        self.store
            .get(collections::CHAT_ROOMS, room_id.as_str())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("chat room {}", room_id)))?
            .decode()
    }

    pub fn is_aired(&self, room: &ChatRoom) -> bool {
        room.is_aired(self.clock.as_ref())
    }

    pub async fn room_status(&self, room_id: &RoomId) -> AppResult<RoomStatus> {
        let room = self.get_room(room_id).await?;
        Ok(room.status(self.clock.as_ref()))
    }

    /// Record `user_id` as a participant. Returns true on first join.
    #[instrument(skip(self))]
    pub async fn join_room(&self, room_id: &RoomId, user_id: &UserId) -> AppResult<bool> {
        let body = ParticipantBody {
            user_id,
            joined_at: self.clock.now(),
        };
        let outcome = self
            .store
            .create_if_absent(
                &collections::room_participants(room_id),
                user_id.as_str(),
                serde_json::to_value(&body)?,
            )
            .await?;
        if !outcome.was_created() {
            return Ok(false);
        }
        if let Err(error) = self
            .store
            .increment(collections::CHAT_ROOMS, room_id.as_str(), "participantCount", 1)
            .await
        {
            self.discard(&collections::room_participants(room_id), user_id.as_str())
                .await;
            return Err(error);
        }
        debug!("{} joined {}", user_id, room_id);
        Ok(true)
    }

    /// =========================================================================
    /// MESSAGES
    /// =========================================================================

    /// Post a message to a room.
    ///
    /// Before airing the send is accepted only when `spoiler_verified` is
    /// set or the author holds a verification; otherwise it fails with
    /// `EpisodeNotAired` and nothing is written.
    #[instrument(skip(self, content))]
    pub async fn send_message(
        &self,
        room_id: &RoomId,
        author_id: &UserId,
        content: &str,
        spoiler_verified: bool,
    ) -> AppResult<ChatMessage> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::Validation("message content is empty".to_string()));
        }

        let room = self.get_room(room_id).await?;
        let verified =
            spoiler_verified || self.ledger.has_spoiler_access(room_id, author_id).await?;
        if !self.is_aired(&room) && !verified {
            info!("Rejected pre-air message from {} in {}", author_id, room_id);
            return Err(AppError::EpisodeNotAired {
                room_id: room_id.clone(),
                airing_at: room.airing_at(),
            });
        }

        let body = MessageBody {
            room_id,
            author_id,
            content,
            created_at: self.next_timestamp(room_id),
            spoiler_verified: verified,
            reactions: Vec::new(),
        };
        let messages = collections::room_messages(room_id);
        let doc = self
            .store
            .create(&messages, serde_json::to_value(&body)?)
            .await?;
        // The message only counts once the room counter moved with it
        if let Err(error) = self
            .store
            .increment(collections::CHAT_ROOMS, room_id.as_str(), "messageCount", 1)
            .await
        {
            self.discard(&messages, &doc.id).await;
            return Err(error);
        }
        if let Err(error) = self.join_room(room_id, author_id).await {
            warn!("Implicit join of {} to {} failed: {}", author_id, room_id, error);
        }

        doc.decode()
    }

    async fn discard(&self, collection: &str, id: &str) {
        if let Err(error) = self.store.delete(collection, id).await {
            warn!("Failed to remove orphaned {}/{}: {}", collection, id, error);
        }
    }

    /// Wall-clock time, never earlier than the previous message this
    /// instance wrote to the room.
    fn next_timestamp(&self, room_id: &RoomId) -> DateTime<Utc> {
        let now = self.clock.now();
        let mut watermarks = self.watermarks.lock().unwrap_or_else(|e| e.into_inner());
        let stamp = match watermarks.get(room_id) {
            Some(last) if *last > now => *last,
            _ => now,
        };
        watermarks.insert(room_id.clone(), stamp);
        stamp
    }

    /// Add `user_id`'s `emoji` reaction; repeating it changes nothing
    #[instrument(skip(self))]
    pub async fn add_reaction(
        &self,
        room_id: &RoomId,
        message_id: &MessageId,
        emoji: &str,
        user_id: &UserId,
    ) -> AppResult<ChatMessage> {
        if emoji.trim().is_empty() {
            return Err(AppError::Validation("reaction emoji is empty".to_string()));
        }

        let id = message_id.to_string();
        let emoji = emoji.to_string();
        let user = user_id.clone();
        let mutator: DocumentMutator = Box::new(move |data: &mut Value| {
            let mut message: ChatMessage = Document::new(id, data.clone()).decode()?;
            if !message.add_reaction(&emoji, &user) {
                return Ok(false);
            }
            let reactions = serde_json::to_value(&message.reactions)?;
            let map = data.as_object_mut().ok_or_else(|| {
                AppError::Serialization("chat message is not an object".to_string())
            })?;
            map.insert("reactions".to_string(), reactions);
            Ok(true)
        });

        self.store
            .update_with(
                &collections::room_messages(room_id),
                message_id.as_str(),
                mutator,
            )
            .await?
            .decode()
    }

    fn window_query(&self, limit: Option<usize>) -> Query {
        Query::new()
            .order_by("createdAt", SortDirection::Descending)
            .limit(limit.unwrap_or(self.default_window))
    }

    /// The newest `limit` messages, oldest first
    pub async fn recent_messages(
        &self,
        room_id: &RoomId,
        limit: Option<usize>,
    ) -> AppResult<Vec<ChatMessage>> {
        let docs = match self
            .store
            .query(&collections::room_messages(room_id), &self.window_query(limit))
            .await
        {
            Ok(docs) => docs,
            Err(error) if error.is_permission_denied() => Vec::new(),
            Err(error) => return Err(error),
        };
        let mut messages = decode_messages(&docs);
        messages.reverse();
        Ok(messages)
    }

    /// Push the newest `limit` messages, oldest first, on subscribe and on
    /// every change until the handle is unsubscribed.
    #[instrument(skip(self, on_update))]
    pub async fn subscribe_to_messages<F>(
        &self,
        room_id: &RoomId,
        on_update: F,
        limit: Option<usize>,
    ) -> AppResult<SubscriptionHandle>
    where
        F: FnMut(Vec<ChatMessage>) + Send + 'static,
    {
        let snapshots = self
            .store
            .subscribe(&collections::room_messages(room_id), self.window_query(limit))
            .await?;
        let room = room_id.clone();
        let mut on_update = on_update;
        Ok(spawn_delivery(
            format!("messages in {}", room_id),
            snapshots,
            move |snapshot| match snapshot {
                Ok(docs) => {
                    let mut messages = decode_messages(&docs);
                    messages.reverse();
                    on_update(messages);
                }
                Err(error) if error.is_permission_denied() => on_update(Vec::new()),
                Err(error) => warn!("Message feed for {} failed: {}", room, error),
            },
        ))
    }
}
