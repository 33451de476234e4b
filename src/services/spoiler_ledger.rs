// Spoiler Ledger - append-only record of pre-air access grants
// A verification is never revoked, so positive lookups are cached for the
// lifetime of the ledger.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument};

use crate::core::clock::Clock;
use crate::core::strong_types::{RoomId, UserId};
use crate::error::AppResult;
use crate::infrastructure::store::{collections, DocumentStore};
use crate::models::chat::SpoilerVerification;

#[derive(Debug)]
pub struct SpoilerLedger {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    granted: Mutex<HashSet<(RoomId, UserId)>>,
}

impl SpoilerLedger {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            granted: Mutex::new(HashSet::new()),
        }
    }

    fn remember(&self, room_id: &RoomId, user_id: &UserId) {
        self.granted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((room_id.clone(), user_id.clone()));
    }

    /// Grant `user_id` access to `room_id` before airing.
    ///
    /// Returns false when the grant already existed; the original
    /// `verifiedAt` is kept.
    #[instrument(skip(self))]
    pub async fn verify_spoiler_access(&self, room_id: &RoomId, user_id: &UserId) -> AppResult<bool> {
        let verification = SpoilerVerification {
            user_id: user_id.clone(),
            room_id: room_id.clone(),
            verified_at: self.clock.now(),
        };
        let outcome = self
            .store
            .create_if_absent(
                collections::SPOILER_VERIFICATIONS,
                &SpoilerVerification::document_id(room_id, user_id),
                serde_json::to_value(&verification)?,
            )
            .await?;
        self.remember(room_id, user_id);
        if outcome.was_created() {
            info!("Spoiler access granted to {} for {}", user_id, room_id);
        } else {
            debug!("Spoiler access for {} in {} already recorded", user_id, room_id);
        }
        Ok(outcome.was_created())
    }

    /// Whether `user_id` holds a verification for `room_id`. Unreadable
    /// records count as no access.
    pub async fn has_spoiler_access(&self, room_id: &RoomId, user_id: &UserId) -> AppResult<bool> {
        let cached = self
            .granted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&(room_id.clone(), user_id.clone()));
        if cached {
            return Ok(true);
        }

        let found = match self
            .store
            .get(
                collections::SPOILER_VERIFICATIONS,
                &SpoilerVerification::document_id(room_id, user_id),
            )
            .await
        {
            Ok(doc) => doc.is_some(),
            Err(error) if error.is_permission_denied() => false,
            Err(error) => return Err(error),
        };
        if found {
            self.remember(room_id, user_id);
        }
        Ok(found)
    }
}
