// Anime Data Source - Read-only airing schedule lookups
// The AniList client itself lives outside this crate; the sync core only
// needs `(anime, episode) -> airing time` to seed new chat rooms.

use async_trait::async_trait;
use chrono::Duration;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::core::clock::Clock;
use crate::core::strong_types::AnimeId;
use crate::error::AppResult;
use crate::infrastructure::cache::TtlCache;

#[async_trait]
pub trait AiringSchedule: Send + Sync + std::fmt::Debug {
    /// Airing time in epoch seconds, if the episode is scheduled
    async fn airing_at(&self, anime_id: AnimeId, episode: u32) -> AppResult<Option<i64>>;
}

/// Fixed schedule, populated up front
#[derive(Debug, Default)]
pub struct StaticAiringSchedule {
    episodes: RwLock<HashMap<(AnimeId, u32), i64>>,
}

impl StaticAiringSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, anime_id: AnimeId, episode: u32, airing_at_epoch_seconds: i64) {
        self.episodes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((anime_id, episode), airing_at_epoch_seconds);
    }
}

#[async_trait]
impl AiringSchedule for StaticAiringSchedule {
    async fn airing_at(&self, anime_id: AnimeId, episode: u32) -> AppResult<Option<i64>> {
        Ok(self
            .episodes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(anime_id, episode))
            .copied())
    }
}

/// Wraps a schedule source with the TTL cache. Misses are cached too, so an
/// unscheduled episode does not hammer the upstream API.
#[derive(Debug)]
pub struct CachedAiringSchedule<S> {
    source: S,
    cache: TtlCache<(AnimeId, u32), Option<i64>>,
    max_age: Duration,
}

impl<S: AiringSchedule> CachedAiringSchedule<S> {
    pub fn new(source: S, capacity: usize, max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            cache: TtlCache::new(capacity, clock),
            max_age,
        }
    }

    pub fn invalidate(&self, anime_id: AnimeId, episode: u32) {
        self.cache.remove(&(anime_id, episode));
    }
}

#[async_trait]
impl<S: AiringSchedule> AiringSchedule for CachedAiringSchedule<S> {
    async fn airing_at(&self, anime_id: AnimeId, episode: u32) -> AppResult<Option<i64>> {
        let key = (anime_id, episode);
        if let Some(cached) = self.cache.get(&key, self.max_age) {
            debug!("airing schedule cache hit for {} ep {}", anime_id, episode);
            return Ok(cached);
        }
        let fetched = self.source.airing_at(anime_id, episode).await?;
        self.cache.set(key, fetched);
        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingSchedule {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AiringSchedule for CountingSchedule {
        async fn airing_at(&self, _anime_id: AnimeId, episode: u32) -> AppResult<Option<i64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(1_000 + i64::from(episode)))
        }
    }

    #[tokio::test]
    async fn test_cached_schedule_hits_source_once_per_ttl() {
        let clock = Arc::new(ManualClock::at_epoch_seconds(0));
        let cached = CachedAiringSchedule::new(
            CountingSchedule::default(),
            16,
            Duration::minutes(30),
            clock.clone(),
        );

        assert_eq!(cached.airing_at(AnimeId::new(1), 4).await.unwrap(), Some(1_004));
        assert_eq!(cached.airing_at(AnimeId::new(1), 4).await.unwrap(), Some(1_004));
        assert_eq!(cached.source.calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::minutes(31));
        cached.airing_at(AnimeId::new(1), 4).await.unwrap();
        assert_eq!(cached.source.calls.load(Ordering::SeqCst), 2);
    }
}
