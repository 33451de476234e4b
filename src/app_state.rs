use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    config::Config,
    core::clock::{Clock, SystemClock},
    core::strong_types::UserId,
    infrastructure::airing_schedule::{AiringSchedule, CachedAiringSchedule, StaticAiringSchedule},
    infrastructure::identity::{IdentityProvider, StaticIdentityProvider},
    infrastructure::memory_store::InMemoryDocumentStore,
    infrastructure::store::DocumentStore,
    services::{
        chat_service::ChatService, feed_service::FeedService,
        notification_center::NotificationCenter, notification_service::NotificationService,
        spoiler_ledger::SpoilerLedger, toggle_engine::ToggleEngine,
    },
};

/// Everything a request handler can reach. One toggle engine is shared by
/// every surface so all views of a post agree on its counters.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn DocumentStore>,
    pub notifications: NotificationService,
    pub engine: Arc<ToggleEngine>,
    pub feed: Arc<FeedService>,
    pub chat: Arc<ChatService>,
    notification_centers: Arc<Mutex<HashMap<UserId, Arc<NotificationCenter>>>>,
}

impl AppState {
    /// In-process store, system clock, empty schedule and profile directory
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new(clock.clone()));
        let schedule: Arc<dyn AiringSchedule> = Arc::new(CachedAiringSchedule::new(
            StaticAiringSchedule::new(),
            config.cache.capacity,
            config.airing_ttl(),
            clock.clone(),
        ));
        let identity: Arc<dyn IdentityProvider> = Arc::new(StaticIdentityProvider::new());
        Ok(Self::with_components(config, store, clock, schedule, identity))
    }

    pub fn with_components(
        config: Config,
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        schedule: Arc<dyn AiringSchedule>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let notifications = NotificationService::new(store.clone());
        let engine = Arc::new(ToggleEngine::new(
            store.clone(),
            notifications.clone(),
            identity.clone(),
            clock.clone(),
        ));
        let feed = Arc::new(FeedService::new(
            store.clone(),
            engine.clone(),
            notifications.clone(),
            identity,
        ));
        let ledger = Arc::new(SpoilerLedger::new(store.clone(), clock.clone()));
        let chat = Arc::new(ChatService::new(
            store.clone(),
            clock.clone(),
            ledger,
            schedule,
            config.sync.chat_window,
        ));

        Self {
            config,
            clock,
            store,
            notifications,
            engine,
            feed,
            chat,
            notification_centers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The notification session for `user_id`, created on first use
    pub async fn notification_center(&self, user_id: &UserId) -> Arc<NotificationCenter> {
        let mut centers = self.notification_centers.lock().await;
        centers
            .entry(user_id.clone())
            .or_insert_with(|| {
                Arc::new(NotificationCenter::new(
                    self.store.clone(),
                    self.config.sync.notification_limit,
                ))
            })
            .clone()
    }

    /// End `user_id`'s notification session: the live query is released
    /// and the session is forgotten. False if there was none.
    pub async fn end_notification_session(&self, user_id: &UserId) -> bool {
        let center = self.notification_centers.lock().await.remove(user_id);
        match center {
            Some(center) => {
                center.shutdown().await;
                info!("Ended notification session for {}", user_id);
                true
            }
            None => false,
        }
    }

    pub async fn notification_session_count(&self) -> usize {
        self.notification_centers.lock().await.len()
    }

    /// Release every live notification subscription
    pub async fn shutdown(&self) {
        let centers: Vec<_> = self.notification_centers.lock().await.drain().collect();
        for (_, center) in &centers {
            center.shutdown().await;
        }
        info!("Closed {} notification sessions", centers.len());
    }
}
