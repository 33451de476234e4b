// Sync services - optimistic toggles, episode chat and notifications

pub mod chat_service;
pub mod feed_service;
pub mod notification_center;
pub mod notification_service;
pub mod optimistic;
pub mod spoiler_ledger;
pub mod subscriptions;
pub mod toggle_engine;

pub use chat_service::ChatService;
pub use feed_service::{extract_mentions, FeedItem, FeedService};
pub use notification_center::NotificationCenter;
pub use notification_service::NotificationService;
pub use optimistic::{settle, OptimisticOutcome, RevertPolicy};
pub use spoiler_ledger::SpoilerLedger;
pub use subscriptions::{SubscriptionHandle, SubscriptionRegistry};
pub use toggle_engine::{PostEngagement, ToggleEngine, ToggleOutcome};
