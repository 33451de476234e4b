// Core infrastructure modules
pub mod store;                 // Document store port
pub mod memory_store;          // In-process store adapter
pub mod id_generator;          // Store-assigned document ids
pub mod cache;                 // TTL response cache
pub mod airing_schedule;       // Anime data source port
pub mod identity;              // Identity provider port
pub mod viewer;                // Viewer context
pub mod middleware;            // Viewer middleware and extractor

// Re-export infrastructure components
pub use airing_schedule::{AiringSchedule, CachedAiringSchedule, StaticAiringSchedule};
pub use cache::TtlCache;
pub use id_generator::IdGenerator;
pub use identity::{IdentityProvider, StaticIdentityProvider};
pub use memory_store::InMemoryDocumentStore;
pub use store::{collections, CreateOutcome, Document, DocumentStore, Query, SortDirection};
pub use viewer::ViewerContext;
