// Remote Store Gateway - Port for the durable document store
// Any document store with atomic increments and push queries can back this
// trait; the sync core never depends on a concrete persistence engine.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::cmp::Ordering;
use tokio::sync::mpsc;

use crate::error::{AppError, AppResult};

/// Collection names used by the sync core
pub mod collections {
    use crate::core::strong_types::RoomId;

    pub const POSTS: &str = "posts";
    pub const LIKES: &str = "likes";
    pub const REPOSTS: &str = "reposts";
    pub const CHAT_ROOMS: &str = "chat_rooms";
    pub const SPOILER_VERIFICATIONS: &str = "spoiler_verifications";
    pub const NOTIFICATIONS: &str = "notifications";

    pub fn room_messages(room_id: &RoomId) -> String {
        format!("{}/{}/messages", CHAT_ROOMS, room_id)
    }

    pub fn room_participants(room_id: &RoomId) -> String {
        format!("{}/{}/participants", CHAT_ROOMS, room_id)
    }
}

/// A stored document: its id plus the JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Decode into a model; the document id is exposed as the `id` field
    pub fn decode<T: DeserializeOwned>(&self) -> AppResult<T> {
        let mut data = self.data.clone();
        if let Value::Object(map) = &mut data {
            map.insert("id".to_string(), Value::String(self.id.clone()));
        }
        serde_json::from_value(data).map_err(|e| {
            AppError::Serialization(format!("failed to decode document {}: {}", self.id, e))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Filtered, ordered, limited query over one collection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<(String, SortDirection)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, direction: SortDirection) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, data: &Value) -> bool {
        self.filters
            .iter()
            .all(|(field, expected)| data.get(field) == Some(expected))
    }

    /// Sort and truncate already-filtered documents. Ties on the sort field
    /// fall back to the document id so ordering is total.
    pub fn arrange(&self, mut docs: Vec<Document>) -> Vec<Document> {
        if let Some((field, direction)) = &self.order_by {
            docs.sort_by(|a, b| {
                let ordering = compare_values(a.data.get(field), b.data.get(field))
                    .then_with(|| compare_ids(&a.id, &b.id));
                match direction {
                    SortDirection::Ascending => ordering,
                    SortDirection::Descending => ordering.reverse(),
                }
            });
        }
        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }
        docs
    }
}

fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            match (a.as_i64(), b.as_i64()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => a
                    .as_f64()
                    .partial_cmp(&b.as_f64())
                    .unwrap_or(Ordering::Equal),
            }
        }
        (Some(Value::String(a)), Some(Value::String(b))) => {
            // RFC 3339 strings with different fractional precision do not
            // sort lexicographically.
            match (
                chrono::DateTime::parse_from_rfc3339(a),
                chrono::DateTime::parse_from_rfc3339(b),
            ) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                _ => a.cmp(b),
            }
        }
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

/// Result of a non-overwriting create
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(Document),
    /// Another writer got there first; carries their document
    AlreadyExists(Document),
}

impl CreateOutcome {
    pub fn document(&self) -> &Document {
        match self {
            CreateOutcome::Created(doc) | CreateOutcome::AlreadyExists(doc) => doc,
        }
    }

    pub fn into_document(self) -> Document {
        match self {
            CreateOutcome::Created(doc) | CreateOutcome::AlreadyExists(doc) => doc,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

/// Atomic read-modify-write step. Returns whether the document changed.
pub type DocumentMutator = Box<dyn FnOnce(&mut Value) -> AppResult<bool> + Send>;

/// Push-based stream of full query result sets.
///
/// The first item is the initial snapshot; each later item is the complete
/// result set after a change. Dropping the stream releases the channel.
#[derive(Debug)]
pub struct QuerySnapshots {
    rx: mpsc::Receiver<AppResult<Vec<Document>>>,
}

impl QuerySnapshots {
    pub fn new(rx: mpsc::Receiver<AppResult<Vec<Document>>>) -> Self {
        Self { rx }
    }

    /// Next snapshot, or `None` once the store closed the subscription
    pub async fn next(&mut self) -> Option<AppResult<Vec<Document>>> {
        self.rx.recv().await
    }
}

/// Document store consumed by the sync core.
///
/// `create` and `create_if_absent` stamp `createdAt` with the store's clock
/// when the body does not carry one.
#[async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug {
    /// Create with a store-assigned id
    async fn create(&self, collection: &str, data: Value) -> AppResult<Document>;

    /// Create under `id` unless a document already exists there
    async fn create_if_absent(
        &self,
        collection: &str,
        id: &str,
        data: Value,
    ) -> AppResult<CreateOutcome>;

    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<Document>>;

    /// Merge top-level fields into an existing document
    async fn update(&self, collection: &str, id: &str, fields: Value) -> AppResult<()>;

    /// Atomically transform an existing document
    async fn update_with(
        &self,
        collection: &str,
        id: &str,
        mutator: DocumentMutator,
    ) -> AppResult<Document>;

    /// Returns whether a document was removed
    async fn delete(&self, collection: &str, id: &str) -> AppResult<bool>;

    /// Atomic numeric increment; returns the new value
    async fn increment(&self, collection: &str, id: &str, field: &str, delta: i64)
        -> AppResult<i64>;

    async fn query(&self, collection: &str, query: &Query) -> AppResult<Vec<Document>>;

    /// Merge fields into many documents as one write; returns how many changed
    async fn batch_update(&self, collection: &str, updates: Vec<(String, Value)>)
        -> AppResult<usize>;

    async fn subscribe(&self, collection: &str, query: Query) -> AppResult<QuerySnapshots>;
}
