// In-Memory Document Store - DocumentStore adapter for tests and the demo host
// Collections live in process memory; every committed write is broadcast so
// open query subscriptions can re-run and push a fresh snapshot.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tracing::{debug, warn};

use crate::core::clock::{Clock, SystemClock};
use crate::error::{AppError, AppResult};
use crate::infrastructure::id_generator::IdGenerator;
use crate::infrastructure::store::{
    CreateOutcome, Document, DocumentMutator, DocumentStore, Query, QuerySnapshots,
};

const CHANGE_FEED_CAPACITY: usize = 256;
const SNAPSHOT_BUFFER: usize = 16;

type Collection = BTreeMap<String, Value>;

#[derive(Debug)]
struct StoreInner {
    collections: RwLock<HashMap<String, Collection>>,
    changes: broadcast::Sender<String>,
    denied: Mutex<HashSet<String>>,
}

impl StoreInner {
    fn check_access(&self, collection: &str) -> AppResult<()> {
        let denied = self.denied.lock().unwrap_or_else(|e| e.into_inner());
        if denied.contains(collection) {
            return Err(AppError::PermissionDenied(format!(
                "missing or insufficient permissions for {}",
                collection
            )));
        }
        Ok(())
    }

    async fn run_query(&self, collection: &str, query: &Query) -> Vec<Document> {
        let collections = self.collections.read().await;
        let docs = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, data)| query.matches(data))
                    .map(|(id, data)| Document::new(id.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default();
        query.arrange(docs)
    }

    fn publish(&self, collection: &str) {
        // No receivers is fine: nobody is subscribed yet
        let _ = self.changes.send(collection.to_string());
    }
}

/// Failure and latency controls used to exercise rollback paths
#[derive(Debug, Default)]
struct FaultPlan {
    offline: bool,
    queued_failures: VecDeque<AppError>,
    /// One-shot failures for writes whose description contains the pattern
    targeted_failures: Vec<(String, AppError)>,
}

/// Which writes the gate parks: `None` lets everything through, an empty
/// pattern parks every write.
type WriteGate = Option<String>;

/// Process-local document store.
#[derive(Debug, Clone)]
pub struct InMemoryDocumentStore {
    inner: Arc<StoreInner>,
    ids: Arc<IdGenerator>,
    clock: Arc<dyn Clock>,
    faults: Arc<Mutex<FaultPlan>>,
    write_gate: Arc<watch::Sender<WriteGate>>,
    write_log: Arc<Mutex<Vec<String>>>,
    query_count: Arc<AtomicU64>,
    subscribe_count: Arc<AtomicU64>,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryDocumentStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        let (write_gate, _) = watch::channel(None);
        Self {
            inner: Arc::new(StoreInner {
                collections: RwLock::new(HashMap::new()),
                changes,
                denied: Mutex::new(HashSet::new()),
            }),
            ids: Arc::new(IdGenerator::new(0)),
            clock,
            faults: Arc::new(Mutex::new(FaultPlan::default())),
            write_gate: Arc::new(write_gate),
            write_log: Arc::new(Mutex::new(Vec::new())),
            query_count: Arc::new(AtomicU64::new(0)),
            subscribe_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// =========================================================================
    /// FAULT INJECTION
    /// =========================================================================

    /// While offline every write fails with `Unavailable`
    pub fn set_offline(&self, offline: bool) {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).offline = offline;
    }

    /// Fail the next write with `error`; queued failures are consumed in order
    pub fn fail_next_write(&self, error: AppError) {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .queued_failures
            .push_back(error);
    }

    /// Fail the next write whose description (for example
    /// `increment chat_rooms/r1 messageCount`) contains `pattern`
    pub fn fail_write_matching(&self, pattern: &str, error: AppError) {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .targeted_failures
            .push((pattern.to_string(), error));
    }

    /// Reads and subscriptions on `collection` fail with `PermissionDenied`
    pub fn deny_collection(&self, collection: &str) {
        self.inner
            .denied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(collection.to_string());
    }

    pub fn allow_collection(&self, collection: &str) {
        self.inner
            .denied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(collection);
    }

    /// Park every write until `release_writes` is called
    pub fn hold_writes(&self) {
        self.write_gate.send_replace(Some(String::new()));
    }

    /// Park only writes whose description contains `pattern`
    pub fn hold_writes_matching(&self, pattern: &str) {
        self.write_gate.send_replace(Some(pattern.to_string()));
    }

    pub fn release_writes(&self) {
        self.write_gate.send_replace(None);
    }

    /// =========================================================================
    /// INTROSPECTION
    /// =========================================================================

    /// Committed writes, in commit order
    pub fn write_log(&self) -> Vec<String> {
        self.write_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of explicit `query` calls (subscription pushes are not counted)
    pub fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::SeqCst)
    }

    pub fn subscribe_count(&self) -> u64 {
        self.subscribe_count.load(Ordering::SeqCst)
    }

    /// Number of live subscription feeders
    pub fn active_subscriptions(&self) -> usize {
        self.inner.changes.receiver_count()
    }

    /// =========================================================================
    /// INTERNALS
    /// =========================================================================

    async fn begin_write(&self, description: &str) -> AppResult<()> {
        let mut gate = self.write_gate.subscribe();
        let parked = |held: &WriteGate| {
            matches!(held, Some(pattern) if description.contains(pattern.as_str()))
        };
        if gate.wait_for(|held| !parked(held)).await.is_err() {
            return Err(AppError::Internal("write gate closed".to_string()));
        }

        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(index) = faults
            .targeted_failures
            .iter()
            .position(|(pattern, _)| description.contains(pattern.as_str()))
        {
            let (_, error) = faults.targeted_failures.remove(index);
            warn!("Injected failure for write `{}`: {}", description, error);
            return Err(error);
        }
        if let Some(error) = faults.queued_failures.pop_front() {
            warn!("Injected failure for write `{}`: {}", description, error);
            return Err(error);
        }
        if faults.offline {
            return Err(AppError::Unavailable(format!(
                "store offline, write `{}` rejected",
                description
            )));
        }
        Ok(())
    }

    fn record_write(&self, description: String) {
        debug!("store write: {}", description);
        self.write_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(description);
    }

    fn stamp_created_at(&self, mut data: Value) -> AppResult<Value> {
        let map = as_object_mut(&mut data)?;
        if !map.contains_key("createdAt") {
            map.insert(
                "createdAt".to_string(),
                serde_json::to_value(self.clock.now())?,
            );
        }
        Ok(data)
    }
}

fn as_object_mut(data: &mut Value) -> AppResult<&mut Map<String, Value>> {
    data.as_object_mut()
        .ok_or_else(|| AppError::Validation("documents must be JSON objects".to_string()))
}

fn merge_fields(target: &mut Value, fields: &Value) -> AppResult<()> {
    let patch = fields
        .as_object()
        .ok_or_else(|| AppError::Validation("update fields must be a JSON object".to_string()))?;
    let target = as_object_mut(target)?;
    for (key, value) in patch {
        target.insert(key.clone(), value.clone());
    }
    Ok(())
}

fn not_found(collection: &str, id: &str) -> AppError {
    AppError::NotFound(format!("{}/{}", collection, id))
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create(&self, collection: &str, data: Value) -> AppResult<Document> {
        self.begin_write(&format!("create {}", collection)).await?;
        let data = self.stamp_created_at(data)?;
        let id = self.ids.next_string_id();
        {
            let mut collections = self.inner.collections.write().await;
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.clone(), data.clone());
        }
        self.record_write(format!("create {}/{}", collection, id));
        self.inner.publish(collection);
        Ok(Document::new(id, data))
    }

    async fn create_if_absent(
        &self,
        collection: &str,
        id: &str,
        data: Value,
    ) -> AppResult<CreateOutcome> {
        self.begin_write(&format!("create {}/{}", collection, id)).await?;
        let data = self.stamp_created_at(data)?;
        {
            let mut collections = self.inner.collections.write().await;
            let docs = collections.entry(collection.to_string()).or_default();
            if let Some(existing) = docs.get(id) {
                return Ok(CreateOutcome::AlreadyExists(Document::new(
                    id,
                    existing.clone(),
                )));
            }
            docs.insert(id.to_string(), data.clone());
        }
        self.record_write(format!("create {}/{}", collection, id));
        self.inner.publish(collection);
        Ok(CreateOutcome::Created(Document::new(id, data)))
    }

    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<Document>> {
        self.inner.check_access(collection)?;
        let collections = self.inner.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| Document::new(id, data.clone())))
    }

    async fn update(&self, collection: &str, id: &str, fields: Value) -> AppResult<()> {
        self.begin_write(&format!("update {}/{}", collection, id)).await?;
        {
            let mut collections = self.inner.collections.write().await;
            let doc = collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| not_found(collection, id))?;
            merge_fields(doc, &fields)?;
        }
        self.record_write(format!("update {}/{}", collection, id));
        self.inner.publish(collection);
        Ok(())
    }

    async fn update_with(
        &self,
        collection: &str,
        id: &str,
        mutator: DocumentMutator,
    ) -> AppResult<Document> {
        self.begin_write(&format!("transform {}/{}", collection, id)).await?;
        let (changed, data) = {
            let mut collections = self.inner.collections.write().await;
            let doc = collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| not_found(collection, id))?;
            // Mutate a copy so a failing mutator leaves the document untouched
            let mut working = doc.clone();
            let changed = mutator(&mut working)?;
            if changed {
                *doc = working.clone();
            }
            (changed, working)
        };
        if changed {
            self.record_write(format!("transform {}/{}", collection, id));
            self.inner.publish(collection);
        }
        Ok(Document::new(id, data))
    }

    async fn delete(&self, collection: &str, id: &str) -> AppResult<bool> {
        self.begin_write(&format!("delete {}/{}", collection, id)).await?;
        let removed = {
            let mut collections = self.inner.collections.write().await;
            collections
                .get_mut(collection)
                .and_then(|docs| docs.remove(id))
                .is_some()
        };
        if removed {
            self.record_write(format!("delete {}/{}", collection, id));
            self.inner.publish(collection);
        }
        Ok(removed)
    }

    async fn increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> AppResult<i64> {
        self.begin_write(&format!("increment {}/{} {}", collection, id, field))
            .await?;
        let value = {
            let mut collections = self.inner.collections.write().await;
            let doc = collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| not_found(collection, id))?;
            let map = as_object_mut(doc)?;
            let current = map.get(field).and_then(Value::as_i64).unwrap_or(0);
            let mut next = current.saturating_add(delta);
            if next < 0 {
                warn!(
                    "Counter {}/{}.{} would go negative ({}), flooring at zero",
                    collection, id, field, next
                );
                next = 0;
            }
            map.insert(field.to_string(), Value::from(next));
            next
        };
        self.record_write(format!(
            "increment {}/{} {} {:+}",
            collection, id, field, delta
        ));
        self.inner.publish(collection);
        Ok(value)
    }

    async fn query(&self, collection: &str, query: &Query) -> AppResult<Vec<Document>> {
        self.query_count.fetch_add(1, Ordering::SeqCst);
        self.inner.check_access(collection)?;
        Ok(self.inner.run_query(collection, query).await)
    }

    async fn batch_update(
        &self,
        collection: &str,
        updates: Vec<(String, Value)>,
    ) -> AppResult<usize> {
        self.begin_write(&format!("batch {} x{}", collection, updates.len()))
            .await?;
        let changed = {
            let mut collections = self.inner.collections.write().await;
            let docs = collections.entry(collection.to_string()).or_default();
            // Validate first so the batch applies all-or-nothing
            for (id, fields) in &updates {
                if !docs.contains_key(id) {
                    return Err(not_found(collection, id));
                }
                if !fields.is_object() {
                    return Err(AppError::Validation(
                        "update fields must be a JSON object".to_string(),
                    ));
                }
            }
            let mut changed = 0;
            for (id, fields) in &updates {
                if let Some(doc) = docs.get_mut(id) {
                    merge_fields(doc, fields)?;
                    changed += 1;
                }
            }
            changed
        };
        if changed > 0 {
            self.record_write(format!("batch {} x{}", collection, changed));
            self.inner.publish(collection);
        }
        Ok(changed)
    }

    async fn subscribe(&self, collection: &str, query: Query) -> AppResult<QuerySnapshots> {
        self.subscribe_count.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let mut changes = self.inner.changes.subscribe();
        let inner = Arc::clone(&self.inner);
        let collection = collection.to_string();

        tokio::spawn(async move {
            if let Err(error) = inner.check_access(&collection) {
                let _ = tx.send(Err(error)).await;
                return;
            }

            let initial = inner.run_query(&collection, &query).await;
            if tx.send(Ok(initial)).await.is_err() {
                return;
            }

            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    change = changes.recv() => {
                        let rerun = match change {
                            Ok(changed) => changed == collection,
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                debug!("subscription on {} lagged by {}", collection, skipped);
                                true
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        };
                        if !rerun {
                            continue;
                        }
                        let snapshot = match inner.check_access(&collection) {
                            Ok(()) => Ok(inner.run_query(&collection, &query).await),
                            Err(error) => Err(error),
                        };
                        if tx.send(snapshot).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("subscription feeder for {} stopped", collection);
        });

        Ok(QuerySnapshots::new(rx))
    }
}
