// Abstract document store consumed by the core, plus the change feed that
// backs live subscriptions.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::metrics;
use crate::models::DocumentModel;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A raw stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub collection: String,
    pub id: String,
    pub data: Value,
}

/// Query filter over a document's JSON fields. Field names may use dots to
/// reach into nested objects (`config.invitedUsers`).
#[derive(Debug, Clone)]
pub enum Filter {
    Eq(String, Value),
    ArrayContains(String, Value),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    pub fn contains(field: &str, value: impl Into<Value>) -> Self {
        Filter::ArrayContains(field.to_string(), value.into())
    }

    pub fn matches(&self, data: &Value) -> bool {
        match self {
            Filter::Eq(field, expected) => lookup(data, field) == Some(expected),
            Filter::ArrayContains(field, expected) => lookup(data, field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(expected)),
        }
    }
}

fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |v, key| v.get(key))
}

/// Shallow merge: top-level keys of `partial` replace those of `target`,
/// every other key is left untouched.
pub(crate) fn merge_fields(target: &mut Value, partial: Value) -> bool {
    match (target, partial) {
        (Value::Object(target), Value::Object(partial)) => {
            for (k, v) in partial {
                target.insert(k, v);
            }
            true
        }
        _ => false,
    }
}

/// Append `value` to the array at top-level `field` unless it is already
/// there. A missing or null field starts a new array.
pub(crate) fn add_to_array(
    collection: &str,
    id: &str,
    target: &mut Value,
    field: &str,
    value: Value,
) -> Result<(), StoreError> {
    let Value::Object(fields) = target else {
        return Err(StoreError::NotAnObject {
            collection: collection.to_string(),
            id: id.to_string(),
        });
    };
    let slot = fields.entry(field).or_insert(Value::Null);
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    let Value::Array(items) = slot else {
        return Err(StoreError::NotAnArray {
            collection: collection.to_string(),
            id: id.to_string(),
            field: field.to_string(),
        });
    };
    if !items.contains(&value) {
        items.push(value);
    }
    Ok(())
}

// ── Change feed ───────────────────────────────────────────────────────

/// Notification that a document was written or deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub collection: String,
    pub id: String,
}

/// Broadcast fan-out of write notifications to live subscribers.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, collection: &str, id: &str) {
        // No receivers is fine: nobody is watching.
        let _ = self.tx.send(ChangeEvent {
            collection: collection.to_string(),
            id: id.to_string(),
        });
    }

    pub fn subscribe(&self, collection: &str) -> Subscription {
        metrics::ACTIVE_SUBSCRIPTIONS.inc();
        Subscription {
            collection: collection.to_string(),
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Live stream of changes to one collection. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    collection: String,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Wait for the next change to the watched collection. Returns `None`
    /// once the store is gone.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.collection == self.collection => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Missed events still mean the snapshot changed.
                    tracing::warn!("Subscription to {} lagged by {n} events", self.collection);
                    return Some(ChangeEvent {
                        collection: self.collection.clone(),
                        id: String::new(),
                    });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        metrics::ACTIVE_SUBSCRIPTIONS.dec();
    }
}

// ── Store contract ────────────────────────────────────────────────────

/// Minimal persistent document store. Implementations must be shareable
/// across request handlers.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every document in a collection, ordered by id.
    async fn get_collection(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError>;

    /// Insert under a freshly generated id and return it.
    async fn add_document(&self, collection: &str, data: Value) -> Result<String, StoreError>;

    /// Create or replace the document at a known id.
    async fn set_document(&self, collection: &str, id: &str, data: Value)
        -> Result<(), StoreError>;

    /// Merge top-level fields into an existing document. Returns false when
    /// the document does not exist.
    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        partial: Value,
    ) -> Result<bool, StoreError>;

    /// Atomically add `value` to the array at top-level `field`, leaving it
    /// alone when already present. Concurrent calls never lose each
    /// other's values. Returns false when the document does not exist.
    async fn add_to_set(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<bool, StoreError>;

    async fn delete_document(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    async fn run_query(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Vec<Document>, StoreError> {
        let docs = self.get_collection(collection).await?;
        Ok(docs
            .into_iter()
            .filter(|d| filters.iter().all(|f| f.matches(&d.data)))
            .collect())
    }

    fn subscribe(&self, collection: &str) -> Subscription;
}

/// Generate a document id.
pub(crate) fn new_document_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

// ── Typed helpers ─────────────────────────────────────────────────────

pub async fn fetch<T: DocumentModel>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
) -> Result<Option<T>, StoreError> {
    match store.get_document(collection, id).await? {
        Some(doc) => Ok(Some(T::from_document(&doc)?)),
        None => Ok(None),
    }
}

pub async fn fetch_all<T: DocumentModel>(
    store: &dyn DocumentStore,
    collection: &str,
) -> Result<Vec<T>, StoreError> {
    store
        .get_collection(collection)
        .await?
        .iter()
        .map(T::from_document)
        .collect()
}

pub async fn query<T: DocumentModel>(
    store: &dyn DocumentStore,
    collection: &str,
    filters: &[Filter],
) -> Result<Vec<T>, StoreError> {
    store
        .run_query(collection, filters)
        .await?
        .iter()
        .map(T::from_document)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_eq_nested() {
        let data = json!({ "status": "pending", "config": { "pilotCount": 4 } });
        assert!(Filter::eq("status", "pending").matches(&data));
        assert!(Filter::eq("config.pilotCount", 4).matches(&data));
        assert!(!Filter::eq("status", "accepted").matches(&data));
        assert!(!Filter::eq("missing", "x").matches(&data));
    }

    #[test]
    fn test_filter_array_contains() {
        let data = json!({ "participants": ["a", "b"] });
        assert!(Filter::contains("participants", "a").matches(&data));
        assert!(!Filter::contains("participants", "c").matches(&data));
        assert!(!Filter::contains("missing", "a").matches(&data));
    }

    #[test]
    fn test_merge_fields_is_shallow() {
        let mut doc = json!({ "a": 1, "b": { "x": 1, "y": 2 } });
        assert!(merge_fields(&mut doc, json!({ "b": { "x": 9 }, "c": 3 })));
        assert_eq!(doc, json!({ "a": 1, "b": { "x": 9 }, "c": 3 }));
        assert!(!merge_fields(&mut doc, json!([1])));
    }

    #[tokio::test]
    async fn test_subscription_filters_by_collection() {
        let feed = ChangeFeed::default();
        let mut sub = feed.subscribe("tournaments");
        feed.publish("users", "u1");
        feed.publish("tournaments", "t1");
        let event = sub.next().await.unwrap();
        assert_eq!(event.id, "t1");
        assert_eq!(sub.collection(), "tournaments");
    }
}
