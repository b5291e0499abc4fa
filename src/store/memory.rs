// In-memory document store, used by tests and `--memory` mode.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{add_to_array, merge_fields, new_document_id, ChangeFeed, Document, DocumentStore, Subscription};
use crate::error::StoreError;
use crate::metrics;

type Collections = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<Collections>,
    failing: Mutex<HashSet<String>>,
    feed: ChangeFeed,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write to `collection` fail until [`Self::restore_writes`].
    pub fn fail_writes_on(&self, collection: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(collection.to_string());
        }
    }

    pub fn restore_writes(&self, collection: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(collection);
        }
    }

    fn check_writable(&self, collection: &str) -> Result<(), StoreError> {
        let failing = self.failing.lock().map_err(|_| StoreError::Poisoned)?;
        if failing.contains(collection) {
            return Err(StoreError::Unavailable(format!(
                "writes to {collection} are failing"
            )));
        }
        Ok(())
    }

    fn written(&self, op: &str, collection: &str, id: &str) {
        metrics::DOCUMENT_WRITES_TOTAL.with_label_values(&[op]).inc();
        self.feed.publish(collection, id);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_collection(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let docs = self.docs.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(docs
            .get(collection)
            .map(|c| {
                c.iter()
                    .map(|(id, data)| Document {
                        collection: collection.to_string(),
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let docs = self.docs.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(docs
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|data| Document {
                collection: collection.to_string(),
                id: id.to_string(),
                data: data.clone(),
            }))
    }

    async fn add_document(&self, collection: &str, data: Value) -> Result<String, StoreError> {
        self.check_writable(collection)?;
        let id = new_document_id();
        {
            let mut docs = self.docs.lock().map_err(|_| StoreError::Poisoned)?;
            docs.entry(collection.to_string())
                .or_default()
                .insert(id.clone(), data);
        }
        self.written("add", collection, &id);
        Ok(id)
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        data: Value,
    ) -> Result<(), StoreError> {
        self.check_writable(collection)?;
        {
            let mut docs = self.docs.lock().map_err(|_| StoreError::Poisoned)?;
            docs.entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), data);
        }
        self.written("set", collection, id);
        Ok(())
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        partial: Value,
    ) -> Result<bool, StoreError> {
        self.check_writable(collection)?;
        {
            let mut docs = self.docs.lock().map_err(|_| StoreError::Poisoned)?;
            let Some(existing) = docs.get_mut(collection).and_then(|c| c.get_mut(id)) else {
                return Ok(false);
            };
            if !merge_fields(existing, partial) {
                return Err(StoreError::NotAnObject {
                    collection: collection.to_string(),
                    id: id.to_string(),
                });
            }
        }
        self.written("update", collection, id);
        Ok(true)
    }

    async fn add_to_set(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<bool, StoreError> {
        self.check_writable(collection)?;
        {
            let mut docs = self.docs.lock().map_err(|_| StoreError::Poisoned)?;
            let Some(existing) = docs.get_mut(collection).and_then(|c| c.get_mut(id)) else {
                return Ok(false);
            };
            add_to_array(collection, id, existing, field, value)?;
        }
        self.written("update", collection, id);
        Ok(true)
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        self.check_writable(collection)?;
        let removed = {
            let mut docs = self.docs.lock().map_err(|_| StoreError::Poisoned)?;
            docs.get_mut(collection)
                .and_then(|c| c.remove(id))
                .is_some()
        };
        if removed {
            self.written("delete", collection, id);
        }
        Ok(removed)
    }

    fn subscribe(&self, collection: &str) -> Subscription {
        self.feed.subscribe(collection)
    }
}
