// SQLite-backed document store (sqlx). Documents are kept as JSON text in a
// single table keyed by (collection, id).

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use super::{add_to_array, merge_fields, new_document_id, ChangeFeed, Document, DocumentStore, Subscription};
use crate::error::StoreError;
use crate::metrics;

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    id: String,
    data: String,
}

pub struct SqliteStore {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        // Every connection to `:memory:` opens its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = Self {
            pool,
            feed: ChangeFeed::default(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (collection, id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn to_document(collection: &str, row: DocumentRow) -> Result<Document, StoreError> {
        Ok(Document {
            collection: collection.to_string(),
            id: row.id,
            data: serde_json::from_str(&row.data)?,
        })
    }

    /// Read-modify-write of one document in a single transaction. The row
    /// is touched before it is read, so the write lock is already held and
    /// concurrent modifications queue behind each other instead of
    /// overwriting one another.
    async fn modify(
        &self,
        collection: &str,
        id: &str,
        apply: impl FnOnce(&mut Value) -> Result<(), StoreError> + Send,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query(
            "UPDATE documents SET updated_at = datetime('now') WHERE collection = ? AND id = ?",
        )
        .bind(collection)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if touched.rows_affected() == 0 {
            return Ok(false);
        }

        let existing: String =
            sqlx::query_scalar("SELECT data FROM documents WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        let mut data: Value = serde_json::from_str(&existing)?;
        apply(&mut data)?;

        sqlx::query("UPDATE documents SET data = ? WHERE collection = ? AND id = ?")
            .bind(serde_json::to_string(&data)?)
            .bind(collection)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.written("update", collection, id);
        Ok(true)
    }

    fn written(&self, op: &str, collection: &str, id: &str) {
        metrics::DOCUMENT_WRITES_TOTAL.with_label_values(&[op]).inc();
        self.feed.publish(collection, id);
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get_collection(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, data FROM documents WHERE collection = ? ORDER BY id",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| Self::to_document(collection, row))
            .collect()
    }

    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, data FROM documents WHERE collection = ? AND id = ?",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| Self::to_document(collection, row)).transpose()
    }

    async fn add_document(&self, collection: &str, data: Value) -> Result<String, StoreError> {
        let id = new_document_id();
        sqlx::query("INSERT INTO documents (collection, id, data) VALUES (?, ?, ?)")
            .bind(collection)
            .bind(&id)
            .bind(serde_json::to_string(&data)?)
            .execute(&self.pool)
            .await?;
        self.written("add", collection, &id);
        Ok(id)
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        data: Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO documents (collection, id, data) VALUES (?, ?, ?)
             ON CONFLICT (collection, id) DO UPDATE SET data = excluded.data, updated_at = datetime('now')",
        )
        .bind(collection)
        .bind(id)
        .bind(serde_json::to_string(&data)?)
        .execute(&self.pool)
        .await?;
        self.written("set", collection, id);
        Ok(())
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        partial: Value,
    ) -> Result<bool, StoreError> {
        self.modify(collection, id, |data| {
            if merge_fields(data, partial) {
                Ok(())
            } else {
                Err(StoreError::NotAnObject {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })
            }
        })
        .await
    }

    async fn add_to_set(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<bool, StoreError> {
        self.modify(collection, id, |data| {
            add_to_array(collection, id, data, field, value)
        })
        .await
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;
        let removed = result.rows_affected() > 0;
        if removed {
            self.written("delete", collection, id);
        }
        Ok(removed)
    }

    fn subscribe(&self, collection: &str) -> Subscription {
        self.feed.subscribe(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Filter;
    use serde_json::json;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let store = test_store().await;

        let id = store
            .add_document("tracks", json!({ "name": "Monza" }))
            .await
            .unwrap();
        let doc = store.get_document("tracks", &id).await.unwrap().unwrap();
        assert_eq!(doc.id, id);
        assert_eq!(doc.collection, "tracks");
        assert_eq!(doc.data["name"], "Monza");

        let missing = store.get_document("tracks", "nope").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_set_document_upserts() {
        let store = test_store().await;

        store
            .set_document("results", "race_1", json!({ "raceId": 1, "standings": [] }))
            .await
            .unwrap();
        store
            .set_document("results", "race_1", json!({ "raceId": 1, "standings": [1] }))
            .await
            .unwrap();

        let all = store.get_collection("results").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].data["standings"], json!([1]));
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = test_store().await;

        let id = store
            .add_document("users", json!({ "nickname": "JJ", "team": "Redline" }))
            .await
            .unwrap();
        assert!(store
            .update_document("users", &id, json!({ "team": "Blue" }))
            .await
            .unwrap());
        let doc = store.get_document("users", &id).await.unwrap().unwrap();
        assert_eq!(doc.data, json!({ "nickname": "JJ", "team": "Blue" }));

        assert!(!store
            .update_document("users", "missing", json!({ "team": "X" }))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_add_to_set() {
        let store = test_store().await;
        store
            .set_document("tournaments", "t1", json!({ "name": "Cup" }))
            .await
            .unwrap();

        for user in ["a", "b", "a"] {
            assert!(store
                .add_to_set("tournaments", "t1", "participants", json!(user))
                .await
                .unwrap());
        }
        let doc = store.get_document("tournaments", "t1").await.unwrap().unwrap();
        assert_eq!(doc.data["participants"], json!(["a", "b"]));
        assert_eq!(doc.data["name"], "Cup");

        assert!(!store
            .add_to_set("tournaments", "missing", "participants", json!("a"))
            .await
            .unwrap());
        assert!(matches!(
            store
                .add_to_set("tournaments", "t1", "name", json!("a"))
                .await,
            Err(StoreError::NotAnArray { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_add_to_set_keeps_every_value() {
        let dir = std::env::temp_dir().join(format!("paddock-{}.db", new_document_id()));
        let url = format!("sqlite:{}?mode=rwc", dir.display());
        let store = std::sync::Arc::new(SqliteStore::new(&url).await.unwrap());
        store
            .set_document("tournaments", "t1", json!({ "participants": [] }))
            .await
            .unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .add_to_set("tournaments", "t1", "participants", json!(format!("u{i}")))
                        .await
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().unwrap());
        }

        let doc = store.get_document("tournaments", "t1").await.unwrap().unwrap();
        assert_eq!(doc.data["participants"].as_array().unwrap().len(), 8);
        drop(store);
        let _ = std::fs::remove_file(&dir);
    }

    #[tokio::test]
    async fn test_delete_document() {
        let store = test_store().await;

        let id = store.add_document("cars", json!({})).await.unwrap();
        assert!(store.delete_document("cars", &id).await.unwrap());
        assert!(!store.delete_document("cars", &id).await.unwrap());
        assert!(store.get_collection("cars").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_query_filters() {
        let store = test_store().await;

        store
            .add_document("tournaments", json!({ "createdBy": "a", "participants": [] }))
            .await
            .unwrap();
        store
            .add_document("tournaments", json!({ "createdBy": "b", "participants": ["a"] }))
            .await
            .unwrap();
        store
            .add_document("tournaments", json!({ "createdBy": "c", "participants": ["b"] }))
            .await
            .unwrap();

        let owned = store
            .run_query("tournaments", &[Filter::eq("createdBy", "a")])
            .await
            .unwrap();
        assert_eq!(owned.len(), 1);

        let joined = store
            .run_query("tournaments", &[Filter::contains("participants", "a")])
            .await
            .unwrap();
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].data["createdBy"], "b");
    }
}
