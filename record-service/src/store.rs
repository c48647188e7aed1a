//! RecordStore - authoritative in-memory record containers
//!
//! Every successful write mints a fresh opaque version token. A write that
//! carries a precondition token is applied only when the token matches the
//! record's current one.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::Utc;
use shared_types::{FieldChanges, Record, RecordId, VersionToken};
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error, Clone)]
pub enum StoreError {
    #[error("record {record_id} not found in container {container_id}")]
    NotFound {
        container_id: String,
        record_id: RecordId,
    },

    #[error("version mismatch for record {}: expected {expected}, current {}", .current.id, .current.version)]
    PreconditionFailed {
        expected: VersionToken,
        current: Box<Record>,
    },

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("seed error: {0}")]
    Seed(String),
}

#[derive(Debug, Default)]
struct Container {
    next_id: i64,
    records: BTreeMap<RecordId, Record>,
}

impl Container {
    fn insert(&mut self, fields: FieldChanges) -> Record {
        self.next_id += 1;
        let record = Record {
            id: RecordId(self.next_id),
            version: VersionToken::mint(),
            fields,
            updated_at: Some(Utc::now()),
        };
        self.records.insert(record.id, record.clone());
        record
    }
}

#[derive(Debug, Default)]
pub struct RecordStore {
    containers: RwLock<HashMap<String, Container>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records of a container ordered by id. Unknown containers are empty.
    pub async fn list(&self, container_id: &str) -> Vec<Record> {
        let containers = self.containers.read().await;
        containers
            .get(container_id)
            .map(|c| c.records.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn get(&self, container_id: &str, record_id: RecordId) -> Result<Record, StoreError> {
        let containers = self.containers.read().await;
        containers
            .get(container_id)
            .and_then(|c| c.records.get(&record_id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                container_id: container_id.to_string(),
                record_id,
            })
    }

    pub async fn create(&self, container_id: &str, fields: FieldChanges) -> Record {
        let mut containers = self.containers.write().await;
        containers
            .entry(container_id.to_string())
            .or_default()
            .insert(fields)
    }

    /// Apply a partial update.
    ///
    /// With `precondition` set, the write only lands when it equals the
    /// record's current token. Without it the write is unconditional.
    pub async fn patch(
        &self,
        container_id: &str,
        record_id: RecordId,
        changes: FieldChanges,
        precondition: Option<&VersionToken>,
    ) -> Result<Record, StoreError> {
        if changes.is_empty() {
            return Err(StoreError::Invalid("patch carries no fields".to_string()));
        }

        let mut containers = self.containers.write().await;
        let record = containers
            .get_mut(container_id)
            .and_then(|c| c.records.get_mut(&record_id))
            .ok_or_else(|| StoreError::NotFound {
                container_id: container_id.to_string(),
                record_id,
            })?;

        if let Some(expected) = precondition {
            if *expected != record.version {
                return Err(StoreError::PreconditionFailed {
                    expected: expected.clone(),
                    current: Box::new(record.clone()),
                });
            }
        }

        record.apply(&changes);
        record.version = VersionToken::mint();
        record.updated_at = Some(Utc::now());
        Ok(record.clone())
    }

    pub async fn delete(&self, container_id: &str, record_id: RecordId) -> Result<(), StoreError> {
        let mut containers = self.containers.write().await;
        containers
            .get_mut(container_id)
            .and_then(|c| c.records.remove(&record_id))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                container_id: container_id.to_string(),
                record_id,
            })
    }

    /// Insert a batch of records into a container, returning them in order.
    pub async fn seed(&self, container_id: &str, rows: Vec<FieldChanges>) -> Vec<Record> {
        let mut containers = self.containers.write().await;
        let container = containers.entry(container_id.to_string()).or_default();
        rows.into_iter().map(|fields| container.insert(fields)).collect()
    }

    /// Load a JSON seed file shaped `{ "<container>": [ { field: value } ] }`.
    pub async fn seed_from_file(&self, path: &Path) -> Result<usize, StoreError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::Seed(format!("failed to read {}: {e}", path.display())))?;
        let parsed: HashMap<String, Vec<FieldChanges>> = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Seed(format!("invalid seed json: {e}")))?;

        let mut total = 0;
        for (container_id, rows) in parsed {
            total += self.seed(&container_id, rows).await.len();
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::FieldValue;

    fn quantity(value: f64) -> FieldChanges {
        let mut fields = FieldChanges::new();
        fields.insert("quantity".to_string(), FieldValue::Number(value));
        fields
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_ids_per_container() {
        let store = RecordStore::new();
        let a = store.create("orders", quantity(1.0)).await;
        let b = store.create("orders", quantity(2.0)).await;
        let other = store.create("invoices", quantity(3.0)).await;

        assert_eq!(a.id, RecordId(1));
        assert_eq!(b.id, RecordId(2));
        assert_eq!(other.id, RecordId(1));
        assert_eq!(store.list("orders").await.len(), 2);
        assert!(store.list("missing").await.is_empty());
    }

    #[tokio::test]
    async fn test_patch_with_matching_precondition_mints_new_version() {
        let store = RecordStore::new();
        let created = store.create("orders", quantity(1.0)).await;

        let updated = store
            .patch("orders", created.id, quantity(5.0), Some(&created.version))
            .await
            .unwrap();

        assert_ne!(updated.version, created.version);
        assert_eq!(updated.field("quantity"), Some(&FieldValue::Number(5.0)));
    }

    #[tokio::test]
    async fn test_patch_with_stale_precondition_is_rejected() {
        let store = RecordStore::new();
        let created = store.create("orders", quantity(1.0)).await;
        let first = store
            .patch("orders", created.id, quantity(2.0), Some(&created.version))
            .await
            .unwrap();

        let err = store
            .patch("orders", created.id, quantity(9.0), Some(&created.version))
            .await
            .unwrap_err();

        match err {
            StoreError::PreconditionFailed { expected, current } => {
                assert_eq!(expected, created.version);
                assert_eq!(current.version, first.version);
                assert_eq!(current.field("quantity"), Some(&FieldValue::Number(2.0)));
            }
            other => panic!("expected precondition failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_patch_without_precondition_always_applies() {
        let store = RecordStore::new();
        let created = store.create("orders", quantity(1.0)).await;
        store
            .patch("orders", created.id, quantity(2.0), None)
            .await
            .unwrap();
        let forced = store
            .patch("orders", created.id, quantity(9.0), None)
            .await
            .unwrap();
        assert_eq!(forced.field("quantity"), Some(&FieldValue::Number(9.0)));
    }

    #[tokio::test]
    async fn test_empty_patch_is_invalid() {
        let store = RecordStore::new();
        let created = store.create("orders", quantity(1.0)).await;
        let err = store
            .patch("orders", created.id, FieldChanges::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let store = RecordStore::new();
        let created = store.create("orders", quantity(1.0)).await;
        store.delete("orders", created.id).await.unwrap();
        assert!(matches!(
            store.get("orders", created.id).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(store.delete("orders", created.id).await.is_err());
    }

    #[tokio::test]
    async fn test_seed_from_file() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("seed.json");
        std::fs::write(
            &path,
            r#"{"orders": [{"quantity": 1, "article": "bolt"}, {"quantity": 4}]}"#,
        )
        .expect("failed to write seed");

        let store = RecordStore::new();
        let total = store.seed_from_file(&path).await.unwrap();
        assert_eq!(total, 2);

        let records = store.list("orders").await;
        assert_eq!(records[0].field("article"), Some(&FieldValue::from("bolt")));
        assert_eq!(records[1].field("quantity"), Some(&FieldValue::Number(4.0)));
    }
}
