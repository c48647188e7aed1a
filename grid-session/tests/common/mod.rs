//! Shared fixtures for grid-session integration tests
//!
//! `FakeRecordApi` behaves like the record service but mints readable
//! tokens (`v1`, `v2`, ...) per record and can inject failures or hold
//! writes in flight.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use grid_session::{ApiError, RecordApi, SessionConfig, SessionEvent, SessionHandle};
use shared_types::{FieldChanges, FieldValue, Record, RecordId, VersionToken};
use tokio::sync::{broadcast, Semaphore};

pub const CONTAINER: &str = "orders";

#[derive(Debug, Clone, PartialEq)]
pub struct PatchCall {
    pub record_id: RecordId,
    pub fields: FieldChanges,
    pub precondition: Option<VersionToken>,
}

#[derive(Default)]
struct FakeInner {
    records: BTreeMap<RecordId, Record>,
    revisions: HashMap<RecordId, u64>,
    next_id: i64,
    patches: Vec<PatchCall>,
    gets: usize,
    patch_failures: VecDeque<ApiError>,
    get_failures: VecDeque<ApiError>,
    create_failures: VecDeque<ApiError>,
    delete_failures: VecDeque<ApiError>,
}

impl FakeInner {
    fn bump(&mut self, record_id: RecordId) -> VersionToken {
        let revision = self.revisions.entry(record_id).or_insert(0);
        *revision += 1;
        VersionToken::new(format!("v{revision}"))
    }
}

#[derive(Default)]
pub struct FakeRecordApi {
    inner: Mutex<FakeInner>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    read_gate: Mutex<Option<Arc<Semaphore>>>,
}

async fn pass(gate: &Mutex<Option<Arc<Semaphore>>>) {
    let gate = gate.lock().unwrap().clone();
    if let Some(gate) = gate {
        let permit = gate.acquire().await.expect("gate open");
        permit.forget();
    }
}

fn open(gate: &Mutex<Option<Arc<Semaphore>>>) {
    if let Some(gate) = gate.lock().unwrap().take() {
        gate.add_permits(Semaphore::MAX_PERMITS);
    }
}

impl FakeRecordApi {
    /// Server holding `records`, each at version `v1`
    pub fn with_records(records: Vec<Record>) -> Arc<Self> {
        let api = Self::default();
        {
            let mut inner = api.inner.lock().unwrap();
            for mut record in records {
                record.version = VersionToken::new("v1");
                inner.revisions.insert(record.id, 1);
                inner.next_id = inner.next_id.max(record.id.get());
                inner.records.insert(record.id, record);
            }
        }
        Arc::new(api)
    }

    pub fn record(&self, record_id: RecordId) -> Option<Record> {
        self.inner.lock().unwrap().records.get(&record_id).cloned()
    }

    pub fn records(&self) -> Vec<Record> {
        self.inner.lock().unwrap().records.values().cloned().collect()
    }

    /// Write from another client, bypassing any session
    pub fn server_update(&self, record_id: RecordId, field: &str, value: impl Into<FieldValue>) {
        let mut inner = self.inner.lock().unwrap();
        let version = inner.bump(record_id);
        let record = inner.records.get_mut(&record_id).expect("record exists");
        record.fields.insert(field.to_string(), value.into());
        record.version = version;
    }

    pub fn server_delete(&self, record_id: RecordId) {
        self.inner.lock().unwrap().records.remove(&record_id);
    }

    pub fn patches(&self) -> Vec<PatchCall> {
        self.inner.lock().unwrap().patches.clone()
    }

    pub fn get_count(&self) -> usize {
        self.inner.lock().unwrap().gets
    }

    pub fn fail_next_patch(&self, error: ApiError) {
        self.inner.lock().unwrap().patch_failures.push_back(error);
    }

    pub fn fail_next_get(&self, error: ApiError) {
        self.inner.lock().unwrap().get_failures.push_back(error);
    }

    pub fn fail_next_create(&self, error: ApiError) {
        self.inner.lock().unwrap().create_failures.push_back(error);
    }

    pub fn fail_next_delete(&self, error: ApiError) {
        self.inner.lock().unwrap().delete_failures.push_back(error);
    }

    /// Block patches after they are logged until `release_writes`
    pub fn hold_writes(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_writes(&self) {
        open(&self.gate);
    }

    /// Block single-record reads after they are counted until `release_reads`
    pub fn hold_reads(&self) {
        *self.read_gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_reads(&self) {
        open(&self.read_gate);
    }
}

#[async_trait]
impl RecordApi for FakeRecordApi {
    async fn list(&self, _container_id: &str) -> Result<Vec<Record>, ApiError> {
        Ok(self.records())
    }

    async fn get(&self, _container_id: &str, record_id: RecordId) -> Result<Record, ApiError> {
        self.inner.lock().unwrap().gets += 1;
        pass(&self.read_gate).await;

        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.get_failures.pop_front() {
            return Err(error);
        }
        inner
            .records
            .get(&record_id)
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    async fn create(&self, _container_id: &str, fields: FieldChanges) -> Result<Record, ApiError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.create_failures.pop_front() {
            return Err(error);
        }
        inner.next_id += 1;
        let record_id = RecordId(inner.next_id);
        let version = inner.bump(record_id);
        let mut record = Record::new(record_id, version);
        record.fields = fields;
        inner.records.insert(record_id, record.clone());
        Ok(record)
    }

    async fn patch(
        &self,
        _container_id: &str,
        record_id: RecordId,
        fields: FieldChanges,
        precondition: Option<VersionToken>,
    ) -> Result<Record, ApiError> {
        self.inner.lock().unwrap().patches.push(PatchCall {
            record_id,
            fields: fields.clone(),
            precondition: precondition.clone(),
        });

        pass(&self.gate).await;

        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.patch_failures.pop_front() {
            return Err(error);
        }
        let Some(current) = inner.records.get(&record_id).cloned() else {
            return Err(ApiError::NotFound);
        };
        if let Some(expected) = precondition {
            if expected != current.version {
                return Err(ApiError::PreconditionFailed {
                    message: "Record was modified by another client".to_string(),
                    current: Some(Box::new(current)),
                });
            }
        }
        let version = inner.bump(record_id);
        let record = inner.records.get_mut(&record_id).expect("record exists");
        record.apply(&fields);
        record.version = version;
        Ok(record.clone())
    }

    async fn delete(&self, _container_id: &str, record_id: RecordId) -> Result<(), ApiError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.delete_failures.pop_front() {
            return Err(error);
        }
        inner
            .records
            .remove(&record_id)
            .map(|_| ())
            .ok_or(ApiError::NotFound)
    }
}

pub fn test_config() -> SessionConfig {
    SessionConfig::for_container(CONTAINER)
}

/// Spawn a session and load everything the fake holds
pub async fn loaded_session(api: &Arc<FakeRecordApi>) -> SessionHandle {
    let session = SessionHandle::spawn(test_config(), api.clone())
        .await
        .expect("session spawns");
    session.load().await.expect("load succeeds");
    session
}

pub fn quantity_record(id: i64, quantity: f64) -> Record {
    Record::new(id, VersionToken::new("v1")).with_field("quantity", quantity)
}

pub fn changes(pairs: &[(&str, FieldValue)]) -> FieldChanges {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Let every ready task run without moving the paused clock meaningfully
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn drain_events(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("grid_session=debug")
        .with_test_writer()
        .try_init();
}
