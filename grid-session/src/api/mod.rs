//! Remote record API consumed by the autosave engine
//!
//! The engine only depends on the [`RecordApi`] trait. [`HttpRecordApi`]
//! speaks the record service's HTTP contract.

use async_trait::async_trait;
use shared_types::{FieldChanges, Record, RecordId, VersionToken};

mod http;

pub use http::HttpRecordApi;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ApiError {
    /// The precondition token no longer matches the server's token
    #[error("precondition failed: {message}")]
    PreconditionFailed {
        message: String,
        current: Option<Box<Record>>,
    },

    #[error("record not found")]
    NotFound,

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, ApiError::PreconditionFailed { .. })
    }
}

/// Persistence collaborator for one grid.
///
/// `patch` must report a stale `precondition` as
/// [`ApiError::PreconditionFailed`] rather than applying the write.
#[async_trait]
pub trait RecordApi: Send + Sync {
    async fn list(&self, container_id: &str) -> Result<Vec<Record>, ApiError>;

    async fn get(&self, container_id: &str, record_id: RecordId) -> Result<Record, ApiError>;

    async fn create(&self, container_id: &str, fields: FieldChanges) -> Result<Record, ApiError>;

    async fn patch(
        &self,
        container_id: &str,
        record_id: RecordId,
        fields: FieldChanges,
        precondition: Option<VersionToken>,
    ) -> Result<Record, ApiError>;

    async fn delete(&self, container_id: &str, record_id: RecordId) -> Result<(), ApiError>;
}
