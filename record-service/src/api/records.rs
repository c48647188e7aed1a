//! Record API endpoints
//!
//! Provides record editing with optimistic concurrency control: PATCH accepts
//! an `If-Match` version token and answers 409 with the current record when
//! the token is stale.

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use shared_types::{
    ConflictResponse, CreateRecordRequest, ErrorDetail, ErrorResponse, PatchRecordRequest, Record,
    RecordId, VersionToken, ERROR_CODE_CONFLICT, ERROR_CODE_INTERNAL, ERROR_CODE_INVALID_REQUEST,
    ERROR_CODE_NOT_FOUND,
};

use crate::api::ApiState;
use crate::store::StoreError;

/// Record error codes for machine-readable error responses
#[derive(Debug, Clone, Copy)]
pub enum RecordErrorCode {
    NotFound,
    Conflict,
    InvalidRequest,
    Internal,
}

impl RecordErrorCode {
    fn as_str(&self) -> &'static str {
        match self {
            RecordErrorCode::NotFound => ERROR_CODE_NOT_FOUND,
            RecordErrorCode::Conflict => ERROR_CODE_CONFLICT,
            RecordErrorCode::InvalidRequest => ERROR_CODE_INVALID_REQUEST,
            RecordErrorCode::Internal => ERROR_CODE_INTERNAL,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            RecordErrorCode::NotFound => StatusCode::NOT_FOUND,
            RecordErrorCode::Conflict => StatusCode::CONFLICT,
            RecordErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            RecordErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn error_body(code: RecordErrorCode, message: impl Into<String>) -> ErrorResponse {
    ErrorResponse {
        error: ErrorDetail {
            code: code.as_str().to_string(),
            message: message.into(),
        },
    }
}

/// Create an error response
fn record_error(code: RecordErrorCode, message: impl Into<String>) -> Response {
    (code.status_code(), Json(error_body(code, message))).into_response()
}

fn store_error(err: StoreError) -> Response {
    match err {
        StoreError::NotFound { .. } => record_error(RecordErrorCode::NotFound, err.to_string()),
        StoreError::PreconditionFailed { ref current, .. } => {
            let body = ConflictResponse {
                error: error_body(
                    RecordErrorCode::Conflict,
                    "Record was modified by another client",
                ),
                current: Some(current.as_ref().clone()),
            };
            (StatusCode::CONFLICT, Json(body)).into_response()
        }
        StoreError::Invalid(msg) => record_error(RecordErrorCode::InvalidRequest, msg),
        StoreError::Seed(msg) => record_error(RecordErrorCode::Internal, msg),
    }
}

/// Record body plus an `ETag` header carrying its version
fn record_response(status: StatusCode, record: &Record) -> Response {
    let mut response = (status, Json(record)).into_response();
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", record.version)) {
        response.headers_mut().insert(header::ETAG, value);
    }
    response
}

/// Parse `If-Match`. Quotes and a weak prefix are stripped; `*` means no precondition.
fn precondition(headers: &HeaderMap) -> Result<Option<VersionToken>, Response> {
    let Some(raw) = headers.get(header::IF_MATCH) else {
        return Ok(None);
    };
    let value = raw.to_str().map_err(|_| {
        record_error(
            RecordErrorCode::InvalidRequest,
            "If-Match header is not valid ASCII",
        )
    })?;
    let value = value.trim();
    let value = value.strip_prefix("W/").unwrap_or(value);
    let value = value.trim_matches('"');

    if value.is_empty() {
        return Err(record_error(
            RecordErrorCode::InvalidRequest,
            "If-Match header is empty",
        ));
    }
    if value == "*" {
        return Ok(None);
    }
    Ok(Some(VersionToken::new(value)))
}

pub async fn list_records(
    State(state): State<ApiState>,
    Path(container_id): Path<String>,
) -> impl IntoResponse {
    let records = state.store.list(&container_id).await;
    (StatusCode::OK, Json(records))
}

pub async fn create_record(
    State(state): State<ApiState>,
    Path(container_id): Path<String>,
    Json(req): Json<CreateRecordRequest>,
) -> Response {
    let record = state.store.create(&container_id, req.fields).await;
    tracing::info!(
        container_id = %container_id,
        record_id = %record.id,
        version = %record.version,
        "Record created"
    );
    record_response(StatusCode::CREATED, &record)
}

pub async fn get_record(
    State(state): State<ApiState>,
    Path((container_id, record_id)): Path<(String, i64)>,
) -> Response {
    match state.store.get(&container_id, RecordId(record_id)).await {
        Ok(record) => record_response(StatusCode::OK, &record),
        Err(e) => store_error(e),
    }
}

/// Patch record fields with optimistic concurrency control
pub async fn patch_record(
    State(state): State<ApiState>,
    Path((container_id, record_id)): Path<(String, i64)>,
    headers: HeaderMap,
    Json(req): Json<PatchRecordRequest>,
) -> Response {
    let expected = match precondition(&headers) {
        Ok(token) => token,
        Err(response) => return response,
    };
    let record_id = RecordId(record_id);

    match state
        .store
        .patch(&container_id, record_id, req.fields, expected.as_ref())
        .await
    {
        Ok(record) => {
            tracing::debug!(
                container_id = %container_id,
                record_id = %record_id,
                conditional = expected.is_some(),
                version = %record.version,
                "Record patched"
            );
            record_response(StatusCode::OK, &record)
        }
        Err(e) => {
            if matches!(e, StoreError::PreconditionFailed { .. }) {
                tracing::warn!(
                    container_id = %container_id,
                    record_id = %record_id,
                    error = %e,
                    "Rejected stale write"
                );
            }
            store_error(e)
        }
    }
}

pub async fn delete_record(
    State(state): State<ApiState>,
    Path((container_id, record_id)): Path<(String, i64)>,
) -> Response {
    match state.store.delete(&container_id, RecordId(record_id)).await {
        Ok(()) => {
            tracing::info!(container_id = %container_id, record_id, "Record deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => store_error(e),
    }
}
