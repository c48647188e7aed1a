use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use shared_types::{
    ConflictResponse, CreateRecordRequest, ErrorResponse, FieldChanges, PatchRecordRequest, Record,
    RecordId, VersionToken,
};

use super::{ApiError, RecordApi};
use crate::config::SessionConfig;

/// [`RecordApi`] over the record service's HTTP contract
#[derive(Debug, Clone)]
pub struct HttpRecordApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRecordApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self, ApiError> {
        Self::new(config.api_url.clone(), config.request_timeout)
    }

    fn records_url(&self, container_id: &str) -> String {
        format!("{}/containers/{}/records", self.base_url, container_id)
    }

    fn record_url(&self, container_id: &str, record_id: RecordId) -> String {
        format!("{}/{}", self.records_url(container_id), record_id)
    }
}

fn transport(e: reqwest::Error) -> ApiError {
    ApiError::Transport(e.to_string())
}

async fn decode_record(response: reqwest::Response) -> Result<Record, ApiError> {
    response
        .json::<Record>()
        .await
        .map_err(|e| ApiError::Decode(e.to_string()))
}

/// Map a non-success response onto the error taxonomy
async fn failure(response: reqwest::Response) -> ApiError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    match status {
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
            match serde_json::from_str::<ConflictResponse>(&body) {
                Ok(conflict) => ApiError::PreconditionFailed {
                    message: conflict.error.error.message,
                    current: conflict.current.map(Box::new),
                },
                Err(_) => ApiError::PreconditionFailed {
                    message: format!("status {status}"),
                    current: None,
                },
            }
        }
        StatusCode::NOT_FOUND => ApiError::NotFound,
        _ => {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            ApiError::Server {
                status: status.as_u16(),
                message,
            }
        }
    }
}

#[async_trait]
impl RecordApi for HttpRecordApi {
    async fn list(&self, container_id: &str) -> Result<Vec<Record>, ApiError> {
        let response = self
            .http
            .get(self.records_url(container_id))
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(failure(response).await);
        }
        response
            .json::<Vec<Record>>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn get(&self, container_id: &str, record_id: RecordId) -> Result<Record, ApiError> {
        let response = self
            .http
            .get(self.record_url(container_id, record_id))
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(failure(response).await);
        }
        decode_record(response).await
    }

    async fn create(&self, container_id: &str, fields: FieldChanges) -> Result<Record, ApiError> {
        let response = self
            .http
            .post(self.records_url(container_id))
            .json(&CreateRecordRequest { fields })
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(failure(response).await);
        }
        decode_record(response).await
    }

    async fn patch(
        &self,
        container_id: &str,
        record_id: RecordId,
        fields: FieldChanges,
        precondition: Option<VersionToken>,
    ) -> Result<Record, ApiError> {
        let mut request = self
            .http
            .patch(self.record_url(container_id, record_id))
            .json(&PatchRecordRequest { fields });
        if let Some(token) = precondition {
            request = request.header(header::IF_MATCH, format!("\"{token}\""));
        }

        let response = request.send().await.map_err(transport)?;
        if !response.status().is_success() {
            return Err(failure(response).await);
        }
        decode_record(response).await
    }

    async fn delete(&self, container_id: &str, record_id: RecordId) -> Result<(), ApiError> {
        let response = self
            .http
            .delete(self.record_url(container_id, record_id))
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(failure(response).await);
        }
        Ok(())
    }
}
