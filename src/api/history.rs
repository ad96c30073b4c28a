//! History collaborator: past processing runs and their stored results

use serde::Deserialize;
use serde_json::Value;

use super::client::{ApiClient, ApiError};
use crate::results::ProcessMode;

/// One row of the user's processing history.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub filename: String,
    pub mode: ProcessMode,
    /// Server-side timestamp, passed through as sent.
    pub timestamp: String,
    #[serde(default)]
    pub audio_duration: f64,
    #[serde(default)]
    pub size: u64,
}

/// A stored result fetched by id.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredResult {
    pub result: Value,
    pub mode: ProcessMode,
}

pub async fn list(client: &ApiClient) -> Result<Vec<HistoryEntry>, ApiError> {
    let response = client
        .http()
        .get(client.url("/history"))
        .send()
        .await
        .map_err(|e| ApiError::NetworkError(e.to_string()))?;

    let response = ApiClient::error_for_status(response).await?;
    response
        .json()
        .await
        .map_err(|e| ApiError::ParseError(e.to_string()))
}

pub async fn get_by_id(client: &ApiClient, id: i64) -> Result<StoredResult, ApiError> {
    let response = client
        .http()
        .get(client.url(&format!("/transcription/{}", id)))
        .send()
        .await
        .map_err(|e| ApiError::NetworkError(e.to_string()))?;

    let response = ApiClient::error_for_status(response).await?;
    response
        .json()
        .await
        .map_err(|e| ApiError::ParseError(e.to_string()))
}
