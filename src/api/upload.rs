//! Upload/process collaborator
//!
//! `POST {base}/upload?mode={transcribe|diarize}` with the audio bytes as a
//! multipart form and the caller's API key in the `x-api-key` header. The
//! session credential rides in the client's cookie jar.

use std::path::Path;

use reqwest::multipart::{Form, Part};
use serde_json::Value;

use super::client::{ApiClient, ApiError};
use crate::results::ProcessMode;

/// Submit audio bytes for processing. Returns the raw result JSON; the
/// result shape is interpreted by `results::format_result`.
pub async fn submit_bytes(
    client: &ApiClient,
    api_key: &str,
    bytes: Vec<u8>,
    filename: &str,
    mime_type: &str,
    mode: ProcessMode,
) -> Result<Value, ApiError> {
    log::info!(
        "Uploading {} ({} bytes) for {}",
        filename,
        bytes.len(),
        mode
    );

    let file_part = Part::bytes(bytes)
        .file_name(filename.to_string())
        .mime_str(mime_type)
        .map_err(|e| ApiError::ParseError(e.to_string()))?;

    let form = Form::new().part("file", file_part);

    let response = client
        .http()
        .post(client.url("/upload"))
        .query(&[("mode", mode.as_str())])
        .header("x-api-key", api_key)
        .multipart(form)
        .send()
        .await
        .map_err(|e| ApiError::NetworkError(e.to_string()))?;

    let response = ApiClient::error_for_status(response).await?;

    let result: Value = response
        .json()
        .await
        .map_err(|e| ApiError::ParseError(e.to_string()))?;

    log::info!("Upload successful for {}", filename);
    Ok(result)
}

/// Submit a local audio file for processing.
pub async fn submit_file(
    client: &ApiClient,
    api_key: &str,
    path: &Path,
    mode: ProcessMode,
) -> Result<Value, ApiError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ApiError::NetworkError(format!("Failed to read {:?}: {}", path, e)))?;

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("audio.wav")
        .to_string();

    submit_bytes(
        client,
        api_key,
        bytes,
        &filename,
        mime_for_extension(path),
        mode,
    )
    .await
}

fn mime_for_extension(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("m4a") | Some("mp4") | Some("aac") => "audio/mp4",
        _ => "application/octet-stream",
    }
}
