//! Admin collaborator: user accounts, API key status, upload quotas
//!
//! Every call is keyed by user id and requires an admin session cookie; the
//! backend enforces the privilege, this client just relays the outcome.

use serde::Deserialize;

use super::client::{ApiClient, ApiError};

/// One user row in the admin listing.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub api_key_active: bool,
    #[serde(default)]
    pub upload_limit: i64,
    #[serde(default)]
    pub is_admin: bool,
}

pub async fn list_users(client: &ApiClient) -> Result<Vec<AdminUser>, ApiError> {
    let response = client
        .http()
        .get(client.url("/admin/users"))
        .send()
        .await
        .map_err(|e| ApiError::NetworkError(e.to_string()))?;

    let response = ApiClient::error_for_status(response).await?;
    response
        .json()
        .await
        .map_err(|e| ApiError::ParseError(e.to_string()))
}

/// Activate or deactivate a user's API key.
pub async fn set_api_key_active(
    client: &ApiClient,
    user_id: i64,
    active: bool,
) -> Result<(), ApiError> {
    let action = if active { "activate" } else { "deactivate" };
    log::info!("Admin: {} API key for user {}", action, user_id);

    let response = client
        .http()
        .put(client.url(&format!("/admin/api-keys/{}/{}", user_id, action)))
        .send()
        .await
        .map_err(|e| ApiError::NetworkError(e.to_string()))?;

    ApiClient::error_for_status(response).await?;
    Ok(())
}

/// Set a user's upload quota.
pub async fn set_upload_limit(
    client: &ApiClient,
    user_id: i64,
    limit: u64,
) -> Result<(), ApiError> {
    log::info!("Admin: set upload limit {} for user {}", limit, user_id);

    let response = client
        .http()
        .put(client.url(&format!("/admin/users/{}/upload-limit", user_id)))
        .query(&[("limit", limit)])
        .send()
        .await
        .map_err(|e| ApiError::NetworkError(e.to_string()))?;

    ApiClient::error_for_status(response).await?;
    Ok(())
}

/// Delete a user and all related data.
pub async fn delete_user(client: &ApiClient, user_id: i64) -> Result<(), ApiError> {
    log::info!("Admin: delete user {}", user_id);

    let response = client
        .http()
        .delete(client.url(&format!("/admin/users/{}", user_id)))
        .send()
        .await
        .map_err(|e| ApiError::NetworkError(e.to_string()))?;

    ApiClient::error_for_status(response).await?;
    Ok(())
}
