//! Session/profile collaborator: register, login, logout, profile fetch
//!
//! Login success materializes as a session cookie in the client's jar; the
//! profile is fetched separately from `/me`.

use serde::{Deserialize, Serialize};

use super::client::{ApiClient, ApiError};

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    /// Username or email.
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub api_key: Option<String>,
}

/// The authenticated user's profile as served by `/me`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_active: bool,
    #[serde(default)]
    pub upload_limit: i64,
    #[serde(default)]
    pub is_admin: bool,
}

pub async fn register(
    client: &ApiClient,
    request: &RegisterRequest,
) -> Result<RegisterResponse, ApiError> {
    log::info!("Registering user {}", request.username);

    let response = client
        .http()
        .post(client.url("/register"))
        .json(request)
        .send()
        .await
        .map_err(|e| ApiError::NetworkError(e.to_string()))?;

    let response = ApiClient::error_for_status(response).await?;
    response
        .json()
        .await
        .map_err(|e| ApiError::ParseError(e.to_string()))
}

pub async fn login(client: &ApiClient, request: &LoginRequest) -> Result<(), ApiError> {
    log::info!("Logging in as {}", request.identifier);

    let response = client
        .http()
        .post(client.url("/login"))
        .json(request)
        .send()
        .await
        .map_err(|e| ApiError::NetworkError(e.to_string()))?;

    ApiClient::error_for_status(response).await?;
    Ok(())
}

pub async fn logout(client: &ApiClient) -> Result<(), ApiError> {
    let response = client
        .http()
        .post(client.url("/logout"))
        .send()
        .await
        .map_err(|e| ApiError::NetworkError(e.to_string()))?;

    ApiClient::error_for_status(response).await?;
    log::info!("Logged out");
    Ok(())
}

pub async fn fetch_profile(client: &ApiClient) -> Result<Profile, ApiError> {
    let response = client
        .http()
        .get(client.url("/me"))
        .send()
        .await
        .map_err(|e| ApiError::NetworkError(e.to_string()))?;

    let response = ApiClient::error_for_status(response).await?;
    let profile: Profile = response
        .json()
        .await
        .map_err(|e| ApiError::ParseError(e.to_string()))?;

    // Never log the key value.
    log::info!(
        "Profile fetched: {} (api_key_present={}, active={})",
        profile.username,
        profile.api_key.is_some(),
        profile.api_key_active
    );
    Ok(profile)
}
