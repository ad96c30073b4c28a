//! Session context: the API client plus the cached profile
//!
//! Components that need to know who is logged in receive this object
//! explicitly; there is no ambient profile storage. The cache has a
//! freshness TTL with a defined load/refresh/clear lifecycle.

use std::time::{Duration, Instant};

use crate::api::{auth, ApiClient, ApiError};

/// Cache duration (5 minutes)
const CACHE_DURATION: Duration = Duration::from_secs(5 * 60);

/// TTL cache for the fetched profile.
struct ProfileCache {
    profile: Option<auth::Profile>,
    cached_at: Option<Instant>,
}

impl ProfileCache {
    fn new() -> Self {
        Self {
            profile: None,
            cached_at: None,
        }
    }

    /// Get the cached profile if still fresh.
    fn get(&self) -> Option<&auth::Profile> {
        match (&self.profile, self.cached_at) {
            (Some(profile), Some(cached_at)) => {
                if cached_at.elapsed() < CACHE_DURATION {
                    Some(profile)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Get the cached profile regardless of freshness.
    fn get_stale(&self) -> Option<&auth::Profile> {
        self.profile.as_ref()
    }

    fn set(&mut self, profile: auth::Profile) {
        self.profile = Some(profile);
        self.cached_at = Some(Instant::now());
    }

    fn clear(&mut self) {
        self.profile = None;
        self.cached_at = None;
    }
}

/// Explicit session state passed to whatever needs the logged-in user.
pub struct SessionContext {
    client: ApiClient,
    cache: ProfileCache,
}

impl SessionContext {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            cache: ProfileCache::new(),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Log in and prime the profile cache.
    pub async fn login(&mut self, identifier: &str, password: &str) -> Result<auth::Profile, ApiError> {
        auth::login(
            &self.client,
            &auth::LoginRequest {
                identifier: identifier.to_string(),
                password: password.to_string(),
            },
        )
        .await?;
        self.refresh().await
    }

    /// Log out and drop the cached profile.
    pub async fn logout(&mut self) -> Result<(), ApiError> {
        let result = auth::logout(&self.client).await;
        self.clear();
        result
    }

    /// Profile, served from cache while fresh.
    pub async fn load(&mut self) -> Result<auth::Profile, ApiError> {
        if let Some(profile) = self.cache.get() {
            return Ok(profile.clone());
        }
        self.refresh().await
    }

    /// Force a profile fetch, replacing the cache.
    pub async fn refresh(&mut self) -> Result<auth::Profile, ApiError> {
        let profile = auth::fetch_profile(&self.client).await?;
        self.cache.set(profile.clone());
        Ok(profile)
    }

    /// Drop the cached profile without talking to the backend.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Cached profile, fresh or stale.
    pub fn cached_profile(&self) -> Option<&auth::Profile> {
        self.cache.get_stale()
    }

    /// Upload preflight: the API key from the cached profile, or a clear
    /// message about what is missing.
    pub fn upload_key(&self) -> Result<String, ApiError> {
        let profile = self.cache.get_stale().ok_or_else(|| {
            ApiError::MissingCredentials("Profile not found. Please login again.".to_string())
        })?;
        match &profile.api_key {
            Some(key) if !key.is_empty() => Ok(key.clone()),
            _ => Err(ApiError::MissingCredentials(
                "API key not available.".to_string(),
            )),
        }
    }
}
