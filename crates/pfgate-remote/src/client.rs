//! Management service HTTP client
//!
//! Thin, single-shot wrappers around the three service endpoints. No retry
//! happens here; [`HttpStateSource`](crate::HttpStateSource) owns the one
//! re-login retry.
//!
//! ## API Reference
//!
//! - Login: GET `<base>/login` (Basic credentials) → `{"Name", "Jwt"}`
//! - Query: GET `<base>/pfconfig/query/<router>` (Bearer) → subscribers and vouchers
//! - Create: POST `<base>/pfconfig/create` (Bearer) with the gateway model

use pfgate_core::config::GatewayConfig;
use pfgate_core::model::RemoteState;
use pfgate_core::traits::EnrollOutcome;
use pfgate_core::{Error, Result};
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use std::time::Duration;

/// Default HTTP timeout for service requests (30 seconds)
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Base64 `user:password` pair sent as Basic credentials
///
/// The Debug implementation does NOT expose the value.
#[derive(Clone)]
pub struct Credentials(String);

impl Credentials {
    pub fn new(encoded: impl Into<String>) -> Result<Self> {
        let encoded = encoded.into();
        if encoded.trim().is_empty() {
            return Err(Error::config("Service credentials cannot be empty"));
        }
        Ok(Self(encoded))
    }

    fn header_value(&self) -> String {
        format!("Basic {}", self.0)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credentials(<REDACTED>)")
    }
}

/// Login response
#[derive(Deserialize)]
struct TokenResponse {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Jwt", default)]
    jwt: String,
}

/// Client for the management service
#[derive(Debug, Clone)]
pub struct ServiceClient {
    /// Base URL, always ending in `/`
    base_url: String,

    /// HTTP client for API requests
    client: reqwest::Client,
}

impl ServiceClient {
    /// Create a client with the default 30 second timeout
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_HTTP_TIMEOUT)
    }

    /// Create a client with a custom request timeout
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let mut base_url = base_url.into();
        if base_url.is_empty() {
            return Err(Error::config("Service URL cannot be empty"));
        }
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Exchange credentials for a bearer token
    ///
    /// ```http
    /// GET <base>/login
    /// Authorization: Basic <credentials>
    /// ```
    pub async fn login(&self, credentials: &Credentials) -> Result<String> {
        let response = self
            .client
            .get(self.url("login"))
            .header(AUTHORIZATION, credentials.header_value())
            .send()
            .await
            .map_err(|e| Error::http(format!("Login request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            // Any refusal at login is a credentials problem
            return Err(Error::auth(format!("Service login refused. Status: {}", status)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::remote(format!("Failed to parse login response: {}", e)))?;

        if token.jwt.is_empty() {
            return Err(Error::auth("Service login returned an empty token"));
        }

        tracing::debug!("Logged in to {} as '{}'", self.base_url, token.name);
        Ok(token.jwt)
    }

    /// Fetch subscribers and vouchers for a router
    ///
    /// ```http
    /// GET <base>/pfconfig/query/<router>
    /// Authorization: Bearer <token>
    /// ```
    pub async fn query_state(&self, router: &str, token: &str) -> Result<RemoteState> {
        let response = self
            .client
            .get(self.url(&format!("pfconfig/query/{}", router)))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::http(format!("State query failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(status_error("State query", response).await);
        }

        response
            .json()
            .await
            .map_err(|e| Error::remote(format!("Failed to parse state for {}: {}", router, e)))
    }

    /// Enroll the router unless the service already knows it
    ///
    /// A success status on the query means enrolled; anything else leads to
    /// a create request with the local model.
    ///
    /// ```http
    /// POST <base>/pfconfig/create
    /// Authorization: Bearer <token>
    /// { "router": .., "ifaces": [..], "dhcps": [..], .. }
    /// ```
    pub async fn enroll(&self, config: &GatewayConfig, token: &str) -> Result<EnrollOutcome> {
        let query = self
            .client
            .get(self.url(&format!("pfconfig/query/{}", config.router)))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::http(format!("Enrollment query failed: {}", e)))?;

        match query.status() {
            status if status.is_success() => return Ok(EnrollOutcome::AlreadyEnrolled),
            StatusCode::UNAUTHORIZED => return Err(status_error("Enrollment query", query).await),
            status => tracing::info!("Router {} not enrolled (status {}), enrolling", config.router, status),
        }

        let response = self
            .client
            .post(self.url("pfconfig/create"))
            .bearer_auth(token)
            .json(config)
            .send()
            .await
            .map_err(|e| Error::http(format!("Enrollment request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(status_error("Enrollment", response).await);
        }

        Ok(EnrollOutcome::Enrolled)
    }
}

/// Map a non-success response to an error
///
/// 401 means the token was rejected and is the only status worth a
/// re-login; everything else is a plain remote error.
async fn status_error(context: &str, response: reqwest::Response) -> Error {
    let status = response.status();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error response".to_string());

    match status.as_u16() {
        401 => Error::auth(format!("{}: token rejected. Status: {}", context, status)),
        403 => Error::remote(format!(
            "{}: insufficient permissions. Status: {}",
            context, status
        )),
        404 => Error::remote(format!("{}: not found. Status: {}", context, status)),
        429 => Error::remote(format!(
            "{}: rate limit exceeded. Status: {}",
            context, status
        )),
        500..=599 => Error::remote(format!(
            "{}: service error (transient): {} - {}",
            context, status, error_text
        )),
        _ => Error::remote(format!("{} failed: {} - {}", context, status, error_text)),
    }
}
