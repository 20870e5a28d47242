//! Bearer token session
//!
//! A [`Session`] owns the credentials and the current token. The token
//! starts out empty when the startup login failed; the first request then
//! logs in on demand.

use pfgate_core::Result;
use tokio::sync::RwLock;

use crate::client::{Credentials, ServiceClient};

/// Authenticated session with the management service
///
/// # Security
///
/// Neither the token nor the credentials appear in Debug output or logs.
pub struct Session {
    client: ServiceClient,
    credentials: Credentials,
    token: RwLock<Option<String>>,
}

impl Session {
    /// Create a session without logging in
    pub fn new(client: ServiceClient, credentials: Credentials) -> Self {
        Self {
            client,
            credentials,
            token: RwLock::new(None),
        }
    }

    /// Create a session and log in immediately
    pub async fn login(client: ServiceClient, credentials: Credentials) -> Result<Self> {
        let session = Self::new(client, credentials);
        session.refresh().await?;
        Ok(session)
    }

    pub fn client(&self) -> &ServiceClient {
        &self.client
    }

    /// Current token, if a login succeeded
    pub async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }

    /// Log in again and replace the token
    ///
    /// On failure the previous token is dropped so the next request logs
    /// in again instead of replaying a rejected token.
    pub async fn refresh(&self) -> Result<()> {
        match self.client.login(&self.credentials).await {
            Ok(token) => {
                *self.token.write().await = Some(token);
                tracing::info!("Session with {} refreshed", self.client.base_url());
                Ok(())
            }
            Err(e) => {
                *self.token.write().await = None;
                tracing::warn!("Login to {} failed: {}", self.client.base_url(), e);
                Err(e)
            }
        }
    }
}

// Custom Debug implementation that hides the token
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let authenticated = self
            .token
            .try_read()
            .map(|token| token.is_some())
            .unwrap_or(false);
        f.debug_struct("Session")
            .field("base_url", &self.client.base_url())
            .field("token", &"<REDACTED>")
            .field("authenticated", &authenticated)
            .finish()
    }
}
