// # pfgate-remote
//
// Management service client for the pfgate system.
//
// Provides an HTTP [`StateSource`] that fetches subscriber/voucher state and
// enrolls the router with the management service.
//
// ## Behavior
//
// - One request per fetch; one extra login + retry when the service
//   answers 401
// - HTTP timeout configured (30 seconds); the engine adds its own bound
// - Status codes mapped to errors (401, 403, 404, 429, 5xx)
// - No caching: a failed fetch is an error, never a stale document
//
// ## Security Requirements
//
// - Credentials and tokens NEVER appear in logs or Debug output
// - Credentials come from the environment only

pub mod client;
pub mod session;

use async_trait::async_trait;
use pfgate_core::config::GatewayConfig;
use pfgate_core::model::RemoteState;
use pfgate_core::traits::{EnrollOutcome, StateSource};
use pfgate_core::{Error, Result};
use std::future::Future;
use std::sync::Arc;

pub use client::{Credentials, DEFAULT_HTTP_TIMEOUT, ServiceClient};
pub use session::Session;

/// State source backed by the management service
#[derive(Debug, Clone)]
pub struct HttpStateSource {
    session: Arc<Session>,
}

impl HttpStateSource {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Run `op` with the current token, logging in again once on 401
    async fn with_token<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let token = match self.session.token().await {
            Some(token) => token,
            None => {
                self.session.refresh().await?;
                self.current_token().await?
            }
        };

        match op(token).await {
            Err(Error::Authentication(reason)) => {
                tracing::warn!("Service rejected the session ({}), logging in again", reason);
                self.session.refresh().await?;
                op(self.current_token().await?).await
            }
            other => other,
        }
    }

    async fn current_token(&self) -> Result<String> {
        self.session
            .token()
            .await
            .ok_or_else(|| Error::auth("No session token after login"))
    }
}

#[async_trait]
impl StateSource for HttpStateSource {
    async fn fetch_state(&self, router: &str) -> Result<RemoteState> {
        let client = self.session.client();
        let state = self
            .with_token(|token| async move { client.query_state(router, &token).await })
            .await?;

        tracing::debug!(
            "Service returned {} subscribers and {} vouchers for {}",
            state.subs.len(),
            state.vouchers.len(),
            router
        );
        Ok(state)
    }

    async fn enroll(&self, config: &GatewayConfig) -> Result<EnrollOutcome> {
        let client = self.session.client();
        self.with_token(|token| async move { client.enroll(config, &token).await })
            .await
    }

    fn source_name(&self) -> &'static str {
        "management-service"
    }
}
