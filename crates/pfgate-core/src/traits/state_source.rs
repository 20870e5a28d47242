// # State Source Trait
//
// Defines the interface for fetching subscriber and voucher state.
//
// ## Implementations
//
// - HTTP management service: `pfgate-remote` crate
// - Test doubles in `tests/common`
//
// ## Contract
//
// A fetch either returns the complete current state or an error. There is
// no partial result: the engine abandons the compile on any error, so a
// source must never hand back a truncated or stale document as success.

use async_trait::async_trait;

use crate::config::GatewayConfig;
use crate::model::RemoteState;

/// Trait for subscriber/voucher state sources
///
/// # Thread Safety
///
/// Implementations must be usable from concurrent tasks; the engine
/// serializes compiles but the daemon may enroll from another task.
#[async_trait]
pub trait StateSource: Send + Sync {
    /// Fetch the current state for a router
    ///
    /// # Returns
    ///
    /// - `Ok(RemoteState)`: complete subscriber and voucher lists
    /// - `Err(Error)`: transport, status, authentication or decode failure
    async fn fetch_state(&self, router: &str) -> Result<RemoteState, crate::Error>;

    /// Register the router with the service if it is not known yet
    ///
    /// Failure is reported but never blocks compiling.
    async fn enroll(&self, config: &GatewayConfig) -> Result<EnrollOutcome, crate::Error>;

    /// Source name (for logging)
    fn source_name(&self) -> &'static str;
}

/// Result of an enrollment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollOutcome {
    /// The service already knew this router
    AlreadyEnrolled,
    /// The router was registered by this call
    Enrolled,
}
