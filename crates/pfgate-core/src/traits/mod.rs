//! Core traits for the pfgate system
//!
//! - [`StateSource`]: fetch subscriber/voucher state, enroll the router
//! - [`ArtifactStore`]: persist compiled artifacts

pub mod artifact_store;
pub mod state_source;

pub use artifact_store::ArtifactStore;
pub use state_source::{EnrollOutcome, StateSource};
