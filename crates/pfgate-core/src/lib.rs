// # pfgate-core
//
// Core library for the pfgate gateway policy compiler.
//
// ## Architecture Overview
//
// This library turns a local gateway model plus subscriber/voucher state
// from a management service into packet filter and DHCP configuration:
// - **StateSource**: Trait for fetching subscriber/voucher state and enrolling
// - **ArtifactStore**: Trait for persisting compiled artifacts
// - **compiler**: Pure, synchronous generation of `pf.conf`, `dhcpd.conf`
//   and the two IP-list table files
// - **PolicyEngine**: Serializes fetch → compile → commit cycles
//
// ## Design Principles
//
// 1. **Separation of Concerns**: generation is pure, I/O lives behind traits
// 2. **All or nothing per fetch**: a failed fetch never touches artifacts
// 3. **Library-First**: the daemon is a thin shell around this crate

pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod store;
pub mod traits;

// Re-export core types for convenience
pub use compiler::{Artifact, Artifacts, CompileSummary};
pub use config::{DhcpPool, EngineConfig, GatewayConfig, Interface, InterfaceRole};
pub use engine::{EngineEvent, PolicyEngine};
pub use error::{Error, Result};
pub use model::{RemoteState, Shaping, Status, Subscriber, Voucher};
pub use store::{FileArtifactStore, MemoryArtifactStore};
pub use traits::{ArtifactStore, EnrollOutcome, StateSource};
