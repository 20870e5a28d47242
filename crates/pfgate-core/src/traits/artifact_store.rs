// # Artifact Store Trait
//
// Defines how compiled artifacts are persisted.
//
// ## Implementations
//
// - `FileArtifactStore`: run directory on disk, staged writes, `.old` backups
// - `MemoryArtifactStore`: tests and dry-run mode

use async_trait::async_trait;

use crate::compiler::Artifacts;

/// Trait for artifact persistence
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist every artifact of one compile
    ///
    /// Artifacts with `keep_backup` rotate the previous version to
    /// `<name>.old` before being replaced.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: all artifacts are in place
    /// - `Err(Error)`: the cycle was aborted; see the implementation for
    ///   what may already have been replaced
    async fn commit(&self, artifacts: &Artifacts) -> Result<(), crate::Error>;

    /// Read back the current content of an artifact, if any
    async fn read(&self, name: &str) -> Result<Option<String>, crate::Error>;
}
