// # Artifact Store Implementations
//
// Implementations of the ArtifactStore trait.

pub mod file;
pub mod memory;

pub use file::FileArtifactStore;
pub use memory::MemoryArtifactStore;
