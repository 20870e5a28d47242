// # Memory Artifact Store
//
// In-memory implementation of ArtifactStore.
//
// ## Purpose
//
// Holds compiled artifacts without touching the run directory. Used by the
// daemon's dry-run mode and by tests that inspect what a compile produced.
//
// Backup rotation follows the file store: an artifact with `keep_backup`
// moves its previous content to `<name>.old`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::Error;
use crate::compiler::Artifacts;
use crate::traits::ArtifactStore;

/// In-memory artifact store
///
/// Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifactStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
    commits: Arc<AtomicUsize>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful commits
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Previous content of an artifact that keeps a backup
    pub async fn backup(&self, name: &str) -> Option<String> {
        self.inner.read().await.get(&format!("{}.old", name)).cloned()
    }

    /// Number of stored entries, backups included
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn commit(&self, artifacts: &Artifacts) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        for artifact in artifacts.iter() {
            let previous = guard.insert(artifact.name.clone(), artifact.content.clone());
            if artifact.keep_backup {
                if let Some(previous) = previous {
                    guard.insert(format!("{}.old", artifact.name), previous);
                }
            }
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Option<String>, Error> {
        Ok(self.inner.read().await.get(name).cloned())
    }
}
