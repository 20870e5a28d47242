// # File Artifact Store
//
// Writes compiled artifacts into the gateway's run directory.
//
// ## Write Transaction
//
// Each commit runs in two phases:
//
// 1. Stage: every artifact is written to `<name>.tmp` (mode 0600) and
//    synced. If any staging write fails, all temp files are removed and no
//    live file has been touched.
// 2. Install: artifacts are renamed into place in write order. Artifacts
//    that keep a backup first move the live file to `<name>.old`; if the
//    following rename fails the backup is moved back. Both renames of one
//    artifact run as a single blocking task that cancellation cannot split.
//
// A failure during install stops the cycle. Files installed earlier in the
// same cycle stay in place, so `pf.conf` may lag behind freshly installed
// IP lists until the next successful compile.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::Error;
use crate::compiler::{Artifact, Artifacts};
use crate::traits::ArtifactStore;

/// Permission bits of every written artifact
const ARTIFACT_MODE: u32 = 0o600;

/// Artifact store rooted at a run directory
///
/// # Example
///
/// ```rust,no_run
/// use pfgate_core::store::FileArtifactStore;
/// use pfgate_core::traits::ArtifactStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileArtifactStore::new("/var/run/pfgate").await?;
///     let current = store.read("pf.conf").await?;
///     println!("{:?}", current.map(|c| c.len()));
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    run_dir: PathBuf,
}

impl FileArtifactStore {
    /// Open a store, creating the run directory if needed
    pub async fn new<P: AsRef<Path>>(run_dir: P) -> Result<Self, Error> {
        let run_dir = run_dir.as_ref().to_path_buf();

        if !run_dir.as_os_str().is_empty() && !fs::try_exists(&run_dir).await.unwrap_or(false) {
            fs::create_dir_all(&run_dir).await.map_err(|e| {
                Error::store(format!(
                    "Failed to create run directory {}: {}",
                    run_dir.display(),
                    e
                ))
            })?;
        }

        Ok(Self { run_dir })
    }

    /// Run directory of this store
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Live path of an artifact
    pub fn path(&self, name: &str) -> PathBuf {
        self.run_dir.join(name)
    }

    /// Path of the single-generation backup
    pub fn backup_path(&self, name: &str) -> PathBuf {
        self.run_dir.join(format!("{}.old", name))
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        self.run_dir.join(format!("{}.tmp", name))
    }

    /// Write an artifact to its temp file
    async fn stage(&self, artifact: &Artifact) -> Result<PathBuf, Error> {
        let temp_path = self.temp_path(&artifact.name);

        // A stale temp file would keep its old mode
        if let Err(e) = fs::remove_file(&temp_path).await {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!("Failed to remove stale {}: {}", temp_path.display(), e);
            }
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(ARTIFACT_MODE)
            .open(&temp_path)
            .await
            .map_err(|e| {
                Error::store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

        file.write_all(artifact.content.as_bytes())
            .await
            .map_err(|e| {
                Error::store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

        file.sync_all().await.map_err(|e| {
            Error::store(format!(
                "Failed to sync temp file {}: {}",
                temp_path.display(),
                e
            ))
        })?;

        fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(ARTIFACT_MODE))
            .await
            .map_err(|e| {
                Error::store(format!(
                    "Failed to set permissions on {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

        Ok(temp_path)
    }

    /// Move a staged artifact into place, rotating the backup if needed
    ///
    /// Rotation and rename run together on the blocking pool. Dropping the
    /// caller's future does not stop them, so a list is never left with
    /// only its `.old` file.
    async fn install(&self, artifact: &Artifact, temp_path: &Path) -> Result<(), Error> {
        let temp_path = temp_path.to_path_buf();
        let live_path = self.path(&artifact.name);
        let backup_path = self.backup_path(&artifact.name);
        let keep_backup = artifact.keep_backup;

        tokio::task::spawn_blocking(move || {
            install_blocking(&temp_path, &live_path, &backup_path, keep_backup)
        })
        .await
        .map_err(|e| {
            Error::store(format!("Install of {} did not complete: {}", artifact.name, e))
        })?
    }

    /// Remove staged temp files, best effort
    async fn discard(&self, staged: &[PathBuf]) {
        for temp_path in staged {
            if let Err(e) = fs::remove_file(temp_path).await {
                tracing::warn!("Failed to remove {}: {}", temp_path.display(), e);
            }
        }
    }
}

fn install_blocking(
    temp_path: &Path,
    live_path: &Path,
    backup_path: &Path,
    keep_backup: bool,
) -> Result<(), Error> {
    let rotated = keep_backup && live_path.exists();
    if rotated {
        std::fs::rename(live_path, backup_path).map_err(|e| {
            Error::store(format!(
                "Failed to rotate {} to {}: {}",
                live_path.display(),
                backup_path.display(),
                e
            ))
        })?;
    }

    if let Err(e) = std::fs::rename(temp_path, live_path) {
        if rotated {
            if let Err(restore_err) = std::fs::rename(backup_path, live_path) {
                tracing::error!(
                    "Failed to restore {} from backup: {}",
                    live_path.display(),
                    restore_err
                );
            }
        }
        return Err(Error::store(format!(
            "Failed to rename {} to {}: {}",
            temp_path.display(),
            live_path.display(),
            e
        )));
    }

    tracing::trace!("Installed {}", live_path.display());
    Ok(())
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn commit(&self, artifacts: &Artifacts) -> Result<(), Error> {
        let mut staged = Vec::new();
        for artifact in artifacts.iter() {
            match self.stage(artifact).await {
                Ok(temp_path) => staged.push(temp_path),
                Err(e) => {
                    tracing::error!("Staging {} failed, nothing installed: {}", artifact.name, e);
                    self.discard(&staged).await;
                    return Err(e);
                }
            }
        }

        for (index, (artifact, temp_path)) in artifacts.iter().zip(&staged).enumerate() {
            if let Err(e) = self.install(artifact, temp_path).await {
                tracing::error!(
                    "Installing {} failed after {} artifact(s) were replaced: {}",
                    artifact.name,
                    index,
                    e
                );
                self.discard(&staged[index + 1..]).await;
                return Err(e);
            }
        }

        tracing::debug!("Committed artifacts to {}", self.run_dir.display());
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Option<String>, Error> {
        match fs::read_to_string(self.path(name)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::store(format!("Failed to read {}: {}", name, e))),
        }
    }
}
