//! Control socket
//!
//! Local clients (the captive portal, cron, an operator) trigger a
//! recompile by writing a JSON command to the daemon's Unix socket:
//!
//! ```text
//! {"name": "CheckPF"}
//! ```
//!
//! The reply is the literal `OK` or `NOK`. Each connection is served by
//! its own task; compiles are still serialized by the engine.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use pfgate_core::PolicyEngine;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnixListenerStream;
use tracing::{debug, error, info, warn};

/// Permission bits of the socket file
const SOCKET_MODE: u32 = 0o660;

pub const REPLY_OK: &[u8] = b"OK";
pub const REPLY_NOK: &[u8] = b"NOK";

/// Commands accepted on the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "name")]
pub enum ControlCommand {
    /// Fetch state and rebuild every artifact
    #[serde(rename = "CheckPF", alias = "recompile")]
    CheckPf,
}

impl ControlCommand {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).context("Invalid control command")
    }
}

/// Unix socket listener bound to one engine
pub struct ControlSocket {
    path: PathBuf,
    listener: UnixListener,
    max_buff: usize,
}

impl ControlSocket {
    /// Bind the socket, replacing a stale socket file
    pub fn bind(path: impl AsRef<Path>, max_buff: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Unable to remove stale socket {}", path.display()))?;
        }

        let listener = UnixListener::bind(&path)
            .with_context(|| format!("Unable to bind to {}", path.display()))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(SOCKET_MODE))
            .with_context(|| format!("Unable to set permissions on {}", path.display()))?;

        info!("Listening on: {}", path.display());
        Ok(Self {
            path,
            listener,
            max_buff,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until the listener fails
    pub async fn serve(self, engine: Arc<PolicyEngine>) {
        let max_buff = self.max_buff;
        let mut incoming = UnixListenerStream::new(self.listener);

        while let Some(conn) = incoming.next().await {
            let stream = match conn {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Unable to accept on control socket: {}", e);
                    continue;
                }
            };
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, engine, max_buff).await {
                    debug!("Control connection ended with error: {}", e);
                }
            });
        }
    }

    /// Remove the socket file
    pub fn cleanup(path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Unable to remove {}: {}", path.display(), e);
        }
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    engine: Arc<PolicyEngine>,
    max_buff: usize,
) -> Result<()> {
    let mut buf = vec![0u8; max_buff];
    let n = stream.read(&mut buf).await?;

    let reply = match ControlCommand::parse(&buf[..n]) {
        Ok(command) => {
            debug!("Control command: {:?}", command);
            execute(command, &engine).await
        }
        Err(e) => {
            warn!("{:#}", e);
            REPLY_NOK
        }
    };

    stream.write_all(reply).await?;
    stream.shutdown().await?;
    Ok(())
}

async fn execute(command: ControlCommand, engine: &PolicyEngine) -> &'static [u8] {
    match command {
        ControlCommand::CheckPf => match engine.compile().await {
            Ok(_) => REPLY_OK,
            // Already logged by the engine
            Err(_) => REPLY_NOK,
        },
    }
}
