//! Policy engine
//!
//! The PolicyEngine is responsible for:
//! - Fetching subscriber/voucher state via a StateSource
//! - Compiling the gateway policy
//! - Committing artifacts via an ArtifactStore
//! - Serializing compiles
//!
//! ## Architecture
//!
//! ```text
//!   CheckPF / reload / timer
//!             │
//!             ▼
//!   ┌──────────────────┐   fetch_state   ┌─────────────┐
//!   │  PolicyEngine    │────────────────▶│ StateSource │
//!   │  (compile guard) │                 └─────────────┘
//!   └──────────────────┘
//!             │ compiler::compile
//!             ▼
//!   ┌──────────────────┐     commit      ┌───────────────┐
//!   │    Artifacts     │────────────────▶│ ArtifactStore │
//!   └──────────────────┘                 └───────────────┘
//!             │
//!             ▼
//!       EngineEvent channel
//! ```
//!
//! ## Compile Flow
//!
//! 1. Acquire the compile guard (waits for an in-flight compile or commit)
//! 2. Fetch state, bounded by the fetch timeout
//! 3. Compile against the current config snapshot
//! 4. Commit artifacts on a task that owns the guard
//! 5. Emit an event for monitoring/logging
//!
//! Any failure in 2 leaves every artifact untouched.
//!
//! ## Shutdown
//!
//! [`PolicyEngine::shutdown`] waits for the compile in flight, if any, and
//! refuses every compile after it. Callers abort their tasks only after it
//! returns, so no commit is cut short.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, mpsc};
use tracing::{debug, error, info, warn};

use crate::compiler::{self, CompileSummary};
use crate::config::{EngineConfig, GatewayConfig};
use crate::error::{Error, Result};
use crate::traits::{ArtifactStore, EnrollOutcome, StateSource};

/// Events emitted by the PolicyEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A compile acquired the guard and started fetching
    CompileStarted { router: String },

    /// Artifacts were committed
    CompileSucceeded {
        router: String,
        summary: CompileSummary,
        elapsed_ms: u64,
    },

    /// The compile was abandoned
    CompileFailed { router: String, error: String },

    /// A new gateway configuration was installed
    ConfigReloaded { router: String },
}

/// Core policy engine
///
/// One engine serves one gateway. It is shared between the socket
/// listener, the reload timer and signal handlers, usually behind an
/// `Arc`.
///
/// ## Serialization
///
/// [`PolicyEngine::compile`] holds an async mutex from fetch to commit.
/// A second request waits for the first one to finish and then runs a
/// full compile of its own; requests are never merged.
/// The commit runs on its own task and completes even when the caller
/// is cancelled.
pub struct PolicyEngine {
    /// Subscriber/voucher state
    source: Box<dyn StateSource>,

    /// Artifact persistence
    store: Arc<dyn ArtifactStore>,

    /// Current gateway model, replaced on reload
    config: RwLock<Arc<GatewayConfig>>,

    /// Directory the table files are referenced from
    run_dir: PathBuf,

    /// Held across fetch, compile and commit
    compile_lock: Arc<Mutex<()>>,

    /// Upper bound on a single fetch
    fetch_timeout: Duration,

    /// Set once by `shutdown`
    stopped: AtomicBool,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl PolicyEngine {
    /// Create a new policy engine
    ///
    /// # Parameters
    ///
    /// - `source`: state source implementation
    /// - `store`: artifact store implementation
    /// - `config`: gateway configuration
    /// - `run_dir`: run directory referenced by generated table files
    /// - `engine_config`: timeouts and channel sizing
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        source: Box<dyn StateSource>,
        store: Box<dyn ArtifactStore>,
        config: GatewayConfig,
        run_dir: impl Into<PathBuf>,
        engine_config: EngineConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;
        engine_config.validate()?;

        let (tx, rx) = mpsc::channel(engine_config.event_channel_capacity);

        let engine = Self {
            source,
            store: Arc::from(store),
            config: RwLock::new(Arc::new(config)),
            run_dir: run_dir.into(),
            compile_lock: Arc::new(Mutex::new(())),
            fetch_timeout: engine_config.fetch_timeout(),
            stopped: AtomicBool::new(false),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Override the fetch timeout
    ///
    /// Sub-second bounds are only useful in tests; `EngineConfig` works in
    /// whole seconds.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Snapshot of the current gateway configuration
    pub async fn config(&self) -> Arc<GatewayConfig> {
        self.config.read().await.clone()
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Replace the gateway configuration
    ///
    /// The new configuration is validated first; on error the current one
    /// stays. A compile already in flight keeps the snapshot it started
    /// with.
    pub async fn reload_config(&self, config: GatewayConfig) -> Result<()> {
        config.validate()?;
        let router = config.router.clone();
        *self.config.write().await = Arc::new(config);

        info!("Gateway configuration reloaded for {}", router);
        self.emit_event(EngineEvent::ConfigReloaded { router });
        Ok(())
    }

    /// Fetch, compile and commit
    ///
    /// # Returns
    ///
    /// - `Ok(CompileSummary)`: artifacts are in place
    /// - `Err(Error)`: remote, timeout or store failure; see the store for
    ///   what a commit failure may leave behind
    pub async fn compile(&self) -> Result<CompileSummary> {
        let guard = Arc::clone(&self.compile_lock).lock_owned().await;
        if self.stopped.load(Ordering::SeqCst) {
            debug!("Compile requested after shutdown, ignoring");
            return Err(Error::ShuttingDown);
        }
        let config = self.config().await;
        let started = Instant::now();

        debug!("Compile started for {}", config.router);
        self.emit_event(EngineEvent::CompileStarted {
            router: config.router.clone(),
        });

        match self.compile_locked(&config, guard).await {
            Ok(summary) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                info!(
                    "Compiled policy for {}: {} active, {} shaped ({}ms)",
                    config.router, summary.active, summary.shaped, elapsed_ms
                );
                self.emit_event(EngineEvent::CompileSucceeded {
                    router: config.router.clone(),
                    summary,
                    elapsed_ms,
                });
                Ok(summary)
            }
            Err(e) => {
                error!("Compile for {} failed: {}", config.router, e);
                self.emit_event(EngineEvent::CompileFailed {
                    router: config.router.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn compile_locked(
        &self,
        config: &GatewayConfig,
        guard: OwnedMutexGuard<()>,
    ) -> Result<CompileSummary> {
        let fetch = self.source.fetch_state(&config.router);
        let state = match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(result) => result.map_err(|e| {
                warn!(
                    "Fetch from {} failed, keeping current artifacts",
                    self.source.source_name()
                );
                e
            })?,
            Err(_) => return Err(Error::Timeout(self.fetch_timeout)),
        };
        debug!(
            "Fetched {} subscribers and {} vouchers from {}",
            state.subs.len(),
            state.vouchers.len(),
            self.source.source_name()
        );

        let artifacts = {
            let mut rng = rand::thread_rng();
            compiler::compile(config, &state, &self.run_dir, Utc::now(), &mut rng)
        };

        // The commit task owns the guard: a caller that goes away mid-commit
        // leaves it running, and the next compile waits for it
        let store = Arc::clone(&self.store);
        let summary = artifacts.summary;
        tokio::spawn(async move {
            let _guard = guard;
            store.commit(&artifacts).await
        })
        .await
        .map_err(|e| Error::store(format!("Commit task failed: {}", e)))??;
        Ok(summary)
    }

    /// Stop accepting compiles
    ///
    /// Returns once the compile in flight has committed or failed. Compiles
    /// waiting on the guard, and any requested later, fail with
    /// [`Error::ShuttingDown`].
    pub async fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _guard = self.compile_lock.lock().await;
        info!("Policy engine stopped");
    }

    /// Register the router with the management service
    ///
    /// Failures are logged and returned; they never affect compiling.
    pub async fn enroll(&self) -> Result<EnrollOutcome> {
        let config = self.config().await;
        match self.source.enroll(&config).await {
            Ok(outcome) => {
                info!("Enrollment of {}: {:?}", config.router, outcome);
                Ok(outcome)
            }
            Err(e) => {
                warn!("Enrollment of {} failed: {}", config.router, e);
                Err(e)
            }
        }
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        // A full channel means nobody is keeping up; drop rather than block
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}
