// # pfgated - pfgate Daemon
//
// The pfgated daemon is a thin integration layer around pfgate-core:
// 1. Reading configuration from environment variables
// 2. Loading the gateway model from `<rundir>/config.json`
// 3. Logging in to and enrolling with the management service
// 4. Compiling at startup, on socket commands, on SIGHUP and on a timer
//
// All policy logic lives in pfgate-core.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Management Service
// - `PFGATE_SERVICE_URL`: Base URL (default `http://127.0.0.1/api/v1/`)
// - `PFGATE_CREDS`: Base64 `user:password` for the login endpoint (required)
// - `PFGATE_FETCH_TIMEOUT_SECS`: Upper bound on one state fetch (default 30)
//
// ### Local
// - `PFGATE_RUNDIR`: Run directory holding `config.json` and the generated
//   artifacts (default `./rundir/`)
// - `PFGATE_SOCKET`: Control socket path (default `/tmp/pfgated.sock`)
// - `PFGATE_MAX_BUFF`: Maximum control command size (default 1024)
// - `PFGATE_RELOAD_INTERVAL_SECS`: Periodic recompile, 0 or unset disables
// - `PFGATE_MODE`: `dry-run` keeps artifacts in memory only
// - `PFGATE_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export PFGATE_CREDS=$(printf 'gw01:secret' | base64)
// export PFGATE_RUNDIR=/var/pfgate/
// export PFGATE_RELOAD_INTERVAL_SECS=300
//
// pfgated
// ```

mod control;

use anyhow::{Context, Result};
use pfgate_core::config::{EngineConfig, GatewayConfig};
use pfgate_core::engine::{EngineEvent, PolicyEngine};
use pfgate_core::store::{FileArtifactStore, MemoryArtifactStore};
use pfgate_core::traits::ArtifactStore;
use pfgate_remote::{Credentials, HttpStateSource, ServiceClient, Session};
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use control::ControlSocket;

/// Name of the gateway model inside the run directory
const GATEWAY_CONFIG_FILE: &str = "config.json";

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum PfgateExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<PfgateExitCode> for ExitCode {
    fn from(code: PfgateExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    service_url: String,
    credentials: String,
    run_dir: PathBuf,
    socket_path: PathBuf,
    max_buff: usize,
    reload_interval_secs: Option<u64>,
    fetch_timeout_secs: u64,
    dry_run: bool,
    mode: String,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let mode = env::var("PFGATE_MODE").unwrap_or_default().to_lowercase();
        Ok(Self {
            service_url: env::var("PFGATE_SERVICE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1/api/v1/".to_string()),
            credentials: env::var("PFGATE_CREDS").context("PFGATE_CREDS is required")?,
            run_dir: env::var("PFGATE_RUNDIR")
                .unwrap_or_else(|_| "./rundir/".to_string())
                .into(),
            socket_path: env::var("PFGATE_SOCKET")
                .unwrap_or_else(|_| "/tmp/pfgated.sock".to_string())
                .into(),
            max_buff: parse_var("PFGATE_MAX_BUFF")?.unwrap_or(1024),
            reload_interval_secs: parse_var("PFGATE_RELOAD_INTERVAL_SECS")?.filter(|s| *s > 0),
            fetch_timeout_secs: parse_var("PFGATE_FETCH_TIMEOUT_SECS")?.unwrap_or(30),
            dry_run: mode == "dry-run",
            mode,
            log_level: env::var("PFGATE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.credentials.trim().is_empty() {
            anyhow::bail!(
                "PFGATE_CREDS is required. \
                Set it via: export PFGATE_CREDS=$(printf 'user:password' | base64)"
            );
        }

        if !self.service_url.starts_with("https://") && !self.service_url.starts_with("http://") {
            anyhow::bail!(
                "PFGATE_SERVICE_URL must use HTTP or HTTPS scheme. Got: {}",
                self.service_url
            );
        }

        if self.run_dir.as_os_str().is_empty() {
            anyhow::bail!("PFGATE_RUNDIR cannot be empty");
        }

        if self.socket_path.as_os_str().is_empty() {
            anyhow::bail!("PFGATE_SOCKET cannot be empty");
        }

        if !(64..=65536).contains(&self.max_buff) {
            anyhow::bail!(
                "PFGATE_MAX_BUFF must be between 64 and 65536 bytes. Got: {}",
                self.max_buff
            );
        }

        if let Some(interval) = self.reload_interval_secs {
            if !(10..=86400).contains(&interval) {
                anyhow::bail!(
                    "PFGATE_RELOAD_INTERVAL_SECS must be 0 or between 10 and 86400 seconds. Got: {}",
                    interval
                );
            }
        }

        if !(1..=300).contains(&self.fetch_timeout_secs) {
            anyhow::bail!(
                "PFGATE_FETCH_TIMEOUT_SECS must be between 1 and 300 seconds. Got: {}",
                self.fetch_timeout_secs
            );
        }

        match self.mode.as_str() {
            "" | "live" | "dry-run" => {}
            _ => anyhow::bail!(
                "PFGATE_MODE '{}' is not valid. Valid modes: live, dry-run",
                self.mode
            ),
        }

        // Validate log level
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "PFGATE_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    fn gateway_config_path(&self) -> PathBuf {
        self.run_dir.join(GATEWAY_CONFIG_FILE)
    }
}

/// Parse an optional numeric environment variable
fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} must be a number. Got: {}", name, value)),
        Err(_) => Ok(None),
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return PfgateExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return PfgateExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return PfgateExitCode::ConfigError.into();
    }

    info!("Starting pfgated daemon");

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return PfgateExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        let gateway = match GatewayConfig::load(config.gateway_config_path()).await {
            Ok(gateway) => gateway,
            Err(e) => {
                error!("Unable to load gateway model: {}", e);
                return PfgateExitCode::ConfigError;
            }
        };
        info!(
            "Gateway model loaded: router {}, {} interface(s), {} DHCP pool(s)",
            gateway.router,
            gateway.interfaces.len(),
            gateway.dhcp_pools.len()
        );

        if let Err(e) = run_daemon(config, gateway).await {
            error!("Daemon error: {:#}", e);
            PfgateExitCode::RuntimeError
        } else {
            PfgateExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config, gateway: GatewayConfig) -> Result<()> {
    let store: Box<dyn ArtifactStore> = if config.dry_run {
        warn!("Running in DRY-RUN mode - artifacts are kept in memory only");
        Box::new(MemoryArtifactStore::new())
    } else {
        Box::new(FileArtifactStore::new(&config.run_dir).await?)
    };

    let client = ServiceClient::new(&config.service_url)?;
    let session = Arc::new(Session::new(client, Credentials::new(&config.credentials)?));
    if let Err(e) = session.refresh().await {
        warn!("Startup login failed, will retry on first fetch: {}", e);
    }

    let engine_config = EngineConfig {
        fetch_timeout_secs: config.fetch_timeout_secs,
        ..Default::default()
    };
    let (engine, events) = PolicyEngine::new(
        Box::new(HttpStateSource::new(Arc::clone(&session))),
        store,
        gateway,
        &config.run_dir,
        engine_config,
    )?;
    let engine = Arc::new(engine);
    tokio::spawn(log_events(events));

    // Enrollment and the first compile never block startup
    if let Err(e) = engine.enroll().await {
        warn!("Startup enrollment failed, continuing with the current registration: {}", e);
    }
    if let Err(e) = engine.compile().await {
        warn!("Initial compile failed, keeping existing artifacts: {}", e);
    }

    let socket = ControlSocket::bind(&config.socket_path, config.max_buff)?;
    let listener = tokio::spawn(socket.serve(Arc::clone(&engine)));

    let reloader = config.reload_interval_secs.map(|secs| {
        info!("Recompiling every {}s", secs);
        tokio::spawn(periodic_compile(Arc::clone(&engine), Duration::from_secs(secs)))
    });

    info!("Daemon initialized successfully");

    let result = wait_for_shutdown(&engine, &config.gateway_config_path()).await;

    // Let a running commit finish before any task is cancelled
    engine.shutdown().await;
    listener.abort();
    if let Some(reloader) = reloader {
        reloader.abort();
    }
    ControlSocket::cleanup(&config.socket_path);

    match result {
        Ok(signal) => {
            info!("Received shutdown signal: {}", signal);
            info!("Shutting down daemon");
            Ok(())
        }
        Err(e) => {
            error!("Shutdown error: {}", e);
            Err(e)
        }
    }
}

/// Recompile on a fixed interval
async fn periodic_compile(engine: Arc<PolicyEngine>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately; startup already compiled
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(e) = engine.compile().await {
            warn!("Scheduled compile failed: {}", e);
        }
    }
}

/// Drain engine events into the log
async fn log_events(mut events: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        debug!("Engine event: {:?}", event);
    }
}

/// Reload the gateway model and recompile
async fn reload(engine: &PolicyEngine, path: &Path) {
    let gateway = match GatewayConfig::load(path).await {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("Reload failed, keeping current gateway model: {}", e);
            return;
        }
    };
    if let Err(e) = engine.reload_config(gateway).await {
        error!("Reload rejected: {}", e);
        return;
    }
    if let Err(e) = engine.compile().await {
        warn!("Compile after reload failed: {}", e);
    }
}

/// Serve SIGHUP reloads until SIGTERM or SIGINT
///
/// # Returns
///
/// Returns the name of the signal that ended the daemon.
async fn wait_for_shutdown(engine: &PolicyEngine, gateway_path: &Path) -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;
    let mut sighup = signal(SignalKind::hangup())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGHUP handler: {}", e))?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => return Ok("SIGTERM"),
            _ = sigint.recv() => return Ok("SIGINT"),
            _ = sighup.recv() => {
                info!("SIGHUP received, reloading {}", gateway_path.display());
                reload(engine, gateway_path).await;
            }
        }
    }
}
