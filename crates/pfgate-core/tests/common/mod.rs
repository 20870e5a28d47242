//! Test doubles and common utilities for contract tests
//!
//! The doubles record how the engine drives them so tests can assert on
//! call counts and overlap without a management service.

#![allow(dead_code)]

use pfgate_core::config::{GatewayConfig, Interface, InterfaceRole};
use pfgate_core::error::{Error, Result};
use pfgate_core::model::{RemoteState, Shaping, Subscriber};
use pfgate_core::traits::{EnrollOutcome, StateSource};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// A StateSource returning a configurable document
pub struct MockStateSource {
    /// Document returned by fetch_state()
    state: Arc<std::sync::Mutex<RemoteState>>,
    /// When set, fetch_state() fails with a remote error
    fail: Arc<AtomicBool>,
    /// Artificial latency of fetch_state()
    delay: Duration,
    /// Call counter for fetch_state()
    fetch_count: Arc<AtomicUsize>,
    /// Fetches currently running
    in_flight: Arc<AtomicUsize>,
    /// Highest number of fetches ever running at once
    max_in_flight: Arc<AtomicUsize>,
    /// Call counter for enroll()
    enroll_count: Arc<AtomicUsize>,
}

impl MockStateSource {
    pub fn new(state: RemoteState) -> Self {
        Self {
            state: Arc::new(std::sync::Mutex::new(state)),
            fail: Arc::new(AtomicBool::new(false)),
            delay: Duration::ZERO,
            fetch_count: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            enroll_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Delay every fetch
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Create a source that shares state and counters with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            state: Arc::clone(&other.state),
            fail: Arc::clone(&other.fail),
            delay: other.delay,
            fetch_count: Arc::clone(&other.fetch_count),
            in_flight: Arc::clone(&other.in_flight),
            max_in_flight: Arc::clone(&other.max_in_flight),
            enroll_count: Arc::clone(&other.enroll_count),
        }
    }

    /// Replace the document returned by later fetches
    pub fn set_state(&self, state: RemoteState) {
        *self.state.lock().unwrap() = state;
    }

    /// Make later fetches fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn enroll_count(&self) -> usize {
        self.enroll_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl StateSource for MockStateSource {
    async fn fetch_state(&self, _router: &str) -> Result<RemoteState> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::remote("service unavailable"));
        }
        Ok(self.state.lock().unwrap().clone())
    }

    async fn enroll(&self, _config: &GatewayConfig) -> Result<EnrollOutcome> {
        self.enroll_count.fetch_add(1, Ordering::SeqCst);
        Ok(EnrollOutcome::Enrolled)
    }

    fn source_name(&self) -> &'static str {
        "mock"
    }
}

/// One uplink (`wan`, default) and one subscriber interface (`wifi`)
pub fn two_interface_config() -> GatewayConfig {
    GatewayConfig::new("gw01")
        .with_interface(Interface::external("wan", "em0", "100M", "10.0.0.1").as_default())
        .with_interface(Interface::internal(
            "wifi",
            "em1",
            "50M",
            InterfaceRole::InternalSubscriber,
        ))
}

/// Two uplinks (`wan` default, `wan2`) and one subscriber interface
pub fn dual_uplink_config(load_balance: bool) -> GatewayConfig {
    GatewayConfig::new("gw01")
        .with_interface(Interface::external("wan", "em0", "100M", "10.0.0.1").as_default())
        .with_interface(Interface::external("wan2", "em2", "50M", "10.1.0.1"))
        .with_interface(Interface::internal(
            "wifi",
            "em1",
            "50M",
            InterfaceRole::InternalSubscriber,
        ))
        .with_load_balance(load_balance)
}

/// Active subscriber on `wifi`
pub fn subscriber(mac: &str, ip: &str, down: u32, up: u32) -> Subscriber {
    Subscriber::new(mac, ip, "wifi", Shaping::new(down, up))
}

/// State with a single active subscriber on `wifi`
pub fn single_subscriber_state() -> RemoteState {
    RemoteState {
        subs: vec![subscriber("aa:bb:cc:dd:ee:ff", "10.10.0.10", 10, 5)],
        ..Default::default()
    }
}

/// `pf.conf` lines that start with `prefix`
pub fn lines_starting_with<'a>(text: &'a str, prefix: &str) -> Vec<&'a str> {
    text.lines().filter(|l| l.starts_with(prefix)).collect()
}
