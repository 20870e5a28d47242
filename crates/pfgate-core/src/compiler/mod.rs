//! Policy compiler
//!
//! [`compile`] turns a [`GatewayConfig`] plus one fetch of [`RemoteState`]
//! into the four artifacts the gateway needs:
//!
//! - `pf.conf`: rules and queues, built through [`sections::RulesetBuilder`]
//! - `dhcpd.conf`: subnet pools with static reservations
//! - the allow-list table file (every active identity address)
//! - the subscriber table file (active subscriber addresses)
//!
//! Compilation is synchronous and has no side effects. Persisting the
//! result is the job of an [`ArtifactStore`](crate::traits::ArtifactStore).
//!
//! ## Exclusion
//!
//! An identity whose bound interface is unknown, or is an uplink, is left
//! out completely: no queue, no rule, no table entry.

pub mod dhcp;
pub mod queues;
pub mod rules;
pub mod sections;

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::config::{GatewayConfig, Interface};
use crate::model::{IdentityKind, RemoteState};
use queues::QueueAllocator;
use rules::RuleCompiler;
use sections::RulesetBuilder;

/// File name of the generated packet filter configuration
pub const PF_CONF: &str = "pf.conf";

/// File name of the generated DHCP server configuration
pub const DHCPD_CONF: &str = "dhcpd.conf";

/// One generated file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// File name relative to the run directory
    pub name: String,
    pub content: String,
    /// Keep the previous version as `<name>.old`
    pub keep_backup: bool,
}

impl Artifact {
    fn new(name: impl Into<String>, content: String, keep_backup: bool) -> Self {
        Self {
            name: name.into(),
            content,
            keep_backup,
        }
    }
}

/// Counts reported for a compile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileSummary {
    /// Identities that were active
    pub active: usize,
    /// Identities that got queues and rules
    pub shaped: usize,
}

/// Output of one compile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub allow_list: Artifact,
    pub subscriber_list: Artifact,
    pub pf_conf: Artifact,
    pub dhcpd_conf: Artifact,
    pub summary: CompileSummary,
}

impl Artifacts {
    /// All artifacts in write order: IP lists first, then `pf.conf`, then
    /// `dhcpd.conf`
    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        [
            &self.allow_list,
            &self.subscriber_list,
            &self.pf_conf,
            &self.dhcpd_conf,
        ]
        .into_iter()
    }
}

/// Compile the gateway policy
///
/// # Parameters
///
/// - `config`: local gateway model
/// - `state`: subscribers and vouchers from the management service
/// - `run_dir`: directory the table files are referenced from
/// - `now`: reference time for voucher validity
/// - `rng`: source for DHCP host-name disambiguators
pub fn compile<R: Rng + ?Sized>(
    config: &GatewayConfig,
    state: &RemoteState,
    run_dir: &Path,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Artifacts {
    let mut out = RulesetBuilder::new();
    let rules = RuleCompiler::new(config);
    let mut allocator = QueueAllocator::new();

    rules.macros(&mut out);
    rules.tables(run_dir, &mut out);
    rules.options(&mut out);
    allocator.build_tree(config, &mut out);
    rules.normalization(&mut out);
    rules.nat(&mut out);
    rules.default_deny(&mut out);
    rules.default_queues(&mut out);
    rules.pass_rules(&mut out);

    let uplinks: Vec<&Interface> = config.external_interfaces().collect();
    let identities = state.identities(now);
    let mut allowed = AddressList::default();
    let mut subscribers = AddressList::default();
    let mut summary = CompileSummary {
        active: identities.len(),
        shaped: 0,
    };

    for identity in &identities {
        let Some(bound) = config
            .interface(&identity.bound_to)
            .filter(|i| !i.role.is_external())
        else {
            tracing::debug!(
                "{:?} {} is bound to '{}', which is not an internal interface here; excluded",
                identity.kind,
                identity.tag,
                identity.bound_to
            );
            continue;
        };

        let leaves = allocator.allocate_leaves(identity, bound, &uplinks, &mut out);
        if leaves.is_empty() {
            continue;
        }
        rules.identity_rules(identity, bound, &leaves, &mut out);

        allowed.push(identity.address);
        if identity.kind == IdentityKind::Subscriber {
            subscribers.push(identity.address);
        }
        summary.shaped += 1;
    }

    rules.load_balance(&mut out);

    let pf_conf = format!(
        "# pf.conf for {}, generated by pfgate; local edits are overwritten\n{}",
        config.router,
        out.render()
    );
    let dhcpd_conf = dhcp::compile_pools(&config.dhcp_pools, &state.subs, rng);

    Artifacts {
        allow_list: Artifact::new(&config.allow_list, allowed.render(), true),
        subscriber_list: Artifact::new(&config.subscriber_list, subscribers.render(), true),
        pf_conf: Artifact::new(PF_CONF, pf_conf, false),
        dhcpd_conf: Artifact::new(DHCPD_CONF, dhcpd_conf, false),
        summary,
    }
}

/// Deduplicated addresses in insertion order
#[derive(Debug, Default)]
struct AddressList {
    seen: HashSet<Ipv4Addr>,
    addresses: Vec<Ipv4Addr>,
}

impl AddressList {
    fn push(&mut self, address: Ipv4Addr) {
        if self.seen.insert(address) {
            self.addresses.push(address);
        }
    }

    /// One address per line, newline terminated
    fn render(&self) -> String {
        self.addresses.iter().map(|a| format!("{}\n", a)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterfaceRole;
    use crate::model::{Shaping, Subscriber, Voucher};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn config() -> GatewayConfig {
        GatewayConfig::new("gw01")
            .with_interface(Interface::external("wan", "em0", "100M", "10.0.0.1").as_default())
            .with_interface(Interface::internal(
                "wifi",
                "em1",
                "50M",
                InterfaceRole::InternalSubscriber,
            ))
    }

    #[test]
    fn test_ip_lists_partition() {
        let state = RemoteState {
            subs: vec![
                Subscriber::new("aa:bb:cc:dd:ee:ff", "10.10.0.10", "wifi", Shaping::new(10, 5)),
                Subscriber::new("aa:bb:cc:dd:ee:01", "10.10.0.11", "nowhere", Shaping::new(10, 5)),
            ],
            vouchers: vec![Voucher::new("v1", "10.10.0.20", "wifi", Shaping::new(2, 1))],
        };

        let artifacts = compile(
            &config(),
            &state,
            Path::new("/run/pfgate"),
            Utc::now(),
            &mut StdRng::seed_from_u64(0),
        );

        assert_eq!(artifacts.allow_list.content, "10.10.0.20\n10.10.0.10\n");
        assert_eq!(artifacts.subscriber_list.content, "10.10.0.10\n");
        assert!(artifacts.allow_list.keep_backup);
        assert!(!artifacts.pf_conf.keep_backup);
        assert_eq!(
            artifacts.summary,
            CompileSummary {
                active: 3,
                shaped: 2
            }
        );
    }

    #[test]
    fn test_identity_bound_to_uplink_is_excluded() {
        let state = RemoteState {
            subs: vec![Subscriber::new(
                "aa:bb:cc:dd:ee:ff",
                "10.10.0.10",
                "wan",
                Shaping::new(10, 5),
            )],
            ..Default::default()
        };
        let artifacts = compile(
            &config(),
            &state,
            Path::new("/run/pfgate"),
            Utc::now(),
            &mut StdRng::seed_from_u64(0),
        );
        assert!(!artifacts.pf_conf.content.contains("aabbccddeeff"));
        assert!(artifacts.allow_list.content.is_empty());
    }

    #[test]
    fn test_write_order() {
        let artifacts = compile(
            &config(),
            &RemoteState::default(),
            Path::new("/run/pfgate"),
            Utc::now(),
            &mut StdRng::seed_from_u64(0),
        );
        let names: Vec<_> = artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["allowed.txt", "subsexpr.txt", "pf.conf", "dhcpd.conf"]);
    }
}
