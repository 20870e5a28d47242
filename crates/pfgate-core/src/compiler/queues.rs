//! Bandwidth queue hierarchy
//!
//! Three tiers:
//! 1. a root queue per interface capped at its speed, with a `<if>def`
//!    default child;
//! 2. on the default uplink only, `selfq` for router traffic and an
//!    `apps` queue split into interactive and bulk SSH;
//! 3. one leaf per active identity and interface: an ingress leaf on the
//!    bound interface (with burst) and an egress leaf on each uplink.

use std::collections::HashSet;

use super::sections::{RulesetBuilder, Section};
use crate::config::{GatewayConfig, Interface};
use crate::model::ShapedIdentity;

/// Reservation of the per-interface default queue
pub const DEFAULT_QUEUE_BANDWIDTH: &str = "2M";

/// Guaranteed minimum for leaf queues, in Mbit/s
pub const LEAF_MIN_MBIT: u32 = 5;

pub const SELF_QUEUE: &str = "selfq";
pub const APPS_QUEUE: &str = "apps";
pub const SSH_INTERACTIVE_QUEUE: &str = "ssh_interactive";
pub const SSH_BULK_QUEUE: &str = "ssh_bulk";

/// Name of an interface's default queue
pub fn default_queue_name(interface: &str) -> String {
    format!("{}def", interface)
}

/// Name of an identity's leaf queue on an interface
pub fn leaf_queue_name(tag: &str, interface: &str) -> String {
    format!("{}{}", tag, interface)
}

/// Leaf queues allocated for one identity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafQueues {
    /// Leaf on the bound (internal) interface
    pub ingress: Option<String>,
    /// `(external interface, leaf)` pairs
    pub egress: Vec<(String, String)>,
}

impl LeafQueues {
    pub fn is_empty(&self) -> bool {
        self.ingress.is_none() && self.egress.is_empty()
    }
}

/// Builds the queue tree and hands out unique leaf names
#[derive(Debug, Default)]
pub struct QueueAllocator {
    names: HashSet<String>,
}

impl QueueAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit tiers 1 and 2 into [`Section::Queues`]
    ///
    /// A validated config never collides here; a name that is already
    /// taken is skipped with a warning, along with everything under it.
    pub fn build_tree(&mut self, config: &GatewayConfig, out: &mut RulesetBuilder) {
        for interface in &config.interfaces {
            if !self.claim(&interface.name) {
                tracing::warn!(
                    "Queue name {} already allocated, skipping root queue",
                    interface.name
                );
                continue;
            }
            out.push(
                Section::Queues,
                format!(
                    "queue {} on {{ ${} }} bandwidth {}",
                    interface.name, interface.name, interface.speed
                ),
            );

            let default_queue = default_queue_name(&interface.name);
            if !self.claim(&default_queue) {
                tracing::warn!(
                    "Queue name {} already allocated, skipping default queue",
                    default_queue
                );
                continue;
            }
            out.push(
                Section::Queues,
                format!(
                    "queue {} parent {} bandwidth {} default",
                    default_queue, interface.name, DEFAULT_QUEUE_BANDWIDTH
                ),
            );
        }

        if let Some(uplink) = config.default_uplink() {
            let router_queues = [SELF_QUEUE, APPS_QUEUE, SSH_INTERACTIVE_QUEUE, SSH_BULK_QUEUE];
            if let Some(taken) = router_queues.iter().find(|name| self.names.contains(**name)) {
                tracing::warn!("Queue name {} already allocated, skipping router queues", taken);
                return;
            }
            for name in router_queues {
                self.claim(name);
            }
            let lines = [
                format!(
                    "queue {} parent {} bandwidth 10M min 5M max 10M burst 15M for 100ms",
                    SELF_QUEUE, uplink.name
                ),
                format!("queue {} parent {} bandwidth 10M", APPS_QUEUE, uplink.name),
                format!(
                    "queue {} parent {} bandwidth 5M min 2M",
                    SSH_INTERACTIVE_QUEUE, APPS_QUEUE
                ),
                format!(
                    "queue {} parent {} bandwidth 5M max 5M",
                    SSH_BULK_QUEUE, APPS_QUEUE
                ),
            ];
            for line in lines {
                out.push(Section::Queues, line);
            }
        }
    }

    /// Emit tier 3 leaves for one identity into [`Section::IdentityQueues`]
    ///
    /// `bound` is the identity's internal interface, `uplinks` the external
    /// interfaces. A leaf whose name is already taken is skipped.
    pub fn allocate_leaves(
        &mut self,
        identity: &ShapedIdentity,
        bound: &Interface,
        uplinks: &[&Interface],
        out: &mut RulesetBuilder,
    ) -> LeafQueues {
        let mut leaves = LeafQueues::default();
        let shaping = identity.shaping;

        let name = leaf_queue_name(&identity.tag, &bound.name);
        if self.claim(&name) {
            out.push(
                Section::IdentityQueues,
                format!(
                    "queue {} parent {} bandwidth {}M min {}M max {}M burst {}M for {}ms",
                    name,
                    bound.name,
                    shaping.downstream,
                    shaping.downstream.min(LEAF_MIN_MBIT),
                    shaping.downstream,
                    shaping.burst,
                    shaping.burst_duration_ms
                ),
            );
            leaves.ingress = Some(name);
        } else {
            tracing::warn!("Queue name {} already allocated, skipping ingress leaf", name);
        }

        for uplink in uplinks {
            let name = leaf_queue_name(&identity.tag, &uplink.name);
            if !self.claim(&name) {
                tracing::warn!("Queue name {} already allocated, skipping egress leaf", name);
                continue;
            }
            out.push(
                Section::IdentityQueues,
                format!(
                    "queue {} parent {} bandwidth {}M min {}M max {}M",
                    name,
                    uplink.name,
                    shaping.upstream,
                    shaping.upstream.min(LEAF_MIN_MBIT),
                    shaping.upstream
                ),
            );
            leaves.egress.push((uplink.name.clone(), name));
        }

        leaves
    }

    /// Reserve a name; false when it was already taken
    fn claim(&mut self, name: &str) -> bool {
        self.names.insert(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterfaceRole;
    use crate::model::{RemoteState, Shaping, Subscriber};

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
    fn test_tree_without_identities() {
        let config = config();
        let mut out = RulesetBuilder::new();
        QueueAllocator::new().build_tree(&config, &mut out);

        let lines = out.lines(Section::Queues);
        assert!(lines.contains(&"queue wan on { $wan } bandwidth 100M".to_string()));
        assert!(lines.contains(&"queue wifidef parent wifi bandwidth 2M default".to_string()));
        assert_eq!(lines.iter().filter(|l| l.contains(" parent wan ")).count(), 3);
        assert!(out.lines(Section::IdentityQueues).is_empty());
    }

    #[test]
    fn test_no_uplink_tier_without_default() {
        let config = GatewayConfig::new("gw01")
            .with_interface(Interface::external("wan", "em0", "100M", "10.0.0.1"));
        let mut out = RulesetBuilder::new();
        QueueAllocator::new().build_tree(&config, &mut out);

        assert_eq!(out.lines(Section::Queues).len(), 2);
    }

    #[test]
    fn test_leaf_burst_only_on_ingress() {
        let config = config();
        let state = RemoteState {
            subs: vec![Subscriber::new(
                "aa:bb:cc:dd:ee:ff",
                "10.10.0.10",
                "wifi",
                Shaping::new(10, 5).with_burst(20, 250),
            )],
            ..Default::default()
        };
        let identity = &state.identities(chrono::Utc::now())[0];

        let mut out = RulesetBuilder::new();
        let mut allocator = QueueAllocator::new();
        allocator.build_tree(&config, &mut out);
        let bound = config.interface("wifi").unwrap();
        let uplinks: Vec<_> = config.external_interfaces().collect();
        let leaves = allocator.allocate_leaves(identity, bound, &uplinks, &mut out);

        assert_eq!(leaves.ingress.as_deref(), Some("aabbccddeeffwifi"));
        assert_eq!(
            leaves.egress,
            vec![("wan".to_string(), "aabbccddeeffwan".to_string())]
        );
        let lines = out.lines(Section::IdentityQueues);
        assert_eq!(
            lines[0],
            "queue aabbccddeeffwifi parent wifi bandwidth 10M min 5M max 10M burst 20M for 250ms"
        );
        assert_eq!(
            lines[1],
            "queue aabbccddeeffwan parent wan bandwidth 5M min 5M max 5M"
        );
    }

    #[test]
    fn test_duplicate_leaf_is_skipped() {
        let config = config();
        let state = RemoteState {
            subs: vec![
                Subscriber::new("aa:bb:cc:dd:ee:ff", "10.10.0.10", "wifi", Shaping::new(10, 5)),
                Subscriber::new("aabbccddeeff", "10.10.0.11", "wifi", Shaping::new(10, 5)),
            ],
            ..Default::default()
        };
        let ids = state.identities(chrono::Utc::now());

        let mut out = RulesetBuilder::new();
        let mut allocator = QueueAllocator::new();
        let bound = config.interface("wifi").unwrap();
        let uplinks: Vec<_> = config.external_interfaces().collect();
        assert!(!allocator.allocate_leaves(&ids[0], bound, &uplinks, &mut out).is_empty());
        assert!(allocator.allocate_leaves(&ids[1], bound, &uplinks, &mut out).is_empty());
        assert_eq!(out.lines(Section::IdentityQueues).len(), 2);
    }

    #[test]
    fn test_colliding_tree_names_emitted_once() {
        let config = config()
            .with_interface(Interface::internal(
                "wifidef",
                "em2",
                "10M",
                InterfaceRole::InternalLan,
            ))
            .with_interface(Interface::internal("apps", "em3", "10M", InterfaceRole::InternalLan));
        let mut out = RulesetBuilder::new();
        QueueAllocator::new().build_tree(&config, &mut out);

        let lines = out.lines(Section::Queues);
        let mut names: Vec<&str> = lines
            .iter()
            .filter_map(|line| line.split_whitespace().nth(1))
            .collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
        assert!(!lines.iter().any(|line| line.starts_with("queue selfq")));
    }

    #[test]
    fn test_small_rate_clamps_minimum() {
        let config = config();
        let state = RemoteState {
            subs: vec![Subscriber::new("v", "10.10.0.10", "wifi", Shaping::new(2, 1))],
            ..Default::default()
        };
        let identity = &state.identities(chrono::Utc::now())[0];
        let mut out = RulesetBuilder::new();
        let uplinks: Vec<_> = config.external_interfaces().collect();
        QueueAllocator::new().allocate_leaves(
            identity,
            config.interface("wifi").unwrap(),
            &uplinks,
            &mut out,
        );

        assert!(out.lines(Section::IdentityQueues)[1].ends_with("bandwidth 1M min 1M max 1M"));
    }
}
