//! Rule generation for `pf.conf`
//!
//! Everything except queues is emitted here: macros, tables, options,
//! normalization, NAT and portal redirects, the default block, default
//! queue assignment, per-role pass rules, per-identity rules and load
//! balancing routes. What gets emitted for an interface depends on its
//! [`InterfaceRole`].

use std::path::Path;

use super::queues::{self, LeafQueues};
use super::sections::{RulesetBuilder, Section};
use crate::config::{GatewayConfig, Interface, InterfaceRole};
use crate::model::ShapedIdentity;

/// Reserved and unroutable networks blocked on ingress
pub const MARTIANS: &[&str] = &[
    "0.0.0.0/8",
    "169.254.0.0/16",
    "192.0.0.0/24",
    "192.0.2.0/24",
    "224.0.0.0/3",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
];

/// Node exporter port reachable from internal networks
const MONITORING_PORT: u16 = 9100;

/// Device API port reachable from subscriber networks
const API_PORT: u16 = 667;

/// Emits every non-queue section for one gateway config
pub struct RuleCompiler<'a> {
    config: &'a GatewayConfig,
}

impl<'a> RuleCompiler<'a> {
    pub fn new(config: &'a GatewayConfig) -> Self {
        Self { config }
    }

    /// `<name> = "<device>"` for each interface
    pub fn macros(&self, out: &mut RulesetBuilder) {
        for interface in &self.config.interfaces {
            out.push(
                Section::Macros,
                format!("{} = \"{}\"", interface.name, interface.device),
            );
        }
    }

    /// Allow-list, subscriber, bad-host and martian tables
    ///
    /// The persist files live in `run_dir`, next to the other artifacts.
    pub fn tables(&self, run_dir: &Path, out: &mut RulesetBuilder) {
        out.push(
            Section::Tables,
            format!(
                "table <allowed> persist file \"{}\"",
                run_dir.join(&self.config.allow_list).display()
            ),
        );
        out.push(
            Section::Tables,
            format!(
                "table <subsexpr> persist file \"{}\"",
                run_dir.join(&self.config.subscriber_list).display()
            ),
        );
        out.push(Section::Tables, "table <bad_hosts> persist");
        out.push(
            Section::Tables,
            format!("table <martians> {{ {} }}", MARTIANS.join(" ")),
        );
    }

    pub fn options(&self, out: &mut RulesetBuilder) {
        out.push(Section::Options, "set block-policy drop");
        out.push(Section::Options, "set loginterface egress");
        out.push(Section::Options, "set skip on lo0");
    }

    pub fn normalization(&self, out: &mut RulesetBuilder) {
        out.push(
            Section::Normalization,
            "match in all scrub (no-df random-id max-mss 1440)",
        );
    }

    /// Masquerading on uplinks, portal redirects on internal interfaces
    pub fn nat(&self, out: &mut RulesetBuilder) {
        let captive = self.config.captive_portal_port;
        let portal = self.config.subs_portal_port;

        for interface in &self.config.interfaces {
            let name = &interface.name;
            match interface.role {
                InterfaceRole::External => {
                    out.push(
                        Section::Nat,
                        format!(
                            "match out on {{ ${name} }} inet from !(${name}:network) to any nat-to (${name}:0)"
                        ),
                    );
                }
                InterfaceRole::InternalSubscriber => {
                    out.push(
                        Section::Nat,
                        format!(
                            "match in on {{ ${name} }} proto tcp from <subsexpr> to any port {{ 80, 443 }} rdr-to 127.0.0.1 port {portal}"
                        ),
                    );
                    out.push(
                        Section::Nat,
                        format!(
                            "match in on {{ ${name} }} proto tcp from !<allowed> to any port {{ 80, 443 }} rdr-to 127.0.0.1 port {captive}"
                        ),
                    );
                }
                InterfaceRole::InternalLan | InterfaceRole::Management => {
                    out.push(
                        Section::Nat,
                        format!(
                            "match in on {{ ${name} }} proto tcp from !<allowed> to any port {{ 80, 443 }} rdr-to 127.0.0.1 port {captive}"
                        ),
                    );
                }
            }
            out.push(
                Section::Nat,
                format!("match out on {{ ${name} }} proto udp set prio 4"),
            );
        }
    }

    pub fn default_deny(&self, out: &mut RulesetBuilder) {
        out.push(Section::DefaultDeny, "block all");
        out.push(Section::DefaultDeny, "block in quick from <bad_hosts>");
        out.push(Section::DefaultDeny, "block in quick from <martians>");
    }

    /// Unclassified egress falls into `<if>def`
    pub fn default_queues(&self, out: &mut RulesetBuilder) {
        for interface in &self.config.interfaces {
            out.push(
                Section::DefaultQueue,
                format!(
                    "block return out on {{ ${} }} inet all set queue {}",
                    interface.name,
                    queues::default_queue_name(&interface.name)
                ),
            );
        }
    }

    /// Role-dependent pass rules
    pub fn pass_rules(&self, out: &mut RulesetBuilder) {
        for interface in &self.config.interfaces {
            match interface.role {
                InterfaceRole::External => self.uplink_pass_rules(interface, out),
                InterfaceRole::InternalSubscriber => self.subscriber_pass_rules(interface, out),
                InterfaceRole::InternalLan | InterfaceRole::Management => {
                    self.lan_pass_rules(interface, out)
                }
            }
        }
    }

    fn uplink_pass_rules(&self, interface: &Interface, out: &mut RulesetBuilder) {
        let name = &interface.name;
        out.push(
            Section::PassRules,
            format!("pass out on {{ ${name} }} proto {{ udp, tcp }} to any port 53"),
        );
        if interface.default {
            out.push(
                Section::PassRules,
                format!(
                    "pass in on {{ ${name} }} inet proto tcp from any to ${name}:0 port 22 keep state (max-src-conn-rate 10/10, overload <bad_hosts> flush global) set queue ({}, {})",
                    queues::SSH_INTERACTIVE_QUEUE,
                    queues::SSH_BULK_QUEUE
                ),
            );
            out.push(
                Section::PassRules,
                format!(
                    "pass out on {{ ${name} }} from {{ ${name}:0 }} to any set queue {}",
                    queues::SELF_QUEUE
                ),
            );
        }
        out.push(
            Section::PassRules,
            format!("pass out on {{ ${name} }} inet proto icmp from {{ ${name}:0 }} to any"),
        );
        out.push(
            Section::PassRules,
            format!("pass out on {{ ${name} }} from {{ ${name}:0 }} to any"),
        );
    }

    fn subscriber_pass_rules(&self, interface: &Interface, out: &mut RulesetBuilder) {
        let name = &interface.name;
        self.internal_base_rules(interface, &[22, API_PORT], out);
        let rules = [
            format!("pass in quick on {{ ${name} }} inet proto tcp from any to ${name}:0 port = 22 keep state"),
            format!(
                "pass in quick on {{ ${name} }} inet proto tcp from any to ${name}:0 port = {MONITORING_PORT} keep state"
            ),
            format!(
                "pass in quick on {{ ${name} }} inet proto udp from any port = bootpc to 255.255.255.255 port = bootps keep state"
            ),
            format!(
                "pass in quick on {{ ${name} }} inet proto udp from any port = bootpc to {{ ${name}:0 }} port = bootps keep state"
            ),
            format!(
                "pass out quick on {{ ${name} }} inet proto udp from {{ ${name}:0 }} port = bootps to any port = bootpc keep state"
            ),
        ];
        for rule in rules {
            out.push(Section::PassRules, rule);
        }
    }

    fn lan_pass_rules(&self, interface: &Interface, out: &mut RulesetBuilder) {
        self.internal_base_rules(interface, &[], out);
    }

    /// DNS in, self egress, and the portal ports plus `extra_ports`
    fn internal_base_rules(&self, interface: &Interface, extra_ports: &[u16], out: &mut RulesetBuilder) {
        let name = &interface.name;
        let ports = [self.config.captive_portal_port, self.config.subs_portal_port]
            .iter()
            .chain(extra_ports)
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        out.push(
            Section::PassRules,
            format!("pass in on {{ ${name} }} proto {{ udp, tcp }} to any port 53"),
        );
        out.push(
            Section::PassRules,
            format!("pass out on {{ ${name} }} from {{ ${name}:0 }}"),
        );
        out.push(
            Section::PassRules,
            format!(
                "pass in on {{ ${name} }} inet proto tcp from any to {{ ${name}:0, 127.0.0.1 }} port {{ {ports} }}"
            ),
        );
    }

    /// Attach an identity to its leaf queues
    ///
    /// Ingress traffic from the identity's address is tagged on the bound
    /// interface; egress rules on each uplink pick the tag up again.
    pub fn identity_rules(
        &self,
        identity: &ShapedIdentity,
        bound: &Interface,
        leaves: &LeafQueues,
        out: &mut RulesetBuilder,
    ) {
        let tag = &identity.tag;

        if let Some(leaf) = &leaves.ingress {
            let route = identity
                .gateway
                .as_ref()
                .map(|gw| format!(" route-to {}", gw))
                .unwrap_or_default();
            out.push(
                Section::IdentityPassRules,
                format!(
                    "pass in on ${} from {}{} set queue {} tag \"{}\"",
                    bound.name, identity.address, route, leaf, tag
                ),
            );
        }

        let prio = if identity.priority > 0 {
            format!(" set prio {}", identity.priority)
        } else {
            String::new()
        };
        for (uplink, leaf) in &leaves.egress {
            out.push(
                Section::IdentityPassRules,
                format!(
                    "pass out on ${} set queue {}{} tagged \"{}\"",
                    uplink, leaf, prio, tag
                ),
            );
        }
    }

    /// Gateway pinning and round-robin egress across all uplinks
    pub fn load_balance(&self, out: &mut RulesetBuilder) {
        if !self.config.load_balance {
            return;
        }

        let uplinks: Vec<&Interface> = self.config.external_interfaces().collect();
        if uplinks.len() < 2 {
            tracing::debug!("Load balancing enabled with fewer than two uplinks, nothing to emit");
            return;
        }

        let primary = self.config.default_uplink().unwrap_or(uplinks[0]);
        for uplink in uplinks.iter().filter(|u| u.name != primary.name) {
            out.push(
                Section::LoadBalance,
                format!(
                    "pass out on {{ ${} }} from (${}:0) route-to {}",
                    primary.name, uplink.name, uplink.gateway
                ),
            );
        }

        let gateways = uplinks
            .iter()
            .map(|u| u.gateway.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        for interface in self.config.interfaces.iter().filter(|i| !i.role.is_external()) {
            let name = &interface.name;
            out.push(
                Section::LoadBalance,
                format!(
                    "pass in on {{ ${name} }} from (${name}:network) to !(${name}:network) route-to {{ {gateways} }} round-robin sticky-address"
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GatewayConfig {
        GatewayConfig::new("gw01")
            .with_interface(Interface::external("wan", "em0", "100M", "10.0.0.1").as_default())
            .with_interface(Interface::internal(
                "wifi",
                "em1",
                "50M",
                InterfaceRole::InternalSubscriber,
            ))
            .with_interface(Interface::internal("lan", "em2", "20M", InterfaceRole::InternalLan))
    }

    #[test]
    fn test_nat_per_role() {
        let config = config();
        let mut out = RulesetBuilder::new();
        RuleCompiler::new(&config).nat(&mut out);
        let lines = out.lines(Section::Nat);

        assert!(lines.contains(
            &"match out on { $wan } inet from !($wan:network) to any nat-to ($wan:0)".to_string()
        ));
        assert!(lines.iter().any(|l| l.contains("$wifi") && l.contains("<subsexpr>")));
        assert!(lines.iter().any(|l| l.contains("$wifi") && l.contains("port 8080")));
        assert!(!lines.iter().any(|l| l.contains("$lan") && l.contains("<subsexpr>")));
        assert!(lines.iter().any(|l| l.contains("$lan") && l.contains("!<allowed>")));
        assert_eq!(lines.iter().filter(|l| l.ends_with("set prio 4")).count(), 3);
    }

    #[test]
    fn test_dhcp_passthrough_only_on_subscriber_interfaces() {
        let config = config();
        let mut out = RulesetBuilder::new();
        RuleCompiler::new(&config).pass_rules(&mut out);
        let lines = out.lines(Section::PassRules);

        assert!(lines.iter().any(|l| l.contains("$wifi") && l.contains("bootps")));
        assert!(!lines.iter().any(|l| l.contains("$lan") && l.contains("bootps")));
        assert!(lines.iter().any(|l| l.contains("$lan") && l.contains("port { 8080, 8081 }")));
        assert!(lines.iter().any(|l| l.contains("$wifi") && l.contains("port { 8080, 8081, 22, 667 }")));
    }

    #[test]
    fn test_ssh_protection_on_default_uplink_only() {
        let config = config()
            .with_interface(Interface::external("wan2", "em3", "50M", "10.1.0.1"));
        let mut out = RulesetBuilder::new();
        RuleCompiler::new(&config).pass_rules(&mut out);
        let lines = out.lines(Section::PassRules);

        let overload: Vec<_> = lines.iter().filter(|l| l.contains("overload <bad_hosts>")).collect();
        assert_eq!(overload.len(), 1);
        assert!(overload[0].contains("$wan "));
        assert!(!lines.iter().any(|l| l.contains("$wan2") && l.contains("selfq")));
    }

    #[test]
    fn test_load_balance_disabled_emits_nothing() {
        let config = config()
            .with_interface(Interface::external("wan2", "em3", "50M", "10.1.0.1"));
        let mut out = RulesetBuilder::new();
        RuleCompiler::new(&config).load_balance(&mut out);
        assert!(out.lines(Section::LoadBalance).is_empty());
    }

    #[test]
    fn test_martians_table() {
        let config = config();
        let mut out = RulesetBuilder::new();
        RuleCompiler::new(&config).tables(Path::new("/var/run/pfgate"), &mut out);
        let lines = out.lines(Section::Tables);

        assert_eq!(
            lines[0],
            "table <allowed> persist file \"/var/run/pfgate/allowed.txt\""
        );
        assert!(lines[3].starts_with("table <martians> { 0.0.0.0/8 169.254.0.0/16"));
    }
}
