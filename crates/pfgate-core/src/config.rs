//! Configuration types for the pfgate system
//!
//! [`GatewayConfig`] is the local network model read from `config.json` at
//! startup. Field names on the wire match the management service, because
//! the same document is submitted during enrollment.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::compiler::queues::{
    APPS_QUEUE, SELF_QUEUE, SSH_BULK_QUEUE, SSH_INTERACTIVE_QUEUE, default_queue_name,
};
use std::path::Path;

/// Local gateway model: interface topology, DHCP pools and router identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Router identity used to query the management service
    pub router: String,

    /// Interfaces known to this gateway
    #[serde(rename = "ifaces", default)]
    pub interfaces: Vec<Interface>,

    /// DHCP pools served by this gateway
    #[serde(rename = "dhcps", default)]
    pub dhcp_pools: Vec<DhcpPool>,

    /// File name (inside the run directory) of the allow-list table
    #[serde(rename = "wifi_ip_list", default = "default_allow_list")]
    pub allow_list: String,

    /// File name (inside the run directory) of the subscriber table
    #[serde(rename = "subs_ip_list", default = "default_subscriber_list")]
    pub subscriber_list: String,

    /// Local port of the subscriber portal
    pub subs_portal_port: u16,

    /// Local port of the captive portal
    pub captive_portal_port: u16,

    /// Distribute egress across all external gateways
    #[serde(default)]
    pub load_balance: bool,
}

impl GatewayConfig {
    /// Create an empty configuration for the given router
    pub fn new(router: impl Into<String>) -> Self {
        Self {
            router: router.into(),
            interfaces: Vec::new(),
            dhcp_pools: Vec::new(),
            allow_list: default_allow_list(),
            subscriber_list: default_subscriber_list(),
            subs_portal_port: 8081,
            captive_portal_port: 8080,
            load_balance: false,
        }
    }

    /// Add an interface
    pub fn with_interface(mut self, interface: Interface) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Add a DHCP pool
    pub fn with_dhcp_pool(mut self, pool: DhcpPool) -> Self {
        self.dhcp_pools.push(pool);
        self
    }

    /// Enable or disable load balancing
    pub fn with_load_balance(mut self, enabled: bool) -> Self {
        self.load_balance = enabled;
        self
    }

    /// Load and validate a configuration file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, crate::Error> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            crate::Error::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            crate::Error::config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.router.is_empty() {
            return Err(crate::Error::config("Router identity cannot be empty"));
        }

        if self.interfaces.is_empty() {
            return Err(crate::Error::config("No interfaces configured"));
        }

        let mut names = HashSet::new();
        for interface in &self.interfaces {
            interface.validate()?;
            if !names.insert(interface.name.as_str()) {
                return Err(crate::Error::config(format!(
                    "Duplicate interface name: {}",
                    interface.name
                )));
            }
        }

        // Root and default queues share one namespace with the fixed
        // router queues
        let mut queues: HashSet<String> = [
            SELF_QUEUE,
            APPS_QUEUE,
            SSH_INTERACTIVE_QUEUE,
            SSH_BULK_QUEUE,
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        for interface in &self.interfaces {
            for queue in [interface.name.clone(), default_queue_name(&interface.name)] {
                if !queues.insert(queue.clone()) {
                    return Err(crate::Error::config(format!(
                        "Interface {} yields queue name {}, which is already in use",
                        interface.name, queue
                    )));
                }
            }
        }

        let defaults = self.interfaces.iter().filter(|i| i.default).count();
        if defaults > 1 {
            return Err(crate::Error::config(format!(
                "{} interfaces are marked as default uplink, at most one is allowed",
                defaults
            )));
        }

        if self.allow_list.is_empty() || self.subscriber_list.is_empty() {
            return Err(crate::Error::config("IP list file names cannot be empty"));
        }
        if self.allow_list == self.subscriber_list {
            return Err(crate::Error::config(
                "Allow-list and subscriber list must be different files",
            ));
        }

        Ok(())
    }

    /// Look up an interface by exact name
    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.name == name)
    }

    /// External interfaces, in declaration order
    pub fn external_interfaces(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.iter().filter(|i| i.role.is_external())
    }

    /// The default uplink, if one is marked
    pub fn default_uplink(&self) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.default)
    }
}

/// A network interface of the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    /// Logical name, also used as the pf macro and root queue name
    pub name: String,

    /// Device the macro expands to (e.g. "em0")
    pub device: String,

    /// Link capacity in pf bandwidth notation (e.g. "100M")
    pub speed: String,

    /// Role of the interface
    #[serde(rename = "type")]
    pub role: InterfaceRole,

    /// Whether this is the default uplink
    #[serde(default)]
    pub default: bool,

    /// Next-hop address, required for external interfaces
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gateway: String,
}

impl Interface {
    /// Create an external interface
    pub fn external(
        name: impl Into<String>,
        device: impl Into<String>,
        speed: impl Into<String>,
        gateway: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            device: device.into(),
            speed: speed.into(),
            role: InterfaceRole::External,
            default: false,
            gateway: gateway.into(),
        }
    }

    /// Create an internal interface with the given role
    pub fn internal(
        name: impl Into<String>,
        device: impl Into<String>,
        speed: impl Into<String>,
        role: InterfaceRole,
    ) -> Self {
        Self {
            name: name.into(),
            device: device.into(),
            speed: speed.into(),
            role,
            default: false,
            gateway: String::new(),
        }
    }

    /// Mark as the default uplink
    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }

    /// Next-hop address, if set
    pub fn gateway(&self) -> Option<&str> {
        Some(self.gateway.as_str()).filter(|g| !g.is_empty())
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.name.is_empty() {
            return Err(crate::Error::config("Interface name cannot be empty"));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(crate::Error::config(format!(
                "Interface name '{}' must be alphanumeric (it is used as a pf macro)",
                self.name
            )));
        }
        if self.device.is_empty() {
            return Err(crate::Error::config(format!(
                "Interface {} has no device",
                self.name
            )));
        }
        if self.speed.is_empty() {
            return Err(crate::Error::config(format!(
                "Interface {} has no speed",
                self.name
            )));
        }
        if self.role.is_external() && self.gateway().is_none() {
            return Err(crate::Error::config(format!(
                "External interface {} requires a gateway",
                self.name
            )));
        }
        if self.default && !self.role.is_external() {
            return Err(crate::Error::config(format!(
                "Interface {} is marked default but is not external",
                self.name
            )));
        }
        Ok(())
    }
}

/// Role of an interface; drives NAT, redirect and pass rule generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceRole {
    /// Uplink towards the internet
    External,
    /// Plain LAN segment
    #[serde(alias = "lan")]
    InternalLan,
    /// Segment serving subscribers and voucher users
    #[serde(alias = "subscriber", alias = "internal")]
    InternalSubscriber,
    /// Management network
    Management,
}

impl InterfaceRole {
    /// Whether this is an uplink
    pub fn is_external(self) -> bool {
        self == InterfaceRole::External
    }
}

/// DHCP pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpPool {
    /// Network address (e.g. "10.10.0.0")
    pub subnet: String,

    /// Netmask (e.g. "255.255.255.0")
    pub netmask: String,

    /// Default router handed to clients
    pub routers: String,

    /// Primary DNS servers handed to clients
    #[serde(rename = "dnsservers")]
    pub dns_servers: String,

    /// Dynamic address range (e.g. "10.10.0.100 10.10.0.200")
    pub range: String,

    /// Interface name whose subscribers get static reservations here
    #[serde(rename = "type")]
    pub bound_to: String,
}

fn default_allow_list() -> String {
    "allowed.txt".to_string()
}

fn default_subscriber_list() -> String {
    "subsexpr.txt".to_string()
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on a single remote fetch (in seconds)
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Capacity of the compile event channel
    ///
    /// When full, new events are dropped with a warning.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.fetch_timeout_secs == 0 {
            return Err(crate::Error::config("Fetch timeout must be > 0"));
        }

        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }

        Ok(())
    }

    /// Fetch timeout as a duration
    pub fn fetch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_event_channel_capacity() -> usize {
    100
}
