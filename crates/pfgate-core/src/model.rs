//! Subscriber and voucher records fetched from the management service
//!
//! Records live for a single compile. [`RemoteState::identities`] reduces
//! them to the [`ShapedIdentity`] values the compiler works with; anything
//! inactive, out of its validity window, or without a usable address is
//! dropped there.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Subscriber/voucher state returned by `pfconfig/query/<router>`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteState {
    /// Subscriber accounts
    #[serde(default, deserialize_with = "null_as_empty")]
    pub subs: Vec<Subscriber>,

    /// Prepaid vouchers
    #[serde(default, deserialize_with = "null_as_empty")]
    pub vouchers: Vec<Voucher>,
}

impl RemoteState {
    /// Active identities at `now`: vouchers first, then subscribers
    pub fn identities(&self, now: DateTime<Utc>) -> Vec<ShapedIdentity> {
        let vouchers = self.vouchers.iter().filter_map(|v| {
            if !v.is_active_at(now) {
                tracing::debug!("Voucher {} is not active, skipping", v.value);
                return None;
            }
            ShapedIdentity::new(
                IdentityKind::Voucher,
                &v.value,
                &v.ip,
                &v.bound_to,
                v.shaping,
                v.priority,
                &v.gateway,
            )
        });

        let subs = self.subs.iter().filter_map(|s| {
            if s.status != Status::Active {
                tracing::debug!("Subscriber {} is {:?}, skipping", s.mac, s.status);
                return None;
            }
            ShapedIdentity::new(
                IdentityKind::Subscriber,
                &s.mac,
                &s.framed_ip,
                &s.bound_to,
                s.shaping,
                s.priority,
                &s.gateway,
            )
        });

        vouchers.chain(subs).collect()
    }
}

/// Account status as reported by the service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Active,
    #[default]
    Inactive,
    /// Any status this gateway does not act on
    #[serde(other)]
    Unknown,
}

/// Shaping parameters shared by subscribers and vouchers (Mbit/s, ms)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shaping {
    #[serde(rename = "downspeed", default)]
    pub downstream: u32,
    #[serde(rename = "upspeed", default)]
    pub upstream: u32,
    #[serde(rename = "burstspeed", default)]
    pub burst: u32,
    #[serde(rename = "duration", default)]
    pub burst_duration_ms: u32,
}

impl Shaping {
    pub fn new(downstream: u32, upstream: u32) -> Self {
        Self {
            downstream,
            upstream,
            burst: downstream,
            burst_duration_ms: 100,
        }
    }

    pub fn with_burst(mut self, burst: u32, duration_ms: u32) -> Self {
        self.burst = burst;
        self.burst_duration_ms = duration_ms;
        self
    }
}

/// A subscriber account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    /// Hardware address, the subscriber's identity
    #[serde(default)]
    pub mac: String,
    /// Address assigned to the subscriber
    #[serde(default)]
    pub framed_ip: String,
    /// Interface name the subscriber is attached to
    #[serde(rename = "type", default)]
    pub bound_to: String,
    #[serde(default)]
    pub status: Status,
    #[serde(flatten)]
    pub shaping: Shaping,
    /// pf priority, 0 when unset
    #[serde(default)]
    pub priority: u8,
    /// Route-to override
    #[serde(default)]
    pub gateway: String,
    #[serde(default, deserialize_with = "zero_time_as_unset")]
    pub date_end: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "zero_time_as_unset")]
    pub date_expires: Option<DateTime<Utc>>,
}

impl Subscriber {
    /// Create an active subscriber
    pub fn new(
        mac: impl Into<String>,
        framed_ip: impl Into<String>,
        bound_to: impl Into<String>,
        shaping: Shaping,
    ) -> Self {
        Self {
            mac: mac.into(),
            framed_ip: framed_ip.into(),
            bound_to: bound_to.into(),
            status: Status::Active,
            shaping,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = first.into();
        self.last_name = last.into();
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_gateway(mut self, gateway: impl Into<String>) -> Self {
        self.gateway = gateway.into();
        self
    }
}

/// A prepaid access voucher
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Voucher {
    /// Voucher token, the voucher's identity
    #[serde(default)]
    pub value: String,
    /// Interface name the voucher is valid on
    #[serde(rename = "type", default)]
    pub bound_to: String,
    #[serde(default)]
    pub status: Status,
    #[serde(flatten)]
    pub shaping: Shaping,
    #[serde(default)]
    pub priority: u8,
    /// Source address of the device using the voucher
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub gateway: String,
    #[serde(default)]
    pub hours: u32,
    #[serde(default)]
    pub hours_consumed: f64,
    #[serde(default, deserialize_with = "zero_time_as_unset")]
    pub date_started: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "zero_time_as_unset")]
    pub date_end: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "zero_time_as_unset")]
    pub date_expires: Option<DateTime<Utc>>,
}

impl Voucher {
    /// Create an active voucher without a validity window
    pub fn new(
        value: impl Into<String>,
        ip: impl Into<String>,
        bound_to: impl Into<String>,
        shaping: Shaping,
    ) -> Self {
        Self {
            value: value.into(),
            ip: ip.into(),
            bound_to: bound_to.into(),
            status: Status::Active,
            shaping,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.date_started = Some(start);
        self.date_end = Some(end);
        self
    }

    pub fn with_expiry(mut self, expires: DateTime<Utc>) -> Self {
        self.date_expires = Some(expires);
        self
    }

    /// Whether the voucher grants access at `now`
    ///
    /// Requires an active status and `start <= now < end`, `now < expires`
    /// for every bound that is present.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if self.status != Status::Active {
            return false;
        }
        if self.date_started.is_some_and(|start| now < start) {
            return false;
        }
        if self.date_end.is_some_and(|end| now >= end) {
            return false;
        }
        !self.date_expires.is_some_and(|expires| now >= expires)
    }
}

/// Kind of record an identity was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    Subscriber,
    Voucher,
}

/// An active subscriber or voucher, ready for queue and rule generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapedIdentity {
    pub kind: IdentityKind,
    /// Sanitized identity: queue name prefix and pf tag
    pub tag: String,
    /// Source address on the bound interface
    pub address: Ipv4Addr,
    pub bound_to: String,
    pub shaping: Shaping,
    pub priority: u8,
    pub gateway: Option<String>,
}

impl ShapedIdentity {
    fn new(
        kind: IdentityKind,
        raw_identity: &str,
        address: &str,
        bound_to: &str,
        shaping: Shaping,
        priority: u8,
        gateway: &str,
    ) -> Option<Self> {
        let tag = sanitize_identity(raw_identity);
        if tag.is_empty() {
            tracing::debug!("{:?} '{}' has no usable identity, skipping", kind, raw_identity);
            return None;
        }
        let Ok(address) = address.trim().parse::<Ipv4Addr>() else {
            tracing::debug!("{:?} {} has no valid address ('{}'), skipping", kind, tag, address);
            return None;
        };
        let gateway = Some(gateway.trim()).filter(|g| !g.is_empty()).map(str::to_string);

        Some(Self {
            kind,
            tag,
            address,
            bound_to: bound_to.to_string(),
            shaping,
            priority,
            gateway,
        })
    }
}

/// Strip everything except ASCII alphanumerics and `_`
///
/// `aa:bb:cc:dd:ee:ff` becomes `aabbccddeeff`.
pub fn sanitize_identity(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// The service encodes an unset timestamp as `0001-01-01T00:00:00Z`
fn zero_time_as_unset<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let time = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(time.filter(|t| t.year() > 1))
}
