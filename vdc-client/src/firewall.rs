//! Firewall rule sets as transmitted on network relations.

use std::collections::HashSet;
use std::fmt;

use ipnet::IpNet;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Accept,
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "IPv4"),
            AddressFamily::V6 => write!(f, "IPv6"),
        }
    }
}

/// One firewall rule. Absent fields are unrestricted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_cidr: Option<IpNet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_cidr: Option<IpNet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<String>,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub order: u32,
}

impl FirewallRule {
    pub fn new(action: Action, order: u32) -> Self {
        Self {
            protocol: None,
            src_cidr: None,
            src_port: None,
            dst_cidr: None,
            dst_port: None,
            action,
            comment: None,
            order,
        }
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn src_cidr(mut self, cidr: IpNet) -> Self {
        self.src_cidr = Some(cidr);
        self
    }

    pub fn src_port(mut self, port: impl Into<String>) -> Self {
        self.src_port = Some(port.into());
        self
    }

    pub fn dst_cidr(mut self, cidr: IpNet) -> Self {
        self.dst_cidr = Some(cidr);
        self
    }

    pub fn dst_port(mut self, port: impl Into<String>) -> Self {
        self.dst_port = Some(port.into());
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Four rule sequences keyed by address family and direction.
///
/// Sequences are written in ascending `order` regardless of their order in
/// memory; empty sequences are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRuleSet {
    #[serde(
        rename = "rules-v4-in",
        default,
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "sorted_by_order"
    )]
    pub v4_in: Vec<FirewallRule>,
    #[serde(
        rename = "rules-v4-out",
        default,
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "sorted_by_order"
    )]
    pub v4_out: Vec<FirewallRule>,
    #[serde(
        rename = "rules-v6-in",
        default,
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "sorted_by_order"
    )]
    pub v6_in: Vec<FirewallRule>,
    #[serde(
        rename = "rules-v6-out",
        default,
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "sorted_by_order"
    )]
    pub v6_out: Vec<FirewallRule>,
}

fn sorted_by_order<S: Serializer>(
    rules: &[FirewallRule],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut sorted: Vec<&FirewallRule> = rules.iter().collect();
    sorted.sort_by_key(|r| r.order);
    serializer.collect_seq(sorted)
}

impl FirewallRuleSet {
    pub fn inbound(&self, family: AddressFamily) -> &[FirewallRule] {
        match family {
            AddressFamily::V4 => &self.v4_in,
            AddressFamily::V6 => &self.v6_in,
        }
    }

    pub fn inbound_mut(&mut self, family: AddressFamily) -> &mut Vec<FirewallRule> {
        match family {
            AddressFamily::V4 => &mut self.v4_in,
            AddressFamily::V6 => &mut self.v6_in,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.v4_in.is_empty()
            && self.v4_out.is_empty()
            && self.v6_in.is_empty()
            && self.v6_out.is_empty()
    }

    fn sequences(&self) -> [(&'static str, &[FirewallRule]); 4] {
        [
            ("rules-v4-in", self.v4_in.as_slice()),
            ("rules-v4-out", self.v4_out.as_slice()),
            ("rules-v6-in", self.v6_in.as_slice()),
            ("rules-v6-out", self.v6_out.as_slice()),
        ]
    }

    /// Reject sequences with duplicate `order` values.
    pub fn validate(&self) -> Result<()> {
        for (key, rules) in self.sequences() {
            let mut seen = HashSet::new();
            for rule in rules {
                if !seen.insert(rule.order) {
                    return Err(Error::Validation(format!(
                        "duplicate order {} in {}",
                        rule.order, key
                    )));
                }
            }
        }
        Ok(())
    }
}
