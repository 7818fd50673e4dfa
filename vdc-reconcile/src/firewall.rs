//! Default inbound firewall rules for network attachments.
//!
//! User rule sets get a fixed block of rules appended to each inbound
//! sequence: DHCP and the ephemeral port range are accepted, any other TCP
//! and UDP traffic is dropped. The block is identified by rule comments, so it
//! can be stripped again before comparing or re-composing.

use vdc_client::{Action, AddressFamily, FirewallRule, FirewallRuleSet, Protocol};

pub const DEFAULT_RULE_COUNT: usize = 5;

const HIGHPORTS: &str = "32768:65535";

/// Comments of the default block, in the order the rules are appended.
pub fn default_comments(family: AddressFamily) -> [&'static str; DEFAULT_RULE_COUNT] {
    let dhcp = match family {
        AddressFamily::V4 => "DHCP IPv4",
        AddressFamily::V6 => "DHCP IPv6",
    };
    [
        dhcp,
        "Highports TCP",
        "Highports UDP",
        "Drop all other UDP",
        "Drop all other TCP",
    ]
}

fn is_default_comment(comment: &str) -> bool {
    [AddressFamily::V4, AddressFamily::V6]
        .into_iter()
        .any(|family| default_comments(family).contains(&comment))
}

/// The default block for `family`, numbered from `first_order`.
pub fn default_inbound_rules(family: AddressFamily, first_order: u32) -> Vec<FirewallRule> {
    let dhcp_ports = match family {
        AddressFamily::V4 => "67:68",
        AddressFamily::V6 => "546:547",
    };
    let [dhcp, highports_tcp, highports_udp, drop_udp, drop_tcp] = default_comments(family);
    let order = |n: u32| first_order.saturating_add(n);

    vec![
        FirewallRule::new(Action::Accept, order(0))
            .protocol(Protocol::Udp)
            .dst_port(dhcp_ports)
            .comment(dhcp),
        FirewallRule::new(Action::Accept, order(1))
            .protocol(Protocol::Tcp)
            .dst_port(HIGHPORTS)
            .comment(highports_tcp),
        FirewallRule::new(Action::Accept, order(2))
            .protocol(Protocol::Udp)
            .dst_port(HIGHPORTS)
            .comment(highports_udp),
        FirewallRule::new(Action::Drop, order(3))
            .protocol(Protocol::Udp)
            .comment(drop_udp),
        FirewallRule::new(Action::Drop, order(4))
            .protocol(Protocol::Tcp)
            .comment(drop_tcp),
    ]
}

/// Builds the firewall sent with a network attachment.
pub struct FirewallRuleComposer;

impl FirewallRuleComposer {
    /// Append the default block to `rules`.
    ///
    /// Empty input stays empty. Default rules already present are dropped
    /// first, so composing twice gives the same result.
    pub fn compose(rules: &[FirewallRule], family: AddressFamily) -> Vec<FirewallRule> {
        let mut composed = Self::strip(rules);
        let Some(max_order) = composed.iter().map(|r| r.order).max() else {
            return composed;
        };
        composed.extend(default_inbound_rules(family, max_order.saturating_add(1)));
        composed
    }

    /// Remove every rule carrying a default-block comment of either family.
    pub fn strip(rules: &[FirewallRule]) -> Vec<FirewallRule> {
        rules
            .iter()
            .filter(|r| !r.comment.as_deref().is_some_and(is_default_comment))
            .cloned()
            .collect()
    }

    /// Compose both inbound sequences. Outbound rules are passed through.
    ///
    /// Returns `None` when nothing is left, meaning the firewall is inactive.
    pub fn compose_set(set: &FirewallRuleSet) -> Option<FirewallRuleSet> {
        let mut composed = set.clone();
        for family in [AddressFamily::V4, AddressFamily::V6] {
            let rules = Self::compose(set.inbound(family), family);
            *composed.inbound_mut(family) = rules;
        }
        (!composed.is_empty()).then_some(composed)
    }
}
