//! Server configuration snapshots and change detection.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vdc_client::{FirewallRuleSet, ObjectId, Result, ResultExt, ServerUpdate};

use crate::firewall::FirewallRuleComposer;

/// Network attachment as declared by the user. `firewall` holds user rules
/// only; the default block is added when the attachment is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachmentSpec {
    pub network_id: ObjectId,
    #[serde(default)]
    pub boot_device: bool,
    #[serde(default)]
    pub firewall_template_id: Option<ObjectId>,
    #[serde(default)]
    pub firewall: Option<FirewallRuleSet>,
    #[serde(default)]
    pub pinned_ip: Option<Ipv4Addr>,
}

impl NetworkAttachmentSpec {
    pub fn new(network_id: ObjectId) -> Self {
        Self {
            network_id,
            boot_device: false,
            firewall_template_id: None,
            firewall: None,
            pinned_ip: None,
        }
    }

    /// The rule set sent to the API, `None` when the firewall is inactive.
    pub fn composed_firewall(&self) -> Option<FirewallRuleSet> {
        self.firewall.as_ref().and_then(FirewallRuleComposer::compose_set)
    }

    /// Whether the relation itself (not the pin) differs.
    fn relation_differs(&self, other: &Self) -> bool {
        self.boot_device != other.boot_device
            || self.firewall_template_id != other.firewall_template_id
            || self.composed_firewall() != other.composed_firewall()
    }
}

/// Snapshot of a server's configuration, either desired or last applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub cores: u32,
    /// Memory in GB.
    pub memory: u32,
    pub hardware_profile: String,
    pub hardware_profile_config: Option<Value>,
    pub auto_recovery: bool,
    pub user_data: Option<String>,
    pub ipv4: Option<ObjectId>,
    pub ipv6: Option<ObjectId>,
    pub iso_image: Option<ObjectId>,
    /// Attached storages; the first one is the boot device.
    pub storages: Vec<ObjectId>,
    /// Attached networks in declaration order, which is also their ordering.
    pub networks: Vec<NetworkAttachmentSpec>,
    /// Power state to leave the server in. `None` restores the state the
    /// server had before the reconcile.
    pub power: Option<bool>,
}

impl ServerConfig {
    /// Reject firewall rule sets with duplicate `order` values.
    pub fn validate(&self) -> Result<()> {
        for network in &self.networks {
            if let Some(firewall) = &network.firewall {
                firewall
                    .validate()
                    .with_context(|| format!("firewall of network {}", network.network_id))?;
            }
        }
        Ok(())
    }
}

/// Desired and current snapshot of one server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerChange {
    pub desired: ServerConfig,
    pub current: ServerConfig,
}

impl ServerChange {
    pub fn new(desired: ServerConfig, current: ServerConfig) -> Self {
        Self { desired, current }
    }

    pub fn cores_changed(&self) -> bool {
        self.desired.cores != self.current.cores
    }

    pub fn memory_changed(&self) -> bool {
        self.desired.memory != self.current.memory
    }

    /// Any of the scalar server properties changed.
    pub fn properties_changed(&self) -> bool {
        !self.server_update().is_empty()
    }

    pub fn ipv4_changed(&self) -> bool {
        self.desired.ipv4 != self.current.ipv4
    }

    pub fn ipv6_changed(&self) -> bool {
        self.desired.ipv6 != self.current.ipv6
    }

    pub fn iso_image_changed(&self) -> bool {
        self.desired.iso_image != self.current.iso_image
    }

    pub fn storages_changed(&self) -> bool {
        self.desired.storages != self.current.storages
    }

    /// Network membership or ordering changed. Requires relinking all
    /// networks.
    pub fn network_list_changed(&self) -> bool {
        let desired = &self.desired.networks;
        let current = &self.current.networks;
        desired.len() != current.len()
            || desired
                .iter()
                .zip(current)
                .any(|(d, c)| d.network_id != c.network_id)
    }

    /// Some network at the same position has different relation properties
    /// or pinned IP. Applied in place.
    pub fn network_properties_changed(&self) -> bool {
        self.desired
            .networks
            .iter()
            .zip(&self.current.networks)
            .any(|(d, c)| d.relation_differs(c) || d.pinned_ip != c.pinned_ip)
    }

    /// Whether the server must be powered off before applying the change.
    ///
    /// Storage and ISO image changes are applied live unless the server lacks
    /// hot update support.
    pub fn shutdown_required(&self, supports_hot_update: bool) -> bool {
        self.properties_changed()
            || self.ipv4_changed()
            || self.ipv6_changed()
            || self.network_list_changed()
            || (!supports_hot_update && (self.storages_changed() || self.iso_image_changed()))
    }

    /// Server property patch with only the changed fields set.
    pub fn server_update(&self) -> ServerUpdate {
        fn changed<T: PartialEq + Clone>(desired: &T, current: &T) -> Option<T> {
            (desired != current).then(|| desired.clone())
        }
        let (d, c) = (&self.desired, &self.current);

        ServerUpdate {
            name: None,
            cores: changed(&d.cores, &c.cores),
            memory: changed(&d.memory, &c.memory),
            hardware_profile: changed(&d.hardware_profile, &c.hardware_profile),
            // A removed value is sent as null / empty to clear it.
            hardware_profile_config: changed(&d.hardware_profile_config, &c.hardware_profile_config)
                .map(|v| v.unwrap_or(Value::Null)),
            auto_recovery: changed(&d.auto_recovery, &c.auto_recovery),
            user_data: changed(&d.user_data, &c.user_data).map(Option::unwrap_or_default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> ObjectId {
        ObjectId::parse(&format!("00000000-0000-4000-8000-0000000000{:02x}", n)).unwrap()
    }

    fn base() -> ServerConfig {
        ServerConfig {
            cores: 2,
            memory: 4,
            ipv4: Some(id(10)),
            networks: vec![NetworkAttachmentSpec::new(id(20))],
            ..Default::default()
        }
    }

    #[test]
    fn test_cores_change_requires_shutdown() {
        let change = ServerChange::new(
            ServerConfig {
                cores: 4,
                ..base()
            },
            base(),
        );
        assert!(change.cores_changed());
        assert!(!change.memory_changed());
        assert!(change.shutdown_required(true));
        assert_eq!(
            change.server_update(),
            ServerUpdate {
                cores: Some(4),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_no_change() {
        let change = ServerChange::new(base(), base());
        assert!(!change.properties_changed());
        assert!(!change.network_list_changed());
        assert!(!change.network_properties_changed());
        assert!(!change.shutdown_required(false));
        assert!(change.server_update().is_empty());
    }

    #[test]
    fn test_storage_change_depends_on_hot_update() {
        let change = ServerChange::new(
            ServerConfig {
                storages: vec![id(30)],
                ..base()
            },
            base(),
        );
        assert!(change.storages_changed());
        assert!(!change.shutdown_required(true));
        assert!(change.shutdown_required(false));
    }

    #[test]
    fn test_iso_change_depends_on_hot_update() {
        let change = ServerChange::new(
            ServerConfig {
                iso_image: Some(id(40)),
                ..base()
            },
            base(),
        );
        assert!(!change.shutdown_required(true));
        assert!(change.shutdown_required(false));
    }

    #[test]
    fn test_network_order_vs_properties() {
        let two = |a: u8, b: u8| ServerConfig {
            networks: vec![NetworkAttachmentSpec::new(id(a)), NetworkAttachmentSpec::new(id(b))],
            ..base()
        };

        let reordered = ServerChange::new(two(21, 20), two(20, 21));
        assert!(reordered.network_list_changed());
        assert!(reordered.shutdown_required(true));

        let mut desired = two(20, 21);
        desired.networks[1].boot_device = true;
        desired.networks[1].pinned_ip = Some(Ipv4Addr::new(10, 0, 0, 9));
        let in_place = ServerChange::new(desired, two(20, 21));
        assert!(!in_place.network_list_changed());
        assert!(in_place.network_properties_changed());
        assert!(!in_place.shutdown_required(true));
    }

    #[test]
    fn test_pin_only_change_is_a_property_change() {
        let mut desired = base();
        desired.networks[0].pinned_ip = Some(Ipv4Addr::new(10, 0, 0, 2));
        let change = ServerChange::new(desired, base());
        assert!(change.network_properties_changed());
        assert!(!change.network_list_changed());
        assert!(!change.shutdown_required(false));
    }

    #[test]
    fn test_duplicate_firewall_order_rejected() {
        use vdc_client::{Action, ErrorKind, FirewallRule};

        let mut config = base();
        config.networks[0].firewall = Some(FirewallRuleSet {
            v4_in: vec![
                FirewallRule::new(Action::Accept, 3),
                FirewallRule::new(Action::Drop, 3),
            ],
            ..Default::default()
        });
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains(&id(20).to_string()), "{err}");
        assert!(err.to_string().contains("rules-v4-in"), "{err}");

        config.networks[0].firewall.as_mut().unwrap().v4_in[1].order = 4;
        config.validate().unwrap();
    }

    #[test]
    fn test_deserialize_snapshot() {
        let config: ServerConfig = serde_json::from_value(serde_json::json!({
            "cores": 2,
            "memory": 4,
            "storages": [id(30)],
            "networks": [{"network_id": id(20), "pinned_ip": "10.0.0.4"}],
            "power": true
        }))
        .unwrap();
        assert_eq!(config.storages, vec![id(30)]);
        assert_eq!(config.networks[0].pinned_ip, Some(Ipv4Addr::new(10, 0, 0, 4)));
        assert!(!config.networks[0].boot_device);
        assert_eq!(config.power, Some(true));
    }
}
