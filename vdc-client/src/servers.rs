//! Server endpoints: properties, power and relations.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::{Client, Outcome};
use crate::context::RequestContext;
use crate::error::{suppress, Result};
use crate::firewall::FirewallRuleSet;
use crate::ident::ObjectId;
use crate::transport::RestRequest;

/// Provisioning status of an object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ObjectState {
    InProvisioning,
    #[default]
    Active,
    Other(String),
}

impl From<String> for ObjectState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "in-provisioning" => ObjectState::InProvisioning,
            "active" => ObjectState::Active,
            _ => ObjectState::Other(s),
        }
    }
}

impl From<ObjectState> for String {
    fn from(state: ObjectState) -> Self {
        match state {
            ObjectState::InProvisioning => "in-provisioning".to_string(),
            ObjectState::Active => "active".to_string(),
            ObjectState::Other(s) => s,
        }
    }
}

/// Relation kinds between a server and other objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Storage,
    Network,
    IpAddress,
    IsoImage,
}

impl RelationKind {
    /// Path segment below `/objects/servers/{id}`.
    pub fn segment(self) -> &'static str {
        match self {
            RelationKind::Storage => "storages",
            RelationKind::Network => "networks",
            RelationKind::IpAddress => "ips",
            RelationKind::IsoImage => "isoimages",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelationKind::Storage => "storage",
            RelationKind::Network => "network",
            RelationKind::IpAddress => "IP address",
            RelationKind::IsoImage => "ISO image",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRelation {
    pub object_uuid: ObjectId,
    #[serde(default)]
    pub bootdevice: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRelation {
    pub network_uuid: ObjectId,
    #[serde(default)]
    pub ordering: u32,
    #[serde(default)]
    pub bootdevice: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall_template_uuid: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall: Option<FirewallRuleSet>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRelation {
    pub ip_uuid: ObjectId,
    /// 4 or 6.
    pub family: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsoImageRelation {
    pub object_uuid: ObjectId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRelations {
    #[serde(default)]
    pub storages: Vec<StorageRelation>,
    #[serde(default)]
    pub networks: Vec<NetworkRelation>,
    #[serde(default)]
    pub public_ips: Vec<IpRelation>,
    #[serde(default)]
    pub isoimages: Vec<IsoImageRelation>,
}

impl ServerRelations {
    /// Every attached object with its relation kind.
    pub fn attachments(&self) -> Vec<(RelationKind, ObjectId)> {
        let mut out = Vec::new();
        out.extend(self.isoimages.iter().map(|r| (RelationKind::IsoImage, r.object_uuid)));
        out.extend(self.public_ips.iter().map(|r| (RelationKind::IpAddress, r.ip_uuid)));
        out.extend(self.networks.iter().map(|r| (RelationKind::Network, r.network_uuid)));
        out.extend(self.storages.iter().map(|r| (RelationKind::Storage, r.object_uuid)));
        out
    }
}

/// Server as returned by `GET /objects/servers/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub object_uuid: ObjectId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub power: bool,
    #[serde(default)]
    pub legacy: bool,
    #[serde(default)]
    pub status: ObjectState,
    #[serde(default)]
    pub cores: u32,
    /// Memory in GB.
    #[serde(default)]
    pub memory: u32,
    #[serde(default)]
    pub relations: ServerRelations,
}

#[derive(Debug, Deserialize)]
struct ServerEnvelope {
    server: Server,
}

/// Power state of a server and whether it accepts relation changes while
/// running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerPowerModel {
    pub running: bool,
    pub supports_hot_update: bool,
}

impl Server {
    pub fn power_model(&self) -> ServerPowerModel {
        ServerPowerModel {
            running: self.power,
            supports_hot_update: !self.legacy,
        }
    }
}

/// Network attachment as linked to a server. `firewall` is the final rule
/// set sent to the API; `None` leaves the firewall inactive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkLink {
    pub network_id: ObjectId,
    pub ordering: u32,
    pub boot_device: bool,
    pub firewall_template_id: Option<ObjectId>,
    pub firewall: Option<FirewallRuleSet>,
    pub pinned_ip: Option<Ipv4Addr>,
}

/// One relation to attach to a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerAttachment {
    Storage { id: ObjectId, boot_device: bool },
    Network(NetworkLink),
    Ipv4 { id: ObjectId },
    Ipv6 { id: ObjectId },
    IsoImage { id: ObjectId },
}

impl ServerAttachment {
    pub fn kind(&self) -> RelationKind {
        match self {
            ServerAttachment::Storage { .. } => RelationKind::Storage,
            ServerAttachment::Network(_) => RelationKind::Network,
            ServerAttachment::Ipv4 { .. } | ServerAttachment::Ipv6 { .. } => RelationKind::IpAddress,
            ServerAttachment::IsoImage { .. } => RelationKind::IsoImage,
        }
    }

    pub fn object_id(&self) -> ObjectId {
        match self {
            ServerAttachment::Storage { id, .. }
            | ServerAttachment::Ipv4 { id }
            | ServerAttachment::Ipv6 { id }
            | ServerAttachment::IsoImage { id } => *id,
            ServerAttachment::Network(link) => link.network_id,
        }
    }

    /// Body of the link request.
    pub fn link_body(&self) -> Value {
        match self {
            ServerAttachment::Storage { id, boot_device } => {
                json!({"object_uuid": id, "bootdevice": boot_device})
            }
            ServerAttachment::Network(link) => {
                let mut body = json!({
                    "object_uuid": link.network_id,
                    "ordering": link.ordering,
                    "bootdevice": link.boot_device,
                });
                if let Some(template) = link.firewall_template_id {
                    body["firewall_template_uuid"] = json!(template);
                }
                if let Some(firewall) = &link.firewall {
                    body["firewall"] = json!(firewall);
                }
                body
            }
            ServerAttachment::Ipv4 { id }
            | ServerAttachment::Ipv6 { id }
            | ServerAttachment::IsoImage { id } => json!({"object_uuid": id}),
        }
    }
}

/// Changed server properties. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_profile_config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_recovery: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
}

impl ServerUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// In-place update of a network relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRelationUpdate {
    pub ordering: u32,
    pub bootdevice: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall: Option<FirewallRuleSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall_template_uuid: Option<ObjectId>,
}

pub fn server_path(server: ObjectId) -> String {
    format!("/objects/servers/{}", server)
}

pub fn relation_path(server: ObjectId, kind: RelationKind, object: ObjectId) -> String {
    format!("{}/{}/{}", server_path(server), kind.segment(), object)
}

fn pin_path(network: ObjectId, server: ObjectId) -> String {
    format!("/objects/networks/{}/pinned_servers/{}", network, server)
}

impl Client {
    pub async fn get_server(&self, ctx: &RequestContext, server: ObjectId) -> Result<Server> {
        let envelope: ServerEnvelope = self.get(ctx, &server_path(server)).await?;
        Ok(envelope.server)
    }

    pub async fn server_relations(
        &self,
        ctx: &RequestContext,
        server: ObjectId,
    ) -> Result<ServerRelations> {
        Ok(self.get_server(ctx, server).await?.relations)
    }

    pub async fn update_server(
        &self,
        ctx: &RequestContext,
        server: ObjectId,
        update: &ServerUpdate,
    ) -> Result<Outcome> {
        let request = RestRequest::patch(server_path(server), update)?;
        self.execute(ctx, &request).await
    }

    /// Hard power on/off.
    pub async fn set_server_power(
        &self,
        ctx: &RequestContext,
        server: ObjectId,
        power: bool,
    ) -> Result<Outcome> {
        let request =
            RestRequest::patch(format!("{}/power", server_path(server)), &json!({"power": power}))?;
        self.execute(ctx, &request).await
    }

    /// Ask the guest to shut down (ACPI).
    pub async fn request_server_shutdown(
        &self,
        ctx: &RequestContext,
        server: ObjectId,
    ) -> Result<Outcome> {
        let request = RestRequest::patch(format!("{}/shutdown", server_path(server)), &json!({}))?;
        self.execute(ctx, &request).await
    }

    pub async fn link(
        &self,
        ctx: &RequestContext,
        server: ObjectId,
        attachment: &ServerAttachment,
    ) -> Result<Outcome> {
        let path = format!("{}/{}", server_path(server), attachment.kind().segment());
        let request = RestRequest::post(path, &attachment.link_body())?;
        self.execute(ctx, &request).await
    }

    /// Remove a relation. A relation that is already gone (404) or cannot be
    /// removed in its current state (409) yields `Ok(None)`.
    pub async fn unlink(
        &self,
        ctx: &RequestContext,
        server: ObjectId,
        kind: RelationKind,
        object: ObjectId,
    ) -> Result<Option<Outcome>> {
        let request = RestRequest::delete(relation_path(server, kind, object));
        suppress(self.execute(ctx, &request).await, &[404, 409])
    }

    pub async fn update_network_relation(
        &self,
        ctx: &RequestContext,
        server: ObjectId,
        network: ObjectId,
        update: &NetworkRelationUpdate,
    ) -> Result<Outcome> {
        let request =
            RestRequest::patch(relation_path(server, RelationKind::Network, network), update)?;
        self.execute(ctx, &request).await
    }

    /// Reserve `ip` for the server on the network's DHCP.
    pub async fn pin_server_ip(
        &self,
        ctx: &RequestContext,
        network: ObjectId,
        server: ObjectId,
        ip: Ipv4Addr,
    ) -> Result<Outcome> {
        let request = RestRequest::patch(pin_path(network, server), &json!({"ip": ip}))?;
        self.execute(ctx, &request).await
    }

    pub async fn unpin_server_ip(
        &self,
        ctx: &RequestContext,
        network: ObjectId,
        server: ObjectId,
    ) -> Result<Option<Outcome>> {
        let request = RestRequest::delete(pin_path(network, server));
        suppress(self.execute(ctx, &request).await, &[404])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> ObjectId {
        ObjectId::parse(&format!("00000000-0000-4000-8000-0000000000{:02x}", n)).unwrap()
    }

    #[test]
    fn test_object_state() {
        let states: Vec<ObjectState> =
            serde_json::from_str(r#"["in-provisioning", "active", "deleting"]"#).unwrap();
        assert_eq!(
            states,
            vec![
                ObjectState::InProvisioning,
                ObjectState::Active,
                ObjectState::Other("deleting".into())
            ]
        );
        assert_eq!(serde_json::to_string(&ObjectState::InProvisioning).unwrap(), "\"in-provisioning\"");
    }

    #[test]
    fn test_server_decoding() {
        let body = format!(
            r#"{{"server": {{
                "object_uuid": "{}", "name": "web", "power": true, "legacy": true,
                "status": "active", "cores": 2, "memory": 4,
                "relations": {{
                    "storages": [{{"object_uuid": "{}", "bootdevice": true}}],
                    "networks": [{{"network_uuid": "{}", "ordering": 0}}],
                    "public_ips": [{{"ip_uuid": "{}", "family": 4}}],
                    "isoimages": []
                }}
            }}}}"#,
            id(1),
            id(2),
            id(3),
            id(4)
        );
        let server = serde_json::from_str::<ServerEnvelope>(&body).unwrap().server;
        assert_eq!(
            server.power_model(),
            ServerPowerModel {
                running: true,
                supports_hot_update: false
            }
        );
        assert_eq!(
            server.relations.attachments(),
            vec![
                (RelationKind::IpAddress, id(4)),
                (RelationKind::Network, id(3)),
                (RelationKind::Storage, id(2)),
            ]
        );
    }

    #[test]
    fn test_network_link_body() {
        let attachment = ServerAttachment::Network(NetworkLink {
            network_id: id(7),
            ordering: 1,
            boot_device: false,
            firewall_template_id: None,
            firewall: None,
            pinned_ip: Some(Ipv4Addr::new(10, 0, 0, 5)),
        });
        assert_eq!(attachment.kind(), RelationKind::Network);
        assert_eq!(
            attachment.link_body(),
            json!({"object_uuid": id(7), "ordering": 1, "bootdevice": false})
        );
    }

    #[test]
    fn test_relation_paths() {
        assert_eq!(
            relation_path(id(1), RelationKind::IsoImage, id(2)),
            format!("/objects/servers/{}/isoimages/{}", id(1), id(2))
        );
        assert_eq!(RelationKind::IpAddress.segment(), "ips");
    }

    #[test]
    fn test_empty_update() {
        assert!(ServerUpdate::default().is_empty());
        let update = ServerUpdate {
            cores: Some(4),
            ..Default::default()
        };
        assert!(!update.is_empty());
        assert_eq!(serde_json::to_value(&update).unwrap(), json!({"cores": 4}));
    }
}
