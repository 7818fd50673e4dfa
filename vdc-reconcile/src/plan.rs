//! Ordered list of relation operations for one reconcile.

use std::fmt;
use std::net::Ipv4Addr;

use vdc_client::{
    NetworkLink, NetworkRelationUpdate, ObjectId, RelationKind, ServerAttachment, ServerUpdate,
};

use crate::config::{NetworkAttachmentSpec, ServerChange};

/// One mutation against a server.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationOp {
    UpdateServer(ServerUpdate),
    Unlink {
        kind: RelationKind,
        object_id: ObjectId,
    },
    Link(ServerAttachment),
    UpdateNetwork {
        network_id: ObjectId,
        update: NetworkRelationUpdate,
    },
    PinIp {
        network_id: ObjectId,
        ip: Ipv4Addr,
    },
    UnpinIp {
        network_id: ObjectId,
    },
}

impl RelationOp {
    /// Short description naming the operation and its subjects.
    pub fn describe(&self, server: ObjectId) -> String {
        match self {
            RelationOp::UpdateServer(_) => format!("update server {}", server),
            RelationOp::Unlink { kind, object_id } => {
                format!("unlink {} {} from server {}", kind, object_id, server)
            }
            RelationOp::Link(attachment) => format!(
                "link {} {} to server {}",
                attachment.kind(),
                attachment.object_id(),
                server
            ),
            RelationOp::UpdateNetwork { network_id, .. } => {
                format!("update network {} on server {}", network_id, server)
            }
            RelationOp::PinIp { network_id, ip } => {
                format!("pin IP {} for server {} on network {}", ip, server, network_id)
            }
            RelationOp::UnpinIp { network_id } => {
                format!("unpin IP of server {} on network {}", server, network_id)
            }
        }
    }
}

impl fmt::Display for RelationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationOp::UpdateServer(_) => write!(f, "update server properties"),
            RelationOp::Unlink { kind, object_id } => write!(f, "unlink {} {}", kind, object_id),
            RelationOp::Link(attachment) => {
                write!(f, "link {} {}", attachment.kind(), attachment.object_id())
            }
            RelationOp::UpdateNetwork { network_id, .. } => write!(f, "update network {}", network_id),
            RelationOp::PinIp { network_id, ip } => write!(f, "pin {} on network {}", ip, network_id),
            RelationOp::UnpinIp { network_id } => write!(f, "unpin IP on network {}", network_id),
        }
    }
}

/// Compute the operations that bring `current` to `desired`.
///
/// Order: server properties, ISO image, IPv4, IPv6, networks, storages.
/// Networks are relinked entirely when their list or ordering changed.
/// Otherwise, when any network property or pin changed, every relation is
/// updated in place. Storages are relinked entirely on any change.
pub fn plan(change: &ServerChange) -> Vec<RelationOp> {
    let mut ops = Vec::new();
    let (desired, current) = (&change.desired, &change.current);

    let update = change.server_update();
    if !update.is_empty() {
        ops.push(RelationOp::UpdateServer(update));
    }

    if change.iso_image_changed() {
        swap(&mut ops, RelationKind::IsoImage, current.iso_image, desired.iso_image, |id| {
            ServerAttachment::IsoImage { id }
        });
    }
    if change.ipv4_changed() {
        swap(&mut ops, RelationKind::IpAddress, current.ipv4, desired.ipv4, |id| {
            ServerAttachment::Ipv4 { id }
        });
    }
    if change.ipv6_changed() {
        swap(&mut ops, RelationKind::IpAddress, current.ipv6, desired.ipv6, |id| {
            ServerAttachment::Ipv6 { id }
        });
    }

    if change.network_list_changed() {
        for network in &current.networks {
            ops.push(RelationOp::Unlink {
                kind: RelationKind::Network,
                object_id: network.network_id,
            });
        }
        for (ordering, network) in desired.networks.iter().enumerate() {
            let link = network_link(network, ordering as u32);
            let pin = link.pinned_ip;
            ops.push(RelationOp::Link(ServerAttachment::Network(link)));
            if let Some(ip) = pin {
                ops.push(RelationOp::PinIp {
                    network_id: network.network_id,
                    ip,
                });
            }
        }
    } else if change.network_properties_changed() {
        for (ordering, (d, c)) in desired.networks.iter().zip(&current.networks).enumerate() {
            ops.push(RelationOp::UpdateNetwork {
                network_id: d.network_id,
                update: NetworkRelationUpdate {
                    ordering: ordering as u32,
                    bootdevice: d.boot_device,
                    firewall: d.composed_firewall(),
                    firewall_template_uuid: d.firewall_template_id,
                },
            });
            if d.pinned_ip != c.pinned_ip {
                ops.push(match d.pinned_ip {
                    Some(ip) => RelationOp::PinIp {
                        network_id: d.network_id,
                        ip,
                    },
                    None => RelationOp::UnpinIp {
                        network_id: d.network_id,
                    },
                });
            }
        }
    }

    if change.storages_changed() {
        for storage in &current.storages {
            ops.push(RelationOp::Unlink {
                kind: RelationKind::Storage,
                object_id: *storage,
            });
        }
        for (i, storage) in desired.storages.iter().enumerate() {
            ops.push(RelationOp::Link(ServerAttachment::Storage {
                id: *storage,
                boot_device: i == 0,
            }));
        }
    }

    ops
}

fn swap(
    ops: &mut Vec<RelationOp>,
    kind: RelationKind,
    old: Option<ObjectId>,
    new: Option<ObjectId>,
    attach: impl FnOnce(ObjectId) -> ServerAttachment,
) {
    if let Some(object_id) = old {
        ops.push(RelationOp::Unlink { kind, object_id });
    }
    if let Some(id) = new {
        ops.push(RelationOp::Link(attach(id)));
    }
}

fn network_link(network: &NetworkAttachmentSpec, ordering: u32) -> NetworkLink {
    NetworkLink {
        network_id: network.network_id,
        ordering,
        boot_device: network.boot_device,
        firewall_template_id: network.firewall_template_id,
        firewall: network.composed_firewall(),
        pinned_ip: network.pinned_ip,
    }
}
