//! Server relation reconciliation for the virtual datacenter API.
//!
//! [`plan()`] turns a desired/current snapshot pair into an ordered list of
//! relation operations; [`ServerRelationReconciler`] applies it, powering the
//! server off first when the change cannot be applied live.

pub mod config;
pub mod firewall;
pub mod plan;
pub mod power;
pub mod reconciler;

pub use config::{NetworkAttachmentSpec, ServerChange, ServerConfig};
pub use firewall::{default_inbound_rules, FirewallRuleComposer, DEFAULT_RULE_COUNT};
pub use plan::{plan, RelationOp};
pub use power::{PowerOrchestrator, PowerTransition};
pub use reconciler::server::{ReconcileReport, ServerRelationReconciler};
pub use reconciler::Reconciler;
