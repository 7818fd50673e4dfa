//! Server relation reconciler - converges a server's relations and properties.

use async_trait::async_trait;
use tracing::{debug, info};
use vdc_client::{Client, ObjectId, RequestContext, Result, ResultExt};

use super::Reconciler;
use crate::config::ServerChange;
use crate::plan::{plan, RelationOp};
use crate::power::{PowerOrchestrator, PowerTransition};

/// Summary of one reconcile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// The server was powered off before applying the plan.
    pub shutdown_performed: bool,
    /// Operations that were sent, in order.
    pub applied: Vec<RelationOp>,
    /// Links skipped because the relation already existed.
    pub skipped_links: usize,
    /// Transition to the final power state.
    pub power: PowerTransition,
}

impl ReconcileReport {
    pub fn mutations(&self) -> usize {
        self.applied.len()
    }
}

/// Drives a server's relations from a desired/current snapshot pair.
///
/// Operations run strictly in plan order; each one is waited for before the
/// next is sent, also in asynchronous mode. The first error aborts the
/// reconcile and names the failed operation.
pub struct ServerRelationReconciler {
    client: Client,
    power: PowerOrchestrator,
}

impl ServerRelationReconciler {
    pub fn new(client: Client) -> Self {
        Self {
            power: PowerOrchestrator::new(client.clone()),
            client,
        }
    }

    pub async fn apply(
        &self,
        ctx: &RequestContext,
        server: ObjectId,
        change: &ServerChange,
    ) -> Result<ReconcileReport> {
        change.desired.validate()?;
        let ops = plan(change);
        let mut report = ReconcileReport::default();

        if ops.is_empty() && change.desired.power.is_none() {
            debug!("Server {} is up to date", server);
            return Ok(report);
        }
        info!("Reconciling server {} ({} operations)", server, ops.len());

        let model = self
            .power
            .status(ctx, server)
            .await
            .with_context(|| format!("read power state of server {}", server))?;

        if !ops.is_empty() && model.running && change.shutdown_required(model.supports_hot_update) {
            self.power
                .shutdown(ctx, server)
                .await
                .with_context(|| format!("shut down server {}", server))?;
            report.shutdown_performed = true;
        }

        for op in ops {
            let sent = self
                .apply_op(ctx, server, &op)
                .await
                .with_context(|| op.describe(server))?;
            if sent {
                report.applied.push(op);
            } else {
                report.skipped_links += 1;
            }
        }

        let running = change.desired.power.unwrap_or(model.running);
        report.power = self
            .power
            .ensure(ctx, server, running)
            .await
            .with_context(|| format!("set power of server {}", server))?;

        info!(
            "Reconciled server {}: {} applied, {} already linked",
            server,
            report.applied.len(),
            report.skipped_links
        );
        Ok(report)
    }

    /// Send one operation and wait for it. Returns false for a link that
    /// already existed.
    async fn apply_op(&self, ctx: &RequestContext, server: ObjectId, op: &RelationOp) -> Result<bool> {
        let client = &self.client;
        let outcome = match op {
            RelationOp::UpdateServer(update) => client.update_server(ctx, server, update).await?,
            RelationOp::Unlink { kind, object_id } => {
                match client.unlink(ctx, server, *kind, *object_id).await? {
                    Some(outcome) => outcome,
                    None => return Ok(true),
                }
            }
            RelationOp::Link(attachment) => {
                if client
                    .probe()
                    .relation_exists(ctx, server, attachment.kind(), attachment.object_id())
                    .await?
                {
                    info!(
                        "{} {} already linked to server {}",
                        attachment.kind(),
                        attachment.object_id(),
                        server
                    );
                    return Ok(false);
                }
                client.link(ctx, server, attachment).await?
            }
            RelationOp::UpdateNetwork { network_id, update } => {
                client
                    .update_network_relation(ctx, server, *network_id, update)
                    .await?
            }
            RelationOp::PinIp { network_id, ip } => {
                client.pin_server_ip(ctx, *network_id, server, *ip).await?
            }
            RelationOp::UnpinIp { network_id } => {
                match client.unpin_server_ip(ctx, *network_id, server).await? {
                    Some(outcome) => outcome,
                    None => return Ok(true),
                }
            }
        };
        client.settle(ctx, outcome).await?;
        Ok(true)
    }
}

#[async_trait]
impl Reconciler for ServerRelationReconciler {
    type Spec = ServerChange;
    type Status = ReconcileReport;

    async fn reconcile(
        &self,
        ctx: &RequestContext,
        id: &ObjectId,
        spec: &Self::Spec,
    ) -> Result<Self::Status> {
        self.apply(ctx, *id, spec).await
    }

    async fn finalize(&self, ctx: &RequestContext, id: &ObjectId) -> Result<()> {
        info!("Finalizing (detaching) server {}", id);
        let relations = self
            .client
            .server_relations(ctx, *id)
            .await
            .with_context(|| format!("read relations of server {}", id))?;

        for (kind, object_id) in relations.attachments() {
            let op = RelationOp::Unlink { kind, object_id };
            self.apply_op(ctx, *id, &op)
                .await
                .with_context(|| op.describe(*id))?;
        }
        Ok(())
    }
}
