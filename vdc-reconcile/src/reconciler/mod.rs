//! Reconcilers for server-side resources.
//!
//! Each reconciler compares desired state with the current state and takes
//! actions against the API to converge.

pub mod server;

use async_trait::async_trait;
use vdc_client::{ObjectId, RequestContext, Result};

/// Trait for resource reconcilers.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Desired (and known current) state of the resource.
    type Spec;
    /// Summary of what a reconcile did.
    type Status;

    /// Reconcile the resource - compare desired vs current state and take action.
    async fn reconcile(
        &self,
        ctx: &RequestContext,
        id: &ObjectId,
        spec: &Self::Spec,
    ) -> Result<Self::Status>;

    /// Detach the resource before it is deleted.
    async fn finalize(&self, ctx: &RequestContext, id: &ObjectId) -> Result<()>;
}
