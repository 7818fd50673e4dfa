//! Existence checks that map "not found" to `false`.

use crate::client::Client;
use crate::context::RequestContext;
use crate::error::Result;
use crate::ident::ObjectId;
use crate::objects::ResourceKind;
use crate::servers::{relation_path, RelationKind};
use crate::transport::RestRequest;

pub struct ResourceExistenceProbe<'a> {
    client: &'a Client,
}

impl<'a> ResourceExistenceProbe<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// `Ok(true)` on 2xx, `Ok(false)` on 404, the error otherwise.
    pub async fn exists(&self, ctx: &RequestContext, path: &str) -> Result<bool> {
        match self.client.send(ctx, &RestRequest::get(path)).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn object_exists(
        &self,
        ctx: &RequestContext,
        kind: ResourceKind,
        id: ObjectId,
    ) -> Result<bool> {
        self.exists(ctx, &kind.object_path(id)).await
    }

    /// Whether `object` is attached to `server` as a relation of `kind`.
    pub async fn relation_exists(
        &self,
        ctx: &RequestContext,
        server: ObjectId,
        kind: RelationKind,
        object: ObjectId,
    ) -> Result<bool> {
        self.exists(ctx, &relation_path(server, kind, object)).await
    }
}
