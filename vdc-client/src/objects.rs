//! Generic object CRUD over the resource kinds of the platform.

use std::fmt;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::client::{Client, Outcome};
use crate::context::RequestContext;
use crate::error::{suppress, Result};
use crate::ident::ObjectId;
use crate::transport::RestRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Server,
    Storage,
    Network,
    IpAddress,
    IsoImage,
    Firewall,
    LoadBalancer,
    PaasService,
    Template,
}

impl ResourceKind {
    /// Collection segment below `/objects`.
    pub fn collection(self) -> &'static str {
        match self {
            ResourceKind::Server => "servers",
            ResourceKind::Storage => "storages",
            ResourceKind::Network => "networks",
            ResourceKind::IpAddress => "ips",
            ResourceKind::IsoImage => "isoimages",
            ResourceKind::Firewall => "firewalls",
            ResourceKind::LoadBalancer => "loadbalancers",
            ResourceKind::PaasService => "paas_services",
            ResourceKind::Template => "templates",
        }
    }

    pub fn collection_path(self) -> String {
        format!("/objects/{}", self.collection())
    }

    pub fn object_path(self, id: ObjectId) -> String {
        format!("/objects/{}/{}", self.collection(), id)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

impl Client {
    /// Read an object. The body is decoded as-is, including any envelope.
    pub async fn get_object<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        kind: ResourceKind,
        id: ObjectId,
    ) -> Result<T> {
        self.get(ctx, &kind.object_path(id)).await
    }

    /// Create an object. The returned outcome carries the new object's id.
    pub async fn create_object<B: Serialize>(
        &self,
        ctx: &RequestContext,
        kind: ResourceKind,
        body: &B,
    ) -> Result<Outcome> {
        let request = RestRequest::post(kind.collection_path(), body)?;
        self.execute(ctx, &request).await
    }

    pub async fn update_object<B: Serialize>(
        &self,
        ctx: &RequestContext,
        kind: ResourceKind,
        id: ObjectId,
        body: &B,
    ) -> Result<Outcome> {
        let request = RestRequest::patch(kind.object_path(id), body)?;
        self.execute(ctx, &request).await
    }

    /// Delete an object. An object that is already gone yields `Ok(None)`.
    ///
    /// In synchronous mode this also waits until the object path answers 404.
    pub async fn delete_object(
        &self,
        ctx: &RequestContext,
        kind: ResourceKind,
        id: ObjectId,
    ) -> Result<Option<Outcome>> {
        let path = kind.object_path(id);
        let outcome = suppress(self.execute(ctx, &RestRequest::delete(&path)).await, &[404])?;
        let Some(outcome) = outcome else {
            debug!("{} {} already deleted", kind, id);
            return Ok(None);
        };

        if outcome.is_pending() {
            return Ok(Some(outcome));
        }
        self.tracker()
            .wait_for_status(ctx, &path, StatusCode::NOT_FOUND)
            .await?;
        Ok(Some(outcome))
    }
}
