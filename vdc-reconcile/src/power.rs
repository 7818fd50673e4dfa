//! Server power transitions.

use tracing::{info, warn};
use vdc_client::{Client, Error, ObjectId, RequestContext, Result, ServerPowerModel};

/// What a power transition did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PowerTransition {
    /// The server already was in the requested state.
    #[default]
    Unchanged,
    Applied,
    /// A graceful shutdown failed or timed out and the server was powered off.
    ForcedOff,
}

/// Coordinates start, hard stop and graceful shutdown of servers.
///
/// Every transition checks the current state first and issues no request if
/// the server already is there.
#[derive(Debug, Clone)]
pub struct PowerOrchestrator {
    client: Client,
}

impl PowerOrchestrator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn status(&self, ctx: &RequestContext, server: ObjectId) -> Result<ServerPowerModel> {
        Ok(self.client.get_server(ctx, server).await?.power_model())
    }

    pub async fn start(&self, ctx: &RequestContext, server: ObjectId) -> Result<PowerTransition> {
        if self.status(ctx, server).await?.running {
            return Ok(PowerTransition::Unchanged);
        }
        info!("Starting server {}", server);
        self.set_power(ctx, server, true).await?;
        Ok(PowerTransition::Applied)
    }

    /// Hard power off.
    pub async fn stop(&self, ctx: &RequestContext, server: ObjectId) -> Result<PowerTransition> {
        if !self.status(ctx, server).await?.running {
            return Ok(PowerTransition::Unchanged);
        }
        info!("Stopping server {}", server);
        self.set_power(ctx, server, false).await?;
        Ok(PowerTransition::Applied)
    }

    /// Ask the guest to shut down and wait until it is off.
    ///
    /// The shutdown request is not retried. A server error on the request, or
    /// the server still running after the power state timeout, falls back to
    /// a hard stop.
    pub async fn shutdown(&self, ctx: &RequestContext, server: ObjectId) -> Result<PowerTransition> {
        if !self.status(ctx, server).await?.running {
            return Ok(PowerTransition::Unchanged);
        }
        info!("Shutting down server {}", server);

        let single_attempt = ctx.clone().with_retry_budget(0);
        match self.client.request_server_shutdown(&single_attempt, server).await {
            Ok(outcome) => {
                self.client.settle(ctx, outcome).await?;
            }
            Err(e) if e.status_code().is_some_and(|code| code >= 500) => {
                warn!("Graceful shutdown of server {} failed, forcing off: {}", server, e);
                return self.force_off(ctx, server).await;
            }
            Err(e) => return Err(e),
        }

        match self.client.tracker().wait_for_power(ctx, server, false).await {
            Ok(()) => Ok(PowerTransition::Applied),
            Err(Error::Timeout(what)) => {
                warn!("Timed out waiting for {}, forcing off", what);
                self.force_off(ctx, server).await
            }
            Err(e) => Err(e),
        }
    }

    /// Bring the server to `running`, using a graceful shutdown to power off.
    pub async fn ensure(
        &self,
        ctx: &RequestContext,
        server: ObjectId,
        running: bool,
    ) -> Result<PowerTransition> {
        if running {
            self.start(ctx, server).await
        } else {
            self.shutdown(ctx, server).await
        }
    }

    async fn force_off(&self, ctx: &RequestContext, server: ObjectId) -> Result<PowerTransition> {
        self.set_power(ctx, server, false).await?;
        Ok(PowerTransition::ForcedOff)
    }

    /// PATCH the power state, wait for its request and, in synchronous mode,
    /// for the server to report the new state.
    async fn set_power(&self, ctx: &RequestContext, server: ObjectId, running: bool) -> Result<()> {
        let outcome = self.client.set_server_power(ctx, server, running).await?;
        self.client.settle(ctx, outcome).await?;
        if self.client.is_synchronous() {
            self.client
                .tracker()
                .wait_for_power(ctx, server, running)
                .await?;
        }
        Ok(())
    }
}
