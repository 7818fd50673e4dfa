//! Completion tracking for async requests and other observable states.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;

use crate::client::{Client, RequestHandle};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::ident::ObjectId;
use crate::transport::RestRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestState {
    Done,
    Failed,
    InProgress,
    #[serde(other)]
    Unknown,
}

/// Entry of `GET /requests/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestStatus {
    pub status: RequestState,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
}

/// Polls until an async request, an object path or a server power state
/// reaches the expected state.
///
/// Every poll goes through the client's retry loop. The first poll is
/// immediate; later polls are spaced by the configured delay interval.
pub struct AsyncRequestTracker<'a> {
    client: &'a Client,
}

impl<'a> AsyncRequestTracker<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// Wait until the request of `handle` is done.
    ///
    /// Returns the handle's object id on success. Cancellation during the
    /// wait yields [`Error::AppliedWaitCancelled`] since the mutation has
    /// already been accepted.
    pub async fn wait(&self, ctx: &RequestContext, handle: RequestHandle) -> Result<Option<ObjectId>> {
        match self.poll_request(ctx, &handle.request_id).await {
            Ok(()) => Ok(handle.object_id),
            Err(Error::Cancelled) => Err(Error::AppliedWaitCancelled {
                request_id: handle.request_id,
                object_id: handle.object_id,
            }),
            Err(e) => Err(e),
        }
    }

    async fn poll_request(&self, ctx: &RequestContext, request_id: &str) -> Result<()> {
        let path = format!("/requests/{}", request_id);
        let deadline = Instant::now() + self.client.request_completion_timeout();
        let mut polls = 0u32;

        loop {
            polls += 1;
            let mut statuses: HashMap<String, RequestStatus> = self.client.get(ctx, &path).await?;
            match statuses.remove(request_id).map(|s| (s.status, s.message)) {
                Some((RequestState::Done, _)) => {
                    debug!("Request {} done after {} polls", request_id, polls);
                    return Ok(());
                }
                Some((RequestState::Failed, message)) => {
                    return Err(Error::AsyncFailed {
                        request_id: request_id.to_string(),
                        message,
                    });
                }
                Some((state, _)) => debug!("Request {} is {:?}", request_id, state),
                None => debug!("Request {} not listed yet", request_id),
            }

            self.pause(ctx, deadline, || format!("request {}", request_id))
                .await?;
        }
    }

    /// Wait until `GET path` answers `expected`. Any 2xx matches an expected
    /// 2xx status.
    pub async fn wait_for_status(
        &self,
        ctx: &RequestContext,
        path: &str,
        expected: StatusCode,
    ) -> Result<()> {
        let deadline = Instant::now() + self.client.request_completion_timeout();
        let request = RestRequest::get(path);

        loop {
            let observed = match self.client.send(ctx, &request).await {
                Ok(response) => response.status.as_u16(),
                Err(e) => e.status_code().ok_or(e)?,
            };
            let matched = if expected.is_success() {
                (200..300).contains(&observed)
            } else {
                observed == expected.as_u16()
            };
            if matched {
                return Ok(());
            }
            debug!("{} answered {}, waiting for {}", path, observed, expected);

            self.pause(ctx, deadline, || format!("{} to answer {}", path, expected))
                .await?;
        }
    }

    /// Wait until the server's power state is `running`.
    pub async fn wait_for_power(
        &self,
        ctx: &RequestContext,
        server: ObjectId,
        running: bool,
    ) -> Result<()> {
        let deadline = Instant::now() + self.client.power_state_timeout();

        loop {
            let current = self.client.get_server(ctx, server).await?;
            if current.power == running {
                return Ok(());
            }
            debug!("Server {} power is {}, waiting for {}", server, current.power, running);

            self.pause(ctx, deadline, || {
                format!("server {} to reach power {}", server, if running { "on" } else { "off" })
            })
            .await?;
        }
    }

    /// Sleep until the next poll, or fail with [`Error::Timeout`] once the
    /// deadline has passed.
    async fn pause<F>(&self, ctx: &RequestContext, deadline: Instant, what: F) -> Result<()>
    where
        F: FnOnce() -> String,
    {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::Timeout(what()));
        }
        ctx.sleep(self.client.delay_interval().min(remaining)).await
    }
}
