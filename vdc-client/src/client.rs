//! API client: retry loop, mutation outcomes and access to the tracker and
//! probe helpers.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::ident::ObjectId;
use crate::probe::ResourceExistenceProbe;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::tracker::AsyncRequestTracker;
use crate::transport::{RawResponse, RestRequest, Transport};

/// Handle of an accepted mutation whose async request may still be running.
///
/// Consumed by [`AsyncRequestTracker::wait`].
#[derive(Debug, PartialEq, Eq)]
pub struct RequestHandle {
    pub request_id: String,
    pub object_id: Option<ObjectId>,
}

/// Body returned by the API for accepted mutations.
#[derive(Debug, Default, Deserialize)]
struct MutationEnvelope {
    #[serde(default)]
    object_uuid: Option<String>,
    #[serde(default)]
    request_uuid: Option<String>,
}

/// Result of a mutating call.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The mutation is done (synchronous mode, or no async request was started).
    Completed { object_id: Option<ObjectId> },
    /// The mutation was accepted; its completion has not been observed.
    Pending(RequestHandle),
}

impl Outcome {
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            Outcome::Completed { object_id } => *object_id,
            Outcome::Pending(handle) => handle.object_id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending(_))
    }
}

struct Inner {
    transport: Transport,
    retry: RetryPolicy,
    synchronous: bool,
    request_completion_timeout: Duration,
    delay_interval: Duration,
    power_state_timeout: Duration,
}

/// Client for the virtual-datacenter API.
///
/// Cheap to clone and safe to share between tasks.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.transport.base_url())
            .field("synchronous", &self.inner.synchronous)
            .finish()
    }
}

impl Client {
    /// Create a client. The configuration is validated first.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                transport: Transport::new(&config)?,
                retry: RetryPolicy::from_config(&config),
                synchronous: config.synchronous,
                request_completion_timeout: config.request_completion_timeout,
                delay_interval: config.delay_interval,
                power_state_timeout: config.power_state_timeout,
            }),
        })
    }

    /// Create a client configured from `VDC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn is_synchronous(&self) -> bool {
        self.inner.synchronous
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    pub fn delay_interval(&self) -> Duration {
        self.inner.delay_interval
    }

    pub fn request_completion_timeout(&self) -> Duration {
        self.inner.request_completion_timeout
    }

    pub fn power_state_timeout(&self) -> Duration {
        self.inner.power_state_timeout
    }

    pub fn tracker(&self) -> AsyncRequestTracker<'_> {
        AsyncRequestTracker::new(self)
    }

    pub fn probe(&self) -> ResourceExistenceProbe<'_> {
        ResourceExistenceProbe::new(self)
    }

    /// Send `request`, retrying retryable failures.
    pub async fn send(&self, ctx: &RequestContext, request: &RestRequest) -> Result<RawResponse> {
        let mut retries = 0;
        loop {
            ctx.check()?;
            let err = match self.inner.transport.send(ctx, request).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            match self
                .inner
                .retry
                .decide(&request.method, &err, retries, ctx.retry_budget())
            {
                RetryDecision::Stop => return Err(err),
                RetryDecision::Exhausted if retries == 0 => return Err(err),
                RetryDecision::Exhausted => return Err(Error::RetriesExhausted(Box::new(err))),
                RetryDecision::RetryAfter(delay) => {
                    retries += 1;
                    warn!(
                        "Retrying {} {} in {:?} (retry {}): {}",
                        request.method, request.path, delay, retries, err
                    );
                    ctx.sleep(delay).await?;
                }
            }
        }
    }

    /// GET `path` and decode the body.
    pub async fn get<T: DeserializeOwned>(&self, ctx: &RequestContext, path: &str) -> Result<T> {
        let request = RestRequest::get(path);
        self.send(ctx, &request).await?.json(&request)
    }

    /// Send a mutating request.
    ///
    /// In synchronous mode this waits for the async request to finish and
    /// returns [`Outcome::Completed`]. In asynchronous mode, or when the
    /// request skips the wait, the handle is returned as [`Outcome::Pending`].
    pub async fn execute(&self, ctx: &RequestContext, request: &RestRequest) -> Result<Outcome> {
        let response = self.send(ctx, request).await?;
        let handle = match handle_from_response(request, &response)? {
            Handle::Request(handle) => handle,
            Handle::None { object_id } => return Ok(Outcome::Completed { object_id }),
        };

        if !self.is_synchronous() || request.skip_completion_wait {
            debug!(
                "Not waiting for request {} ({} {})",
                handle.request_id, request.method, request.path
            );
            return Ok(Outcome::Pending(handle));
        }

        let object_id = self.tracker().wait(ctx, handle).await?;
        Ok(Outcome::Completed { object_id })
    }

    /// Wait for a pending outcome to finish.
    pub async fn settle(&self, ctx: &RequestContext, outcome: Outcome) -> Result<Option<ObjectId>> {
        match outcome {
            Outcome::Completed { object_id } => Ok(object_id),
            Outcome::Pending(handle) => self.tracker().wait(ctx, handle).await,
        }
    }
}

enum Handle {
    Request(RequestHandle),
    None { object_id: Option<ObjectId> },
}

/// The request id comes from the body's `request_uuid`, falling back to the
/// `X-Request-Id` header. A blank body carries no envelope; any other body
/// must decode as one.
fn handle_from_response(request: &RestRequest, response: &RawResponse) -> Result<Handle> {
    let envelope: MutationEnvelope = if response.body.iter().all(u8::is_ascii_whitespace) {
        MutationEnvelope::default()
    } else {
        response.json(request)?
    };

    let object_id = envelope
        .object_uuid
        .as_deref()
        .map(ObjectId::parse)
        .transpose()?;

    Ok(match envelope.request_uuid.or_else(|| response.request_id.clone()) {
        Some(request_id) => Handle::Request(RequestHandle {
            request_id,
            object_id,
        }),
        None => Handle::None { object_id },
    })
}
