//! Client for a virtual-datacenter REST API.
//!
//! Mutating calls return an async request handle. In synchronous mode (the
//! default) the client polls the handle until the request is done before
//! returning; in asynchronous mode the handle is handed to the caller as
//! [`Outcome::Pending`].

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod firewall;
pub mod ident;
pub mod objects;
pub mod probe;
pub mod retry;
pub mod servers;
pub mod tracker;
pub mod transport;

pub use client::{Client, Outcome, RequestHandle};
pub use config::ClientConfig;
pub use context::RequestContext;
pub use error::{suppress, ApiError, Error, ErrorKind, Result, ResultExt};
pub use firewall::{Action, AddressFamily, FirewallRule, FirewallRuleSet, Protocol};
pub use ident::ObjectId;
pub use objects::ResourceKind;
pub use probe::ResourceExistenceProbe;
pub use retry::{RetryDecision, RetryPolicy};
pub use servers::{
    NetworkLink, NetworkRelationUpdate, ObjectState, RelationKind, Server, ServerAttachment,
    ServerPowerModel, ServerRelations, ServerUpdate,
};
pub use tracker::{AsyncRequestTracker, RequestState, RequestStatus};
pub use transport::{RawResponse, RestRequest, Transport};
