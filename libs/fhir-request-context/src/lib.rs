//! Per-request context for FHIR servers
//!
//! A [`RequestContext`] carries the metadata of one inbound request (method, URIs,
//! correlation id, headers) together with the annotations pipeline stages add while
//! handling it: route name, audit event type, authenticated [`Principal`], storage
//! metrics and the resource type.
//!
//! The [`middleware`] module builds the context for axum routers and hands it to
//! handlers as a [`SharedRequestContext`].

pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod principal;
pub mod routing;

pub use config::RequestContextConfig;
pub use context::{RequestContext, SharedRequestContext};
pub use error::{Error, Result};
pub use metrics::{StorageOperationMetrics, StorageRequestMetrics};
pub use middleware::request_context_middleware;
pub use principal::Principal;
