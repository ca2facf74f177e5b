//! Per-request context carried through the FHIR request pipeline.
//!
//! One [`RequestContext`] is created per inbound request. Pipeline stages annotate
//! it as they run: routing sets the route name and resource type, authentication
//! sets the principal, handlers set the audit event type, and the storage layer
//! attaches its metrics.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, MutexGuard};
use url::Url;

use crate::{metrics::StorageRequestMetrics, principal::Principal, Error, Result};

#[derive(Debug, Clone)]
pub struct RequestContext {
    method: String,
    uri_raw: String,
    base_uri_raw: String,
    uri: OnceLock<std::result::Result<Url, url::ParseError>>,
    base_uri: OnceLock<std::result::Result<Url, url::ParseError>>,
    correlation_id: String,
    route_name: Option<String>,
    audit_event_type: Option<String>,
    principal: Option<Principal>,
    request_headers: HeaderMap,
    response_headers: HeaderMap,
    storage_request_metrics: Option<Arc<dyn StorageRequestMetrics>>,
    /// `None` until a resource type has been determined; `Some("")` is a valid value.
    resource_type: Option<String>,
}

impl RequestContext {
    /// Create the context for one request.
    ///
    /// `method`, `uri`, `base_uri` and `correlation_id` must not be blank. URIs are
    /// parsed lazily on first access. A non-empty `resource_type` marks the resource
    /// type as known; otherwise it stays unset until [`set_resource_type`] is called.
    ///
    /// [`set_resource_type`]: RequestContext::set_resource_type
    pub fn new(
        method: impl Into<String>,
        uri: impl Into<String>,
        base_uri: impl Into<String>,
        correlation_id: impl Into<String>,
        request_headers: HeaderMap,
        response_headers: HeaderMap,
        resource_type: Option<String>,
    ) -> Result<Self> {
        let method = require_non_blank("method", method.into())?;
        let uri_raw = require_non_blank("uri", uri.into())?;
        let base_uri_raw = require_non_blank("base_uri", base_uri.into())?;
        let correlation_id = require_non_blank("correlation_id", correlation_id.into())?;

        let resource_type = resource_type.filter(|rt| !rt.is_empty());

        tracing::trace!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri_raw,
            resource_type = resource_type.as_deref().unwrap_or_default(),
            "Request context created"
        );

        Ok(Self {
            method,
            uri_raw,
            base_uri_raw,
            uri: OnceLock::new(),
            base_uri: OnceLock::new(),
            correlation_id,
            route_name: None,
            audit_event_type: None,
            principal: None,
            request_headers,
            response_headers,
            storage_request_metrics: None,
            resource_type,
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn uri_raw(&self) -> &str {
        &self.uri_raw
    }

    pub fn base_uri_raw(&self) -> &str {
        &self.base_uri_raw
    }

    /// Parsed request URI. Parsed on first call, cached afterwards.
    pub fn uri(&self) -> Result<&Url> {
        parse_cached(&self.uri, "uri", &self.uri_raw)
    }

    /// Parsed FHIR base URI. Parsed on first call, cached afterwards.
    pub fn base_uri(&self) -> Result<&Url> {
        parse_cached(&self.base_uri, "base_uri", &self.base_uri_raw)
    }

    /// Parse both URIs now instead of on first access.
    pub fn validate_uris(&self) -> Result<()> {
        self.base_uri()?;
        self.uri()?;
        Ok(())
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn route_name(&self) -> Option<&str> {
        self.route_name.as_deref()
    }

    pub fn set_route_name(&mut self, route_name: impl Into<String>) {
        self.route_name = Some(route_name.into());
    }

    pub fn audit_event_type(&self) -> Option<&str> {
        self.audit_event_type.as_deref()
    }

    pub fn set_audit_event_type(&mut self, audit_event_type: impl Into<String>) {
        self.audit_event_type = Some(audit_event_type.into());
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn set_principal(&mut self, principal: Principal) {
        self.principal = Some(principal);
    }

    /// Headers of the inbound request.
    pub fn request_headers(&self) -> &HeaderMap {
        &self.request_headers
    }

    /// Headers to be added to the outgoing response.
    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    pub fn storage_request_metrics(&self) -> Option<&Arc<dyn StorageRequestMetrics>> {
        self.storage_request_metrics.as_ref()
    }

    pub fn set_storage_request_metrics(&mut self, metrics: Arc<dyn StorageRequestMetrics>) {
        self.storage_request_metrics = Some(metrics);
    }

    /// The resource type this request acts on.
    ///
    /// Reading it before routing has determined it is a pipeline ordering bug and
    /// fails with [`Error::IllegalState`].
    pub fn resource_type(&self) -> Result<&str> {
        match &self.resource_type {
            Some(resource_type) => Ok(resource_type.as_str()),
            None => {
                tracing::error!(
                    correlation_id = %self.correlation_id,
                    "Resource type read before it was initialized"
                );
                Err(Error::IllegalState(
                    "resource type was not initialized yet".to_string(),
                ))
            }
        }
    }

    /// Whether a resource type has been set, without failing when it has not.
    pub fn has_resource_type(&self) -> bool {
        self.resource_type.is_some()
    }

    /// Set the resource type. Empty strings are accepted and count as set.
    pub fn set_resource_type(&mut self, resource_type: impl Into<String>) {
        self.resource_type = Some(resource_type.into());
    }
}

fn require_non_blank(name: &'static str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        tracing::debug!(argument = name, "Rejected blank request context argument");
        return Err(Error::blank(name));
    }
    Ok(value)
}

fn parse_cached<'a>(
    cell: &'a OnceLock<std::result::Result<Url, url::ParseError>>,
    name: &'static str,
    raw: &str,
) -> Result<&'a Url> {
    cell.get_or_init(|| Url::parse(raw))
        .as_ref()
        .map_err(|source| Error::Format {
            name,
            source: *source,
        })
}

/// Handle to the request context shared by every stage handling one request.
///
/// Inserted into request extensions by the context middleware and extracted in
/// handlers. Stages take the lock only for as long as they annotate the context.
#[derive(Debug, Clone)]
pub struct SharedRequestContext(Arc<Mutex<RequestContext>>);

impl SharedRequestContext {
    pub fn new(context: RequestContext) -> Self {
        Self(Arc::new(Mutex::new(context)))
    }

    pub async fn lock(&self) -> MutexGuard<'_, RequestContext> {
        self.0.lock().await
    }

    /// Clone of the context as it currently stands.
    pub async fn snapshot(&self) -> RequestContext {
        self.0.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for SharedRequestContext
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<SharedRequestContext>()
            .cloned()
            .ok_or_else(|| {
                Error::IllegalState("request context middleware is not installed".to_string())
            })
    }
}
