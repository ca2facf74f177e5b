//! Request context middleware
//!
//! Builds one [`RequestContext`] per request and makes it available to inner
//! middleware and handlers as a [`SharedRequestContext`]:
//! - Reuses the client's correlation id (configured header) or generates a new one
//! - Derives the request URI and FHIR base URI, honoring forwarding headers
//! - Seeds resource type, audit event type, route name and principal when known
//! - Merges handler-supplied response headers into the response
//! - Echoes the correlation id in the response
//!
//! ```ignore
//! let config = Arc::new(RequestContextConfig::from_env()?);
//! let app = Router::new()
//!     .route("/fhir/:resource_type/:id", get(read))
//!     .layer(axum::middleware::from_fn_with_state(config, request_context_middleware));
//! ```

use axum::{
    extract::{MatchedPath, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Instant;
use tracing::Span;
use uuid::Uuid;

use crate::{
    config::RequestContextConfig,
    context::{RequestContext, SharedRequestContext},
    error::Error,
    principal::Principal,
    routing::{base_url_from_headers, extract_interaction, extract_resource_type},
};

#[tracing::instrument(
    name = "fhir_request",
    skip_all,
    fields(
        http.method = %req.method(),
        http.target = %req.uri().path(),
        correlation_id = tracing::field::Empty,
        fhir.route = tracing::field::Empty,
        fhir.resource_type = tracing::field::Empty,
        fhir.audit_event_type = tracing::field::Empty,
        http.response.status_code = tracing::field::Empty,
    )
)]
pub async fn request_context_middleware(
    State(config): State<Arc<RequestContextConfig>>,
    mut req: Request,
    next: Next,
) -> Response {
    let current_span = Span::current();
    let start = Instant::now();

    let correlation_id = correlation_id_from_headers(&config, req.headers());
    current_span.record("correlation_id", correlation_id.as_str());

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let base_path = config.normalized_base_path();
    let origin = base_url_from_headers(req.headers(), "");
    let base_uri = base_url_from_headers(req.headers(), &base_path);
    let uri = match req.uri().path_and_query() {
        Some(pq) => format!("{}{}", origin, pq.as_str()),
        None => format!("{}{}", origin, path),
    };

    let resource_type = if config.infer_resource_type {
        extract_resource_type(&base_path, &path)
    } else {
        None
    };

    let mut context = match RequestContext::new(
        method.as_str(),
        uri,
        base_uri,
        correlation_id.clone(),
        req.headers().clone(),
        HeaderMap::new(),
        resource_type,
    ) {
        Ok(context) => context,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to build request context");
            return rejection(e, &config, &correlation_id);
        }
    };

    if config.validate_uris_eagerly {
        if let Err(e) = context.validate_uris() {
            tracing::warn!(
                error = %e,
                uri = %context.uri_raw(),
                "Rejecting request with malformed URI"
            );
            return rejection(e, &config, &correlation_id);
        }
    }

    if let Some(matched) = req.extensions().get::<MatchedPath>() {
        context.set_route_name(matched.as_str());
    }
    if config.infer_audit_event_type {
        if let Some(interaction) = extract_interaction(method.as_str(), &base_path, &path) {
            context.set_audit_event_type(interaction);
        }
    }
    if let Some(principal) = req.extensions().get::<Principal>() {
        context.set_principal(principal.clone());
    }

    tracing::debug!(
        method = %method,
        path = %path,
        correlation_id = %correlation_id,
        "Incoming request"
    );

    let shared = SharedRequestContext::new(context);
    req.extensions_mut().insert(shared.clone());

    let mut response = next.run(req).await;

    let status = response.status();
    current_span.record("http.response.status_code", status.as_u16());

    let context = shared.lock().await;
    if let Some(route) = context.route_name() {
        current_span.record("fhir.route", route);
    }
    // Unset is normal for non-resource paths; don't trip the uninitialized read.
    if context.has_resource_type() {
        if let Ok(resource_type) = context.resource_type() {
            current_span.record("fhir.resource_type", resource_type);
        }
    }
    if let Some(audit_event_type) = context.audit_event_type() {
        current_span.record("fhir.audit_event_type", audit_event_type);
    }

    let headers = response.headers_mut();
    merge_headers(headers, context.response_headers());
    echo_correlation_id(headers, &config, context.correlation_id());

    let (storage_operation, storage_ms) = match context.storage_request_metrics() {
        Some(metrics) => (
            Some(metrics.operation().to_string()),
            Some(metrics.elapsed().as_millis()),
        ),
        None => (None, None),
    };

    tracing::info!(
        method = %method,
        path = %path,
        status = %status.as_u16(),
        duration_ms = start.elapsed().as_millis(),
        correlation_id = %context.correlation_id(),
        storage_operation = ?storage_operation,
        storage_ms = ?storage_ms,
        "Request completed"
    );

    drop(context);
    response
}

/// Correlation id for a request: the client's, when trusted and usable, otherwise a new UUID.
pub fn correlation_id_from_headers(config: &RequestContextConfig, headers: &HeaderMap) -> String {
    if config.trust_client_correlation_id {
        let client_id = headers
            .get(config.correlation_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(client_id) = client_id {
            return client_id.to_string();
        }
    }

    Uuid::new_v4().to_string()
}

/// Error response for a request rejected before any handler ran.
fn rejection(error: Error, config: &RequestContextConfig, correlation_id: &str) -> Response {
    let mut response = error.into_response();
    echo_correlation_id(response.headers_mut(), config, correlation_id);
    response
}

fn echo_correlation_id(
    headers: &mut HeaderMap,
    config: &RequestContextConfig,
    correlation_id: &str,
) {
    match (
        HeaderName::from_bytes(config.correlation_header.as_bytes()),
        HeaderValue::from_str(correlation_id),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => tracing::warn!(
            header = %config.correlation_header,
            "Cannot echo correlation id in response"
        ),
    }
}

/// Context headers replace any same-named headers the handler set directly.
fn merge_headers(target: &mut HeaderMap, source: &HeaderMap) {
    for name in source.keys() {
        target.remove(name);
    }
    for (name, value) in source {
        target.append(name.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_trusts_client_header() {
        let config = RequestContextConfig::default();
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static(" client-42 "));

        assert_eq!(correlation_id_from_headers(&config, &headers), "client-42");
    }

    #[test]
    fn test_correlation_id_generated_when_untrusted_or_blank() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("client-42"));

        let untrusted = RequestContextConfig {
            trust_client_correlation_id: false,
            ..RequestContextConfig::default()
        };
        let generated = correlation_id_from_headers(&untrusted, &headers);
        assert_ne!(generated, "client-42");
        assert!(Uuid::parse_str(&generated).is_ok());

        headers.insert("x-request-id", HeaderValue::from_static("   "));
        let generated = correlation_id_from_headers(&RequestContextConfig::default(), &headers);
        assert!(Uuid::parse_str(&generated).is_ok());
    }

    #[test]
    fn test_rejection_echoes_correlation_id() {
        let config = RequestContextConfig::default();
        let response = rejection(Error::blank("method"), &config, "corr-9");

        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(response.headers().get("x-request-id").unwrap(), "corr-9");
    }

    #[test]
    fn test_merge_headers_replaces_and_keeps_multiple_values() {
        let mut target = HeaderMap::new();
        target.insert("etag", HeaderValue::from_static("W/\"1\""));
        target.insert("content-type", HeaderValue::from_static("application/fhir+json"));

        let mut source = HeaderMap::new();
        source.insert("etag", HeaderValue::from_static("W/\"2\""));
        source.append("link", HeaderValue::from_static("<a>"));
        source.append("link", HeaderValue::from_static("<b>"));

        merge_headers(&mut target, &source);

        assert_eq!(target.get("etag").unwrap(), "W/\"2\"");
        assert_eq!(target.get_all("link").iter().count(), 2);
        assert_eq!(target.get("content-type").unwrap(), "application/fhir+json");
    }
}
