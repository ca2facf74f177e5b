//! Configuration for building request contexts.
//!
//! Defaults work out of the box; every field can be overridden from the environment
//! using the `FHIR_REQUEST_CONTEXT__` prefix, e.g.
//! `FHIR_REQUEST_CONTEXT__BASE_PATH=/r4` or
//! `FHIR_REQUEST_CONTEXT__TRUST_CLIENT_CORRELATION_ID=false`.

use serde::Deserialize;

use crate::Result;

pub const ENV_PREFIX: &str = "FHIR_REQUEST_CONTEXT";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RequestContextConfig {
    /// Path prefix the FHIR API is mounted under.
    pub base_path: String,
    /// Header carrying the correlation id, in both directions.
    pub correlation_header: String,
    /// Reuse the client's correlation id instead of always generating one.
    pub trust_client_correlation_id: bool,
    /// Reject requests with unparseable URIs before any handler runs.
    pub validate_uris_eagerly: bool,
    /// Seed the resource type from the request path.
    pub infer_resource_type: bool,
    /// Seed the audit event type from method and path.
    pub infer_audit_event_type: bool,
}

impl Default for RequestContextConfig {
    fn default() -> Self {
        Self {
            base_path: "/fhir".to_string(),
            correlation_header: "x-request-id".to_string(),
            trust_client_correlation_id: true,
            validate_uris_eagerly: true,
            infer_resource_type: true,
            infer_audit_event_type: true,
        }
    }
}

impl RequestContextConfig {
    /// `base_path` with a leading slash and without a trailing one (`fhir/` -> `/fhir`).
    ///
    /// The root mount is the empty string.
    pub fn normalized_base_path(&self) -> String {
        let trimmed = self.base_path.trim().trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{}", trimmed)
        }
    }

    /// Load configuration from the process environment (and `.env`, if present).
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
    }

    /// Load configuration from an arbitrary `config` source layered over the defaults.
    pub fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = config::Config::builder().add_source(source).build()?;
        let mut loaded: Self = config.try_deserialize()?;
        loaded.base_path = loaded.normalized_base_path();

        tracing::debug!(
            base_path = %loaded.base_path,
            correlation_header = %loaded.correlation_header,
            trust_client_correlation_id = loaded.trust_client_correlation_id,
            validate_uris_eagerly = loaded.validate_uris_eagerly,
            "Request context configuration loaded"
        );

        Ok(loaded)
    }
}
