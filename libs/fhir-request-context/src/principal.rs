//! Claims-based identity of the caller.
//!
//! Authentication middleware builds a [`Principal`] from validated token claims
//! and attaches it to the request context.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub subject: String,
    pub scopes: Vec<String>,
    pub issuer: Option<String>,
    pub audience: Option<Vec<String>>,
    pub client_id: Option<String>,
    pub patient: Option<String>,
    /// Raw claims the principal was built from.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub claims: Map<String, Value>,
}

impl Principal {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }

    /// Build a principal from a decoded JWT claims object.
    ///
    /// Anything other than a JSON object yields an anonymous principal with no claims.
    pub fn from_claims(claims: Value) -> Self {
        let Value::Object(claims) = claims else {
            return Self::default();
        };

        let text = |name: &str| claims.get(name).and_then(Value::as_str).map(str::to_string);
        let list = |name: &str| -> Option<Vec<String>> {
            match claims.get(name)? {
                Value::String(s) => Some(vec![s.clone()]),
                Value::Array(arr) => Some(
                    arr.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect(),
                ),
                _ => None,
            }
        };

        // OAuth `scope` is space-delimited; some IdPs send an `scp` array instead.
        let scopes = match claims.get("scope").and_then(Value::as_str) {
            Some(scope) => scope.split_whitespace().map(str::to_string).collect(),
            None => list("scp").unwrap_or_default(),
        };

        Principal {
            subject: text("sub").unwrap_or_default(),
            scopes,
            issuer: text("iss"),
            audience: list("aud"),
            client_id: text("azp").or_else(|| text("client_id")),
            patient: text("patient"),
            claims,
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }
}
