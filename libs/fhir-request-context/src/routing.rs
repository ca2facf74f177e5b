//! Path helpers used to pre-annotate a request context.
//!
//! These only look at the raw request line; the routing layer remains free to
//! overwrite whatever they infer.

use axum::http::HeaderMap;

/// Build the FHIR base URL (`{scheme}://{host}{base_path}`) using forwarding headers when present.
///
/// This is what Bundle links and `Location` headers must be relative to when running
/// behind reverse proxies.
pub fn base_url_from_headers(headers: &HeaderMap, base_path: &str) -> String {
    let scheme = forwarded_value(headers, &["x-forwarded-proto", "x-forwarded-scheme"])
        .unwrap_or("http");

    let host = forwarded_value(headers, &["x-forwarded-host", "host"]).unwrap_or("localhost");

    format!("{}://{}{}", scheme, host, base_path.trim_end_matches('/'))
}

/// First usable value among `names`.
///
/// Proxy chains append to forwarding headers (`https, http`); the client-facing
/// hop is the first entry.
fn forwarded_value<'a>(headers: &'a HeaderMap, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(',').next())
        .map(str::trim)
        .find(|v| !v.is_empty())
}

/// Path segments below `base_path`, or `None` if `path` is outside of it.
fn relative_segments<'a>(base_path: &str, path: &'a str) -> Option<Vec<&'a str>> {
    let base = base_path.trim_end_matches('/');
    let rest = path.strip_prefix(base)?;
    if !rest.is_empty() && !rest.starts_with('/') {
        // `/fhirx` is not below `/fhir`
        return None;
    }

    Some(rest.split('/').filter(|s| !s.is_empty()).collect())
}

/// Extract FHIR resource type from path
pub fn extract_resource_type(base_path: &str, path: &str) -> Option<String> {
    let segments = relative_segments(base_path, path)?;
    let first = *segments.first()?;

    // First segment should be resource type (unless it's a special path)
    if first.starts_with('_') || first.starts_with('$') || first == "metadata" {
        return None;
    }

    Some(first.to_string())
}

/// Classify a request as a FHIR RESTful interaction.
///
/// The result is suitable as an audit event type.
pub fn extract_interaction(method: &str, base_path: &str, path: &str) -> Option<&'static str> {
    let segments = relative_segments(base_path, path)?;

    if segments.iter().any(|s| s.starts_with('$')) {
        return Some("operation");
    }

    match method {
        "GET" | "HEAD" => {
            if segments.first() == Some(&"metadata") {
                Some("capabilities")
            } else if let Some(pos) = segments.iter().position(|s| *s == "_history") {
                if pos + 1 < segments.len() {
                    Some("vread")
                } else {
                    Some("history")
                }
            } else if segments.len() == 2 && segments[1] != "_search" {
                Some("read")
            } else {
                Some("search")
            }
        }
        "POST" => {
            if segments.is_empty() {
                Some("batch")
            } else if segments.contains(&"_search") {
                Some("search")
            } else if segments.len() == 1 {
                Some("create")
            } else {
                None
            }
        }
        "PUT" => Some("update"),
        "PATCH" => Some("patch"),
        "DELETE" => Some("delete"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_resource_type() {
        assert_eq!(
            extract_resource_type("/fhir", "/fhir/Patient"),
            Some("Patient".to_string())
        );
        assert_eq!(
            extract_resource_type("/fhir/", "/fhir/Patient/123"),
            Some("Patient".to_string())
        );
        assert_eq!(
            extract_resource_type("", "/Observation/1/_history"),
            Some("Observation".to_string())
        );
        assert_eq!(extract_resource_type("/fhir", "/fhir/metadata"), None);
        assert_eq!(extract_resource_type("/fhir", "/fhir/_search"), None);
        assert_eq!(extract_resource_type("/fhir", "/fhir/$export"), None);
        assert_eq!(extract_resource_type("/fhir", "/fhir"), None);
        assert_eq!(extract_resource_type("/fhir", "/fhirx/Patient"), None);
        assert_eq!(extract_resource_type("/fhir", "/health"), None);
    }

    #[test]
    fn test_extract_interaction() {
        let cases = [
            ("GET", "/fhir/Patient", Some("search")),
            ("GET", "/fhir/Patient/123", Some("read")),
            ("GET", "/fhir/Patient/_search", Some("search")),
            ("GET", "/fhir/Patient/123/_history", Some("history")),
            ("GET", "/fhir/Patient/123/_history/2", Some("vread")),
            ("GET", "/fhir/_history", Some("history")),
            ("GET", "/fhir/metadata", Some("capabilities")),
            ("GET", "/fhir/Patient/123/Observation", Some("search")),
            ("HEAD", "/fhir/Patient/123", Some("read")),
            ("POST", "/fhir", Some("batch")),
            ("POST", "/fhir/Patient", Some("create")),
            ("POST", "/fhir/Patient/_search", Some("search")),
            ("POST", "/fhir/Patient/$validate", Some("operation")),
            ("GET", "/fhir/$export", Some("operation")),
            ("PUT", "/fhir/Patient/123", Some("update")),
            ("PATCH", "/fhir/Patient/123", Some("patch")),
            ("DELETE", "/fhir/Patient/123", Some("delete")),
            ("OPTIONS", "/fhir/Patient", None),
            ("GET", "/health", None),
        ];

        for (method, path, expected) in cases {
            assert_eq!(
                extract_interaction(method, "/fhir", path),
                expected,
                "{method} {path}"
            );
        }
    }

    #[test]
    fn test_base_url_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            base_url_from_headers(&headers, "/fhir"),
            "http://localhost/fhir"
        );

        headers.insert("host", HeaderValue::from_static("internal:8080"));
        headers.insert("x-forwarded-host", HeaderValue::from_static("example.org"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert_eq!(
            base_url_from_headers(&headers, "/fhir/"),
            "https://example.org/fhir"
        );
    }

    #[test]
    fn test_base_url_uses_first_hop_of_proxy_chain() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("internal:8080"));
        headers.insert(
            "x-forwarded-host",
            HeaderValue::from_static("example.org, internal:8080"),
        );
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https, http"));
        assert_eq!(
            base_url_from_headers(&headers, "/fhir"),
            "https://example.org/fhir"
        );

        headers.insert("x-forwarded-host", HeaderValue::from_static(" , other"));
        assert_eq!(
            base_url_from_headers(&headers, "/fhir"),
            "https://internal:8080/fhir"
        );
    }
}
