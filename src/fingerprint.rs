//! Request normalization into comparable match keys

use std::fmt;

use sha2::{Digest, Sha256};

use crate::pact::RequestMatching;

/// Normalized identity of a request used for matching
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchKey {
    /// HTTP method (uppercase)
    pub method: String,
    /// Path, relative to the base URL when matching is relative
    pub path: String,
    /// Query parameters without ignored keys (sorted)
    pub query: Vec<(String, String)>,
}

impl MatchKey {
    /// Normalize a method and URL
    ///
    /// `base_url` is the base the URL was issued against; it is stripped when
    /// `options.base_url_relative` is set.
    #[must_use]
    pub fn from_url(method: &str, url: &str, base_url: &str, options: &RequestMatching) -> Self {
        let url = url.trim();
        let url = url.split_once('#').map_or(url, |(u, _)| u);
        let (raw_path, raw_query) = url.split_once('?').unwrap_or((url, ""));

        let path = if options.base_url_relative {
            normalize_path(strip_origin(raw_path, base_url))
        } else {
            raw_path.trim_end_matches('/').to_string()
        };

        let mut query: Vec<(String, String)> = raw_query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (decode_component(key), decode_component(value))
            })
            .filter(|(key, _)| !options.ignore_url_parameters.iter().any(|i| i == key))
            .collect();
        query.sort();

        Self {
            method: method.trim().to_uppercase(),
            path,
            query,
        }
    }

    /// SHA-256 digest of the key
    #[must_use]
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();

        hasher.update((self.method.len() as u32).to_le_bytes());
        hasher.update(self.method.as_bytes());

        hasher.update((self.path.len() as u32).to_le_bytes());
        hasher.update(self.path.as_bytes());

        for (key, value) in &self.query {
            hasher.update((key.len() as u32).to_le_bytes());
            hasher.update(key.as_bytes());
            hasher.update((value.len() as u32).to_le_bytes());
            hasher.update(value.as_bytes());
        }

        hasher.finalize().into()
    }

    /// Short hex form of the fingerprint for logs
    #[must_use]
    pub fn short_hash(&self) -> String {
        hex::encode(&self.fingerprint()[..8])
    }
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)?;
        for (i, (key, value)) in self.query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{key}={value}")?;
        }
        Ok(())
    }
}

/// Remove the base URL, or any scheme and authority, from a URL path
fn strip_origin<'a>(url: &'a str, base_url: &str) -> &'a str {
    let base = base_url.trim().trim_end_matches('/');
    if !base.is_empty() {
        if let Some(rest) = url.strip_prefix(base) {
            if rest.is_empty() || rest.starts_with('/') {
                return rest;
            }
        }
    }

    match url.find("://") {
        Some(idx) => {
            let after = &url[idx + 3..];
            after.find('/').map_or("", |slash| &after[slash..])
        }
        None => url,
    }
}

/// Normalize a URL path
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    let trimmed = trimmed.trim_end_matches('/');

    if trimmed.is_empty() || !trimmed.starts_with('/') {
        format!("/{trimmed}")
    } else {
        trimmed.to_string()
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced).map_or(spaced.clone(), |decoded| decoded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://tenant.example.com";

    fn key(method: &str, url: &str, ignore: &[&str]) -> MatchKey {
        let options = RequestMatching {
            ignore_url_parameters: ignore.iter().map(ToString::to_string).collect(),
            ..RequestMatching::default()
        };
        MatchKey::from_url(method, url, BASE, &options)
    }

    #[test]
    fn test_ignored_parameter_removed() {
        let k = key(
            "GET",
            "https://tenant.example.com/inventory/managedObjects?pageSize=5&dateFrom=2024-01-01",
            &["dateFrom"],
        );
        assert_eq!(k.to_string(), "GET /inventory/managedObjects?pageSize=5");
    }

    #[test]
    fn test_method_case_insensitive() {
        let a = key("get", "/alarm/alarms", &[]);
        let b = key("GET", "/alarm/alarms", &[]);
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_query_order_independence() {
        let a = key("GET", "/a?b=2&a=1", &[]);
        let b = key("GET", "/a?a=1&b=2", &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_query_values_significant() {
        let a = key("GET", "/a?pageSize=5", &[]);
        let b = key("GET", "/a?pageSize=10", &[]);
        let c = key("GET", "/a", &[]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_percent_decoding() {
        let a = key("GET", "/a?q=hello%20world", &[]);
        let b = key("GET", "/a?q=hello+world", &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_foreign_origin_stripped() {
        let a = key("GET", "https://other.example.com/user/currentUser", &[]);
        let b = key("GET", "/user/currentUser/", &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_absolute_comparison() {
        let options = RequestMatching {
            base_url_relative: false,
            ..RequestMatching::default()
        };
        let a = MatchKey::from_url("GET", "https://a.example.com/x", BASE, &options);
        let b = MatchKey::from_url("GET", "https://b.example.com/x", BASE, &options);
        assert_ne!(a, b);
    }

    #[test]
    fn test_path_normalization() {
        assert_eq!(normalize_path("/api/test"), "/api/test");
        assert_eq!(normalize_path("api/test"), "/api/test");
        assert_eq!(normalize_path("  /api/test/  "), "/api/test");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn test_strip_origin_requires_boundary() {
        assert_eq!(strip_origin("https://tenant.example.com/x", BASE), "/x");
        assert_eq!(
            strip_origin("https://tenant.example.community/x", BASE),
            "/x"
        );
        assert_eq!(strip_origin("/x", BASE), "/x");
    }
}
