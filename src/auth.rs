//! Auth identity captured with recorded exchanges
//!
//! Only the identity (user and auth type) is kept; passwords and tokens
//! never leave this module.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity a request was made with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    /// User name, possibly tenant-qualified (`t123/admin`)
    pub user: String,
    /// Auth scheme
    #[serde(rename = "type")]
    pub auth_type: AuthType,
}

/// Auth scheme of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthType {
    /// `Authorization: Basic`
    BasicAuth,
    /// `Authorization: Bearer` with a JWT
    BearerAuth,
    /// JWT carried in an `authorization` cookie
    CookieAuth,
}

/// Extract the identity from request headers
#[must_use]
pub fn identify(headers: &[(String, String)]) -> Option<AuthInfo> {
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("authorization") {
            if let Some(info) = from_authorization(value) {
                return Some(info);
            }
        }
    }

    headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("cookie"))
        .find_map(|(_, value)| from_cookie(value))
}

fn from_authorization(value: &str) -> Option<AuthInfo> {
    let (scheme, credentials) = value.trim().split_once(' ')?;
    let credentials = credentials.trim();

    if scheme.eq_ignore_ascii_case("basic") {
        let decoded = STANDARD.decode(credentials).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let user = decoded.split_once(':').map_or(decoded.as_str(), |(u, _)| u);
        if user.is_empty() {
            return None;
        }
        return Some(AuthInfo {
            user: user.to_string(),
            auth_type: AuthType::BasicAuth,
        });
    }

    if scheme.eq_ignore_ascii_case("bearer") {
        return jwt_user(credentials).map(|user| AuthInfo {
            user,
            auth_type: AuthType::BearerAuth,
        });
    }

    None
}

fn from_cookie(value: &str) -> Option<AuthInfo> {
    value
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
        .and_then(|(_, token)| jwt_user(token))
        .map(|user| AuthInfo {
            user,
            auth_type: AuthType::CookieAuth,
        })
}

/// User claim of a JWT; the signature is not checked
fn jwt_user(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;

    let user = claims
        .get("sub")
        .or_else(|| claims.get("user_name"))
        .and_then(Value::as_str)?;

    match claims.get("ten").and_then(Value::as_str) {
        Some(tenant) if !user.contains('/') => Some(format!("{tenant}/{user}")),
        _ => Some(user.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(name: &str, value: &str) -> Vec<(String, String)> {
        vec![(name.to_string(), value.to_string())]
    }

    fn jwt(claims: &str) -> String {
        format!(
            "{}.{}.signature",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#),
            URL_SAFE_NO_PAD.encode(claims)
        )
    }

    #[test]
    fn test_basic_auth_keeps_user_only() {
        let value = format!("Basic {}", STANDARD.encode("t100/admin:s3cret"));
        let info = identify(&headers("Authorization", &value)).unwrap();

        assert_eq!(info.user, "t100/admin");
        assert_eq!(info.auth_type, AuthType::BasicAuth);
        assert!(!serde_json::to_string(&info).unwrap().contains("s3cret"));
    }

    #[test]
    fn test_bearer_jwt() {
        let token = jwt(r#"{"sub":"admin","ten":"t100"}"#);
        let info = identify(&headers("authorization", &format!("Bearer {token}"))).unwrap();

        assert_eq!(info.user, "t100/admin");
        assert_eq!(info.auth_type, AuthType::BearerAuth);
    }

    #[test]
    fn test_cookie_jwt() {
        let token = jwt(r#"{"user_name":"device_1"}"#);
        let cookie = format!("XSRF-TOKEN=abc; authorization={token}");
        let info = identify(&headers("Cookie", &cookie)).unwrap();

        assert_eq!(info.user, "device_1");
        assert_eq!(info.auth_type, AuthType::CookieAuth);
    }

    #[test]
    fn test_no_identity() {
        assert!(identify(&[]).is_none());
        assert!(identify(&headers("Authorization", "Bearer not-a-jwt")).is_none());
        assert!(identify(&headers("Authorization", "Digest abc")).is_none());
    }

    #[test]
    fn test_serialized_type_name() {
        let info = AuthInfo {
            user: "admin".to_string(),
            auth_type: AuthType::BasicAuth,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "BasicAuth");
    }
}
