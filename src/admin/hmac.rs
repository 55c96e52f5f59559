//! HMAC-SHA256 verification for admin requests.
//!
//! Verifies that requests to `/admin/*` were signed by the trusted proxy in
//! front of this service, not sent directly by a browser or attacker.
//!
//! Canonical string: `METHOD|normalizedPath|sortedQueryString|timestamp|userId|bodyHash`.
//! Must match the signer on the other side of the proxy exactly.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const REPLAY_WINDOW_SECONDS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminHmacError {
    SecretNotConfigured,
    MissingHeaders,
    InvalidTimestamp,
    TimestampExpired,
    BodyHashMismatch,
    PathTraversal,
    InvalidSignature,
}

impl AdminHmacError {
    /// HTTP status this failure should be reported as.
    pub fn status_code(&self) -> u16 {
        match self {
            AdminHmacError::SecretNotConfigured => 503,
            AdminHmacError::PathTraversal => 400,
            _ => 401,
        }
    }
}

impl std::fmt::Display for AdminHmacError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            AdminHmacError::SecretNotConfigured => "HMAC secret not configured",
            AdminHmacError::MissingHeaders => "missing required HMAC headers",
            AdminHmacError::InvalidTimestamp => "invalid timestamp format",
            AdminHmacError::TimestampExpired => "request timestamp expired",
            AdminHmacError::BodyHashMismatch => "body hash mismatch",
            AdminHmacError::PathTraversal => "path traversal detected",
            AdminHmacError::InvalidSignature => "invalid signature",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for AdminHmacError {}

/// Lowercase, collapse repeated slashes, strip a trailing slash (but keep
/// root `/`), and reject `..` segments.
pub fn normalize_path(path: &str) -> Result<String, AdminHmacError> {
    let lower = path.to_lowercase();
    let mut collapsed = String::with_capacity(lower.len());
    let mut last_was_slash = false;
    for c in lower.chars() {
        if c == '/' {
            if !last_was_slash {
                collapsed.push(c);
            }
            last_was_slash = true;
        } else {
            collapsed.push(c);
            last_was_slash = false;
        }
    }

    let normalized = if collapsed.len() > 1 && collapsed.ends_with('/') {
        collapsed[..collapsed.len() - 1].to_string()
    } else {
        collapsed
    };

    if normalized.split('/').any(|segment| segment == "..") {
        return Err(AdminHmacError::PathTraversal);
    }

    Ok(normalized)
}

/// Sort `&`-separated query params alphabetically, as raw strings.
pub fn sort_query_string(query_string: &str) -> String {
    if query_string.is_empty() {
        return String::new();
    }
    let mut params: Vec<&str> = query_string.split('&').filter(|p| !p.is_empty()).collect();
    params.sort_unstable();
    params.join("&")
}

pub fn compute_body_hash(body: &[u8]) -> String {
    use sha2::Digest;
    hex::encode(Sha256::digest(body))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Everything pulled off the incoming request, prior to verification.
pub struct AdminHmacRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query_string: &'a str,
    pub body: &'a [u8],
    pub signature: Option<&'a str>,
    pub timestamp: Option<&'a str>,
    pub user_id: Option<&'a str>,
    pub body_hash: Option<&'a str>,
}

/// Verify the HMAC signature on an admin request. Returns the verified
/// actor id (`X-Admin-User-Id`) on success.
pub fn verify_admin_hmac(req: &AdminHmacRequest, secret: &str, now_unix: i64) -> Result<String, AdminHmacError> {
    if secret.is_empty() {
        return Err(AdminHmacError::SecretNotConfigured);
    }

    let (signature, timestamp_str, user_id, body_hash_header) =
        match (req.signature, req.timestamp, req.user_id, req.body_hash) {
            (Some(s), Some(t), Some(u), Some(h)) => (s, t, u, h),
            _ => return Err(AdminHmacError::MissingHeaders),
        };

    let timestamp: i64 = timestamp_str.parse().map_err(|_| AdminHmacError::InvalidTimestamp)?;

    if (now_unix - timestamp).abs() > REPLAY_WINDOW_SECONDS {
        return Err(AdminHmacError::TimestampExpired);
    }

    let computed_body_hash = compute_body_hash(req.body);
    if !constant_time_eq(&computed_body_hash, body_hash_header) {
        return Err(AdminHmacError::BodyHashMismatch);
    }

    let path = normalize_path(req.path)?;
    let query_string = sort_query_string(req.query_string);

    let canonical = format!(
        "{}|{}|{}|{}|{}|{}",
        req.method, path, query_string, timestamp, user_id, computed_body_hash
    );

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(canonical.as_bytes());
    let expected_signature = hex::encode(mac.finalize().into_bytes());

    if !constant_time_eq(&expected_signature, signature) {
        return Err(AdminHmacError::InvalidSignature);
    }

    Ok(user_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, canonical: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(canonical.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn normalize_path_collapses_and_lowercases() {
        assert_eq!(normalize_path("/Admin//Users/").unwrap(), "/admin/users");
        assert_eq!(normalize_path("/").unwrap(), "/");
    }

    #[test]
    fn normalize_path_rejects_traversal() {
        assert_eq!(normalize_path("/admin/../etc"), Err(AdminHmacError::PathTraversal));
    }

    #[test]
    fn sort_query_string_orders_params() {
        assert_eq!(sort_query_string("b=2&a=1"), "a=1&b=2");
        assert_eq!(sort_query_string(""), "");
    }

    #[test]
    fn valid_request_returns_user_id() {
        let secret = "topsecret";
        let body = b"{\"foo\":1}";
        let body_hash = compute_body_hash(body);
        let timestamp = 1_700_000_000i64;
        let canonical = format!("POST|/admin/trips|a=1|{}|admin-42|{}", timestamp, body_hash);
        let signature = sign(secret, &canonical);

        let timestamp_str = timestamp.to_string();
        let req = AdminHmacRequest {
            method: "POST",
            path: "/admin/trips",
            query_string: "a=1",
            body,
            signature: Some(&signature),
            timestamp: Some(&timestamp_str),
            user_id: Some("admin-42"),
            body_hash: Some(&body_hash),
        };

        let actor = verify_admin_hmac(&req, secret, timestamp).unwrap();
        assert_eq!(actor, "admin-42");
    }

    #[test]
    fn expired_timestamp_is_rejected() {
        let secret = "topsecret";
        let body = b"";
        let body_hash = compute_body_hash(body);
        let timestamp_str = "1000".to_string();
        let req = AdminHmacRequest {
            method: "GET",
            path: "/admin",
            query_string: "",
            body,
            signature: Some("whatever"),
            timestamp: Some(&timestamp_str),
            user_id: Some("admin-42"),
            body_hash: Some(&body_hash),
        };
        assert_eq!(
            verify_admin_hmac(&req, secret, 100_000).unwrap_err(),
            AdminHmacError::TimestampExpired
        );
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let secret = "topsecret";
        let body = b"";
        let body_hash = compute_body_hash(body);
        let timestamp_str = "1700000000".to_string();
        let req = AdminHmacRequest {
            method: "GET",
            path: "/admin",
            query_string: "",
            body,
            signature: Some("deadbeef"),
            timestamp: Some(&timestamp_str),
            user_id: Some("admin-42"),
            body_hash: Some(&body_hash),
        };
        assert_eq!(
            verify_admin_hmac(&req, secret, 1_700_000_000).unwrap_err(),
            AdminHmacError::InvalidSignature
        );
    }

    #[test]
    fn missing_secret_is_rejected_before_headers() {
        let body_hash = compute_body_hash(b"");
        let timestamp_str = "1700000000".to_string();
        let req = AdminHmacRequest {
            method: "GET",
            path: "/admin",
            query_string: "",
            body: b"",
            signature: None,
            timestamp: Some(&timestamp_str),
            user_id: None,
            body_hash: Some(&body_hash),
        };
        assert_eq!(
            verify_admin_hmac(&req, "", 1_700_000_000).unwrap_err(),
            AdminHmacError::SecretNotConfigured
        );
    }
}
