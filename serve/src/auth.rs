//! Token codec and WebSocket credential extraction.
//!
//! Tokens are `subject.admin.expiry.signature` where the signature is a
//! sha256 over the payload and the server secret, hex-encoded and compared
//! in constant time. Identity itself is an external concern; given a valid
//! credential this module yields the caller's id and role, and the
//! [`UserDirectory`] seam resolves activity.

use async_trait::async_trait;
use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use config::Environment;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("malformed token")]
    Malformed,
    #[error("bad signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
}

/// Claims carried by a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Claims {
    pub subject: i64,
    pub admin: bool,
    /// Unix seconds.
    pub expires_at: i64,
}

/// Signs and verifies access tokens with the server secret.
#[derive(Clone)]
pub struct TokenCodec {
    secret: String,
}

impl TokenCodec {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn encode(&self, claims: &Claims) -> String {
        let payload = format!(
            "{}.{}.{}",
            claims.subject,
            if claims.admin { 1 } else { 0 },
            claims.expires_at
        );
        let sig = self.signature(&payload);
        format!("{payload}.{sig}")
    }

    pub fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        let (payload, sig) = token.rsplit_once('.').ok_or(AuthError::Malformed)?;
        let expected = self.signature(payload);
        // Constant-time comparison prevents a timing oracle on signatures.
        if expected.as_bytes().ct_eq(sig.as_bytes()).unwrap_u8() != 1 {
            return Err(AuthError::BadSignature);
        }

        let mut parts = payload.split('.');
        let subject: i64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(AuthError::Malformed)?;
        let admin = match parts.next() {
            Some("1") => true,
            Some("0") => false,
            _ => return Err(AuthError::Malformed),
        };
        let expires_at: i64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(AuthError::Malformed)?;
        if parts.next().is_some() {
            return Err(AuthError::Malformed);
        }

        if expires_at < now_unix() {
            return Err(AuthError::Expired);
        }
        Ok(Claims {
            subject,
            admin,
            expires_at,
        })
    }

    fn signature(&self, payload: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b".");
        hasher.update(payload.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Token expiring `ttl_secs` from now; handy for tooling and tests.
pub fn claims_for(subject: i64, admin: bool, ttl_secs: i64) -> Claims {
    Claims {
        subject,
        admin,
        expires_at: now_unix() + ttl_secs,
    }
}

/// Resolved caller identity.
#[derive(Clone, Copy, Debug)]
pub struct UserInfo {
    pub id: i64,
    pub active: bool,
    pub admin: bool,
}

/// Identity resolution seam. The default trusts the claims themselves;
/// a deployment backed by a user service swaps this out.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve(&self, claims: &Claims) -> Option<UserInfo>;
}

pub struct ClaimsDirectory;

#[async_trait]
impl UserDirectory for ClaimsDirectory {
    async fn resolve(&self, claims: &Claims) -> Option<UserInfo> {
        Some(UserInfo {
            id: claims.subject,
            active: true,
            admin: claims.admin,
        })
    }
}

/// Extracts the WS credential: the `Sec-WebSocket-Protocol` header is
/// expected to carry `jwt, <token>`; the `token` query parameter is a
/// legacy fallback disabled outside development.
///
/// Returns `(token, selected_subprotocol)`.
pub fn extract_ws_auth(
    headers: &HeaderMap,
    query_token: Option<&str>,
    environment: Environment,
) -> Option<(String, Option<&'static str>)> {
    let protocols: Vec<String> = headers
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if let Some(jwt_index) = protocols.iter().position(|p| p == "jwt") {
        if let Some(token) = protocols.get(jwt_index + 1) {
            return Some((token.clone(), Some("jwt")));
        }
    }

    let token = query_token?.trim();
    if token.is_empty() || environment.query_token_forbidden() {
        return None;
    }
    Some((token.to_string(), None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn codec() -> TokenCodec {
        TokenCodec::new("test-secret")
    }

    /// **Scenario**: decode(encode(t)) preserves the subject claim.
    #[test]
    fn token_round_trip_preserves_subject() {
        let claims = claims_for(42, true, 3600);
        let token = codec().encode(&claims);
        let back = codec().decode(&token).unwrap();
        assert_eq!(back.subject, 42);
        assert!(back.admin);
    }

    /// **Scenario**: tampering with the payload breaks the signature.
    #[test]
    fn tampered_token_rejected() {
        let token = codec().encode(&claims_for(42, false, 3600));
        let tampered = token.replacen("42", "43", 1);
        assert_eq!(codec().decode(&tampered), Err(AuthError::BadSignature));
    }

    /// **Scenario**: an expired token is rejected even with a valid
    /// signature.
    #[test]
    fn expired_token_rejected() {
        let token = codec().encode(&claims_for(42, false, -10));
        assert_eq!(codec().decode(&token), Err(AuthError::Expired));
    }

    /// **Scenario**: a token signed by another secret is rejected.
    #[test]
    fn wrong_secret_rejected() {
        let token = TokenCodec::new("other").encode(&claims_for(1, false, 3600));
        assert_eq!(codec().decode(&token), Err(AuthError::BadSignature));
    }

    #[test]
    fn garbage_token_is_malformed() {
        assert_eq!(codec().decode("nonsense"), Err(AuthError::Malformed));
        assert_eq!(codec().decode(""), Err(AuthError::Malformed));
    }

    fn headers_with_protocol(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "sec-websocket-protocol",
            HeaderValue::from_str(value).unwrap(),
        );
        headers
    }

    /// **Scenario**: the `jwt, <token>` subprotocol pair yields the token
    /// and selects the `jwt` subprotocol.
    #[test]
    fn subprotocol_credential_extraction() {
        let headers = headers_with_protocol("jwt, abc.def");
        let (token, proto) =
            extract_ws_auth(&headers, None, Environment::Production).unwrap();
        assert_eq!(token, "abc.def");
        assert_eq!(proto, Some("jwt"));
    }

    /// **Scenario**: `jwt` without a following token is not a credential.
    #[test]
    fn subprotocol_without_token_rejected() {
        let headers = headers_with_protocol("jwt");
        assert!(extract_ws_auth(&headers, None, Environment::Development).is_none());
    }

    /// **Scenario**: the query fallback works in development only.
    #[test]
    fn query_fallback_gated_by_environment() {
        let headers = HeaderMap::new();
        let dev = extract_ws_auth(&headers, Some("tok"), Environment::Development);
        assert_eq!(dev.unwrap(), ("tok".to_string(), None));

        assert!(extract_ws_auth(&headers, Some("tok"), Environment::Production).is_none());
        assert!(extract_ws_auth(&headers, Some("tok"), Environment::Staging).is_none());
        assert!(extract_ws_auth(&headers, Some("  "), Environment::Development).is_none());
    }
}
