// Authentication: JWT bearer tokens issued by the identity provider, and the
// request extractor handlers use to learn who is calling.

use std::sync::OnceLock;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::{self, DEFAULT_JWT_SECRET, LOCAL_USERNAME, LOCAL_USER_ID};

// ── JWT ──────────────────────────────────────────────────────────────

static JWT_SECRET: OnceLock<String> = OnceLock::new();

/// Install the token secret (called once at startup).
pub fn set_jwt_secret(secret: &str) {
    if JWT_SECRET.set(secret.to_string()).is_err() {
        tracing::warn!("JWT secret already set; keeping the first one");
    }
}

fn jwt_secret() -> &'static [u8] {
    JWT_SECRET
        .get()
        .map(String::as_str)
        .unwrap_or(DEFAULT_JWT_SECRET)
        .as_bytes()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    /// User id, matching the `users` document id.
    pub sub: String,
    #[serde(default)]
    pub name: Option<String>,
    pub exp: usize, // expiry (unix timestamp)
}

impl Claims {
    fn local() -> Self {
        Claims {
            sub: LOCAL_USER_ID.to_string(),
            name: Some(LOCAL_USERNAME.to_string()),
            exp: usize::MAX,
        }
    }
}

pub fn create_token(user_id: &str, name: Option<&str>) -> Result<String, String> {
    let expiration = (chrono::Utc::now() + chrono::Duration::hours(24)).timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        name: name.map(str::to_string),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret()),
    )
    .map_err(|e| format!("Failed to create token: {e}"))
}

pub fn verify_token(token: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| format!("Invalid token: {e}"))
}

/// Bearer token from the `Authorization` header, or from a `token` query
/// parameter for WebSocket upgrades where browsers cannot set headers.
fn bearer_token(parts: &Parts) -> Result<String, &'static str> {
    if let Some(header) = parts.headers.get("Authorization") {
        let value = header
            .to_str()
            .map_err(|_| "Invalid Authorization header format")?;
        return value
            .strip_prefix("Bearer ")
            .map(str::to_string)
            .ok_or("Invalid Authorization header format");
    }

    parts
        .uri
        .query()
        .and_then(|q| {
            q.split('&')
                .find_map(|pair| pair.strip_prefix("token="))
                .filter(|t| !t.is_empty())
        })
        .map(str::to_string)
        .ok_or("Missing Authorization header")
}

// ── Axum extractor: AuthUser ─────────────────────────────────────────

/// Extracts the authenticated user from the bearer token.
/// In local mode every request is the local user.
/// Usage: `AuthUser(claims)` in handler parameters.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

impl AuthUser {
    pub fn id(&self) -> &str {
        &self.0.sub
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if config::is_local_mode() {
            return Ok(AuthUser(Claims::local()));
        }

        let unauthorized = |msg: &str| {
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": msg })),
            )
        };

        let token = bearer_token(parts).map_err(unauthorized)?;
        verify_token(&token)
            .map(AuthUser)
            .map_err(|_| unauthorized("Invalid token"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(req: Request<()>) -> Parts {
        req.into_parts().0
    }

    #[test]
    fn test_jwt_create_and_verify() {
        let token = create_token("pilot-1", Some("Lightning")).unwrap();
        let claims = verify_token(&token).unwrap();
        assert_eq!(claims.sub, "pilot-1");
        assert_eq!(claims.name.as_deref(), Some("Lightning"));
    }

    #[test]
    fn test_jwt_invalid_token() {
        assert!(verify_token("invalid.token.here").is_err());
    }

    #[test]
    fn test_bearer_token_from_header() {
        let p = parts(
            Request::builder()
                .uri("/api/tournaments")
                .header("Authorization", "Bearer abc")
                .body(())
                .unwrap(),
        );
        assert_eq!(bearer_token(&p), Ok("abc".to_string()));

        let p = parts(
            Request::builder()
                .uri("/api/tournaments")
                .header("Authorization", "Basic abc")
                .body(())
                .unwrap(),
        );
        assert!(bearer_token(&p).is_err());
    }

    #[test]
    fn test_bearer_token_from_query() {
        let p = parts(
            Request::builder()
                .uri("/ws/notifications?foo=1&token=xyz")
                .body(())
                .unwrap(),
        );
        assert_eq!(bearer_token(&p), Ok("xyz".to_string()));

        let p = parts(Request::builder().uri("/ws/notifications").body(()).unwrap());
        assert_eq!(bearer_token(&p), Err("Missing Authorization header"));
    }
}
