//! Bearer JWT auth.
//!
//! - Tokens are HS256 JWTs whose `sub` claim is the account's user id
//! - When `DEV_MODE=false`, every `/api` endpoint except health requires
//!   `Authorization: Bearer <jwt>`
//! - In dev mode every request runs as user `dev`
//!
//! Tokens are minted by the external sign-in service; [`issue_token`] exists
//! for operators and tests.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};

use super::routes::AppState;

const DEV_USER: &str = "dev";

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Issued-at unix seconds
    pub iat: i64,
    /// Expiration unix seconds
    pub exp: i64,
}

/// The authenticated caller, inserted as a request extension.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
}

/// Sign a token for `user_id`. Returns the token and its expiry.
pub fn issue_token(secret: &str, user_id: &str, ttl_days: i64) -> anyhow::Result<(String, i64)> {
    let now = Utc::now();
    let exp = now + Duration::days(ttl_days.max(1));
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };
    let token = jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok((token, claims.exp))
}

pub fn verify_token(token: &str, secret: &str) -> anyhow::Result<Claims> {
    let token_data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    if token_data.claims.sub.trim().is_empty() {
        anyhow::bail!("token has an empty subject");
    }
    Ok(token_data.claims)
}

/// Token from an `Authorization: Bearer <jwt>` header. The scheme is
/// case-insensitive.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if !state.config.auth.auth_required(state.config.dev_mode) {
        req.extensions_mut().insert(AuthUser {
            id: DEV_USER.to_string(),
        });
        return next.run(req).await;
    }

    // Fail closed when no secret is configured.
    let secret = match state.config.auth.jwt_secret.as_deref() {
        Some(s) => s,
        None => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "JWT_SECRET not configured",
            )
                .into_response();
        }
    };

    let Some(token) = bearer_token(req.headers()) else {
        return (StatusCode::UNAUTHORIZED, "Missing Authorization header").into_response();
    };

    match verify_token(token, secret) {
        Ok(claims) => {
            req.extensions_mut().insert(AuthUser { id: claims.sub });
            next.run(req).await
        }
        Err(e) => {
            tracing::debug!("Rejected bearer token: {}", e);
            (StatusCode::UNAUTHORIZED, "Invalid or expired token").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let (token, exp) = issue_token("secret", "user-42", 30).unwrap();
        let claims = verify_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, "user-42");
        assert_eq!(claims.exp, exp);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let (token, _) = issue_token("secret", "user-42", 30).unwrap();
        assert!(verify_token(&token, "other").is_err());
        assert!(verify_token("not-a-jwt", "secret").is_err());
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, "BEARER abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, "Basic dXNlcjpwdw==".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_empty_subject_rejected() {
        let (token, _) = issue_token("secret", " ", 1).unwrap();
        assert!(verify_token(&token, "secret").is_err());
    }
}
