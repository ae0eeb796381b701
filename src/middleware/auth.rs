//! Admin session tokens. Auth is active only when both `ADMIN_EMAIL` and
//! `ADMIN_PASSWORD` are configured; otherwise the reverse proxy is trusted
//! and every request passes through.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::error::{AppError, Result};

const SESSION_HOURS: i64 = 24;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

pub struct AuthService {
    config: AuthConfig,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled()
    }

    /// Verify the admin credentials and mint a session token.
    pub fn login(&self, email: &str, password: &str) -> Result<(String, i64)> {
        let (admin_email, admin_password) = match (
            self.config.admin_email.as_deref(),
            self.config.admin_password.as_deref(),
        ) {
            (Some(email), Some(password)) => (email, password),
            _ => {
                return Err(AppError::Conflict {
                    message: "authentication is disabled".to_string(),
                })
            }
        };

        if email != admin_email {
            return Err(AppError::InvalidCredentials);
        }
        // The configured password may be a bcrypt hash or plaintext.
        let password_ok = if admin_password.starts_with("$2") {
            bcrypt::verify(password, admin_password).unwrap_or(false)
        } else {
            password == admin_password
        };
        if !password_ok {
            return Err(AppError::InvalidCredentials);
        }

        let now = Utc::now();
        let exp = (now + Duration::hours(SESSION_HOURS)).timestamp();
        let claims = Claims {
            sub: email.to_string(),
            exp,
            iat: now.timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.secret_key.as_bytes()),
        )?;
        Ok((token, exp))
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.secret_key.as_bytes()),
            &Validation::default(),
        )?;
        Ok(data.claims)
    }
}

pub async fn auth_middleware(
    State(auth): State<Arc<AuthService>>,
    request: Request,
    next: Next,
) -> Result<Response> {
    if !auth.enabled() {
        return Ok(next.run(request).await);
    }

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AppError::TokenRequired)?;

    auth.verify_token(token)?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(email: Option<&str>, password: Option<&str>) -> AuthService {
        AuthService::new(AuthConfig {
            secret_key: "test-secret".to_string(),
            admin_email: email.map(String::from),
            admin_password: password.map(String::from),
            mcp_api_key: None,
        })
    }

    #[test]
    fn login_round_trips_a_verifiable_token() {
        let auth = auth(Some("admin@example.com"), Some("hunter2"));
        let (token, _) = auth.login("admin@example.com", "hunter2").unwrap();
        let claims = auth.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "admin@example.com");
    }

    #[test]
    fn wrong_credentials_are_rejected() {
        let auth = auth(Some("admin@example.com"), Some("hunter2"));
        assert!(matches!(
            auth.login("admin@example.com", "wrong"),
            Err(AppError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.login("other@example.com", "hunter2"),
            Err(AppError::InvalidCredentials)
        ));
    }

    #[test]
    fn disabled_auth_refuses_login() {
        let auth = auth(None, None);
        assert!(!auth.enabled());
        assert!(auth.login("a@b.c", "x").is_err());
    }

    #[test]
    fn garbage_tokens_fail_verification() {
        let auth = auth(Some("admin@example.com"), Some("hunter2"));
        assert!(auth.verify_token("not-a-token").is_err());
    }
}
