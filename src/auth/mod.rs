/*!
 * # Admin Authentication Module
 *
 * A single shop-admin account authenticates with username + password and
 * receives a short-lived HS256 session token. Admin endpoints take an
 * [`AdminUser`] extractor argument, so the authorization check runs before
 * any handler logic.
 */

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::AppState;

const BEARER_PREFIX: &str = "Bearer ";
const JWT_ISSUER: &str = "arbor-repair-api";
const JWT_AUDIENCE: &str = "arbor-admin";

/// JWT claims carried by admin session tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (admin username)
    pub sub: String,
    /// Role, always "admin" for now
    pub role: String,
    /// Expiration timestamp
    pub exp: i64,
    /// Issued at timestamp
    pub iat: i64,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
}

/// A freshly issued session token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Verified admin identity, produced by the request extractor and passed
/// into handlers as a capability.
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub username: String,
}

/// Issues and verifies admin session tokens and checks login credentials.
#[derive(Clone)]
pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_lifetime: ChronoDuration,
    admin_username: String,
    admin_password_hash: Option<String>,
    admin_password: Option<String>,
}

impl AuthService {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(cfg.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(cfg.jwt_secret.as_bytes()),
            token_lifetime: ChronoDuration::seconds(cfg.jwt_expiration as i64),
            admin_username: cfg.admin_username.clone(),
            admin_password_hash: cfg.admin_password_hash.clone(),
            admin_password: cfg.admin_password.clone(),
        }
    }

    /// Checks credentials and returns a session token. The same generic
    /// rejection covers unknown usernames and wrong passwords.
    pub fn login(&self, username: &str, password: &str) -> Result<IssuedToken, ServiceError> {
        if username != self.admin_username || !self.verify_password(password) {
            warn!(username, "Failed admin login attempt");
            return Err(ServiceError::Unauthorized(
                "invalid credentials".to_string(),
            ));
        }
        self.issue_token()
    }

    fn verify_password(&self, candidate: &str) -> bool {
        if let Some(hash) = &self.admin_password_hash {
            match PasswordHash::new(hash) {
                Ok(parsed) => Argon2::default()
                    .verify_password(candidate.as_bytes(), &parsed)
                    .is_ok(),
                Err(_) => false,
            }
        } else if let Some(plain) = &self.admin_password {
            constant_time_eq(plain, candidate)
        } else {
            false
        }
    }

    pub fn issue_token(&self) -> Result<IssuedToken, ServiceError> {
        let now = Utc::now();
        let expires_at = now + self.token_lifetime;
        let claims = Claims {
            sub: self.admin_username.clone(),
            role: "admin".to_string(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            iss: JWT_ISSUER.to_string(),
            aud: JWT_AUDIENCE.to_string(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::InternalError(format!("failed to sign token: {}", e)))?;

        Ok(IssuedToken { token, expires_at })
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[JWT_AUDIENCE]);
        validation.set_issuer(&[JWT_ISSUER]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| ServiceError::Unauthorized("invalid or expired token".to_string()))
    }
}

/// Hashes a password into an argon2 PHC string, for provisioning the
/// admin credential.
pub fn hash_password(password: &str) -> Result<String, ServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ServiceError::InternalError(format!("failed to hash password: {}", e)))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                ServiceError::Unauthorized("missing authorization header".to_string())
            })?;

        let token = header_value
            .strip_prefix(BEARER_PREFIX)
            .ok_or_else(|| ServiceError::Unauthorized("expected a bearer token".to_string()))?;

        let claims = state.auth.verify_token(token)?;
        Ok(AdminUser {
            username: claims.sub,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev_auth() -> (AuthService, AppConfig) {
        let cfg = AppConfig::for_development("sqlite::memory:");
        (AuthService::from_config(&cfg), cfg)
    }

    #[test]
    fn login_round_trip() {
        let (auth, cfg) = dev_auth();
        let password = cfg.admin_password.as_deref().unwrap();

        let issued = auth.login("admin", password).expect("login");
        let claims = auth.verify_token(&issued.token).expect("verify");
        assert_eq!(claims.sub, "admin");
        assert_eq!(claims.role, "admin");
        assert!(issued.expires_at > Utc::now());
    }

    #[test]
    fn wrong_password_rejected() {
        let (auth, _) = dev_auth();
        let result = auth.login("admin", "nope");
        assert!(matches!(result, Err(ServiceError::Unauthorized(_))));
    }

    #[test]
    fn wrong_username_rejected() {
        let (auth, cfg) = dev_auth();
        let password = cfg.admin_password.as_deref().unwrap();
        let result = auth.login("root", password);
        assert!(matches!(result, Err(ServiceError::Unauthorized(_))));
    }

    #[test]
    fn tampered_token_rejected() {
        let (auth, _) = dev_auth();
        let issued = auth.issue_token().expect("issue");
        let mut tampered = issued.token;
        tampered.push('x');
        assert!(auth.verify_token(&tampered).is_err());
    }

    #[test]
    fn expired_token_rejected() {
        let (auth, cfg) = dev_auth();
        let stale = Claims {
            sub: "admin".to_string(),
            role: "admin".to_string(),
            exp: (Utc::now() - ChronoDuration::hours(2)).timestamp(),
            iat: (Utc::now() - ChronoDuration::hours(3)).timestamp(),
            iss: JWT_ISSUER.to_string(),
            aud: JWT_AUDIENCE.to_string(),
        };
        let token = encode(
            &Header::default(),
            &stale,
            &EncodingKey::from_secret(cfg.jwt_secret.as_bytes()),
        )
        .unwrap();
        assert!(auth.verify_token(&token).is_err());
    }

    #[test]
    fn token_with_wrong_audience_rejected() {
        let (auth, cfg) = dev_auth();
        let foreign = Claims {
            sub: "admin".to_string(),
            role: "admin".to_string(),
            exp: (Utc::now() + ChronoDuration::hours(1)).timestamp(),
            iat: Utc::now().timestamp(),
            iss: JWT_ISSUER.to_string(),
            aud: "some-other-service".to_string(),
        };
        let token = encode(
            &Header::default(),
            &foreign,
            &EncodingKey::from_secret(cfg.jwt_secret.as_bytes()),
        )
        .unwrap();
        assert!(auth.verify_token(&token).is_err());
    }

    #[test]
    fn hashed_credentials_verify() {
        let mut cfg = AppConfig::for_development("sqlite::memory:");
        cfg.admin_password_hash = Some(hash_password("bench-s3cret").unwrap());
        cfg.admin_password = None;
        let auth = AuthService::from_config(&cfg);

        assert!(auth.login("admin", "bench-s3cret").is_ok());
        assert!(auth.login("admin", "bench-secret").is_err());
    }
}
