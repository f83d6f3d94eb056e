//! Session tokens, password hashing and the request guards built on them.

use apnasquad_types::{Role, User};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::ApiError;
use crate::App;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(jsonwebtoken::errors::Error),
    #[error("failed to sign token: {0}")]
    Signing(jsonwebtoken::errors::Error),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid(err),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub iat: u64,
    pub exp: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshClaims {
    #[serde(rename = "_id")]
    pub id: String,
    /// Random nonce so two refresh tokens issued in the same second differ.
    pub jti: String,
    pub iat: u64,
    pub exp: u64,
}

pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// HS256 keys for the access and refresh tokens, each with its own secret.
pub struct TokenKeys {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenKeys {
    pub fn new(
        access_secret: &str,
        refresh_secret: &str,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(refresh_secret.as_bytes()),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn issue(&self, user: &User) -> Result<TokenPair, TokenError> {
        let iat = jsonwebtoken::get_current_timestamp();
        let access = AccessClaims {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            iat,
            exp: iat + self.access_ttl.as_secs(),
        };
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let refresh = RefreshClaims {
            id: user.id.clone(),
            jti: hex::encode(nonce),
            iat,
            exp: iat + self.refresh_ttl.as_secs(),
        };
        let header = Header::default();
        Ok(TokenPair {
            access: jsonwebtoken::encode(&header, &access, &self.access_encoding)
                .map_err(TokenError::Signing)?,
            refresh: jsonwebtoken::encode(&header, &refresh, &self.refresh_encoding)
                .map_err(TokenError::Signing)?,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let data = jsonwebtoken::decode::<AccessClaims>(
            token,
            &self.access_decoding,
            &Validation::new(Algorithm::HS256),
        )?;
        Ok(data.claims)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let data = jsonwebtoken::decode::<RefreshClaims>(
            token,
            &self.refresh_decoding,
            &Validation::new(Algorithm::HS256),
        )?;
        Ok(data.claims)
    }
}

fn session_cookie(name: &'static str, value: String, ttl: Duration) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(true)
        .same_site(SameSite::None)
        .path("/")
        .max_age(cookie::time::Duration::seconds(ttl.as_secs() as i64))
        .build()
}

/// Adds both session cookies for a freshly issued pair.
pub fn with_session(jar: CookieJar, keys: &TokenKeys, pair: TokenPair) -> CookieJar {
    jar.add(session_cookie(ACCESS_COOKIE, pair.access, keys.access_ttl()))
        .add(session_cookie(REFRESH_COOKIE, pair.refresh, keys.refresh_ttl()))
}

pub fn without_session(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(ACCESS_COOKIE).path("/"))
        .remove(Cookie::build(REFRESH_COOKIE).path("/"))
}

/// Hashes a password into a PHC string on the blocking pool.
pub async fn hash_password(password: String) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || {
        let mut salt = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let salt = SaltString::encode_b64(&salt)
            .map_err(|err| ApiError::internal("Failed to secure password.", err))?;
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| ApiError::internal("Failed to secure password.", err))
    })
    .await
    .map_err(|err| ApiError::internal("Failed to secure password.", err))?
}

/// False for a wrong password and for a hash that does not parse.
pub async fn verify_password(password: String, hash: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || {
        let Ok(parsed) = PasswordHash::new(&hash) else {
            tracing::warn!("stored password hash does not parse");
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
    .await
    .map_err(|err| ApiError::internal("Failed to verify password.", err))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// The access token from the cookie, falling back to the bearer header.
fn access_token(headers: &HeaderMap) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(ACCESS_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
        .or_else(|| bearer_token(headers))
}

/// The authenticated caller, loaded fresh from the store.
pub struct AuthUser(pub User);

#[axum::async_trait]
impl FromRequestParts<Arc<App>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, app: &Arc<App>) -> Result<Self, ApiError> {
        let token = access_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Unauthorized request. Token not found."))?;
        let claims = app.tokens.verify_access(&token).map_err(|err| match err {
            TokenError::Expired => {
                ApiError::unauthorized("Access Token has expired. Please login again.")
            }
            _ => ApiError::unauthorized("Invalid Access Token. Signature is invalid."),
        })?;
        let user = app
            .store
            .find_user(&claims.id)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Invalid Access Token. User not found."))?;
        Ok(AuthUser(user))
    }
}

/// An authenticated caller with the admin role.
pub struct AdminUser(pub User);

#[axum::async_trait]
impl FromRequestParts<Arc<App>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, app: &Arc<App>) -> Result<Self, ApiError> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, app).await?;
        if !user.is_admin() {
            return Err(ApiError::forbidden("Access denied. Admins only."));
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user() -> User {
        User {
            id: "u1".to_string(),
            name: "Asha".to_string(),
            email: "asha@example.com".to_string(),
            password_hash: String::new(),
            bgmi_id: String::new(),
            phone: String::new(),
            upi_id: String::new(),
            upi_name: String::new(),
            team_name: String::new(),
            avatar: String::new(),
            file_id: String::new(),
            role: Role::Admin,
            balance: apnasquad_types::Amount::ZERO,
            bonus: apnasquad_types::Amount::ZERO,
            referral_code: "ABC123".to_string(),
            referred_by: None,
            refresh_token: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn keys() -> TokenKeys {
        TokenKeys::new(
            "access-secret",
            "refresh-secret",
            Duration::from_secs(3600),
            Duration::from_secs(7200),
        )
    }

    #[test]
    fn test_tokens_verify_with_their_own_secret() {
        let keys = keys();
        let pair = keys.issue(&user()).unwrap();
        let claims = keys.verify_access(&pair.access).unwrap();
        assert_eq!(claims.id, "u1");
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(keys.verify_refresh(&pair.refresh).unwrap().id, "u1");
        assert!(matches!(
            keys.verify_access(&pair.refresh),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn test_expired_token() {
        let keys = keys();
        let now = jsonwebtoken::get_current_timestamp();
        let claims = AccessClaims {
            id: "u1".to_string(),
            name: "Asha".to_string(),
            email: "asha@example.com".to_string(),
            role: Role::User,
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"access-secret"),
        )
        .unwrap();
        assert!(matches!(keys.verify_access(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn test_access_token_prefers_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer from-header".parse().unwrap());
        assert_eq!(access_token(&headers).as_deref(), Some("from-header"));
        headers.insert(header::COOKIE, "accessToken=from-cookie".parse().unwrap());
        assert_eq!(access_token(&headers).as_deref(), Some("from-cookie"));
    }

    #[tokio::test]
    async fn test_password_hash_round_trip() {
        let hash = hash_password("hunter22".to_string()).await.unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter22".to_string(), hash.clone()).await.unwrap());
        assert!(!verify_password("hunter23".to_string(), hash).await.unwrap());
        assert!(!verify_password("x".to_string(), "not-a-hash".to_string())
            .await
            .unwrap());
    }
}
