//! JWT issuing and the request extractors that gate customer and admin
//! routes.

use crate::{errors::ServiceError, AppState};
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Customer id.
    pub sub: String,
    pub admin: bool,
    pub exp: i64,
    pub iat: i64,
}

/// Stateless token issuing and verification around the configured secret.
pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_secs: u64,
}

impl AuthService {
    pub fn new(secret: &str, expiration_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_secs,
        }
    }

    pub fn issue_token(&self, customer_id: Uuid, admin: bool) -> Result<String, ServiceError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: customer_id.to_string(),
            admin,
            exp: now + self.expiration_secs as i64,
            iat: now,
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::InternalError(format!("token signing failed: {}", e)))
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, ServiceError> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|_| ServiceError::Unauthorized("Invalid or expired token".into()))?;
        Ok(data.claims)
    }
}

/// Extracted from a `Bearer` token on protected routes.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    pub customer_id: Uuid,
    pub is_admin: bool,
}

/// Same as [`AuthenticatedUser`] but rejects non-admin tokens with 403.
#[derive(Debug, Clone, Copy)]
pub struct AdminUser {
    pub customer_id: Uuid,
}

fn bearer_token(parts: &Parts) -> Result<&str, ServiceError> {
    let header = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized("Missing authorization header".into()))?;
    header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ServiceError::Unauthorized("Expected a bearer token".into()))
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthenticatedUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let claims = state.auth.verify_token(token)?;
        let customer_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ServiceError::Unauthorized("Malformed token subject".into()))?;
        Ok(AuthenticatedUser {
            customer_id,
            is_admin: claims.admin,
        })
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err(ServiceError::Forbidden("Admin access required".into()));
        }
        Ok(AdminUser {
            customer_id: user.customer_id,
        })
    }
}
