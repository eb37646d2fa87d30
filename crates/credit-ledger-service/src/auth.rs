//! Authentication extractors.
//!
//! This module provides extractors for:
//! - `AuthUser` - End-user authentication via an HS256 JWT
//! - `AdminAuth` - The same token, additionally carrying `role = "admin"`
//!
//! Tokens are issued by the identity subsystem and signed with the shared
//! `AUTH_JWT_SECRET`. Without a configured secret every request is rejected.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use credit_ledger_core::UserId;

use crate::error::ApiError;
use crate::state::AppState;

/// Role claim value that grants access to admin endpoints.
pub const ADMIN_ROLE: &str = "admin";

/// An authenticated user extracted from a JWT.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user ID.
    pub user_id: UserId,
    /// The raw subject claim from the JWT.
    pub subject: String,
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let claims = authenticate(&parts.headers, state)?;
        let user_id = claims
            .sub
            .parse::<UserId>()
            .map_err(|_| ApiError::Unauthorized)?;

        Ok(AuthUser {
            user_id,
            subject: claims.sub,
        })
    }
}

/// An authenticated administrator.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// Admin identifier (the token subject), recorded in the activity log.
    pub admin_id: String,
    /// Client address as reported by the proxy headers.
    pub ip_address: Option<String>,
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let claims = authenticate(&parts.headers, state)?;

        if claims.role.as_deref() != Some(ADMIN_ROLE) {
            tracing::warn!(subject = %claims.sub, "Non-admin token used on admin endpoint");
            return Err(ApiError::Forbidden);
        }

        let admin_id = claims.sub;
        tracing::info!(admin_id = %admin_id, "Admin authenticated");

        Ok(AdminAuth {
            admin_id,
            ip_address: client_ip(&parts.headers),
        })
    }
}

/// JWT claims issued by the identity subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID).
    pub sub: String,
    /// Role, `"admin"` for administrators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Expiration time.
    pub exp: i64,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

fn authenticate(headers: &HeaderMap, state: &AppState) -> Result<JwtClaims, ApiError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    validate_jwt(
        token,
        state.config.auth_jwt_secret.as_deref(),
        state.config.auth_issuer.as_deref(),
    )
}

/// Validate an HS256 token and return its claims.
pub fn validate_jwt(
    token: &str,
    secret: Option<&str>,
    issuer: Option<&str>,
) -> Result<JwtClaims, ApiError> {
    let Some(secret) = secret else {
        tracing::warn!("AUTH_JWT_SECRET not configured - rejecting request");
        return Err(ApiError::Unauthorized);
    };

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;
    if let Some(issuer) = issuer {
        validation.set_issuer(&[issuer]);
    }

    decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!(error = %e, "JWT validation failed");
        ApiError::Unauthorized
    })
}

/// First address of `X-Forwarded-For`, else `X-Real-IP`.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
        })
        .map(ToString::to_string)
}
