/*!
 * # Caller identity
 *
 * Authentication happens upstream (API gateway or session service), which
 * forwards the resolved identity as headers:
 *
 * - `x-user-id`: UUID of the caller, required
 * - `x-user-role`: comma separated roles, `admin` unlocks admin routes
 * - `x-user-email`: optional, used by providers that require an email
 */

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::errors::ErrorResponse;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

pub const ADMIN_ROLE: &str = "admin";

/// Identity of the caller of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub roles: Vec<String>,
}

impl AuthUser {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            email: None,
            roles: Vec::new(),
        }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            email: None,
            roles: vec![ADMIN_ROLE.to_string()],
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }

    /// Owner of the resource, or an admin
    pub fn can_access(&self, owner_id: Uuid) -> bool {
        self.user_id == owner_id || self.is_admin()
    }

    /// Label written into status history entries
    pub fn actor_label(&self) -> &'static str {
        if self.is_admin() {
            "admin"
        } else {
            "customer"
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AuthError> {
        let raw_id = headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::MissingAuth)?;
        let user_id = Uuid::parse_str(raw_id).map_err(|_| AuthError::InvalidCredentials)?;

        let roles = headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let email = headers
            .get(USER_EMAIL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| v.contains('@'))
            .map(str::to_string);

        Ok(Self {
            user_id,
            email,
            roles,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = Self::from_headers(&parts.headers)?;
        debug!(user_id = %user.user_id, admin = user.is_admin(), "caller identified");
        Ok(user)
    }
}

/// Extractor that only admits callers with the admin role
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(AuthError::InsufficientPermissions);
        }
        Ok(Self(user))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Insufficient permissions")]
    InsufficientPermissions,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_code, error_message) = match &self {
            Self::MissingAuth => (
                StatusCode::UNAUTHORIZED,
                "AUTH_MISSING",
                "Authentication required",
            ),
            Self::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "AUTH_INVALID_CREDENTIALS",
                "Invalid credentials",
            ),
            Self::InsufficientPermissions => (
                StatusCode::FORBIDDEN,
                "AUTH_INSUFFICIENT_PERMISSIONS",
                "Insufficient permissions",
            ),
        };

        let body = ErrorResponse::new(status, error_message).with_details(error_code);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn reads_identity_headers() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("customer, Admin"));
        headers.insert(USER_EMAIL_HEADER, HeaderValue::from_static("ada@example.com"));

        let user = AuthUser::from_headers(&headers).unwrap();
        assert_eq!(user.user_id, id);
        assert!(user.is_admin());
        assert_eq!(user.email.as_deref(), Some("ada@example.com"));
        assert_eq!(user.actor_label(), "admin");
    }

    #[test]
    fn missing_or_bad_id_is_rejected() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            AuthUser::from_headers(&headers).unwrap_err(),
            AuthError::MissingAuth
        );
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert_eq!(
            AuthUser::from_headers(&headers).unwrap_err(),
            AuthError::InvalidCredentials
        );
    }

    #[test]
    fn owners_and_admins_can_access() {
        let owner = Uuid::new_v4();
        assert!(AuthUser::new(owner).can_access(owner));
        assert!(!AuthUser::new(Uuid::new_v4()).can_access(owner));
        assert!(AuthUser::admin(Uuid::new_v4()).can_access(owner));
    }
}
