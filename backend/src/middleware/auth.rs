//! Authentication middleware
//!
//! Verifies the bearer token issued by the session service and exposes the
//! caller's permission list to handlers.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, errors::ErrorKind, DecodingKey, Validation};
use shared::{permits, Permission};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::AppState;

/// Authenticated user information extracted from the bearer token
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub permissions: Vec<String>,
}

impl AuthUser {
    /// Check if user has a specific permission (directly or implied)
    pub fn has_permission(&self, permission: Permission) -> bool {
        permits(&self.permissions, permission)
    }

    /// Fail with a permission error unless the user holds `permission`
    pub fn require(&self, permission: Permission) -> AppResult<()> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                user_id = %self.user_id,
                role_id = %self.role_id,
                permission = permission.as_str(),
                "permission denied"
            );
            Err(AppError::InsufficientPermissions {
                required: permission.as_str().to_string(),
            })
        }
    }
}

/// Token claims issued by the session service
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role_id: String,
    pub permissions: Vec<String>,
    pub exp: i64,
    pub iat: i64,
}

/// Decode and validate a bearer token into the caller it names
pub fn authenticate(token: &str, secret: &str) -> AppResult<AuthUser> {
    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AppError::TokenExpired,
        _ => AppError::InvalidToken,
    })?;

    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AppError::Unauthorized("Invalid user ID in token".to_string()))?;
    let role_id = Uuid::parse_str(&claims.role_id)
        .map_err(|_| AppError::Unauthorized("Invalid role ID in token".to_string()))?;

    Ok(AuthUser {
        user_id,
        role_id,
        permissions: claims.permissions,
    })
}

/// Authentication middleware that validates bearer tokens
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
    {
        Some(token) => token.to_string(),
        None => {
            return AppError::Unauthorized("Missing or invalid Authorization header".to_string())
                .into_response();
        }
    };

    match authenticate(&token, &state.config.jwt.secret) {
        Ok(auth_user) => {
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Extractor for authenticated user
/// Use this in handlers to get the current user
#[derive(Clone, Debug)]
pub struct CurrentUser(pub AuthUser);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn token(permissions: &[&str], exp_offset: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            role_id: Uuid::new_v4().to_string(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            exp: now + exp_offset,
            iat: now,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    #[test]
    fn test_valid_token() {
        let user = authenticate(&token(&["manage_expiry_tracker"], 3600), SECRET).unwrap();
        assert!(user.has_permission(Permission::ManageExpiryTracker));
        assert!(user.has_permission(Permission::ViewExpiryTracker));
        assert!(user.require(Permission::ManageReconciliation).is_err());
    }

    #[test]
    fn test_wrong_secret() {
        let result = authenticate(&token(&[], 3600), "other-secret");
        assert!(matches!(result, Err(AppError::InvalidToken)));
    }

    #[test]
    fn test_expired_token() {
        let result = authenticate(&token(&[], -3600), SECRET);
        assert!(matches!(result, Err(AppError::TokenExpired)));
    }
}
