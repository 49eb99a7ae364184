use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::{debug, warn};

use super::jwt::JwtKeys;
use crate::{
    error::AppError,
    state::AppState,
    users::{Role, User},
};

/// The authenticated caller: bearer token verified, account loaded and active.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// A [`CurrentUser`] that also passed `authorize(&[Role::Admin])`.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::InvalidToken("Not authorized, no token provided"))?;

    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AppError::InvalidToken("Not authorized, no token provided"))
}

impl CurrentUser {
    /// Role gate: 403 unless the caller's role is in `allowed`.
    pub fn authorize(&self, allowed: &[Role]) -> Result<(), AppError> {
        let role = self.0.role;
        if allowed.contains(&role) {
            return Ok(());
        }
        warn!(user_id = %self.0.id, %role, "role not permitted");
        Err(AppError::Forbidden(format!(
            "User role {} is not authorized to access this route",
            role
        )))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;

        let claims = JwtKeys::from_ref(state).verify(token).map_err(|e| {
            debug!(error = %e, "token verification failed");
            AppError::InvalidToken("Not authorized, token invalid")
        })?;

        let user = state
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or(AppError::InvalidToken("Not authorized, user not found"))?;

        if !user.is_active {
            return Err(AppError::AccountInactive);
        }

        Ok(CurrentUser(user))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let current = CurrentUser::from_request_parts(parts, state).await?;
        current.authorize(&[Role::Admin])?;
        Ok(AdminUser(current.0))
    }
}
