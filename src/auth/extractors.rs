use std::marker::PhantomData;

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use tracing::warn;

use crate::{
    error::AppError,
    state::AppState,
    users::{
        repo_types::{Role, User},
        store::PasswordField,
    },
};

fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("You are not logged in".into()))?;

    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Invalid Authorization header".into()))?;
    Ok(token)
}

/// Resolves the bearer token to a live user.
pub async fn authenticate(headers: &HeaderMap, state: &AppState) -> Result<User, AppError> {
    let token = bearer_token(headers)?;

    let user_id = state.jwt.verify_session_token(token).map_err(|e| {
        warn!(error = %e, "session token rejected");
        AppError::Unauthorized(e.to_string())
    })?;

    state
        .store
        .find_by_id(user_id, PasswordField::Exclude)
        .await?
        .ok_or_else(|| {
            warn!(%user_id, "session token for deleted user");
            AppError::Unauthorized("The user for this token no longer exists".into())
        })
}

pub fn authorize(user: &User, allowed: &[Role]) -> Result<(), AppError> {
    if allowed.contains(&user.role) {
        Ok(())
    } else {
        warn!(user_id = %user.id, role = %user.role, "forbidden");
        Err(AppError::Forbidden(
            "You do not have permission to perform this action".into(),
        ))
    }
}

/// Any authenticated user.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authenticate(&parts.headers, state).await.map(AuthUser)
    }
}

/// Roles allowed through an [`Authorized`] extractor.
pub trait RoleSet: Send + Sync + 'static {
    const ROLES: &'static [Role];
}

pub struct AdminOnly;

impl RoleSet for AdminOnly {
    const ROLES: &'static [Role] = &[Role::Admin];
}

/// Authenticated user whose role is in `R::ROLES`.
pub struct Authorized<R: RoleSet>(pub User, PhantomData<R>);

#[async_trait]
impl<R: RoleSet> FromRequestParts<AppState> for Authorized<R> {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = authenticate(&parts.headers, state).await?;
        authorize(&user, R::ROLES)?;
        Ok(Authorized(user, PhantomData))
    }
}
