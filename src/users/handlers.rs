use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    dto::{CreateUserRequest, UpdateUserRequest, UserList, UserListResponse, UserResponse},
    repo_types::PublicUser,
    store::{NewUser, PasswordField, ProfilePatch},
};
use crate::{
    auth::extractors::{AdminOnly, Authorized},
    error::AppError,
    state::AppState,
};

type Admin = Authorized<AdminOnly>;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).patch(update_user).delete(delete_user),
        )
}

fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest("Invalid user id".into()))
}

fn not_found() -> AppError {
    AppError::NotFound("No user found with that id".into())
}

#[instrument(skip_all)]
pub async fn list_users(
    State(state): State<AppState>,
    _admin: Admin,
) -> Result<Json<UserListResponse>, AppError> {
    let users: Vec<PublicUser> = state.store.list().await?.iter().map(PublicUser::from).collect();
    Ok(Json(UserListResponse {
        status: "success",
        results: users.len(),
        data: UserList { users },
    }))
}

#[instrument(skip(state, _admin, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    _admin: Admin,
    payload: Option<Json<CreateUserRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) =
        payload.ok_or_else(|| AppError::BadRequest("Missing or malformed request body".into()))?;
    let user = state
        .store
        .create(NewUser {
            name: &req.name,
            email: &req.email,
            password: &req.password,
            password_confirm: &req.password_confirm,
        })
        .await?;
    info!(user_id = %user.id, "user created by admin");
    Ok((StatusCode::CREATED, Json(UserResponse::success(&user))))
}

#[instrument(skip(state, _admin))]
pub async fn get_user(
    State(state): State<AppState>,
    _admin: Admin,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state
        .store
        .find_by_id(parse_id(&id)?, PasswordField::Exclude)
        .await?
        .ok_or_else(not_found)?;
    Ok(Json(UserResponse::success(&user)))
}

#[instrument(skip(state, _admin, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    _admin: Admin,
    Path(id): Path<String>,
    payload: Option<Json<UpdateUserRequest>>,
) -> Result<Json<UserResponse>, AppError> {
    let id = parse_id(&id)?;
    let Json(req) =
        payload.ok_or_else(|| AppError::BadRequest("Missing or malformed request body".into()))?;
    if req.touches_password() {
        return Err(AppError::BadRequest(
            "This route is not for password updates. Please use /updateMyPassword".into(),
        ));
    }

    let user = state
        .store
        .update(
            id,
            ProfilePatch {
                name: req.name,
                email: req.email,
            },
        )
        .await?
        .ok_or_else(not_found)?;
    info!(user_id = %user.id, "user updated by admin");
    Ok(Json(UserResponse::success(&user)))
}

#[instrument(skip(state, _admin))]
pub async fn delete_user(
    State(state): State<AppState>,
    _admin: Admin,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state
        .store
        .delete(parse_id(&id)?)
        .await?
        .ok_or_else(not_found)?;
    info!(user_id = %user.id, "user deleted by admin");
    Ok(Json(UserResponse::success(&user)))
}
