use axum::{
    extract::{Path, State},
    http::{header::SET_COOKIE, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{
        ForgotPasswordRequest, LoginRequest, MessageResponse, ResetPasswordRequest,
        SessionResponse, SignUpRequest, UpdatePasswordRequest,
    },
    extractors::AuthUser,
    services::{self, Session},
};
use crate::{
    error::AppError,
    state::AppState,
    users::{dto::UserResponse, repo_types::PublicUser, store::NewUser},
};

pub const SESSION_COOKIE_NAME: &str = "jwt";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signUp", post(sign_up))
        .route("/login", post(login))
        .route("/confirmMail/:activation_link", get(confirm_mail))
        .route("/forgotPassword", post(forgot_password))
        .route("/resetPassword/:reset_token", post(reset_password))
        .route("/updateMyPassword", patch(update_my_password))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

fn body<T>(payload: Option<Json<T>>) -> Result<T, AppError> {
    payload
        .map(|Json(p)| p)
        .ok_or_else(|| AppError::BadRequest("Missing or malformed request body".into()))
}

/// `HttpOnly` cookie carrying the session token; `Secure` outside development.
pub(crate) fn session_cookie(state: &AppState, token: &str) -> Result<HeaderValue, AppError> {
    let max_age = state.jwt.ttl().as_secs();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}"
    );
    if state.config.is_production() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("session cookie: {e}")))
}

fn session_response(state: &AppState, session: Session) -> Result<impl IntoResponse, AppError> {
    let cookie = session_cookie(state, &session.token)?;
    Ok((
        [(SET_COOKIE, cookie)],
        Json(SessionResponse {
            status: "success",
            token: session.token,
            user: PublicUser::from(&session.user),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn sign_up(
    State(state): State<AppState>,
    payload: Option<Json<SignUpRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let req = body(payload)?;
    let user = services::sign_up(
        &state,
        NewUser {
            name: &req.name,
            email: &req.email,
            password: &req.password,
            password_confirm: &req.password_confirm,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(UserResponse::success(&user))))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Option<Json<LoginRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let req = body(payload)?;
    let session = services::login(&state, req.email.as_deref(), req.password.as_deref()).await?;
    session_response(&state, session)
}

#[instrument(skip_all)]
pub async fn confirm_mail(
    State(state): State<AppState>,
    Path(activation_link): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    services::confirm_mail(&state, &activation_link).await?;
    Ok(Json(MessageResponse::success(
        "Account has been activated successfully",
    )))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> Result<Json<MessageResponse>, AppError> {
    let req = body(payload)?;
    let user = services::forgot_password(&state, req.email.as_deref()).await?;
    Ok(Json(MessageResponse::success(format!(
        "Password reset link sent to {}",
        user.email
    ))))
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(reset_token): Path<String>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let req = body(payload)?;
    let session =
        services::reset_password(&state, &reset_token, &req.password, &req.password_confirm)
            .await?;
    session_response(&state, session)
}

#[instrument(skip(state, user, payload), fields(user_id = %user.id))]
pub async fn update_my_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Option<Json<UpdatePasswordRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let req = body(payload)?;
    let session = services::update_password(
        &state,
        user.id,
        &req.password_current,
        &req.password,
        &req.password_confirm,
    )
    .await?;
    session_response(&state, session)
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn get_me(AuthUser(user): AuthUser) -> Json<UserResponse> {
    Json(UserResponse::success(&user))
}
