//! Account workflows: signup, login, activation and the password flows.
//!
//! Each function is a straight sequence of store and token calls returning an
//! `AppError` on the first failed step; HTTP concerns stay in the handlers.

use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    password::verify_password_async,
    secret::{generate_one_time_secret, hash_one_time_secret, reset_expiry_from},
};
use crate::{
    error::AppError,
    mail::{self, MailMessage, Template, TemplateVars},
    state::AppState,
    users::{
        repo_types::User,
        store::{NewUser, PasswordChange, PasswordField, SaveValidation},
        validation::Violations,
    },
};

const INVALID_LINK: &str = "Link is invalid or has expired";

/// A freshly issued session token and the user it belongs to.
#[derive(Debug)]
pub struct Session {
    pub token: String,
    pub user: User,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

async fn password_matches(user: &User, candidate: &str) -> Result<bool, AppError> {
    let hash = user
        .password_hash
        .clone()
        .ok_or_else(|| anyhow::anyhow!("password hash was not loaded for user {}", user.id))?;
    Ok(verify_password_async(candidate.to_string(), hash).await?)
}

fn open_session(state: &AppState, user: User) -> Result<Session, AppError> {
    let token = state.jwt.issue_session_token(user.id)?;
    Ok(Session { token, user })
}

pub async fn sign_up(state: &AppState, input: NewUser<'_>) -> Result<User, AppError> {
    let secret = generate_one_time_secret();
    let user = state
        .store
        .create_pending_activation(input, secret.hash)
        .await?;

    let url = mail::link(
        &state.config.public_base_url,
        &format!("confirmMail/{}", secret.plain),
    );
    mail::dispatch(
        state.mailer.clone(),
        MailMessage::new(
            &user.email,
            Template::Signup,
            TemplateVars {
                user: user.name.clone(),
                url,
            },
        ),
    );

    info!(user_id = %user.id, "user signed up");
    Ok(user)
}

pub async fn login(
    state: &AppState,
    email: Option<&str>,
    password: Option<&str>,
) -> Result<Session, AppError> {
    let (Some(email), Some(password)) = (present(email), password.filter(|p| !p.is_empty()))
    else {
        return Err(AppError::BadRequest(
            "Please provide email and password".into(),
        ));
    };

    let mut user = state
        .store
        .find_by_email(email, PasswordField::Include)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No user found with email {email}")))?;

    if !password_matches(&user, password).await? {
        warn!(user_id = %user.id, "login rejected: wrong password");
        return Err(AppError::Unauthorized("Incorrect email or password".into()));
    }

    if !user.activated {
        warn!(user_id = %user.id, "login rejected: account not activated");
        return Err(AppError::Unauthorized(format!(
            "Please activate your account with the link sent to {}",
            user.email
        )));
    }

    user.password_hash = None;
    info!(user_id = %user.id, "user logged in");
    open_session(state, user)
}

pub async fn confirm_mail(state: &AppState, activation_secret: &str) -> Result<User, AppError> {
    let hash = hash_one_time_secret(activation_secret);
    let user = state
        .store
        .consume_activation_hash(&hash)
        .await?
        .ok_or_else(|| AppError::InvalidToken(INVALID_LINK.into()))?;

    info!(user_id = %user.id, "account activated");
    Ok(user)
}

pub async fn forgot_password(state: &AppState, email: Option<&str>) -> Result<User, AppError> {
    let email = present(email)
        .ok_or_else(|| AppError::BadRequest("Please provide an email address".into()))?;

    let mut user = state
        .store
        .find_by_email(email, PasswordField::Exclude)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No user found with email {email}")))?;

    let secret = generate_one_time_secret();
    user.password_reset_token_hash = Some(secret.hash);
    user.password_reset_expires_at = Some(reset_expiry_from(OffsetDateTime::now_utc()));
    state
        .store
        .save(&mut user, PasswordChange::Unchanged, SaveValidation::Skip)
        .await?;

    let url = mail::link(
        &state.config.public_base_url,
        &format!("resetPassword/{}", secret.plain),
    );
    mail::dispatch(
        state.mailer.clone(),
        MailMessage::new(
            &user.email,
            Template::ForgotPassword,
            TemplateVars {
                user: user.name.clone(),
                url,
            },
        ),
    );

    info!(user_id = %user.id, "password reset requested");
    Ok(user)
}

pub async fn reset_password(
    state: &AppState,
    reset_secret: &str,
    password: &str,
    password_confirm: &str,
) -> Result<Session, AppError> {
    // A rejected password must not burn the link.
    Violations::default()
        .password(password, password_confirm)
        .finish()?;

    let hash = hash_one_time_secret(reset_secret);
    let mut user = state
        .store
        .consume_valid_reset_hash(&hash, OffsetDateTime::now_utc())
        .await?
        .ok_or_else(|| AppError::InvalidToken(INVALID_LINK.into()))?;

    state
        .store
        .save(
            &mut user,
            PasswordChange::Set {
                password,
                confirm: password_confirm,
            },
            SaveValidation::Run,
        )
        .await?;

    info!(user_id = %user.id, "password reset");
    open_session(state, user)
}

pub async fn update_password(
    state: &AppState,
    user_id: Uuid,
    password_current: &str,
    password: &str,
    password_confirm: &str,
) -> Result<Session, AppError> {
    let mut user = state
        .store
        .find_by_id(user_id, PasswordField::Include)
        .await?
        .ok_or_else(|| AppError::Unauthorized("The user for this token no longer exists".into()))?;

    if !password_matches(&user, password_current).await? {
        warn!(user_id = %user.id, "password update rejected: wrong current password");
        return Err(AppError::Unauthorized("Your current password is wrong".into()));
    }

    state
        .store
        .save(
            &mut user,
            PasswordChange::Set {
                password,
                confirm: password_confirm,
            },
            SaveValidation::Run,
        )
        .await?;

    info!(user_id = %user.id, "password updated");
    open_session(state, user)
}
