use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

/// Login providers a user may have linked. Stored, never acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialProvider {
    Google,
    Facebook,
}

impl SocialProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocialProvider::Google => "google",
            SocialProvider::Facebook => "facebook",
        }
    }
}

impl FromStr for SocialProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(SocialProvider::Google),
            "facebook" => Ok(SocialProvider::Facebook),
            other => Err(format!("unknown social provider {other:?}")),
        }
    }
}

/// User record as the application sees it.
///
/// `password_hash` is `None` unless the read explicitly asked for it.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub role: Role,
    pub activated: bool,
    pub activation_token_hash: Option<String>,
    pub password_reset_token_hash: Option<String>,
    pub password_reset_expires_at: Option<OffsetDateTime>,
    pub social_logins: Vec<SocialProvider>,
    pub created_at: OffsetDateTime,
}

impl User {
    pub fn clear_password_reset(&mut self) {
        self.password_reset_token_hash = None;
        self.password_reset_expires_at = None;
    }
}

/// Row in the `users` table.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub activated: bool,
    pub activation_token_hash: Option<String>,
    pub password_reset_token_hash: Option<String>,
    pub password_reset_expires_at: Option<OffsetDateTime>,
    pub social_logins: Vec<String>,
    pub created_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = String;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        let social_logins = r
            .social_logins
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            id: r.id,
            name: r.name,
            email: r.email,
            password_hash: Some(r.password_hash),
            role: r.role.parse()?,
            activated: r.activated,
            activation_token_hash: r.activation_token_hash,
            password_reset_token_hash: r.password_reset_token_hash,
            password_reset_expires_at: r.password_reset_expires_at,
            social_logins,
            created_at: r.created_at,
        })
    }
}

/// Public part of the user returned to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub activated: bool,
    pub social_logins: Vec<SocialProvider>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            name: u.name.clone(),
            email: u.email.clone(),
            role: u.role,
            activated: u.activated,
            social_logins: u.social_logins.clone(),
            created_at: u.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(role: &str) -> UserRow {
        UserRow {
            id: Uuid::new_v4(),
            name: "alice".into(),
            email: "a@x.com".into(),
            password_hash: "$argon2id$fake".into(),
            role: role.into(),
            activated: false,
            activation_token_hash: Some("abc".into()),
            password_reset_token_hash: None,
            password_reset_expires_at: None,
            social_logins: vec!["google".into()],
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn row_converts_into_user() {
        let user = User::try_from(row("admin")).unwrap();
        assert_eq!(user.role, Role::Admin);
        assert_eq!(user.social_logins, vec![SocialProvider::Google]);
        assert!(user.password_hash.is_some());
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(User::try_from(row("superuser")).is_err());
    }

    #[test]
    fn public_user_never_carries_secrets() {
        let user = User::try_from(row("user")).unwrap();
        let json = serde_json::to_value(PublicUser::from(&user)).unwrap();
        let text = json.to_string();
        assert!(!text.contains("argon2"));
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("activationTokenHash").is_none());
        assert_eq!(json["role"], "user");
        assert_eq!(json["socialLogins"][0], "google");
    }
}
