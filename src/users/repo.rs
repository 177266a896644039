use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    repo_types::{User, UserRow},
    store::{ProfilePatch, StoreError, UniqueField, UserBackend},
};

const COLUMNS: &str = "id, name, email, password_hash, role, activated, activation_token_hash, \
     password_reset_token_hash, password_reset_expires_at, social_logins, created_at";

/// PostgreSQL backend. Uniqueness comes from the `users_name_key` and
/// `users_email_key` constraints.
#[derive(Clone)]
pub struct PgUserRepo {
    db: PgPool,
}

impl PgUserRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_err(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().is_some_and(|code| code.as_ref() == "23505") {
            let field = match db_err.constraint() {
                Some(c) if c.contains("email") => UniqueField::Email,
                _ => UniqueField::Name,
            };
            return StoreError::Conflict(field);
        }
    }
    StoreError::Database(err)
}

fn into_user(row: UserRow) -> Result<User, StoreError> {
    User::try_from(row).map_err(StoreError::Corrupt)
}

fn into_user_opt(row: Option<UserRow>) -> Result<Option<User>, StoreError> {
    row.map(into_user).transpose()
}

fn social_tags(user: &User) -> Vec<String> {
    user.social_logins
        .iter()
        .map(|p| p.as_str().to_string())
        .collect()
}

#[async_trait]
impl UserBackend for PgUserRepo {
    async fn insert(&self, user: &User) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, name, email, password_hash, role, activated,
                               activation_token_hash, password_reset_token_hash,
                               password_reset_expires_at, social_logins)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.password_hash.as_deref())
        .bind(user.role.as_str())
        .bind(user.activated)
        .bind(user.activation_token_hash.as_deref())
        .bind(user.password_reset_token_hash.as_deref())
        .bind(user.password_reset_expires_at)
        .bind(social_tags(user))
        .fetch_one(&self.db)
        .await
        .map_err(map_err)?;
        into_user(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        into_user_opt(row)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        into_user_opt(row)
    }

    async fn consume_activation_hash(&self, hash: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET activated = TRUE,
                activation_token_hash = NULL
            WHERE activation_token_hash = $1
            RETURNING {COLUMNS}
            "#
        ))
        .bind(hash)
        .fetch_optional(&self.db)
        .await?;
        into_user_opt(row)
    }

    async fn consume_reset_hash(
        &self,
        hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET password_reset_token_hash = NULL,
                password_reset_expires_at = NULL
            WHERE password_reset_token_hash = $1
              AND password_reset_expires_at > $2
            RETURNING {COLUMNS}
            "#
        ))
        .bind(hash)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        into_user_opt(row)
    }

    async fn update_credentials(&self, user: &User) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = COALESCE($2, password_hash),
                password_reset_token_hash = $3,
                password_reset_expires_at = $4
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(user.password_hash.as_deref())
        .bind(user.password_reset_token_hash.as_deref())
        .bind(user.password_reset_expires_at)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing);
        }
        Ok(())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET name = COALESCE($2, name),
                email = COALESCE($3, email)
            WHERE id = $1
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(patch.name.as_deref())
        .bind(patch.email.as_deref())
        .fetch_optional(&self.db)
        .await
        .map_err(map_err)?;
        into_user_opt(row)
    }

    async fn list(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {COLUMNS} FROM users ORDER BY created_at ASC"
        ))
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(into_user).collect()
    }

    async fn delete(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "DELETE FROM users WHERE id = $1 RETURNING {COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        into_user_opt(row)
    }
}
