use std::{fmt, sync::Arc};

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    repo_types::User,
    validation::{normalize_email, normalize_name, Violations},
};
use crate::{
    auth::password::hash_password_async,
    error::AppError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Name,
    Email,
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniqueField::Name => f.write_str("name"),
            UniqueField::Email => f.write_str("email"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} is already taken")]
    Conflict(UniqueField),
    #[error("user no longer exists")]
    Missing,
    #[error("corrupt user record: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(field) => {
                AppError::Conflict(format!("A user with this {field} already exists"))
            }
            StoreError::Missing => AppError::NotFound("No user found with that id".into()),
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

/// Name/email changes accepted by the generic update path.
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Persistence backend. Implementations must enforce name/email uniqueness
/// atomically on `insert` and `update_profile`.
///
/// Reads always return the stored password hash; the `CredentialStore` decides
/// whether callers get to see it.
#[async_trait]
pub trait UserBackend: Send + Sync {
    async fn insert(&self, user: &User) -> Result<User, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    /// Matches the activation hash, marks the account activated and clears the
    /// hash in one step. At most one caller gets the row back.
    async fn consume_activation_hash(&self, hash: &str) -> Result<Option<User>, StoreError>;
    /// Matches an unexpired reset hash and clears both reset fields in one
    /// step. At most one caller gets the row back.
    async fn consume_reset_hash(
        &self,
        hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError>;
    /// Writes the reset fields and, when present, the password hash. No other
    /// column is touched.
    async fn update_credentials(&self, user: &User) -> Result<(), StoreError>;
    async fn update_profile(
        &self,
        id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<Option<User>, StoreError>;
    async fn list(&self) -> Result<Vec<User>, StoreError>;
    async fn delete(&self, id: Uuid) -> Result<Option<User>, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordField {
    Exclude,
    Include,
}

/// Whether `save` is handing over a new plaintext password.
#[derive(Debug, Clone, Copy)]
pub enum PasswordChange<'a> {
    Unchanged,
    Set { password: &'a str, confirm: &'a str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveValidation {
    Run,
    /// Used when only token fields changed.
    Skip,
}

#[derive(Debug, Clone, Copy)]
pub struct NewUser<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password: &'a str,
    pub password_confirm: &'a str,
}

/// Credential-aware front for a `UserBackend`: validation, normalization,
/// password hashing and hash projection live here so every backend gets them.
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn UserBackend>,
}

fn project(user: Option<User>, field: PasswordField) -> Option<User> {
    user.map(|mut u| {
        if field == PasswordField::Exclude {
            u.password_hash = None;
        }
        u
    })
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn UserBackend>) -> Self {
        Self { backend }
    }

    pub async fn create(&self, input: NewUser<'_>) -> Result<User, AppError> {
        self.insert_new(input, None).await
    }

    /// Like `create`, but the account is stored together with the hash of its
    /// activation secret.
    pub async fn create_pending_activation(
        &self,
        input: NewUser<'_>,
        activation_hash: String,
    ) -> Result<User, AppError> {
        self.insert_new(input, Some(activation_hash)).await
    }

    async fn insert_new(
        &self,
        input: NewUser<'_>,
        activation_token_hash: Option<String>,
    ) -> Result<User, AppError> {
        let name = normalize_name(input.name);
        let email = normalize_email(input.email);
        Violations::default()
            .name(&name)
            .email(&email)
            .password(input.password, input.password_confirm)
            .finish()?;

        let hash = hash_password_async(input.password.to_string()).await?;
        let user = User {
            id: Uuid::new_v4(),
            name,
            email,
            password_hash: Some(hash),
            role: Default::default(),
            activated: false,
            activation_token_hash,
            password_reset_token_hash: None,
            password_reset_expires_at: None,
            social_logins: Vec::new(),
            created_at: OffsetDateTime::now_utc(),
        };

        let mut created = self.backend.insert(&user).await.map_err(|e| {
            if let StoreError::Conflict(field) = &e {
                warn!(%field, "user create rejected: duplicate");
            }
            e
        })?;
        created.password_hash = None;
        debug!(user_id = %created.id, "user created");
        Ok(created)
    }

    pub async fn find_by_email(
        &self,
        email: &str,
        field: PasswordField,
    ) -> Result<Option<User>, AppError> {
        let user = self.backend.find_by_email(&normalize_email(email)).await?;
        Ok(project(user, field))
    }

    pub async fn find_by_id(&self, id: Uuid, field: PasswordField) -> Result<Option<User>, AppError> {
        let user = self.backend.find_by_id(id).await?;
        Ok(project(user, field))
    }

    /// Activates the account holding `hash`, consuming it.
    pub async fn consume_activation_hash(&self, hash: &str) -> Result<Option<User>, AppError> {
        let user = self.backend.consume_activation_hash(hash).await?;
        Ok(project(user, PasswordField::Exclude))
    }

    /// Clears an unexpired reset hash and returns its owner. A second call with
    /// the same hash finds nothing.
    pub async fn consume_valid_reset_hash(
        &self,
        hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, AppError> {
        let user = self.backend.consume_reset_hash(hash, now).await?;
        Ok(project(user, PasswordField::Exclude))
    }

    /// Persists the credential state of `user`: the reset fields, plus a fresh
    /// hash for `PasswordChange::Set`. Profile, role and activation columns are
    /// never written here. After a successful save the in-memory hash is
    /// dropped again.
    pub async fn save(
        &self,
        user: &mut User,
        change: PasswordChange<'_>,
        validation: SaveValidation,
    ) -> Result<(), AppError> {
        user.name = normalize_name(&user.name);
        user.email = normalize_email(&user.email);

        let mut violations = Violations::default();
        if validation == SaveValidation::Run {
            violations.name(&user.name).email(&user.email);
        }
        if let PasswordChange::Set { password, confirm } = change {
            violations.password(password, confirm);
        }
        violations.finish()?;

        match change {
            PasswordChange::Set { password, .. } => {
                user.password_hash = Some(hash_password_async(password.to_string()).await?);
            }
            PasswordChange::Unchanged => user.password_hash = None,
        }

        self.backend.update_credentials(user).await?;
        user.password_hash = None;
        debug!(user_id = %user.id, "user saved");
        Ok(())
    }

    /// Only name and email can go through here; roles and passwords have
    /// their own paths.
    pub async fn update(&self, id: Uuid, patch: ProfilePatch) -> Result<Option<User>, AppError> {
        let patch = ProfilePatch {
            name: patch.name.as_deref().map(normalize_name),
            email: patch.email.as_deref().map(normalize_email),
        };
        let mut violations = Violations::default();
        if let Some(name) = &patch.name {
            violations.name(name);
        }
        if let Some(email) = &patch.email {
            violations.email(email);
        }
        violations.finish()?;

        let user = self.backend.update_profile(id, &patch).await?;
        Ok(project(user, PasswordField::Exclude))
    }

    pub async fn list(&self) -> Result<Vec<User>, AppError> {
        let users = self.backend.list().await?;
        Ok(users
            .into_iter()
            .filter_map(|u| project(Some(u), PasswordField::Exclude))
            .collect())
    }

    pub async fn delete(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let user = self.backend.delete(id).await?;
        Ok(project(user, PasswordField::Exclude))
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::{
        auth::password::verify_password,
        users::{memory::MemoryUserBackend, repo_types::Role},
    };

    fn store() -> (CredentialStore, Arc<MemoryUserBackend>) {
        let backend = Arc::new(MemoryUserBackend::default());
        (CredentialStore::new(backend.clone()), backend)
    }

    fn alice() -> NewUser<'static> {
        NewUser {
            name: "alice",
            email: "A@X.com",
            password: "secret123",
            password_confirm: "secret123",
        }
    }

    async fn stored_hash(backend: &MemoryUserBackend, id: Uuid) -> String {
        backend
            .find_by_id(id)
            .await
            .unwrap()
            .and_then(|u| u.password_hash)
            .expect("stored hash")
    }

    #[tokio::test]
    async fn create_hashes_password_and_normalizes_email() {
        let (store, backend) = store();
        let user = store.create(alice()).await.unwrap();
        assert_eq!(user.email, "a@x.com");
        assert!(!user.activated);
        assert!(user.password_hash.is_none());

        let hash = stored_hash(&backend, user.id).await;
        assert_ne!(hash, "secret123");
        assert!(verify_password("secret123", &hash).unwrap());
    }

    #[tokio::test]
    async fn create_rejects_bad_input() {
        let (store, _) = store();
        let mut input = alice();
        input.password_confirm = "secret124";
        assert!(matches!(store.create(input).await, Err(AppError::Validation(_))));

        let mut input = alice();
        input.email = "not-an-email";
        assert!(matches!(store.create(input).await, Err(AppError::Validation(_))));

        let mut input = alice();
        input.name = "al";
        assert!(matches!(store.create(input).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn duplicate_name_or_email_conflicts() {
        let (store, _) = store();
        store.create(alice()).await.unwrap();

        let mut same_email = alice();
        same_email.name = "bob";
        assert!(matches!(store.create(same_email).await, Err(AppError::Conflict(_))));

        let mut same_name = alice();
        same_name.email = "b@x.com";
        assert!(matches!(store.create(same_name).await, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn concurrent_signups_with_same_email_yield_one_winner() {
        let (store, _) = store();
        let a = NewUser { name: "alice", ..alice() };
        let b = NewUser { name: "alicia", ..alice() };
        let (ra, rb) = tokio::join!(store.create(a), store.create(b));
        let results = [ra, rb];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(AppError::Conflict(_))))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn find_by_email_excludes_hash_unless_asked() {
        let (store, _) = store();
        store.create(alice()).await.unwrap();
        let plain = store
            .find_by_email("a@x.com", PasswordField::Exclude)
            .await
            .unwrap()
            .unwrap();
        assert!(plain.password_hash.is_none());
        let with_hash = store
            .find_by_email(" A@X.COM ", PasswordField::Include)
            .await
            .unwrap()
            .unwrap();
        assert!(with_hash.password_hash.is_some());
    }

    #[tokio::test]
    async fn save_rehashes_only_when_password_changes() {
        let (store, backend) = store();
        let mut user = store.create(alice()).await.unwrap();
        let original = stored_hash(&backend, user.id).await;

        user.password_reset_token_hash = Some("digest".into());
        store
            .save(&mut user, PasswordChange::Unchanged, SaveValidation::Skip)
            .await
            .unwrap();
        assert_eq!(stored_hash(&backend, user.id).await, original);

        store
            .save(
                &mut user,
                PasswordChange::Set { password: "newpass123", confirm: "newpass123" },
                SaveValidation::Run,
            )
            .await
            .unwrap();
        let updated = stored_hash(&backend, user.id).await;
        assert_ne!(updated, original);
        assert!(verify_password("newpass123", &updated).unwrap());
        assert!(user.password_hash.is_none());
    }

    #[tokio::test]
    async fn save_checks_password_confirmation() {
        let (store, _) = store();
        let mut user = store.create(alice()).await.unwrap();
        let err = store
            .save(
                &mut user,
                PasswordChange::Set { password: "newpass123", confirm: "other12345" },
                SaveValidation::Skip,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn update_only_touches_name_and_email() {
        let (store, _) = store();
        let user = store.create(alice()).await.unwrap();
        let updated = store
            .update(
                user.id,
                ProfilePatch { name: Some("alice2".into()), email: Some("NEW@x.com".into()) },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "alice2");
        assert_eq!(updated.email, "new@x.com");
        assert_eq!(updated.role, user.role);
        assert!(!updated.activated);

        assert!(store
            .update(Uuid::new_v4(), ProfilePatch::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_removes_user() {
        let (store, _) = store();
        let user = store.create(alice()).await.unwrap();
        assert!(store.delete(user.id).await.unwrap().is_some());
        assert!(store
            .find_by_id(user.id, PasswordField::Exclude)
            .await
            .unwrap()
            .is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_activation_hash_is_stored_with_the_account() {
        let (store, backend) = store();
        let user = store
            .create_pending_activation(alice(), "digest".into())
            .await
            .unwrap();
        let stored = backend.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.activation_token_hash.as_deref(), Some("digest"));
        assert!(!stored.activated);
    }

    #[tokio::test]
    async fn stale_save_keeps_concurrent_profile_role_and_activation_changes() {
        let (store, backend) = store();
        let created = store
            .create_pending_activation(alice(), "digest".into())
            .await
            .unwrap();
        let mut stale = store
            .find_by_id(created.id, PasswordField::Exclude)
            .await
            .unwrap()
            .unwrap();

        backend.set_role(created.id, Role::Admin).await;
        store
            .update(
                created.id,
                ProfilePatch { name: Some("alicia".into()), email: None },
            )
            .await
            .unwrap();
        store.consume_activation_hash("digest").await.unwrap().unwrap();

        stale.password_reset_token_hash = Some("reset".into());
        stale.password_reset_expires_at = Some(OffsetDateTime::now_utc() + Duration::minutes(10));
        store
            .save(&mut stale, PasswordChange::Unchanged, SaveValidation::Skip)
            .await
            .unwrap();

        let fresh = store
            .find_by_id(created.id, PasswordField::Exclude)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fresh.role, Role::Admin);
        assert_eq!(fresh.name, "alicia");
        assert!(fresh.activated);
        assert!(fresh.activation_token_hash.is_none());
        assert_eq!(fresh.password_reset_token_hash.as_deref(), Some("reset"));
    }

    #[tokio::test]
    async fn concurrent_reset_consumption_has_one_winner() {
        let (store, _) = store();
        let mut user = store.create(alice()).await.unwrap();
        user.password_reset_token_hash = Some("reset".into());
        user.password_reset_expires_at = Some(OffsetDateTime::now_utc() + Duration::minutes(10));
        store
            .save(&mut user, PasswordChange::Unchanged, SaveValidation::Skip)
            .await
            .unwrap();

        let now = OffsetDateTime::now_utc();
        let (a, b) = tokio::join!(
            store.consume_valid_reset_hash("reset", now),
            store.consume_valid_reset_hash("reset", now)
        );
        let winners = [a.unwrap(), b.unwrap()]
            .into_iter()
            .filter(Option::is_some)
            .count();
        assert_eq!(winners, 1);
    }
}
