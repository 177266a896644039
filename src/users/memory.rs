use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    repo_types::User,
    store::{ProfilePatch, StoreError, UniqueField, UserBackend},
};

/// In-process backend. Uniqueness checks and writes happen under the same
/// write lock, which gives the same guarantee as a unique index.
#[derive(Default)]
pub struct MemoryUserBackend {
    users: RwLock<HashMap<Uuid, User>>,
}

fn conflict(
    users: &HashMap<Uuid, User>,
    id: Uuid,
    name: &str,
    email: &str,
) -> Option<UniqueField> {
    users.values().filter(|u| u.id != id).find_map(|u| {
        if u.name == name {
            Some(UniqueField::Name)
        } else if u.email == email {
            Some(UniqueField::Email)
        } else {
            None
        }
    })
}

#[async_trait]
impl UserBackend for MemoryUserBackend {
    async fn insert(&self, user: &User) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if let Some(field) = conflict(&users, user.id, &user.name, &user.email) {
            return Err(StoreError::Conflict(field));
        }
        if user.password_hash.is_none() {
            return Err(StoreError::Corrupt("password hash missing on insert".into()));
        }
        users.insert(user.id, user.clone());
        Ok(user.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn consume_activation_hash(&self, hash: &str) -> Result<Option<User>, StoreError> {
        let mut users = self.users.write().await;
        let Some(user) = users
            .values_mut()
            .find(|u| u.activation_token_hash.as_deref() == Some(hash))
        else {
            return Ok(None);
        };
        user.activated = true;
        user.activation_token_hash = None;
        Ok(Some(user.clone()))
    }

    async fn consume_reset_hash(
        &self,
        hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let mut users = self.users.write().await;
        let Some(user) = users.values_mut().find(|u| {
            u.password_reset_token_hash.as_deref() == Some(hash)
                && u.password_reset_expires_at.is_some_and(|exp| exp > now)
        }) else {
            return Ok(None);
        };
        user.clear_password_reset();
        Ok(Some(user.clone()))
    }

    async fn update_credentials(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let existing = users.get_mut(&user.id).ok_or(StoreError::Missing)?;
        if let Some(hash) = &user.password_hash {
            existing.password_hash = Some(hash.clone());
        }
        existing.password_reset_token_hash = user.password_reset_token_hash.clone();
        existing.password_reset_expires_at = user.password_reset_expires_at;
        Ok(())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<Option<User>, StoreError> {
        let mut users = self.users.write().await;
        let Some(current) = users.get(&id) else {
            return Ok(None);
        };
        let name = patch.name.clone().unwrap_or_else(|| current.name.clone());
        let email = patch.email.clone().unwrap_or_else(|| current.email.clone());
        if let Some(field) = conflict(&users, id, &name, &email) {
            return Err(StoreError::Conflict(field));
        }
        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        user.name = name;
        user.email = email;
        Ok(Some(user.clone()))
    }

    async fn list(&self) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn delete(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.write().await.remove(&id))
    }
}

#[cfg(test)]
impl MemoryUserBackend {
    /// Roles have no write path in the service; tests promote users here.
    pub async fn set_role(&self, id: Uuid, role: super::repo_types::Role) {
        if let Some(user) = self.users.write().await.get_mut(&id) {
            user.role = role;
        }
    }
}
