//! Mock user directory for testing.

use crate::clock::Clock;
use crate::error::{AuthError, Result};
use crate::providers::{NewUser, ProviderLink, User, UserDirectory};
use crate::state::UserId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Directory {
    users: HashMap<UserId, User>,
    links: HashMap<ProviderLink, UserId>,
}

/// Mock user directory.
///
/// Uses in-memory storage for testing. Clones share the same accounts, so a
/// test can seed or inspect the directory the service is using.
#[derive(Clone)]
pub struct MockUserDirectory {
    inner: Arc<Mutex<Directory>>,
    clock: Arc<dyn Clock>,
}

impl MockUserDirectory {
    /// Create an empty directory stamping accounts with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Directory::default())),
            clock,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Directory>> {
        self.inner
            .lock()
            .map_err(|_| AuthError::Internal("Mutex lock failed".to_string()))
    }

    /// Provider identities linked to a user (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if lock is poisoned.
    pub fn links_of(&self, user_id: UserId) -> Result<Vec<ProviderLink>> {
        let directory = self.lock()?;
        let mut links: Vec<ProviderLink> = directory
            .links
            .iter()
            .filter(|(_, owner)| **owner == user_id)
            .map(|(link, _)| link.clone())
            .collect();
        links.sort_by(|a, b| {
            (a.provider.as_str(), &a.provider_user_id).cmp(&(b.provider.as_str(), &b.provider_user_id))
        });
        Ok(links)
    }

    /// Number of accounts (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if lock is poisoned.
    pub fn count(&self) -> Result<usize> {
        Ok(self.lock()?.users.len())
    }
}

impl UserDirectory for MockUserDirectory {
    async fn find_by_id(&self, user_id: UserId) -> Result<Option<User>> {
        Ok(self.lock()?.users.get(&user_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn find_by_provider(&self, link: &ProviderLink) -> Result<Option<User>> {
        let directory = self.lock()?;
        Ok(directory
            .links
            .get(link)
            .and_then(|user_id| directory.users.get(user_id))
            .cloned())
    }

    async fn create(&self, user: NewUser) -> Result<User> {
        let now = self.clock.now();
        let mut directory = self.lock()?;
        if directory.users.values().any(|u| u.email == user.email) {
            return Err(AuthError::EmailAlreadyTaken);
        }

        let created = User {
            id: UserId::new(),
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            password_hash: user.password_hash,
            role: user.role,
            avatar_url: user.avatar_url,
            created_at: now,
        };
        if let Some(link) = user.provider {
            directory.links.insert(link, created.id);
        }
        directory.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn link_provider(&self, user_id: UserId, link: ProviderLink) -> Result<()> {
        let mut directory = self.lock()?;
        if !directory.users.contains_key(&user_id) {
            return Err(AuthError::UserNotFound);
        }
        directory.links.insert(link, user_id);
        Ok(())
    }

    async fn update_email(&self, user_id: UserId, email: &str) -> Result<()> {
        let mut directory = self.lock()?;
        if directory
            .users
            .values()
            .any(|u| u.email == email && u.id != user_id)
        {
            return Err(AuthError::EmailAlreadyTaken);
        }
        let user = directory
            .users
            .get_mut(&user_id)
            .ok_or(AuthError::UserNotFound)?;
        user.email = email.to_string();
        Ok(())
    }

    async fn update_password(&self, user_id: UserId, password_hash: &str) -> Result<()> {
        let mut directory = self.lock()?;
        let user = directory
            .users
            .get_mut(&user_id)
            .ok_or(AuthError::UserNotFound)?;
        user.password_hash = Some(password_hash.to_string());
        Ok(())
    }

    async fn delete(&self, user_id: UserId) -> Result<()> {
        let mut directory = self.lock()?;
        directory
            .users
            .remove(&user_id)
            .ok_or(AuthError::UserNotFound)?;
        directory.links.retain(|_, owner| *owner != user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::FixedClock;
    use crate::state::{OAuthProvider, Role};

    fn new_user(email: &str, provider: Option<ProviderLink>) -> NewUser {
        NewUser {
            email: email.to_string(),
            first_name: None,
            last_name: None,
            password_hash: None,
            role: Role::User,
            avatar_url: None,
            provider,
        }
    }

    #[tokio::test]
    async fn test_create_links_provider() {
        let users = MockUserDirectory::new(Arc::new(FixedClock::default()));
        let link = ProviderLink {
            provider: OAuthProvider::GitHub,
            provider_user_id: "42".into(),
        };
        let user = users.create(new_user("a@b.c", Some(link.clone()))).await.unwrap();

        assert_eq!(users.find_by_provider(&link).await.unwrap(), Some(user.clone()));
        assert_eq!(users.links_of(user.id).unwrap(), vec![link]);
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let users = MockUserDirectory::new(Arc::new(FixedClock::default()));
        users.create(new_user("a@b.c", None)).await.unwrap();
        assert_eq!(
            users.create(new_user("a@b.c", None)).await.unwrap_err(),
            AuthError::EmailAlreadyTaken
        );
    }

    #[tokio::test]
    async fn test_delete_drops_links() {
        let users = MockUserDirectory::new(Arc::new(FixedClock::default()));
        let link = ProviderLink {
            provider: OAuthProvider::Google,
            provider_user_id: "g-1".into(),
        };
        let user = users.create(new_user("a@b.c", Some(link.clone()))).await.unwrap();
        users.delete(user.id).await.unwrap();

        assert_eq!(users.find_by_provider(&link).await.unwrap(), None);
        assert_eq!(users.delete(user.id).await.unwrap_err(), AuthError::UserNotFound);
    }
}
