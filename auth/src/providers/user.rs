//! User directory trait.

use crate::error::Result;
use crate::state::UserId;
use super::{NewUser, ProviderLink, User};

/// User directory.
///
/// This trait abstracts over the relational account storage, which lives
/// outside this crate. Lookups return `None` for missing accounts; mutations
/// of a missing account return `AuthError::UserNotFound`.
pub trait UserDirectory: Send + Sync {
    /// Get user by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the directory query fails.
    fn find_by_id(
        &self,
        user_id: UserId,
    ) -> impl std::future::Future<Output = Result<Option<User>>> + Send;

    /// Get user by email.
    ///
    /// # Errors
    ///
    /// Returns error if the directory query fails.
    fn find_by_email(
        &self,
        email: &str,
    ) -> impl std::future::Future<Output = Result<Option<User>>> + Send;

    /// Get the user a provider identity is linked to.
    ///
    /// # Errors
    ///
    /// Returns error if the directory query fails.
    fn find_by_provider(
        &self,
        link: &ProviderLink,
    ) -> impl std::future::Future<Output = Result<Option<User>>> + Send;

    /// Create a user, optionally linked to a provider identity.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The directory query fails
    /// - The email is taken → `AuthError::EmailAlreadyTaken`
    fn create(&self, user: NewUser) -> impl std::future::Future<Output = Result<User>> + Send;

    /// Link a provider identity to an existing user.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The directory query fails
    /// - The user does not exist → `AuthError::UserNotFound`
    fn link_provider(
        &self,
        user_id: UserId,
        link: ProviderLink,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Replace the user's email.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The directory query fails
    /// - The user does not exist → `AuthError::UserNotFound`
    /// - The email is taken → `AuthError::EmailAlreadyTaken`
    fn update_email(
        &self,
        user_id: UserId,
        email: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Replace the user's password hash.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The directory query fails
    /// - The user does not exist → `AuthError::UserNotFound`
    fn update_password(
        &self,
        user_id: UserId,
        password_hash: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Delete the user and its provider links.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The directory query fails
    /// - The user does not exist → `AuthError::UserNotFound`
    fn delete(&self, user_id: UserId) -> impl std::future::Future<Output = Result<()>> + Send;
}
