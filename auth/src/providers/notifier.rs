//! Code delivery trait.

use crate::error::Result;
use super::NotificationContext;

/// Notifier.
///
/// Delivers one-time codes to the account owner (email, SMS, ...). The
/// transport lives outside this crate.
pub trait Notifier: Send + Sync {
    /// Deliver a code.
    ///
    /// # Arguments
    ///
    /// - `to`: Recipient address
    /// - `code`: The one-time code
    /// - `context`: Why the code was requested, and from where
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects or cannot reach the recipient.
    fn send_code(
        &self,
        to: &str,
        code: &str,
        context: &NotificationContext,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}
