//! Console notifier for development and testing.

use crate::error::Result;
use crate::providers::{NotificationContext, Notifier};
use tracing::info;

/// Console notifier.
///
/// Logs codes instead of delivering them. Never use in production: anyone
/// with log access can complete any verification.
///
/// # Examples
///
/// ```ignore
/// use federated_auth::providers::ConsoleNotifier;
///
/// let notifier = ConsoleNotifier::new();
/// notifier.send_code("user@example.com", "042917", &context).await?;
/// ```
#[derive(Clone, Debug, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    /// Create a new console notifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Notifier for ConsoleNotifier {
    async fn send_code(&self, to: &str, code: &str, context: &NotificationContext) -> Result<()> {
        info!(
            to = %to,
            code = %code,
            purpose = %context.purpose,
            ip = %context.ip,
            requested_at = %context.requested_at,
            "Verification code (development mode)"
        );

        Ok(())
    }
}
