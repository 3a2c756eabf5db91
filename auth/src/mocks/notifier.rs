//! Mock notifier for testing.

use crate::error::{AuthError, Result};
use crate::providers::{CodePurpose, NotificationContext, Notifier};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A code the mock notifier was asked to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCode {
    /// Recipient.
    pub to: String,
    /// The code.
    pub code: String,
    /// Delivery context.
    pub context: NotificationContext,
}

/// Mock notifier.
///
/// Records every delivery instead of sending it. Clones share the outbox.
#[derive(Debug, Clone, Default)]
pub struct MockNotifier {
    sent: Arc<Mutex<Vec<SentCode>>>,
    failing: Arc<AtomicBool>,
}

impl MockNotifier {
    /// Create a new mock notifier that succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent deliveries fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every recorded delivery, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if lock is poisoned.
    pub fn sent(&self) -> Result<Vec<SentCode>> {
        Ok(self
            .sent
            .lock()
            .map_err(|_| AuthError::Internal("Mutex lock failed".to_string()))?
            .clone())
    }

    /// Most recent code sent to `to` for `purpose`.
    ///
    /// # Errors
    ///
    /// Returns error if lock is poisoned.
    pub fn last_code(&self, to: &str, purpose: CodePurpose) -> Result<Option<String>> {
        Ok(self
            .sent()?
            .into_iter()
            .rev()
            .find(|sent| sent.to == to && sent.context.purpose == purpose)
            .map(|sent| sent.code))
    }
}

impl Notifier for MockNotifier {
    async fn send_code(&self, to: &str, code: &str, context: &NotificationContext) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuthError::NotificationFailed(format!("mailbox {to} unreachable")));
        }
        self.sent
            .lock()
            .map_err(|_| AuthError::Internal("Mutex lock failed".to_string()))?
            .push(SentCode {
                to: to.to_string(),
                code: code.to_string(),
                context: context.clone(),
            });
        Ok(())
    }
}
