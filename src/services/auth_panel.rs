use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{error, info, warn};
use tokio::sync::Mutex as SubmitSlot;

use crate::errors::{ActionError, ValidationFailure};
use crate::models::identity::Identity;
use crate::services::backend::IdentityProvider;

pub const MIN_PASSWORD_LEN: usize = 6;

pub const SIGNED_IN: &str = "signed in";
pub const ACCOUNT_CREATED: &str = "account created";
pub const CONFIRM_EMAIL: &str = "account created, confirm your email and sign in";

/// Sign-in / sign-up form. The resulting identity reaches the rest of the
/// application through the provider's change notifications, never through
/// these return values.
pub struct AuthPanel {
    identity: Arc<dyn IdentityProvider>,
    message: Mutex<Option<String>>,
    /// Display name chosen at sign-up, kept by account id until the account
    /// first signs in with a session.
    pending_name: Mutex<Option<(String, String)>>,
    slot: SubmitSlot<()>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AuthPanel {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            identity,
            message: Mutex::new(None),
            pending_name: Mutex::new(None),
            slot: SubmitSlot::new(()),
        }
    }

    pub fn message(&self) -> Option<String> {
        self.lock_message().clone()
    }

    fn lock_message(&self) -> MutexGuard<'_, Option<String>> {
        lock(&self.message)
    }

    fn show(&self, text: impl Into<String>) {
        *self.lock_message() = Some(text.into());
    }

    fn fail(&self, err: ActionError) -> ActionError {
        if !err.is_validation() {
            error!("{}", err);
        }
        self.show(err.to_string());
        err
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), ActionError> {
        let _slot = self
            .slot
            .try_lock()
            .map_err(|_| self.fail(ValidationFailure::RequestInProgress.into()))?;

        match self.identity.sign_in(email, password).await {
            Ok(identity) => {
                info!("Sign-in accepted for {}", identity.id);
                self.apply_pending_name(&identity).await;
                self.show(SIGNED_IN);
                Ok(())
            }
            Err(e) => Err(self.fail(ActionError::SignIn(e))),
        }
    }

    pub async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> Result<(), ActionError> {
        let _slot = self
            .slot
            .try_lock()
            .map_err(|_| self.fail(ValidationFailure::RequestInProgress.into()))?;

        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(self.fail(ValidationFailure::PasswordTooShort.into()));
        }

        let identity = self
            .identity
            .sign_up(email, password)
            .await
            .map_err(|e| self.fail(ActionError::SignUp(e)))?;

        if !self.identity.has_session() {
            info!("Account {} awaits email confirmation", identity.id);
            *lock(&self.pending_name) = Some((identity.id.clone(), display_name.to_string()));
            self.show(CONFIRM_EMAIL);
            return Ok(());
        }

        if let Err(e) = self.identity.update_display_name(&identity, display_name).await {
            // Sign-up failed as a whole, so the new account's session goes too.
            self.identity.sign_out().await;
            return Err(self.fail(ActionError::SignUp(e)));
        }

        info!("Account {} created", identity.id);
        self.show(ACCOUNT_CREATED);
        Ok(())
    }

    /// Stores a display name held back by a confirmation-pending sign-up.
    /// A failure keeps it for the next sign-in; the sign-in itself stands.
    async fn apply_pending_name(&self, identity: &Identity) {
        let name = {
            let mut pending = lock(&self.pending_name);
            match pending.as_ref() {
                Some((id, _)) if *id == identity.id => pending.take().map(|(_, name)| name),
                _ => None,
            }
        };
        let Some(name) = name else {
            return;
        };

        if let Err(e) = self.identity.update_display_name(identity, &name).await {
            warn!("Display name for {} not stored yet: {}", identity.id, e);
            *lock(&self.pending_name) = Some((identity.id.clone(), name));
        }
    }

    pub async fn sign_out(&self) {
        self.identity.sign_out().await;
        *self.lock_message() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BackendError;
    use crate::services::memory::{CallCounts, MemoryBackend, Operation};

    fn panel() -> (Arc<MemoryBackend>, AuthPanel) {
        let backend = Arc::new(MemoryBackend::new());
        let panel = AuthPanel::new(backend.clone());
        (backend, panel)
    }

    #[tokio::test]
    async fn short_password_never_reaches_backend() {
        let (backend, panel) = panel();
        for pw in ["", "a", "12345", "äöüß1"] {
            let err = panel.sign_up("al@example.com", pw, "Al").await.unwrap_err();
            assert_eq!(err, ActionError::Validation(ValidationFailure::PasswordTooShort));
            assert_eq!(panel.message().as_deref(), Some("password must be at least 6 characters"));
        }
        assert_eq!(backend.calls.identity_calls(), 0);
        assert!(backend.current_identity().is_none());
    }

    #[tokio::test]
    async fn sign_up_attaches_display_name() {
        let (backend, panel) = panel();
        panel.sign_up("al@example.com", "secret1", "Al").await.unwrap();

        assert_eq!(panel.message().as_deref(), Some(ACCOUNT_CREATED));
        let current = backend.current_identity().unwrap();
        assert_eq!(current.email, "al@example.com");
        assert_eq!(current.display_name.as_deref(), Some("Al"));
    }

    #[tokio::test]
    async fn backend_failures_are_forwarded() {
        let (backend, panel) = panel();
        let err = panel.sign_in("ghost@example.com", "whatever").await.unwrap_err();
        assert_eq!(err, ActionError::SignIn(BackendError::Rejected("invalid login credentials".into())));
        assert_eq!(panel.message().as_deref(), Some("sign-in failed: invalid login credentials"));

        backend.fail_next(Operation::UpdateDisplayName, "profile service down");
        let err = panel.sign_up("al@example.com", "secret1", "Al").await.unwrap_err();
        assert_eq!(err.to_string(), "sign-up failed: profile service down");
        assert_eq!(panel.message().as_deref(), Some("sign-up failed: profile service down"));
    }

    #[tokio::test]
    async fn failed_display_name_leaves_nobody_signed_in() {
        let (backend, panel) = panel();
        backend.fail_next(Operation::UpdateDisplayName, "profile service down");

        let err = panel.sign_up("al@example.com", "secret1", "Al").await.unwrap_err();
        assert_eq!(err.to_string(), "sign-up failed: profile service down");
        assert!(backend.current_identity().is_none());
        assert!(!backend.has_session());
    }

    #[tokio::test]
    async fn confirmation_pending_sign_up_names_account_on_first_sign_in() {
        let backend = Arc::new(MemoryBackend::new().with_email_confirmation());
        let panel = AuthPanel::new(backend.clone());

        panel.sign_up("al@example.com", "secret1", "Al").await.unwrap();
        assert_eq!(panel.message().as_deref(), Some(CONFIRM_EMAIL));
        assert!(backend.current_identity().is_none());
        assert_eq!(CallCounts::get(&backend.calls.update_display_name), 0);

        panel.sign_in("al@example.com", "secret1").await.unwrap();
        assert_eq!(panel.message().as_deref(), Some(SIGNED_IN));
        let current = backend.current_identity().unwrap();
        assert_eq!(current.display_name.as_deref(), Some("Al"));

        // Applied once only.
        panel.sign_out().await;
        panel.sign_in("al@example.com", "secret1").await.unwrap();
        assert_eq!(CallCounts::get(&backend.calls.update_display_name), 1);
    }

    #[tokio::test]
    async fn pending_name_survives_a_failed_update() {
        let backend = Arc::new(MemoryBackend::new().with_email_confirmation());
        let panel = AuthPanel::new(backend.clone());
        panel.sign_up("al@example.com", "secret1", "Al").await.unwrap();

        backend.fail_next(Operation::UpdateDisplayName, "profile service down");
        panel.sign_in("al@example.com", "secret1").await.unwrap();
        assert_eq!(backend.current_identity().unwrap().display_name, None);

        panel.sign_out().await;
        panel.sign_in("al@example.com", "secret1").await.unwrap();
        assert_eq!(backend.current_identity().unwrap().display_name.as_deref(), Some("Al"));
    }

    #[tokio::test]
    async fn sign_in_reports_success_and_panel_stays_usable() {
        let (backend, panel) = panel();
        backend.sign_up("al@example.com", "secret1").await.unwrap();
        backend.sign_out().await;

        backend.fail_next(Operation::SignIn, "network unreachable");
        assert!(panel.sign_in("al@example.com", "secret1").await.is_err());

        panel.sign_in("al@example.com", "secret1").await.unwrap();
        assert_eq!(panel.message().as_deref(), Some(SIGNED_IN));
        assert!(backend.current_identity().is_some());

        panel.sign_out().await;
        assert!(backend.current_identity().is_none());
        assert_eq!(panel.message(), None);
    }

    #[tokio::test]
    async fn overlapping_submission_is_rejected() {
        let (backend, panel) = panel();
        let held = panel.slot.try_lock().unwrap();

        let err = panel.sign_in("al@example.com", "secret1").await.unwrap_err();
        assert_eq!(err, ActionError::Validation(ValidationFailure::RequestInProgress));
        assert_eq!(CallCounts::get(&backend.calls.sign_in), 0);
        drop(held);
    }
}
