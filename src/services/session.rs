use std::sync::Arc;

use futures::StreamExt;
use log::{debug, info};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::models::identity::Identity;
use crate::services::backend::IdentityProvider;

/// Who is signed in, and whether the provider has answered yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub identity: Option<Identity>,
    pub resolving: bool,
}

impl SessionSnapshot {
    pub fn resolving() -> Self {
        Self {
            identity: None,
            resolving: true,
        }
    }

    /// Applies one provider notification. An unreachable provider and an
    /// explicit "no session" both arrive here as `None`.
    pub fn apply(&mut self, identity: Option<Identity>) {
        self.identity = identity;
        self.resolving = false;
    }
}

/// Session state fed by the identity provider's change notifications.
/// The listener lives as long as this value.
pub struct SessionState {
    snapshot: watch::Receiver<SessionSnapshot>,
    listener: JoinHandle<()>,
}

impl SessionState {
    pub fn start(identity: Arc<dyn IdentityProvider>) -> Self {
        let (tx, rx) = watch::channel(SessionSnapshot::resolving());
        let mut changes = identity.on_change();

        let listener = tokio::spawn(async move {
            while let Some(next) = changes.next().await {
                match &next {
                    Some(identity) => info!("Session now belongs to {}", identity.id),
                    None => info!("No active session"),
                }
                tx.send_modify(|snapshot| snapshot.apply(next));
            }
            debug!("Identity notifications ended");
        });

        Self {
            snapshot: rx,
            listener,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.snapshot.borrow().identity.clone()
    }

    pub fn is_resolving(&self) -> bool {
        self.snapshot.borrow().resolving
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Waits until the provider has delivered its first notification.
    pub async fn resolved(&self) -> SessionSnapshot {
        let mut rx = self.snapshot.clone();
        let outcome = rx.wait_for(|s| !s.resolving).await.map(|s| s.clone());
        outcome.unwrap_or_else(|_| self.snapshot())
    }
}

impl Drop for SessionState {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::MemoryBackend;

    #[test]
    fn first_notification_resolves() {
        let mut s = SessionSnapshot::resolving();
        s.apply(None);
        assert!(!s.resolving);
        assert!(s.identity.is_none());

        s.apply(Some(Identity::new("u1", "al@example.com")));
        assert_eq!(s.identity.as_ref().map(|i| i.id.as_str()), Some("u1"));
    }

    #[tokio::test]
    async fn follows_sign_in_and_sign_out() {
        let backend = Arc::new(MemoryBackend::new());
        let session = SessionState::start(backend.clone());

        let first = session.resolved().await;
        assert!(first.identity.is_none());

        backend.sign_up("al@example.com", "secret1").await.unwrap();
        let mut rx = session.watch();
        rx.wait_for(|s| s.identity.is_some()).await.unwrap();
        assert_eq!(session.current_identity().unwrap().email, "al@example.com");

        backend.sign_out().await;
        rx.wait_for(|s| s.identity.is_none()).await.unwrap();
        assert!(!session.is_resolving());
    }

    #[tokio::test]
    async fn dropping_releases_the_listener() {
        let backend = Arc::new(MemoryBackend::new());
        let session = SessionState::start(backend.clone());
        session.resolved().await;
        assert_eq!(backend.identity_subscriber_count(), 1);

        drop(session);
        for _ in 0..100 {
            if backend.identity_subscriber_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(backend.identity_subscriber_count(), 0);
    }
}
