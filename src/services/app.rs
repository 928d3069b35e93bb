use std::sync::Arc;

use log::{error, info};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::errors::ActionError;
use crate::services::auth_panel::AuthPanel;
use crate::services::backend::Backend;
use crate::services::feed::Feed;
use crate::services::session::{SessionSnapshot, SessionState};
use crate::services::upload_panel::UploadPanel;

/// Which panels are on screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum Screen {
    /// The provider has not answered yet.
    Loading,
    /// Auth panel only.
    SignedOut,
    /// Upload panel and feed.
    SignedIn { email: String },
}

impl From<&SessionSnapshot> for Screen {
    fn from(session: &SessionSnapshot) -> Self {
        match (&session.identity, session.resolving) {
            (_, true) => Screen::Loading,
            (None, false) => Screen::SignedOut,
            (Some(identity), false) => Screen::SignedIn {
                email: identity.email.clone(),
            },
        }
    }
}

pub struct PhotoShareApp {
    session: SessionState,
    auth: AuthPanel,
    upload: UploadPanel,
    feed: Arc<Feed>,
    router: JoinHandle<()>,
}

impl PhotoShareApp {
    /// Starts the identity listener and the task that mounts the feed while
    /// someone is signed in. Must be called inside a tokio runtime.
    pub fn start(backend: Backend) -> Self {
        let session = SessionState::start(Arc::clone(&backend.identity));
        let feed = Arc::new(Feed::new(Arc::clone(&backend.documents)));
        let router = tokio::spawn(route_session(session.watch(), Arc::clone(&feed)));

        Self {
            session,
            auth: AuthPanel::new(Arc::clone(&backend.identity)),
            upload: UploadPanel::new(backend),
            feed,
            router,
        }
    }

    pub fn screen(&self) -> Screen {
        Screen::from(&self.session.snapshot())
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn auth(&self) -> &AuthPanel {
        &self.auth
    }

    pub fn upload(&self) -> &UploadPanel {
        &self.upload
    }

    pub fn feed(&self) -> &Feed {
        &self.feed
    }

    /// Submits the upload panel as whoever the session currently holds.
    pub async fn submit_upload(&self) -> Result<(), ActionError> {
        self.submit_upload_captioned(None).await
    }

    /// Submits with `caption` replacing the form's caption, if given.
    pub async fn submit_upload_captioned(&self, caption: Option<String>) -> Result<(), ActionError> {
        let identity = self.session.current_identity();
        self.upload.submit_captioned(identity.as_ref(), caption).await
    }

    pub async fn sign_out(&self) {
        self.auth.sign_out().await;
    }
}

impl Drop for PhotoShareApp {
    fn drop(&mut self) {
        self.router.abort();
    }
}

/// Mounts the feed on sign-in and unmounts it on sign-out.
async fn route_session(mut session: watch::Receiver<SessionSnapshot>, feed: Arc<Feed>) {
    loop {
        let signed_in = session.borrow_and_update().identity.is_some();
        if signed_in {
            if let Err(e) = feed.mount().await {
                error!("Feed subscription failed: {}", e);
            }
        } else {
            feed.unmount().await;
        }

        if session.changed().await.is_err() {
            info!("Session closed, tearing down feed");
            feed.unmount().await;
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::identity::Identity;

    #[test]
    fn screen_follows_session() {
        let mut session = SessionSnapshot::resolving();
        assert_eq!(Screen::from(&session), Screen::Loading);

        session.apply(None);
        assert_eq!(Screen::from(&session), Screen::SignedOut);

        session.apply(Some(Identity::new("u1", "al@example.com")));
        assert_eq!(
            Screen::from(&session),
            Screen::SignedIn {
                email: "al@example.com".into()
            }
        );
    }
}
