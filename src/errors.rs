use thiserror::Error;

/// Failure reported by the backend. The display text is the provider's own
/// description, forwarded verbatim to the panels.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The backend understood the request and refused it.
    #[error("{0}")]
    Rejected(String),
    /// The request never got a usable answer.
    #[error("{0}")]
    Transport(String),
    /// The answer could not be interpreted.
    #[error("{0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        BackendError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        BackendError::InvalidResponse(format!("invalid json: {}", e))
    }
}

/// Local precondition failures. These never reach the backend.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("password must be at least 6 characters")]
    PasswordTooShort,
    #[error("please select a file")]
    NoFileSelected,
    #[error("not signed in")]
    NotSignedIn,
    #[error("request already in progress")]
    RequestInProgress,
    #[error("upload already in progress")]
    UploadInProgress,
}

/// Outcome of a failed panel action. The display text is exactly the message
/// the panel shows.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("{0}")]
    Validation(#[from] ValidationFailure),
    #[error("sign-in failed: {0}")]
    SignIn(BackendError),
    #[error("sign-up failed: {0}")]
    SignUp(BackendError),
    #[error("upload failed: {0}")]
    Upload(BackendError),
    /// The blob was written but its post document was not; the blob stays.
    #[error("upload failed: {source}")]
    OrphanedBlob { key: String, source: BackendError },
}

impl ActionError {
    pub fn is_validation(&self) -> bool {
        matches!(self, ActionError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_forward_backend_text() {
        let err = ActionError::SignIn(BackendError::Rejected("Invalid login credentials".into()));
        assert_eq!(err.to_string(), "sign-in failed: Invalid login credentials");

        let orphan = ActionError::OrphanedBlob {
            key: "images/1_cat.png".into(),
            source: BackendError::Transport("connection reset".into()),
        };
        assert_eq!(orphan.to_string(), "upload failed: connection reset");
        assert!(!orphan.is_validation());
    }

    #[test]
    fn validation_messages_are_fixed() {
        let err: ActionError = ValidationFailure::PasswordTooShort.into();
        assert_eq!(err.to_string(), "password must be at least 6 characters");
        assert!(err.is_validation());
        assert_eq!(ValidationFailure::NoFileSelected.to_string(), "please select a file");
        assert_eq!(ValidationFailure::NotSignedIn.to_string(), "not signed in");
    }
}
