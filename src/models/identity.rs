use serde::{Deserialize, Serialize};

/// Author name used whenever an identity carries no usable display name.
pub const ANONYMOUS: &str = "anonymous";

/// Authenticated user as reported by the identity provider.
/// The client only ever holds a read-only copy; the provider owns the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Name stamped on posts written by this identity.
    pub fn author_name(&self) -> &str {
        display_name_or_anonymous(self.display_name.as_deref())
    }
}

/// Blank names count as missing.
pub fn display_name_or_anonymous(name: Option<&str>) -> &str {
    name.filter(|n| !n.trim().is_empty()).unwrap_or(ANONYMOUS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_name_falls_back_to_anonymous() {
        let plain = Identity::new("u1", "al@example.com");
        assert_eq!(plain.author_name(), ANONYMOUS);

        let blank = Identity::new("u1", "al@example.com").with_display_name("   ");
        assert_eq!(blank.author_name(), ANONYMOUS);

        let named = Identity::new("u1", "al@example.com").with_display_name("Al");
        assert_eq!(named.author_name(), "Al");
    }
}
