//! Registry credentials and the credential callback.

use std::fmt;

/// Username/password pair for registry authentication.
///
/// An empty username means anonymous access: no `Authorization` header is
/// sent to the token endpoint.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Anonymous access (no credentials).
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read `WHARF_USERNAME` and `WHARF_PASSWORD`, falling back to anonymous.
    pub fn from_env() -> Self {
        match (
            std::env::var("WHARF_USERNAME"),
            std::env::var("WHARF_PASSWORD"),
        ) {
            (Ok(username), Ok(password)) => Self { username, password },
            _ => Self::anonymous(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Callback producing credentials for a blob URL.
///
/// Invoked on every token cache miss with the blob URL as a hint, and on
/// uploader construction. Owned by the filesystem; there is no global
/// registry of providers.
pub type CredentialProvider = Box<dyn Fn(&str) -> Credentials + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous() {
        let creds = Credentials::anonymous();
        assert!(creds.is_anonymous());
        assert!(creds.password.is_empty());
    }

    #[test]
    fn test_basic() {
        let creds = Credentials::basic("u", "p");
        assert!(!creds.is_anonymous());
        assert_eq!(creds.username, "u");
        assert_eq!(creds.password, "p");
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::basic("u", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("u"));
        assert!(!rendered.contains("hunter2"));
    }
}
