use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Backend credentials for a single principal.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

/// Indicates that no credentials are configured for a principal.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("no user credentials provided for username {0:?}")]
pub struct CredentialNotFound(pub String);

/// Looks up the credentials to use for a principal named by a policy reference.
pub trait CredentialResolver: Send + Sync {
    fn select_credential(&self, principal: &str) -> Result<Credential, CredentialNotFound>;
}

/// A static set of credentials, as loaded from the credentials file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub users: Vec<Credential>,
}

// === impl Credential ===

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// === impl Credentials ===

impl CredentialResolver for Credentials {
    fn select_credential(&self, principal: &str) -> Result<Credential, CredentialNotFound> {
        self.users
            .iter()
            .find(|user| user.username == principal)
            .cloned()
            .ok_or_else(|| CredentialNotFound(principal.to_string()))
    }
}

impl FromIterator<Credential> for Credentials {
    fn from_iter<T: IntoIterator<Item = Credential>>(iter: T) -> Self {
        Self {
            users: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_by_username() {
        let creds = [Credential::new("admin", "a"), Credential::new("dev", "d")]
            .into_iter()
            .collect::<Credentials>();
        assert_eq!(creds.select_credential("dev"), Ok(Credential::new("dev", "d")));
        assert_eq!(
            creds.select_credential("ops"),
            Err(CredentialNotFound("ops".to_string()))
        );
    }

    #[test]
    fn debug_redacts_password() {
        let dbg = format!("{:?}", Credential::new("admin", "hunter2"));
        assert!(dbg.contains("admin"));
        assert!(!dbg.contains("hunter2"));
    }
}
