//! Username to password-digest mapping loaded once at startup.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use crate::password::{dummy_verify, verify_password, DigestError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read user file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse user map: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("user map must be a JSON object")]
    NotAnObject,
    #[error("user map contains an empty username")]
    EmptyUsername,
    #[error("digest for user {0} is not a string")]
    InvalidDigest(String),
}

/// Result of checking a username/password pair.
///
/// Only `Authenticated` grants access; the other variants exist so the
/// service can log and count failures without exposing the cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
    UnknownUser,
    WrongPassword,
    MalformedDigest,
}

impl AuthOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthOutcome::Authenticated => "authenticated",
            AuthOutcome::UnknownUser => "unknown_user",
            AuthOutcome::WrongPassword => "wrong_password",
            AuthOutcome::MalformedDigest => "malformed_digest",
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthOutcome::Authenticated)
    }
}

/// Read-only credential map.
#[derive(Clone, Default)]
pub struct CredentialStore {
    records: HashMap<String, String>,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut users: Vec<&str> = self.records.keys().map(String::as_str).collect();
        users.sort_unstable();
        f.debug_struct("CredentialStore")
            .field("users", &users)
            .finish()
    }
}

impl CredentialStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a JSON object of `username -> digest`.
    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        let value: Value = serde_json::from_str(raw)?;
        let Value::Object(map) = value else {
            return Err(StoreError::NotAnObject);
        };

        let mut records = HashMap::with_capacity(map.len());
        for (username, digest) in map {
            if username.is_empty() {
                return Err(StoreError::EmptyUsername);
            }
            let Value::String(digest) = digest else {
                return Err(StoreError::InvalidDigest(username));
            };
            records.insert(username, digest);
        }

        Ok(Self { records })
    }

    pub fn from_file(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Build the store from an optional JSON value, falling back to zero users.
    ///
    /// A missing or unparseable value is a configuration problem, not a
    /// reason to stop the service.
    pub fn from_json_or_empty(raw: Option<&str>, source: &str) -> Self {
        let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
            tracing::warn!(source, "no user map configured; all logins will be rejected");
            return Self::empty();
        };

        match Self::from_json(raw) {
            Ok(store) => {
                tracing::info!(source, users = store.len(), "loaded user map");
                store
            }
            Err(error) => {
                tracing::error!(source, %error, "invalid user map; continuing with zero users");
                Self::empty()
            }
        }
    }

    /// Load from an environment variable, then a file, then give up with an
    /// empty store.
    pub fn load(env_var: &str, file: Option<&Path>) -> Self {
        if let Ok(raw) = std::env::var(env_var) {
            return Self::from_json_or_empty(Some(&raw), env_var);
        }

        match file {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(raw) => Self::from_json_or_empty(Some(&raw), &path.display().to_string()),
                Err(error) => {
                    tracing::error!(
                        path = %path.display(),
                        %error,
                        "failed to read user file; continuing with zero users"
                    );
                    Self::empty()
                }
            },
            None => Self::from_json_or_empty(None, env_var),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, username: &str) -> bool {
        self.records.contains_key(username)
    }

    /// Check credentials and report why they failed.
    pub fn check(&self, username: &str, plaintext: &str) -> AuthOutcome {
        let Some(digest) = self.records.get(username) else {
            dummy_verify(plaintext);
            return AuthOutcome::UnknownUser;
        };

        match verify_password(plaintext, digest) {
            Ok(true) => AuthOutcome::Authenticated,
            Ok(false) => AuthOutcome::WrongPassword,
            Err(DigestError::Malformed) => {
                tracing::warn!(username, "stored password digest is malformed");
                AuthOutcome::MalformedDigest
            }
        }
    }

    pub fn authenticate(&self, username: &str, plaintext: &str) -> bool {
        self.check(username, plaintext).is_authenticated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::hash_password;

    fn store_with(entries: &[(&str, &str)]) -> CredentialStore {
        let map: serde_json::Map<String, Value> = entries
            .iter()
            .map(|(user, digest)| (user.to_string(), Value::String(digest.to_string())))
            .collect();
        CredentialStore::from_json(&Value::Object(map).to_string()).expect("store")
    }

    #[test]
    fn authenticates_known_user() {
        let store = store_with(&[("alice", &hash_password("wonderland"))]);
        assert!(store.authenticate("alice", "wonderland"));
        assert!(!store.authenticate("alice", "wrong"));
    }

    #[test]
    fn usernames_are_case_sensitive() {
        let store = store_with(&[("alice", &hash_password("wonderland"))]);
        assert_eq!(store.check("Alice", "wonderland"), AuthOutcome::UnknownUser);
    }

    #[test]
    fn unknown_user_is_rejected() {
        let store = store_with(&[("alice", &hash_password("wonderland"))]);
        assert!(!store.authenticate("mallory", "wonderland"));
        assert_eq!(store.check("mallory", "x"), AuthOutcome::UnknownUser);
    }

    #[test]
    fn malformed_digest_fails_closed() {
        let store = store_with(&[("bob", "not-a-digest")]);
        assert!(!store.authenticate("bob", "anything"));
        assert_eq!(store.check("bob", "anything"), AuthOutcome::MalformedDigest);
    }

    #[test]
    fn rejects_non_object_maps() {
        assert!(matches!(
            CredentialStore::from_json("[1,2,3]"),
            Err(StoreError::NotAnObject)
        ));
        assert!(matches!(
            CredentialStore::from_json("{not json"),
            Err(StoreError::Parse(_))
        ));
        assert!(matches!(
            CredentialStore::from_json(r#"{"": "a$b"}"#),
            Err(StoreError::EmptyUsername)
        ));
        assert!(matches!(
            CredentialStore::from_json(r#"{"carol": 42}"#),
            Err(StoreError::InvalidDigest(user)) if user == "carol"
        ));
    }

    #[test]
    fn bad_configuration_means_zero_users() {
        assert!(CredentialStore::from_json_or_empty(None, "USERS").is_empty());
        assert!(CredentialStore::from_json_or_empty(Some("  "), "USERS").is_empty());
        assert!(CredentialStore::from_json_or_empty(Some("{oops"), "USERS").is_empty());

        let store = CredentialStore::from_json_or_empty(Some(r#"{"a":"s$h"}"#), "USERS");
        assert_eq!(store.len(), 1);
        assert!(store.contains("a"));
    }

    #[test]
    fn missing_file_means_zero_users() {
        let store = CredentialStore::load(
            "COMMON_AUTH_TEST_USERS_UNSET",
            Some(Path::new("/nonexistent/users.json")),
        );
        assert!(store.is_empty());
    }

    #[test]
    fn debug_output_hides_digests() {
        let store = store_with(&[("alice", "salt$hash")]);
        let rendered = format!("{store:?}");
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("salt$hash"));
    }
}
