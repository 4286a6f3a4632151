//! Process-wide credential side channel.
//!
//! Clients push credentials over the connection; code executed afterwards
//! reads them through `getenv`. Values set here shadow the process
//! environment without mutating it.

use std::{collections::HashMap, sync::RwLock};

/// Credential overlay on top of the process environment.
#[derive(Debug, Default)]
pub struct CredentialStore {
    values: RwLock<HashMap<String, String>>,
}

impl CredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a credential, replacing any previous value.
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        tracing::debug!(%name, "credential updated");
        match self.values.write() {
            Ok(mut values) => {
                values.insert(name, value.into());
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(name, value.into());
            }
        }
    }

    /// Look up a credential, falling back to the process environment.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        let stored = match self.values.read() {
            Ok(values) => values.get(name).cloned(),
            Err(poisoned) => poisoned.into_inner().get(name).cloned(),
        };
        stored.or_else(|| std::env::var(name).ok())
    }

    /// Whether a non-empty value is available for `name`.
    #[must_use]
    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_shadows_and_replaces() {
        let store = CredentialStore::new();
        assert!(!store.is_set("CELLRUN_TEST_CREDENTIAL_UNSET"));
        store.set("CELLRUN_TEST_CREDENTIAL_UNSET", "one");
        store.set("CELLRUN_TEST_CREDENTIAL_UNSET", "two");
        assert_eq!(
            store.get("CELLRUN_TEST_CREDENTIAL_UNSET").as_deref(),
            Some("two")
        );
    }

    #[test]
    fn test_empty_value_is_not_set() {
        let store = CredentialStore::new();
        store.set("CELLRUN_TEST_EMPTY", "");
        assert!(!store.is_set("CELLRUN_TEST_EMPTY"));
        assert_eq!(store.get("CELLRUN_TEST_EMPTY").as_deref(), Some(""));
    }
}
