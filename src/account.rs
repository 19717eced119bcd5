//! Opaque account identity used as the key for all per-user state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier for a user account.
///
/// The orchestration core never interprets the contents; directory lookups and
/// account validation belong to the credential backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::AccountId;

    #[test]
    fn account_id_round_trips() {
        let account = AccountId::new("user@example.com");
        assert_eq!(account.as_str(), "user@example.com");
        assert_eq!(account.to_string(), "user@example.com");
        assert_eq!(AccountId::from("user@example.com"), account);
    }
}
