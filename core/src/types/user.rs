//! Declared users and the settings for their credential bundles.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Role that authenticates with an issued credential bundle instead of a
/// password.
pub const CREDENTIAL_ROLE: &str = "api";

/// A declared agent user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSpec {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub grants: BTreeSet<String>,
}

impl UserSpec {
    pub fn uses_credential_bundle(&self) -> bool {
        self.role == CREDENTIAL_ROLE
    }
}

/// Filesystem settings shared by every declared user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsersConfig {
    /// Directory holding issued credential bundles, one per api user.
    pub bundle_dir: PathBuf,
    /// Account that must own freshly issued bundles.
    pub owner: String,
    /// Group that must own freshly issued bundles. Defaults to the owner.
    #[serde(default)]
    pub group: Option<String>,
}

impl UsersConfig {
    pub fn group(&self) -> &str {
        self.group.as_deref().unwrap_or(&self.owner)
    }
}

/// Result of asking the agent whether a user exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserPresence {
    Exists,
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_spec_from_yaml() {
        let spec: UserSpec =
            serde_yaml::from_str("role: api\ngrants: [collect_client, collect_server]\n").unwrap();
        assert!(spec.uses_credential_bundle());
        assert!(spec.password.is_none());
        assert_eq!(spec.grants.len(), 2);
    }

    #[test]
    fn group_defaults_to_owner() {
        let cfg: UsersConfig = serde_yaml::from_str("bundle_dir: /tmp/b\nowner: salt\n").unwrap();
        assert_eq!(cfg.group(), "salt");
    }
}
