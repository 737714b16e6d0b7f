//! Collaborators the convergence engine talks to.
//!
//! `AgentClient` is the seam to the monitored agent: read-only queries return
//! structured errors, mutating calls return the agent's error text. The
//! production client (`velociraptor::CliAgent`) drives the `velociraptor`
//! binary through a `CommandRunner`; `mock::MockAgent` keeps state in memory.
//! `CredentialStore` covers the on-disk side of api users.

pub mod credentials;
pub mod mock;
pub mod runner;
pub mod velociraptor;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::AgentError;
use crate::types::artifact::{ArtifactSnapshot, ArtifactSpec, Scope};
use crate::types::user::UserPresence;

/// Operations the engine needs from the monitored agent.
pub trait AgentClient {
    /// Current monitoring table of a scope.
    fn query_artifacts(&self, scope: Scope) -> Result<ArtifactSnapshot, AgentError>;

    /// Install an artifact with its parameters into a scope.
    fn add_artifact(&mut self, scope: Scope, name: &str, spec: &ArtifactSpec) -> Result<(), String>;

    /// Remove an artifact from a scope.
    fn remove_artifact(&mut self, scope: Scope, name: &str) -> Result<(), String>;

    /// Whether a user exists. "Not found" is a value, not an error.
    fn show_user(&self, name: &str) -> Result<UserPresence, AgentError>;

    /// Issue a credential bundle for a new api user, written to `bundle`.
    fn create_credential_user(&mut self, name: &str, role: &str, bundle: &Path) -> Result<PathBuf, String>;

    /// Create a password-authenticated user.
    fn create_password_user(&mut self, name: &str, role: &str, password: &str) -> Result<(), String>;

    /// Raw grant document as the agent prints it.
    fn show_grants(&self, name: &str) -> Result<String, AgentError>;

    /// Replace the user's grant set.
    fn set_grants(&mut self, name: &str, grants: &BTreeSet<String>) -> Result<(), String>;
}

/// On-disk credential bundles of api users.
pub trait CredentialStore {
    /// Where the bundle for `username` lives.
    fn bundle_path(&self, username: &str) -> PathBuf;

    fn bundle_exists(&self, username: &str) -> bool;

    /// Delete leftover bundle files for `username`. Returns the removed paths.
    fn remove_stale(&mut self, username: &str) -> Result<Vec<PathBuf>, String>;

    /// Hand the given files over to the configured owner and group.
    fn fix_ownership(&mut self, paths: &[PathBuf]) -> Result<(), String>;
}
