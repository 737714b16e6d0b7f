//! In-memory agent and credential store for testing.
//!
//! `MockAgent` keeps both monitoring tables and the user/ACL database in
//! memory, records every call in a shared log, and fails any call whose key
//! was registered with `fail_on`. `MockCredentials` models the bundle
//! directory. Sharing one log between the two makes cross-collaborator
//! ordering observable.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::{AgentClient, CredentialStore};
use crate::error::AgentError;
use crate::infrastructure::credentials::bundle_file_name;
use crate::types::artifact::{ArtifactSnapshot, ArtifactSpec, EnvParam, Scope};
use crate::types::user::UserPresence;

/// Ordered record of calls, shared between mocks.
pub type CallLog = Rc<RefCell<Vec<String>>>;

type BundleFiles = Rc<RefCell<BTreeSet<PathBuf>>>;

const MUTATING_PREFIXES: [&str; 5] = [
    "add:",
    "remove:",
    "create_credential_user:",
    "create_password_user:",
    "set_grants:",
];


// ---------------------------------------------------------------------------
// MockAgent
// ---------------------------------------------------------------------------

/// A user as the mock agent stores it. `grants: None` means the agent
/// answers `acl show` with the bare role marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockUser {
    pub role: String,
    pub grants: Option<BTreeSet<String>>,
}

pub struct MockAgent {
    pub server: ArtifactSnapshot,
    pub client: ArtifactSnapshot,
    pub users: BTreeMap<String, MockUser>,
    /// Raw `acl show` documents that override the rendered grants.
    pub raw_grants: BTreeMap<String, String>,
    /// Every grant set written with `set_grants`, in order.
    pub grant_history: Vec<(String, BTreeSet<String>)>,
    failures: BTreeSet<String>,
    log: CallLog,
    bundle_files: Option<BundleFiles>,
}

impl MockAgent {
    pub fn new() -> Self {
        MockAgent {
            server: ArtifactSnapshot::default(),
            client: ArtifactSnapshot::default(),
            users: BTreeMap::new(),
            raw_grants: BTreeMap::new(),
            grant_history: Vec::new(),
            failures: BTreeSet::new(),
            log: Rc::new(RefCell::new(Vec::new())),
            bundle_files: None,
        }
    }

    /// Share the call log and bundle directory of a `MockCredentials`, so that
    /// issuing a credential user writes its bundle there.
    pub fn sharing_with(mut self, creds: &MockCredentials) -> Self {
        self.log = creds.log.clone();
        self.bundle_files = Some(creds.files.clone());
        self
    }

    /// Seed an artifact into a scope's table, stored as the agent would.
    pub fn with_artifact(mut self, scope: Scope, name: &str, spec: &ArtifactSpec) -> Self {
        self.table_mut(scope).insert(name, spec.to_env());
        self
    }

    /// Seed an artifact with raw agent-side parameters.
    pub fn with_raw_artifact(mut self, scope: Scope, name: &str, env: &[(&str, &str)]) -> Self {
        let env = env
            .iter()
            .map(|(k, v)| EnvParam { key: k.to_string(), value: v.to_string() })
            .collect();
        self.table_mut(scope).insert(name, env);
        self
    }

    /// Seed a user that holds only its role (no explicit grants).
    pub fn with_user(mut self, name: &str, role: &str) -> Self {
        self.users.insert(
            name.to_string(),
            MockUser { role: role.to_string(), grants: None },
        );
        self
    }

    pub fn with_user_grants(mut self, name: &str, role: &str, grants: &[&str]) -> Self {
        self.users.insert(
            name.to_string(),
            MockUser {
                role: role.to_string(),
                grants: Some(grants.iter().map(|s| s.to_string()).collect()),
            },
        );
        self
    }

    /// Make the call with this key fail, e.g. `"remove:server:C"`.
    pub fn fail_on(&mut self, key: &str) {
        self.failures.insert(key.to_string());
    }

    pub fn table(&self, scope: Scope) -> &ArtifactSnapshot {
        match scope {
            Scope::Server => &self.server,
            Scope::Client => &self.client,
        }
    }

    fn table_mut(&mut self, scope: Scope) -> &mut ArtifactSnapshot {
        match scope {
            Scope::Server => &mut self.server,
            Scope::Client => &mut self.client,
        }
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// All recorded calls, in order.
    pub fn calls(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    /// Recorded calls that would change agent state.
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| MUTATING_PREFIXES.iter().any(|p| c.starts_with(p)))
            .collect()
    }

    fn record(&self, key: String) -> Result<(), String> {
        let failed = self.failures.contains(&key);
        self.log.borrow_mut().push(key.clone());
        if failed {
            Err(format!("mock: injected failure for {}", key))
        } else {
            Ok(())
        }
    }
}

impl Default for MockAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentClient for MockAgent {
    fn query_artifacts(&self, scope: Scope) -> Result<ArtifactSnapshot, AgentError> {
        self.record(format!("query:{}", scope)).map_err(AgentError::Query)?;
        Ok(self.table(scope).clone())
    }

    fn add_artifact(&mut self, scope: Scope, name: &str, spec: &ArtifactSpec) -> Result<(), String> {
        self.record(format!("add:{}:{}", scope, name))?;
        self.table_mut(scope).insert(name, spec.to_env());
        Ok(())
    }

    fn remove_artifact(&mut self, scope: Scope, name: &str) -> Result<(), String> {
        self.record(format!("remove:{}:{}", scope, name))?;
        if !self.table_mut(scope).remove(name) {
            return Err(format!("mock: artifact {} not in {} table", name, scope));
        }
        Ok(())
    }

    fn show_user(&self, name: &str) -> Result<UserPresence, AgentError> {
        self.record(format!("show_user:{}", name)).map_err(AgentError::Query)?;
        if self.users.contains_key(name) {
            Ok(UserPresence::Exists)
        } else {
            Ok(UserPresence::NotFound)
        }
    }

    fn create_credential_user(&mut self, name: &str, role: &str, bundle: &Path) -> Result<PathBuf, String> {
        self.record(format!("create_credential_user:{}", name))?;
        self.users.insert(
            name.to_string(),
            MockUser { role: role.to_string(), grants: None },
        );
        if let Some(files) = &self.bundle_files {
            files.borrow_mut().insert(bundle.to_path_buf());
        }
        Ok(bundle.to_path_buf())
    }

    fn create_password_user(&mut self, name: &str, role: &str, _password: &str) -> Result<(), String> {
        self.record(format!("create_password_user:{}", name))?;
        self.users.insert(
            name.to_string(),
            MockUser { role: role.to_string(), grants: None },
        );
        Ok(())
    }

    fn show_grants(&self, name: &str) -> Result<String, AgentError> {
        self.record(format!("show_grants:{}", name)).map_err(AgentError::Query)?;
        if let Some(raw) = self.raw_grants.get(name) {
            return Ok(raw.clone());
        }
        let user = self
            .users
            .get(name)
            .ok_or_else(|| AgentError::Query("User not found".into()))?;
        let doc = match &user.grants {
            Some(grants) if !grants.is_empty() => {
                let map: serde_json::Map<String, serde_json::Value> = grants
                    .iter()
                    .map(|g| (g.clone(), serde_json::Value::Bool(true)))
                    .collect();
                serde_json::Value::Object(map)
            }
            _ => serde_json::json!({ "roles": [user.role] }),
        };
        Ok(doc.to_string())
    }

    fn set_grants(&mut self, name: &str, grants: &BTreeSet<String>) -> Result<(), String> {
        self.record(format!("set_grants:{}", name))?;
        let user = self
            .users
            .get_mut(name)
            .ok_or_else(|| format!("mock: no user {}", name))?;
        user.grants = Some(grants.clone());
        self.grant_history.push((name.to_string(), grants.clone()));
        Ok(())
    }
}


// ---------------------------------------------------------------------------
// MockCredentials
// ---------------------------------------------------------------------------

pub struct MockCredentials {
    pub bundle_dir: PathBuf,
    /// Paths handed to `fix_ownership`, in order.
    pub owned: Vec<PathBuf>,
    pub fail_cleanup: bool,
    pub fail_chown: bool,
    files: BundleFiles,
    log: CallLog,
}

impl MockCredentials {
    pub fn new(bundle_dir: &str) -> Self {
        MockCredentials {
            bundle_dir: PathBuf::from(bundle_dir),
            owned: Vec::new(),
            fail_cleanup: false,
            fail_chown: false,
            files: Rc::new(RefCell::new(BTreeSet::new())),
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Pretend a bundle for `username` is already on disk.
    pub fn with_bundle(self, username: &str) -> Self {
        let path = self.bundle_path(username);
        self.files.borrow_mut().insert(path);
        self
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }
}

impl CredentialStore for MockCredentials {
    fn bundle_path(&self, username: &str) -> PathBuf {
        self.bundle_dir.join(bundle_file_name(username))
    }

    fn bundle_exists(&self, username: &str) -> bool {
        self.files.borrow().contains(&self.bundle_path(username))
    }

    fn remove_stale(&mut self, username: &str) -> Result<Vec<PathBuf>, String> {
        self.log.borrow_mut().push(format!("remove_stale:{}", username));
        if self.fail_cleanup {
            return Err("mock: cleanup failed".into());
        }
        let path = self.bundle_path(username);
        if self.files.borrow_mut().remove(&path) {
            Ok(vec![path])
        } else {
            Ok(Vec::new())
        }
    }

    fn fix_ownership(&mut self, paths: &[PathBuf]) -> Result<(), String> {
        for path in paths {
            self.log.borrow_mut().push(format!("chown:{}", path.display()));
        }
        if self.fail_chown {
            return Err("mock: chown failed".into());
        }
        self.owned.extend(paths.iter().cloned());
        Ok(())
    }
}
