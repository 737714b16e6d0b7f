//! The desired-state document and the agent endpoint it points at.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::artifact::{DesiredArtifacts, Scope};
use super::user::{UserSpec, UsersConfig};
use crate::error::StateError;


// ---------------------------------------------------------------------------
// AgentEndpoint
// ---------------------------------------------------------------------------

/// How to reach the agent for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentEndpoint {
    /// Path or name of the `velociraptor` binary.
    pub binary: PathBuf,
    /// Server config, used for user and ACL administration.
    pub server_config: PathBuf,
    /// API client config, used for VQL queries against the running server.
    pub api_config: PathBuf,
}

impl Default for AgentEndpoint {
    fn default() -> Self {
        AgentEndpoint {
            binary: PathBuf::from("velociraptor"),
            server_config: PathBuf::from("/etc/velociraptor/server.config"),
            api_config: PathBuf::from("/etc/velociraptor/api.config.yaml"),
        }
    }
}


// ---------------------------------------------------------------------------
// DesiredState
// ---------------------------------------------------------------------------

/// Everything a run converges towards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DesiredState {
    #[serde(default)]
    pub agent: AgentEndpoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<DesiredArtifacts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<DesiredArtifacts>,
    #[serde(default)]
    pub users: BTreeMap<String, UserSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users_config: Option<UsersConfig>,
}

impl DesiredState {
    pub fn from_yaml_str(content: &str) -> Result<Self, StateError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, StateError> {
        let content = std::fs::read_to_string(path).map_err(|source| StateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Desired artifacts of a scope, or `None` when the section is absent.
    /// An absent section leaves that scope untouched.
    pub fn artifacts(&self, scope: Scope) -> Option<&DesiredArtifacts> {
        match scope {
            Scope::Server => self.server.as_ref(),
            Scope::Client => self.client.as_ref(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::artifact::ParamValue;

    const DOC: &str = r#"
server:
  Server.Monitor.Shell:
    Level: 3
client:
  Generic.Client.Composite:
    Artifacts: [Linux.Events.SSHLogin, Linux.Events.ProcessExecutions]
users:
  salt:
    role: api
    grants: [collect_client]
users_config:
  bundle_dir: /etc/velociraptor/api
  owner: salt
"#;

    #[test]
    fn parses_full_document() {
        let state = DesiredState::from_yaml_str(DOC).unwrap();
        assert_eq!(state.agent, AgentEndpoint::default());
        let server = state.artifacts(Scope::Server).unwrap();
        assert_eq!(
            server["Server.Monitor.Shell"].params["Level"],
            ParamValue::Scalar("3".into())
        );
        assert!(state.artifacts(Scope::Client).is_some());
        assert_eq!(state.users.len(), 1);
        assert_eq!(state.users_config.unwrap().owner, "salt");
    }

    #[test]
    fn missing_scope_section_is_none() {
        let state = DesiredState::from_yaml_str("users: {}\n").unwrap();
        assert!(state.artifacts(Scope::Server).is_none());
    }

    #[test]
    fn unknown_section_is_rejected() {
        assert!(DesiredState::from_yaml_str("servers: {}\n").is_err());
    }

    #[test]
    fn agent_endpoint_partial_override() {
        let state = DesiredState::from_yaml_str("agent:\n  binary: /opt/vr\n").unwrap();
        assert_eq!(state.agent.binary, PathBuf::from("/opt/vr"));
        assert_eq!(state.agent.server_config, AgentEndpoint::default().server_config);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = DesiredState::load(Path::new("/nonexistent/veloconf/state.yaml")).unwrap_err();
        assert!(matches!(err, StateError::Io { .. }));
    }
}
