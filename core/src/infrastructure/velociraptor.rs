//! `AgentClient` backed by the `velociraptor` command-line tool.
//!
//! Monitoring tables are read and changed with VQL through the API client
//! config; users and ACLs are administered through the server config. The
//! endpoint is passed in at construction and lives as long as the client.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::runner::{CommandRunner, RunError};
use super::AgentClient;
use crate::error::AgentError;
use crate::types::artifact::{ArtifactSnapshot, ArtifactSpec, Scope};
use crate::types::state::AgentEndpoint;
use crate::types::user::UserPresence;

/// Marker the agent prints on stderr when `user show` misses.
const USER_NOT_FOUND: &str = "User not found";

pub struct CliAgent<R: CommandRunner> {
    endpoint: AgentEndpoint,
    runner: R,
}

impl<R: CommandRunner> CliAgent<R> {
    pub fn new(endpoint: AgentEndpoint, runner: R) -> Self {
        CliAgent { endpoint, runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn server_command(&self, args: &[&str]) -> Vec<String> {
        let mut argv = vec![
            self.endpoint.binary.display().to_string(),
            "--config".to_string(),
            self.endpoint.server_config.display().to_string(),
        ];
        argv.extend(args.iter().map(|s| s.to_string()));
        argv
    }

    fn query(&self, vql: &str) -> Result<String, RunError> {
        let argv = vec![
            self.endpoint.binary.display().to_string(),
            "--api_config".to_string(),
            self.endpoint.api_config.display().to_string(),
            "query".to_string(),
            "--format".to_string(),
            "json".to_string(),
            vql.to_string(),
        ];
        self.runner.run(&argv)
    }
}

fn query_error(err: RunError) -> AgentError {
    match err {
        RunError::Spawn { .. } => AgentError::Unreachable(err.to_string()),
        RunError::Exit { stderr, .. } => AgentError::Query(stderr.trim().to_string()),
    }
}

fn mutation_error(err: RunError) -> String {
    err.to_string().trim().to_string()
}

/// Quote a VQL string literal. Triple quotes keep newlines verbatim.
pub fn vql_string(value: &str) -> Result<String, String> {
    if value.contains("'''") {
        return Err(format!("value cannot be quoted for VQL: {:?}", value));
    }
    Ok(format!("'''{}'''", value))
}

fn vql_key(key: &str) -> Result<String, String> {
    if key.contains('`') {
        return Err(format!("parameter name cannot be quoted for VQL: {:?}", key));
    }
    Ok(format!("`{}`", key))
}

/// Build the VQL statement that installs `name` with `spec` into `scope`.
pub fn add_statement(scope: Scope, name: &str, spec: &ArtifactSpec) -> Result<String, String> {
    let mut params = Vec::new();
    for env in spec.to_env() {
        params.push(format!("{}={}", vql_key(&env.key)?, vql_string(&env.value)?));
    }
    Ok(format!(
        "SELECT {}(artifact={}, parameters=dict({})) FROM scope()",
        scope.add_function(),
        vql_string(name)?,
        params.join(", ")
    ))
}

/// Build the VQL statement that removes `name` from `scope`.
pub fn remove_statement(scope: Scope, name: &str) -> Result<String, String> {
    Ok(format!(
        "SELECT {}(artifact={}) FROM scope()",
        scope.remove_function(),
        vql_string(name)?
    ))
}

/// Extract the monitoring table from `query --format json` output.
///
/// The client table nests its artifact list one level deeper than the server
/// table, next to the label events.
fn parse_monitoring_output(output: &str) -> Result<ArtifactSnapshot, AgentError> {
    let rows: Vec<serde_json::Value> = serde_json::from_str(output.trim())
        .map_err(|e| AgentError::Query(format!("malformed monitoring response: {}", e)))?;
    let state = rows
        .into_iter()
        .next()
        .and_then(|mut row| row.get_mut("State").map(serde_json::Value::take))
        .unwrap_or(serde_json::Value::Null);
    let table = match state {
        serde_json::Value::Null => serde_json::json!({}),
        serde_json::Value::Object(mut map) => match map.remove("artifacts") {
            Some(inner @ serde_json::Value::Object(_)) => inner,
            Some(list) => {
                map.insert("artifacts".to_string(), list);
                serde_json::Value::Object(map)
            }
            None => serde_json::Value::Object(map),
        },
        other => {
            return Err(AgentError::Query(format!(
                "unexpected monitoring state: {}",
                other
            )))
        }
    };
    ArtifactSnapshot::from_json(table)
        .map_err(|e| AgentError::Query(format!("malformed monitoring table: {}", e)))
}

impl<R: CommandRunner> AgentClient for CliAgent<R> {
    fn query_artifacts(&self, scope: Scope) -> Result<ArtifactSnapshot, AgentError> {
        let vql = format!("SELECT {}() AS State FROM scope()", scope.list_function());
        let output = self.query(&vql).map_err(query_error)?;
        parse_monitoring_output(&output)
    }

    fn add_artifact(&mut self, scope: Scope, name: &str, spec: &ArtifactSpec) -> Result<(), String> {
        let vql = add_statement(scope, name, spec)?;
        self.query(&vql).map(|_| ()).map_err(mutation_error)
    }

    fn remove_artifact(&mut self, scope: Scope, name: &str) -> Result<(), String> {
        let vql = remove_statement(scope, name)?;
        self.query(&vql).map(|_| ()).map_err(mutation_error)
    }

    fn show_user(&self, name: &str) -> Result<UserPresence, AgentError> {
        let argv = self.server_command(&["user", "show", name]);
        match self.runner.run(&argv) {
            Ok(_) => Ok(UserPresence::Exists),
            Err(RunError::Exit { ref stderr, .. }) if stderr.contains(USER_NOT_FOUND) => {
                debug!(user = %name, "user not found on agent");
                Ok(UserPresence::NotFound)
            }
            Err(e) => Err(query_error(e)),
        }
    }

    fn create_credential_user(&mut self, name: &str, role: &str, bundle: &Path) -> Result<PathBuf, String> {
        let bundle_arg = bundle.display().to_string();
        let argv = self.server_command(&[
            "config", "api_client", "--name", name, "--role", role, &bundle_arg,
        ]);
        self.runner.run(&argv).map_err(mutation_error)?;
        Ok(bundle.to_path_buf())
    }

    /// The password is passed on the command line, so it is visible to other
    /// local users in the process list while `user add` runs.
    fn create_password_user(&mut self, name: &str, role: &str, password: &str) -> Result<(), String> {
        let argv = self.server_command(&["user", "add", "--role", role, name, password]);
        self.runner.run(&argv).map(|_| ()).map_err(mutation_error)
    }

    fn show_grants(&self, name: &str) -> Result<String, AgentError> {
        let argv = self.server_command(&["acl", "show", name]);
        self.runner.run(&argv).map_err(query_error)
    }

    fn set_grants(&mut self, name: &str, grants: &BTreeSet<String>) -> Result<(), String> {
        let doc: serde_json::Map<String, serde_json::Value> = grants
            .iter()
            .map(|g| (g.clone(), serde_json::Value::Bool(true)))
            .collect();
        let doc = serde_json::Value::Object(doc).to_string();
        let argv = self.server_command(&["acl", "grant", name, &doc]);
        self.runner.run(&argv).map(|_| ()).map_err(mutation_error)
    }
}
