//! Artifact data model: scopes, parameter values, desired specs, and the
//! agent-reported monitoring snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Parameter key whose value is a list of artifact names (composite rule).
pub const ARTIFACTS_PARAM: &str = "Artifacts";

/// Header line the agent prepends when it stores the `Artifacts` list as CSV.
pub const ARTIFACTS_HEADER: &str = "Artifact";


// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Monitoring namespace an artifact belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Server,
    Client,
}

impl Scope {
    pub const ALL: [Scope; 2] = [Scope::Server, Scope::Client];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Server => "server",
            Scope::Client => "client",
        }
    }

    /// VQL function returning the current monitoring table for this scope.
    pub fn list_function(&self) -> &'static str {
        match self {
            Scope::Server => "get_server_monitoring",
            Scope::Client => "get_client_monitoring",
        }
    }

    /// VQL function that installs one artifact into this scope's table.
    pub fn add_function(&self) -> &'static str {
        match self {
            Scope::Server => "add_server_monitoring",
            Scope::Client => "add_client_monitoring",
        }
    }

    /// VQL function that removes one artifact from this scope's table.
    pub fn remove_function(&self) -> &'static str {
        match self {
            Scope::Server => "rm_server_monitoring",
            Scope::Client => "rm_client_monitoring",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}


// ---------------------------------------------------------------------------
// ParamValue
// ---------------------------------------------------------------------------

/// A desired parameter value: a scalar or an ordered list of strings.
///
/// YAML scalars of any type are string-cast on load, so `Level: 3` and
/// `Level: "3"` are the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, try_from = "serde_yaml::Value")]
pub enum ParamValue {
    Scalar(String),
    List(Vec<String>),
}

impl ParamValue {
    /// Render the value in the string form the agent stores for `key`.
    pub fn canonical(&self, key: &str) -> String {
        match self {
            ParamValue::Scalar(s) => s.clone(),
            ParamValue::List(items) if key == ARTIFACTS_PARAM => {
                let mut out = String::from(ARTIFACTS_HEADER);
                for item in items {
                    out.push('\n');
                    out.push_str(item);
                }
                out
            }
            ParamValue::List(items) => items.join("\n"),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Scalar(s.to_string())
    }
}

impl From<Vec<&str>> for ParamValue {
    fn from(items: Vec<&str>) -> Self {
        ParamValue::List(items.into_iter().map(String::from).collect())
    }
}

impl TryFrom<serde_yaml::Value> for ParamValue {
    type Error = String;

    fn try_from(value: serde_yaml::Value) -> Result<Self, Self::Error> {
        match value {
            serde_yaml::Value::Sequence(items) => items
                .into_iter()
                .map(scalar_to_string)
                .collect::<Result<Vec<_>, _>>()
                .map(ParamValue::List),
            other => scalar_to_string(other).map(ParamValue::Scalar),
        }
    }
}

fn scalar_to_string(value: serde_yaml::Value) -> Result<String, String> {
    match value {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Null => Ok(String::new()),
        other => Err(format!("unsupported parameter value: {:?}", other)),
    }
}


// ---------------------------------------------------------------------------
// ArtifactSpec
// ---------------------------------------------------------------------------

/// Desired parameters of one artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactSpec {
    pub params: BTreeMap<String, ParamValue>,
}

impl ArtifactSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style parameter insertion.
    pub fn with(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Parameters in the `key = value` form the agent reports back.
    pub fn to_env(&self) -> Vec<EnvParam> {
        self.params
            .iter()
            .map(|(key, value)| EnvParam {
                key: key.clone(),
                value: value.canonical(key),
            })
            .collect()
    }
}

/// Desired artifacts of one scope, keyed by artifact name.
pub type DesiredArtifacts = BTreeMap<String, ArtifactSpec>;


// ---------------------------------------------------------------------------
// ArtifactSnapshot
// ---------------------------------------------------------------------------

/// A single agent-reported parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvParam {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawParameters {
    #[serde(default)]
    env: Vec<EnvParam>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawSpec {
    artifact: String,
    #[serde(default)]
    parameters: Option<RawParameters>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawMonitoringTable {
    #[serde(default)]
    artifacts: Vec<String>,
    #[serde(default)]
    specs: Vec<RawSpec>,
}

/// The current monitoring table of one scope as reported by the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSnapshot {
    pub names: BTreeSet<String>,
    pub specs: BTreeMap<String, Vec<EnvParam>>,
}

impl ArtifactSnapshot {
    /// Parse the agent's `{artifacts: [...], specs: [...]}` document.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let raw: RawMonitoringTable = serde_json::from_value(value)?;
        let mut specs = BTreeMap::new();
        for spec in raw.specs {
            let env = spec.parameters.unwrap_or_default().env;
            specs.insert(spec.artifact, env);
        }
        Ok(ArtifactSnapshot {
            names: raw.artifacts.into_iter().collect(),
            specs,
        })
    }

    /// Record an artifact with its parameters.
    pub fn insert(&mut self, name: &str, env: Vec<EnvParam>) {
        self.names.insert(name.to_string());
        self.specs.insert(name.to_string(), env);
    }

    /// Forget an artifact entirely.
    pub fn remove(&mut self, name: &str) -> bool {
        self.specs.remove(name);
        self.names.remove(name)
    }
}


// ---------------------------------------------------------------------------
// IgnoreList
// ---------------------------------------------------------------------------

/// Agent-managed housekeeping artifacts the engine never updates or deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreList {
    names: BTreeSet<String>,
}

impl IgnoreList {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        IgnoreList {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

impl Default for IgnoreList {
    fn default() -> Self {
        IgnoreList::new(["Server.Monitor.Health", "Generic.Client.Stats"])
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_functions_are_distinct_per_scope() {
        assert_eq!(Scope::Server.add_function(), "add_server_monitoring");
        assert_eq!(Scope::Client.remove_function(), "rm_client_monitoring");
        assert_ne!(Scope::Server.list_function(), Scope::Client.list_function());
    }

    #[test]
    fn artifacts_list_canonical_has_header() {
        let value = ParamValue::from(vec!["A", "B"]);
        assert_eq!(value.canonical(ARTIFACTS_PARAM), "Artifact\nA\nB");
        assert_eq!(value.canonical("Other"), "A\nB");
    }

    #[test]
    fn yaml_scalars_are_string_cast() {
        let spec: ArtifactSpec =
            serde_yaml::from_str("Level: 3\nEnabled: true\nName: x\nArtifacts: [A, B]\n").unwrap();
        assert_eq!(spec.params["Level"], ParamValue::Scalar("3".into()));
        assert_eq!(spec.params["Enabled"], ParamValue::Scalar("true".into()));
        assert_eq!(spec.params["Artifacts"], ParamValue::from(vec!["A", "B"]));
    }

    #[test]
    fn nested_mapping_is_rejected() {
        let result: Result<ArtifactSpec, _> = serde_yaml::from_str("Level: {a: 1}\n");
        assert!(result.is_err());
    }

    #[test]
    fn snapshot_parses_agent_document() {
        let doc = serde_json::json!({
            "artifacts": ["A", "B"],
            "specs": [
                {"artifact": "A", "parameters": {"env": [{"key": "p", "value": "1"}]}},
                {"artifact": "B"}
            ]
        });
        let snap = ArtifactSnapshot::from_json(doc).unwrap();
        assert_eq!(snap.names.len(), 2);
        assert_eq!(snap.specs["A"][0].value, "1");
        assert!(snap.specs["B"].is_empty());
    }

    #[test]
    fn to_env_matches_canonical_form() {
        let spec = ArtifactSpec::new().with("Artifacts", vec!["X"]).with("p", "1");
        let env = spec.to_env();
        assert_eq!(env.len(), 2);
        assert_eq!(env[0], EnvParam { key: "Artifacts".into(), value: "Artifact\nX".into() });
    }

    #[test]
    fn default_ignore_list_covers_housekeeping() {
        let ignore = IgnoreList::default();
        assert!(ignore.contains("Server.Monitor.Health"));
        assert!(!ignore.contains("Custom.Thing"));
    }
}
