//! Error taxonomy for a convergence run.
//!
//! `ConvergeError` is what the engine surfaces to its caller. Every variant
//! names the unit it affected (a scope name or a username) so a failed run can
//! be diagnosed from the report alone.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;


// ---------------------------------------------------------------------------
// OpKind
// ---------------------------------------------------------------------------

/// The mutating operation that was attempted when an `Operation` error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Add,
    Delete,
    Create,
    Cleanup,
    SetGrants,
    Chown,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpKind::Add => "add",
            OpKind::Delete => "delete",
            OpKind::Create => "create",
            OpKind::Cleanup => "cleanup",
            OpKind::SetGrants => "set-grants",
            OpKind::Chown => "chown",
        };
        f.write_str(s)
    }
}


// ---------------------------------------------------------------------------
// ConvergeError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConvergeError {
    /// The desired-state document is missing a required section or field.
    #[error("configuration error for {unit}: {message}")]
    Configuration { unit: String, message: String },

    /// Current state could not be read from the agent.
    #[error("cannot query agent state for {unit}: {message}")]
    AgentQuery { unit: String, message: String },

    /// Current state cannot be compared against the desired state.
    #[error("inconsistent state for {unit}: {message}")]
    DiffInconsistency { unit: String, message: String },

    /// A mutating call failed. Earlier operations of the run stay applied.
    #[error("{op} of '{target}' failed for {unit}: {message}")]
    Operation {
        unit: String,
        op: OpKind,
        target: String,
        message: String,
    },
}

impl ConvergeError {
    pub fn configuration(unit: &str, message: impl Into<String>) -> Self {
        ConvergeError::Configuration {
            unit: unit.to_string(),
            message: message.into(),
        }
    }

    pub fn agent_query(unit: &str, err: &AgentError) -> Self {
        ConvergeError::AgentQuery {
            unit: unit.to_string(),
            message: err.to_string(),
        }
    }

    pub fn inconsistency(unit: &str, message: impl Into<String>) -> Self {
        ConvergeError::DiffInconsistency {
            unit: unit.to_string(),
            message: message.into(),
        }
    }

    pub fn operation(unit: &str, op: OpKind, target: &str, message: impl Into<String>) -> Self {
        ConvergeError::Operation {
            unit: unit.to_string(),
            op,
            target: target.to_string(),
            message: message.into(),
        }
    }

    /// Scope name or username the error belongs to.
    pub fn unit(&self) -> &str {
        match self {
            ConvergeError::Configuration { unit, .. }
            | ConvergeError::AgentQuery { unit, .. }
            | ConvergeError::DiffInconsistency { unit, .. }
            | ConvergeError::Operation { unit, .. } => unit,
        }
    }
}


// ---------------------------------------------------------------------------
// AgentError
// ---------------------------------------------------------------------------

/// Failure of a read-only agent query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("agent unreachable: {0}")]
    Unreachable(String),
    #[error("{0}")]
    Query(String),
}


// ---------------------------------------------------------------------------
// StateError
// ---------------------------------------------------------------------------

/// Failure to load the desired-state document.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid desired state: {0}")]
    Parse(#[from] serde_yaml::Error),
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_error_names_unit_op_and_target() {
        let err = ConvergeError::operation("server", OpKind::Delete, "Custom.A", "boom");
        assert_eq!(err.to_string(), "delete of 'Custom.A' failed for server: boom");
        assert_eq!(err.unit(), "server");
    }

    #[test]
    fn converge_error_serializes_with_kind_tag() {
        let err = ConvergeError::configuration("bob", "password missing");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "configuration");
        assert_eq!(json["unit"], "bob");
    }

    #[test]
    fn agent_query_wraps_agent_error() {
        let err = ConvergeError::agent_query("client", &AgentError::Unreachable("refused".into()));
        assert!(err.to_string().contains("agent unreachable: refused"));
    }
}
