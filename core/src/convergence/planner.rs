//! Artifact planner: diffs desired vs current monitoring tables.
//!
//! The planner is stateless: it takes the desired artifacts of one scope and
//! the agent-reported snapshot of the same scope and partitions every name
//! into add / update / delete / skip. It never talks to the agent itself.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::ConvergeError;
use crate::types::artifact::{
    ArtifactSnapshot, ArtifactSpec, DesiredArtifacts, EnvParam, IgnoreList, Scope,
};

/// The partition of artifact names produced by one diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactDelta {
    pub to_add: BTreeSet<String>,
    pub to_update: BTreeSet<String>,
    pub to_delete: BTreeSet<String>,
    pub to_skip: BTreeSet<String>,
}

impl ArtifactDelta {
    /// True when applying the delta would not call the agent at all.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Number of artifacts that need a mutating call.
    pub fn change_count(&self) -> usize {
        self.to_add.len() + self.to_update.len() + self.to_delete.len()
    }
}

/// Outcome of comparing one artifact's parameters.
enum ParamComparison {
    Equal,
    Differs { key: String, current: String, desired: String },
    NotComparable,
}

/// Compute the delta that converges `current` towards `desired` in `scope`.
///
/// Fails with `DiffInconsistency` when a current artifact carries a parameter
/// the desired spec does not declare; the whole scope is then unknown and
/// nothing may be applied to it.
pub fn diff_artifacts(
    scope: Scope,
    desired: &DesiredArtifacts,
    current: &ArtifactSnapshot,
    ignore: &IgnoreList,
) -> Result<ArtifactDelta, ConvergeError> {
    let mut delta = ArtifactDelta::default();

    for name in &current.names {
        if ignore.contains(name) {
            debug!(scope = %scope, artifact = %name, "ignored housekeeping artifact");
            delta.to_skip.insert(name.clone());
            continue;
        }
        let Some(spec) = desired.get(name) else {
            delta.to_delete.insert(name.clone());
            continue;
        };
        let env = current.specs.get(name).map(Vec::as_slice).unwrap_or(&[]);
        match compare_params(scope, name, env, spec)? {
            ParamComparison::Equal | ParamComparison::NotComparable => {
                delta.to_skip.insert(name.clone());
            }
            ParamComparison::Differs { key, current, desired } => {
                info!(
                    scope = %scope,
                    artifact = %name,
                    param = %key,
                    current = %current,
                    desired = %desired,
                    "artifact parameters differ"
                );
                delta.to_update.insert(name.clone());
            }
        }
    }

    for name in desired.keys() {
        if !current.names.contains(name) {
            delta.to_add.insert(name.clone());
        }
    }

    Ok(delta)
}

/// Compare the agent-side parameters of one artifact against its desired
/// spec. Only the first differing key is reported.
fn compare_params(
    scope: Scope,
    name: &str,
    env: &[EnvParam],
    spec: &ArtifactSpec,
) -> Result<ParamComparison, ConvergeError> {
    if env.is_empty() {
        return Ok(ParamComparison::NotComparable);
    }
    for param in env {
        let desired = spec.params.get(&param.key).ok_or_else(|| {
            ConvergeError::inconsistency(
                scope.as_str(),
                format!(
                    "artifact '{}' has parameter '{}' on the agent but not in the desired spec",
                    name, param.key
                ),
            )
        })?;
        let desired = desired.canonical(&param.key);
        if desired != param.value {
            return Ok(ParamComparison::Differs {
                key: param.key.clone(),
                current: param.value.clone(),
                desired,
            });
        }
    }
    Ok(ParamComparison::Equal)
}
