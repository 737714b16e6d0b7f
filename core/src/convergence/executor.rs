//! Convergence executor: applies an artifact delta to one scope.
//!
//! Operations run in a fixed order: additions, then updates, then deletions.
//! The agent has no in-place update, so an update is a delete followed by an
//! add of the same artifact. The first failing call aborts the scope; what was
//! applied before it stays applied and is reported.

use tracing::{error, info};

use super::planner::ArtifactDelta;
use crate::error::{ConvergeError, OpKind};
use crate::infrastructure::AgentClient;
use crate::types::artifact::{DesiredArtifacts, Scope};
use crate::types::report::ScopeReport;

/// One queued artifact operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactOp {
    Add(String),
    Update(String),
    Delete(String),
}

impl ArtifactOp {
    pub fn name(&self) -> &str {
        match self {
            ArtifactOp::Add(n) | ArtifactOp::Update(n) | ArtifactOp::Delete(n) => n,
        }
    }
}

/// Outcome of converging one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergeOutcome {
    pub report: ScopeReport,
    pub error: Option<ConvergeError>,
}

impl ConvergeOutcome {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Flatten a delta into execution order: adds, updates, deletes.
pub fn ordered_ops(delta: &ArtifactDelta) -> Vec<ArtifactOp> {
    let mut ops = Vec::with_capacity(delta.change_count());
    ops.extend(delta.to_add.iter().cloned().map(ArtifactOp::Add));
    ops.extend(delta.to_update.iter().cloned().map(ArtifactOp::Update));
    ops.extend(delta.to_delete.iter().cloned().map(ArtifactOp::Delete));
    ops
}

/// Apply `delta` to `scope`. In a dry run no mutating call is made and the
/// report lists every pending change.
pub fn converge(
    client: &mut dyn AgentClient,
    scope: Scope,
    delta: &ArtifactDelta,
    desired: &DesiredArtifacts,
    dry_run: bool,
) -> ConvergeOutcome {
    let mut report = ScopeReport::new(scope, dry_run);

    for op in ordered_ops(delta) {
        if dry_run {
            info!(scope = %scope, artifact = %op.name(), op = ?op, "dry run: change pending");
            record(&mut report, &op);
            continue;
        }
        if let Err(err) = apply(client, scope, &op, desired, &mut report) {
            error!(scope = %scope, error = %err, "convergence aborted");
            return ConvergeOutcome {
                report,
                error: Some(err),
            };
        }
        record(&mut report, &op);
    }

    ConvergeOutcome {
        report,
        error: None,
    }
}

fn record(report: &mut ScopeReport, op: &ArtifactOp) {
    let list = match op {
        ArtifactOp::Add(_) => &mut report.added,
        ArtifactOp::Update(_) => &mut report.updated,
        ArtifactOp::Delete(_) => &mut report.deleted,
    };
    list.push(op.name().to_string());
}

fn apply(
    client: &mut dyn AgentClient,
    scope: Scope,
    op: &ArtifactOp,
    desired: &DesiredArtifacts,
    report: &mut ScopeReport,
) -> Result<(), ConvergeError> {
    match op {
        ArtifactOp::Add(name) => add(client, scope, name, desired),
        ArtifactOp::Update(name) => {
            delete(client, scope, name)?;
            // The removal already happened; a failed re-add leaves it deleted.
            add(client, scope, name, desired).inspect_err(|_| report.deleted.push(name.clone()))
        }
        ArtifactOp::Delete(name) => delete(client, scope, name),
    }
}

fn add(
    client: &mut dyn AgentClient,
    scope: Scope,
    name: &str,
    desired: &DesiredArtifacts,
) -> Result<(), ConvergeError> {
    let spec = desired.get(name).ok_or_else(|| {
        ConvergeError::inconsistency(
            scope.as_str(),
            format!("artifact '{}' queued for add without a desired spec", name),
        )
    })?;
    client
        .add_artifact(scope, name, spec)
        .map_err(|msg| ConvergeError::operation(scope.as_str(), OpKind::Add, name, msg))?;
    info!(scope = %scope, artifact = %name, "artifact added");
    Ok(())
}

fn delete(client: &mut dyn AgentClient, scope: Scope, name: &str) -> Result<(), ConvergeError> {
    client
        .remove_artifact(scope, name)
        .map_err(|msg| ConvergeError::operation(scope.as_str(), OpKind::Delete, name, msg))?;
    info!(scope = %scope, artifact = %name, "artifact removed");
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergence::planner::diff_artifacts;
    use crate::infrastructure::mock::MockAgent;
    use crate::types::artifact::{ArtifactSpec, IgnoreList};

    fn p(value: &str) -> ArtifactSpec {
        ArtifactSpec::new().with("p", value)
    }

    fn scenario() -> (DesiredArtifacts, MockAgent) {
        let desired: DesiredArtifacts =
            [("A".to_string(), p("1")), ("B".to_string(), p("2"))].into_iter().collect();
        let agent = MockAgent::new()
            .with_artifact(Scope::Server, "A", &p("1"))
            .with_artifact(Scope::Server, "C", &p("3"));
        (desired, agent)
    }

    fn delta_for(agent: &MockAgent, scope: Scope, desired: &DesiredArtifacts) -> ArtifactDelta {
        diff_artifacts(scope, desired, agent.table(scope), &IgnoreList::default()).unwrap()
    }

    #[test]
    fn applies_adds_before_deletes() {
        let (desired, mut agent) = scenario();
        let delta = delta_for(&agent, Scope::Server, &desired);
        let outcome = converge(&mut agent, Scope::Server, &delta, &desired, false);
        assert!(outcome.success());
        assert_eq!(outcome.report.added, vec!["B"]);
        assert_eq!(outcome.report.deleted, vec!["C"]);
        assert_eq!(agent.mutations(), vec!["add:server:B", "remove:server:C"]);
    }

    #[test]
    fn second_run_is_empty() {
        let (desired, mut agent) = scenario();
        let delta = delta_for(&agent, Scope::Server, &desired);
        converge(&mut agent, Scope::Server, &delta, &desired, false);

        let again = delta_for(&agent, Scope::Server, &desired);
        assert!(again.is_empty());
        let outcome = converge(&mut agent, Scope::Server, &again, &desired, false);
        assert!(outcome.report.is_empty());
    }

    #[test]
    fn update_is_delete_then_add() {
        let desired: DesiredArtifacts = [("A".to_string(), p("2"))].into_iter().collect();
        let mut agent = MockAgent::new().with_artifact(Scope::Client, "A", &p("1"));
        let delta = delta_for(&agent, Scope::Client, &desired);
        let outcome = converge(&mut agent, Scope::Client, &delta, &desired, false);
        assert!(outcome.success());
        assert_eq!(outcome.report.updated, vec!["A"]);
        assert_eq!(agent.mutations(), vec!["remove:client:A", "add:client:A"]);
        assert!(delta_for(&agent, Scope::Client, &desired).is_empty());
    }

    #[test]
    fn failed_delete_half_skips_add() {
        let desired: DesiredArtifacts = [("A".to_string(), p("2"))].into_iter().collect();
        let mut agent = MockAgent::new().with_artifact(Scope::Server, "A", &p("1"));
        agent.fail_on("remove:server:A");
        let delta = delta_for(&agent, Scope::Server, &desired);
        let outcome = converge(&mut agent, Scope::Server, &delta, &desired, false);

        assert!(!outcome.success());
        assert!(!agent.calls().contains(&"add:server:A".to_string()));
        match outcome.error {
            Some(ConvergeError::Operation { unit, op, target, .. }) => {
                assert_eq!(unit, "server");
                assert_eq!(op, OpKind::Delete);
                assert_eq!(target, "A");
            }
            other => panic!("expected operation error, got {:?}", other),
        }
        assert!(outcome.report.updated.is_empty());
    }

    #[test]
    fn failed_add_half_reports_removal() {
        let desired: DesiredArtifacts = [("A".to_string(), p("2"))].into_iter().collect();
        let mut agent = MockAgent::new().with_artifact(Scope::Server, "A", &p("1"));
        agent.fail_on("add:server:A");
        let delta = delta_for(&agent, Scope::Server, &desired);
        let outcome = converge(&mut agent, Scope::Server, &delta, &desired, false);

        assert!(matches!(
            outcome.error,
            Some(ConvergeError::Operation { op: OpKind::Add, .. })
        ));
        assert!(outcome.report.updated.is_empty());
        assert_eq!(outcome.report.deleted, vec!["A"]);
        assert!(!agent.table(Scope::Server).names.contains("A"));
    }

    #[test]
    fn first_failure_aborts_remaining_ops() {
        let desired: DesiredArtifacts =
            [("A".to_string(), p("1")), ("B".to_string(), p("2"))].into_iter().collect();
        let mut agent = MockAgent::new().with_artifact(Scope::Server, "Z", &p("0"));
        agent.fail_on("add:server:B");
        let delta = delta_for(&agent, Scope::Server, &desired);
        let outcome = converge(&mut agent, Scope::Server, &delta, &desired, false);

        assert!(!outcome.success());
        // A was applied before the failure and is not rolled back.
        assert_eq!(outcome.report.added, vec!["A"]);
        assert!(outcome.report.deleted.is_empty());
        assert_eq!(agent.mutations(), vec!["add:server:A", "add:server:B"]);
        assert!(agent.table(Scope::Server).names.contains("Z"));
    }

    #[test]
    fn dry_run_reports_without_mutating() {
        let (desired, mut agent) = scenario();
        let delta = delta_for(&agent, Scope::Server, &desired);
        let outcome = converge(&mut agent, Scope::Server, &delta, &desired, true);
        assert!(outcome.success());
        assert!(outcome.report.dry_run);
        assert_eq!(outcome.report.added, vec!["B"]);
        assert_eq!(outcome.report.deleted, vec!["C"]);
        assert!(agent.mutations().is_empty());
    }

    #[test]
    fn ordered_ops_sequence() {
        let mut delta = ArtifactDelta::default();
        delta.to_delete.insert("D".into());
        delta.to_update.insert("U".into());
        delta.to_add.insert("A".into());
        delta.to_skip.insert("S".into());
        assert_eq!(
            ordered_ops(&delta),
            vec![
                ArtifactOp::Add("A".into()),
                ArtifactOp::Update("U".into()),
                ArtifactOp::Delete("D".into()),
            ]
        );
    }
}
