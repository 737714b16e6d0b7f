//! A full convergence pass: both artifact scopes, then users.
//!
//! Scopes and the user pass touch disjoint parts of the agent, so a failure
//! in one does not stop the others. Each produces its own sub-report, merged
//! into a single `RunReport` at the end.

use tracing::{info, warn};

use super::executor::{converge, ConvergeOutcome};
use super::planner::diff_artifacts;
use super::users::UserReconciler;
use crate::error::ConvergeError;
use crate::infrastructure::{AgentClient, CredentialStore};
use crate::types::artifact::{DesiredArtifacts, IgnoreList, Scope};
use crate::types::report::{RunReport, ScopeReport};
use crate::types::state::DesiredState;

/// Unit name used for document-level user configuration errors.
const USERS_UNIT: &str = "users";

pub struct Reconciler<'a> {
    client: &'a mut dyn AgentClient,
    ignore: IgnoreList,
    dry_run: bool,
}

impl<'a> Reconciler<'a> {
    pub fn new(client: &'a mut dyn AgentClient, dry_run: bool) -> Self {
        Reconciler {
            client,
            ignore: IgnoreList::default(),
            dry_run,
        }
    }

    pub fn with_ignore_list(mut self, ignore: IgnoreList) -> Self {
        self.ignore = ignore;
        self
    }

    /// Converge the agent towards `state`.
    ///
    /// `creds` manages credential bundles and is required as soon as users
    /// are declared; it is normally built from `state.users_config`.
    pub fn run(
        &mut self,
        state: &DesiredState,
        creds: Option<&mut dyn CredentialStore>,
    ) -> RunReport {
        let mut report = RunReport::new(self.dry_run);

        for scope in Scope::ALL {
            let Some(desired) = state.artifacts(scope) else {
                info!(scope = %scope, "no artifacts declared, scope left untouched");
                continue;
            };
            let outcome = self.converge_scope(scope, desired);
            report.push_scope(outcome.report, outcome.error);
        }

        if !state.users.is_empty() {
            match (creds, &state.users_config) {
                (Some(creds), Some(_)) => {
                    let mut users = UserReconciler::new(&mut *self.client, creds, self.dry_run);
                    for outcome in users.reconcile_all(&state.users) {
                        report.push_user(outcome.report, outcome.error);
                    }
                }
                (_, None) => {
                    warn!("users declared without users_config, skipping user provisioning");
                    report.push_error(ConvergeError::configuration(
                        USERS_UNIT,
                        "users are declared but the users_config section is missing",
                    ));
                }
                (None, Some(_)) => {
                    warn!("no credential store available, skipping user provisioning");
                    report.push_error(ConvergeError::configuration(
                        USERS_UNIT,
                        "users are declared but no credential store was provided",
                    ));
                }
            }
        }

        info!(
            success = report.success,
            dry_run = report.dry_run,
            changes = report.has_changes(),
            "convergence run finished"
        );
        report
    }

    fn converge_scope(
        &mut self,
        scope: Scope,
        desired: &DesiredArtifacts,
    ) -> ConvergeOutcome {
        let dry_run = self.dry_run;
        let failed = |error: ConvergeError| ConvergeOutcome {
            report: ScopeReport::new(scope, dry_run),
            error: Some(error),
        };

        let current = match self.client.query_artifacts(scope) {
            Ok(current) => current,
            Err(e) => return failed(ConvergeError::agent_query(scope.as_str(), &e)),
        };
        let delta = match diff_artifacts(scope, desired, &current, &self.ignore) {
            Ok(delta) => delta,
            Err(e) => return failed(e),
        };
        info!(
            scope = %scope,
            add = delta.to_add.len(),
            update = delta.to_update.len(),
            delete = delta.to_delete.len(),
            unchanged = delta.to_skip.len(),
            "artifact delta computed"
        );
        converge(&mut *self.client, scope, &delta, desired, dry_run)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::{MockAgent, MockCredentials};
    use crate::types::artifact::ArtifactSpec;

    const STATE: &str = r#"
server:
  A: { p: 1 }
  B: { p: 2 }
client:
  Composite: { Artifacts: [X, Y] }
users:
  bob: { role: api, grants: [collect_client] }
users_config:
  bundle_dir: /b
  owner: salt
"#;

    fn seeded_agent(creds: &MockCredentials) -> MockAgent {
        MockAgent::new()
            .sharing_with(creds)
            .with_artifact(Scope::Server, "A", &ArtifactSpec::new().with("p", "1"))
            .with_artifact(Scope::Server, "C", &ArtifactSpec::new().with("p", "3"))
            .with_raw_artifact(Scope::Server, "Server.Monitor.Health", &[("x", "y")])
    }

    #[test]
    fn full_run_converges_everything() {
        let state = DesiredState::from_yaml_str(STATE).unwrap();
        let mut creds = MockCredentials::new("/b");
        let mut agent = seeded_agent(&creds);

        let report = Reconciler::new(&mut agent, false).run(&state, Some(&mut creds));
        assert!(report.success, "{}", report.summary());
        assert_eq!(report.scopes.len(), 2);
        assert_eq!(report.scopes[0].added, vec!["B"]);
        assert_eq!(report.scopes[0].deleted, vec!["C"]);
        assert_eq!(report.scopes[1].added, vec!["Composite"]);
        assert!(report.users[0].created);
        assert!(agent.table(Scope::Server).names.contains("Server.Monitor.Health"));

        let again = Reconciler::new(&mut agent, false).run(&state, Some(&mut creds));
        assert!(again.success);
        assert!(!again.has_changes(), "{}", again.summary());
    }

    #[test]
    fn dry_run_lists_changes_without_mutating() {
        let state = DesiredState::from_yaml_str(STATE).unwrap();
        let mut creds = MockCredentials::new("/b");
        let mut agent = seeded_agent(&creds);

        let report = Reconciler::new(&mut agent, true).run(&state, Some(&mut creds));
        assert!(report.success);
        assert_eq!(report.scopes[0].added, vec!["B"]);
        assert_eq!(report.scopes[0].deleted, vec!["C"]);
        assert!(report.users[0].created);
        assert!(agent.mutations().is_empty());
        assert!(report.summary().contains("would be"));
    }

    #[test]
    fn scope_failure_does_not_block_other_units() {
        let state = DesiredState::from_yaml_str(STATE).unwrap();
        let mut creds = MockCredentials::new("/b");
        let mut agent = seeded_agent(&creds);
        agent.fail_on("query:server");

        let report = Reconciler::new(&mut agent, false).run(&state, Some(&mut creds));
        assert!(!report.success);
        assert!(matches!(report.errors[0], ConvergeError::AgentQuery { ref unit, .. } if unit == "server"));
        assert_eq!(report.scopes[1].added, vec!["Composite"]);
        assert!(report.users[0].created);
    }

    #[test]
    fn inconsistent_scope_is_not_applied() {
        let state = DesiredState::from_yaml_str(STATE).unwrap();
        let mut creds = MockCredentials::new("/b");
        let mut agent = seeded_agent(&creds).with_raw_artifact(Scope::Server, "A", &[("p", "1"), ("extra", "v")]);

        let report = Reconciler::new(&mut agent, false).run(&state, Some(&mut creds));
        assert!(!report.success);
        assert!(matches!(report.errors[0], ConvergeError::DiffInconsistency { .. }));
        assert!(report.scopes[0].is_empty());
        assert!(!agent.mutations().iter().any(|m| m.contains(":server:")));
    }

    #[test]
    fn users_without_config_section_abort_user_pass() {
        let state = DesiredState::from_yaml_str("users:\n  bob: { role: api }\n").unwrap();
        let mut creds = MockCredentials::new("/b");
        let mut agent = MockAgent::new();

        let report = Reconciler::new(&mut agent, false).run(&state, Some(&mut creds));
        assert!(!report.success);
        assert!(report.users.is_empty());
        assert!(matches!(report.errors[0], ConvergeError::Configuration { ref unit, .. } if unit == "users"));
        assert!(agent.calls().is_empty());
    }

    #[test]
    fn users_without_credential_store_abort_user_pass() {
        let state = DesiredState::from_yaml_str(STATE).unwrap();
        let mut agent = MockAgent::new();

        let report = Reconciler::new(&mut agent, false).run(&state, None);
        assert!(report.users.is_empty());
        match report.errors.last() {
            Some(ConvergeError::Configuration { unit, message }) => {
                assert_eq!(unit, "users");
                assert!(message.contains("no credential store"), "{}", message);
            }
            other => panic!("expected configuration error, got {:?}", other),
        }
        assert!(!agent.calls().iter().any(|c| c.starts_with("show_user")));
    }

    #[test]
    fn absent_scope_section_is_not_queried() {
        let state = DesiredState::from_yaml_str("client: {}\n").unwrap();
        let mut agent = MockAgent::new().with_raw_artifact(Scope::Server, "Keep", &[]);
        let report = Reconciler::new(&mut agent, false).run(&state, None);
        assert!(report.success);
        assert_eq!(report.scopes.len(), 1);
        assert_eq!(agent.calls(), vec!["query:client"]);
    }

    #[test]
    fn custom_ignore_list_protects_artifact() {
        let state = DesiredState::from_yaml_str("server: {}\n").unwrap();
        let mut agent = MockAgent::new().with_raw_artifact(Scope::Server, "Site.Keep", &[]);
        let report = Reconciler::new(&mut agent, false)
            .with_ignore_list(IgnoreList::new(["Site.Keep"]))
            .run(&state, None);
        assert!(report.success);
        assert!(!report.has_changes());
        assert!(agent.mutations().is_empty());
    }
}
