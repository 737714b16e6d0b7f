//! User provisioning: makes every declared user exist with its declared
//! grants.
//!
//! Each user is reconciled on its own: a failure is recorded in that user's
//! report and the next user is still processed.
//!
//! Per user:
//! 1. `show_user` decides between *exists* and *missing*. Only the agent's
//!    "not found" answer means missing; any other failure aborts the user.
//! 2. A missing user, or an api user whose credential bundle is gone, is
//!    (re-)created. api users get a fresh bundle after stale files are
//!    removed; every other role needs a declared password.
//! 3. After creation, or whenever grants are declared, the current grants are
//!    diffed and, if they drift, reset to empty and rewritten.
//! 4. Bundles issued in this run are handed to the configured owner last, so
//!    a permission change cannot get in the way of the grant update.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tracing::{error, info, warn};

use super::grants::diff_grants;
use crate::error::{ConvergeError, OpKind};
use crate::infrastructure::{AgentClient, CredentialStore};
use crate::types::report::UserReport;
use crate::types::user::{UserPresence, UserSpec};

/// Outcome of reconciling one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserOutcome {
    pub report: UserReport,
    pub error: Option<ConvergeError>,
}

impl UserOutcome {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

pub struct UserReconciler<'a> {
    client: &'a mut dyn AgentClient,
    creds: &'a mut dyn CredentialStore,
    dry_run: bool,
}

impl<'a> UserReconciler<'a> {
    pub fn new(
        client: &'a mut dyn AgentClient,
        creds: &'a mut dyn CredentialStore,
        dry_run: bool,
    ) -> Self {
        UserReconciler {
            client,
            creds,
            dry_run,
        }
    }

    /// Reconcile every declared user in name order.
    pub fn reconcile_all(&mut self, users: &BTreeMap<String, UserSpec>) -> Vec<UserOutcome> {
        users
            .iter()
            .map(|(name, spec)| self.reconcile_user(name, spec))
            .collect()
    }

    pub fn reconcile_user(&mut self, name: &str, spec: &UserSpec) -> UserOutcome {
        let mut report = UserReport::new(name, self.dry_run);
        match self.converge_user(name, spec, &mut report) {
            Ok(()) => UserOutcome {
                report,
                error: None,
            },
            Err(err) => {
                error!(user = %name, error = %err, "user reconciliation failed");
                report.error = Some(err.to_string());
                UserOutcome {
                    report,
                    error: Some(err),
                }
            }
        }
    }

    fn converge_user(
        &mut self,
        name: &str,
        spec: &UserSpec,
        report: &mut UserReport,
    ) -> Result<(), ConvergeError> {
        let presence = self
            .client
            .show_user(name)
            .map_err(|e| ConvergeError::agent_query(name, &e))?;

        let needs_create = match presence {
            UserPresence::NotFound => true,
            UserPresence::Exists => {
                let missing_bundle = spec.uses_credential_bundle() && !self.creds.bundle_exists(name);
                if missing_bundle {
                    warn!(user = %name, "credential bundle missing, re-issuing");
                }
                missing_bundle
            }
        };

        let mut issued_bundle = None;
        if needs_create {
            if !spec.uses_credential_bundle() && spec.password.is_none() {
                return Err(ConvergeError::configuration(
                    name,
                    format!("role '{}' requires a password", spec.role),
                ));
            }
            if self.dry_run {
                info!(user = %name, role = %spec.role, "dry run: user would be created");
                report.created = true;
                report.grants_after = sorted(&spec.grants);
                return Ok(());
            }
            issued_bundle = self.create(name, spec)?;
            report.created = true;
        }

        if needs_create || !spec.grants.is_empty() {
            self.converge_grants(name, &spec.grants, report)?;
        }

        if let Some(bundle) = issued_bundle {
            self.creds
                .fix_ownership(std::slice::from_ref(&bundle))
                .map_err(|msg| {
                    ConvergeError::operation(name, OpKind::Chown, &bundle.display().to_string(), msg)
                })?;
            info!(user = %name, bundle = %bundle.display(), "credential bundle ownership fixed");
        }

        Ok(())
    }

    /// Create the identity. Returns the bundle path for api users.
    fn create(&mut self, name: &str, spec: &UserSpec) -> Result<Option<PathBuf>, ConvergeError> {
        if spec.uses_credential_bundle() {
            let removed = self
                .creds
                .remove_stale(name)
                .map_err(|msg| ConvergeError::operation(name, OpKind::Cleanup, name, msg))?;
            if !removed.is_empty() {
                info!(user = %name, files = removed.len(), "stale credential files removed");
            }
            let target = self.creds.bundle_path(name);
            let bundle = self
                .client
                .create_credential_user(name, &spec.role, &target)
                .map_err(|msg| ConvergeError::operation(name, OpKind::Create, name, msg))?;
            info!(user = %name, role = %spec.role, bundle = %bundle.display(), "api user created");
            return Ok(Some(bundle));
        }

        let password = spec.password.as_deref().ok_or_else(|| {
            ConvergeError::configuration(name, format!("role '{}' requires a password", spec.role))
        })?;
        self.client
            .create_password_user(name, &spec.role, password)
            .map_err(|msg| ConvergeError::operation(name, OpKind::Create, name, msg))?;
        info!(user = %name, role = %spec.role, "user created");
        Ok(None)
    }

    fn converge_grants(
        &mut self,
        name: &str,
        desired: &BTreeSet<String>,
        report: &mut UserReport,
    ) -> Result<(), ConvergeError> {
        let raw = self
            .client
            .show_grants(name)
            .map_err(|e| ConvergeError::agent_query(name, &e))?;
        let diff = diff_grants(name, &raw, desired)?;
        report.grants_before = sorted(&diff.current);
        report.grants_after = report.grants_before.clone();
        if !diff.differs {
            return Ok(());
        }

        if self.dry_run {
            info!(user = %name, "dry run: grants would be rewritten");
            report.grants_after = sorted(desired);
            return Ok(());
        }

        // grants_after tracks what the agent holds after each write.
        self.client
            .set_grants(name, &BTreeSet::new())
            .map_err(|msg| ConvergeError::operation(name, OpKind::SetGrants, name, msg))?;
        report.grants_after.clear();
        self.client
            .set_grants(name, desired)
            .map_err(|msg| ConvergeError::operation(name, OpKind::SetGrants, name, msg))?;
        report.grants_after = sorted(desired);
        info!(
            user = %name,
            before = ?report.grants_before,
            after = ?report.grants_after,
            "grants rewritten"
        );
        Ok(())
    }
}

fn sorted(set: &BTreeSet<String>) -> Vec<String> {
    set.iter().cloned().collect()
}
