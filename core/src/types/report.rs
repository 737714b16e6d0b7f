//! Change report produced by one convergence run.
//!
//! Each scope and each user gets its own sub-report; `RunReport` merges them
//! once every unit has been processed.

use serde::Serialize;

use super::artifact::Scope;
use crate::error::ConvergeError;


// ---------------------------------------------------------------------------
// ScopeReport
// ---------------------------------------------------------------------------

/// Artifact changes applied (or, in a dry run, pending) for one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeReport {
    pub scope: Scope,
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub dry_run: bool,
}

impl ScopeReport {
    pub fn new(scope: Scope, dry_run: bool) -> Self {
        ScopeReport {
            scope,
            added: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
            dry_run,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}


// ---------------------------------------------------------------------------
// UserReport
// ---------------------------------------------------------------------------

/// What happened to one declared user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserReport {
    pub username: String,
    pub created: bool,
    pub grants_before: Vec<String>,
    pub grants_after: Vec<String>,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UserReport {
    pub fn new(username: &str, dry_run: bool) -> Self {
        UserReport {
            username: username.to_string(),
            created: false,
            grants_before: Vec::new(),
            grants_after: Vec::new(),
            dry_run,
            error: None,
        }
    }

    pub fn grants_changed(&self) -> bool {
        self.grants_before != self.grants_after
    }

    pub fn is_empty(&self) -> bool {
        !self.created && !self.grants_changed()
    }
}


// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

/// Merged result of a whole convergence pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub dry_run: bool,
    pub scopes: Vec<ScopeReport>,
    pub users: Vec<UserReport>,
    pub errors: Vec<ConvergeError>,
}

impl RunReport {
    pub fn new(dry_run: bool) -> Self {
        RunReport {
            success: true,
            dry_run,
            scopes: Vec::new(),
            users: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn push_scope(&mut self, report: ScopeReport, error: Option<ConvergeError>) {
        self.scopes.push(report);
        if let Some(err) = error {
            self.push_error(err);
        }
    }

    pub fn push_user(&mut self, report: UserReport, error: Option<ConvergeError>) {
        self.users.push(report);
        if let Some(err) = error {
            self.push_error(err);
        }
    }

    pub fn push_error(&mut self, err: ConvergeError) {
        self.success = false;
        self.errors.push(err);
    }

    /// Whether the run changed (or would change) anything.
    pub fn has_changes(&self) -> bool {
        self.scopes.iter().any(|s| !s.is_empty()) || self.users.iter().any(|u| !u.is_empty())
    }

    /// Human-readable multi-line summary.
    pub fn summary(&self) -> String {
        let verb = if self.dry_run { "would be" } else { "were" };
        let mut lines = Vec::new();

        for scope in &self.scopes {
            if scope.is_empty() {
                continue;
            }
            let mut parts = Vec::new();
            if !scope.added.is_empty() {
                parts.push(format!("added [{}]", scope.added.join(", ")));
            }
            if !scope.updated.is_empty() {
                parts.push(format!("updated [{}]", scope.updated.join(", ")));
            }
            if !scope.deleted.is_empty() {
                parts.push(format!("deleted [{}]", scope.deleted.join(", ")));
            }
            lines.push(format!("{} artifacts {} {}", scope.scope, verb, parts.join("; ")));
        }

        let user_verb = if self.dry_run { "would be" } else { "was" };
        for user in &self.users {
            if user.created {
                lines.push(format!("user {} {} created", user.username, user_verb));
            }
            if user.grants_changed() {
                lines.push(format!(
                    "user {} grants {} changed from [{}] to [{}]",
                    user.username,
                    verb,
                    user.grants_before.join(", "),
                    user.grants_after.join(", ")
                ));
            }
        }

        if lines.is_empty() && self.errors.is_empty() {
            lines.push("configuration already converged".to_string());
        }
        for err in &self.errors {
            lines.push(format!("error: {}", err));
        }
        lines.join("\n")
    }
}
