//! Convergence engine: diffs desired vs actual agent state and applies the
//! difference.
//!
//! The `planner` module partitions artifacts into add/update/delete/skip and
//! `grants` compares ACLs. `executor` applies an artifact delta in its fixed
//! order, `users` provisions declared users, and `run` drives a whole pass.

pub mod executor;
pub mod grants;
pub mod planner;
pub mod run;
pub mod users;

pub use executor::{converge, ConvergeOutcome};
pub use grants::{diff_grants, GrantDiff};
pub use planner::{diff_artifacts, ArtifactDelta};
pub use run::Reconciler;
pub use users::{UserOutcome, UserReconciler};
