//! veloconf core: converges a Velociraptor server towards a declared state.
//!
//! The engine reads the agent's monitoring tables and ACLs through an
//! [`infrastructure::AgentClient`], diffs them against a
//! [`types::DesiredState`], and applies the minimal set of changes, or only
//! reports them in a dry run.

pub mod convergence;
pub mod error;
pub mod facts;
pub mod infrastructure;
pub mod types;

pub use error::{AgentError, ConvergeError, OpKind, StateError};
