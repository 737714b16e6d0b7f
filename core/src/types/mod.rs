pub mod artifact;
pub mod report;
pub mod state;
pub mod user;

pub use artifact::{ArtifactSnapshot, ArtifactSpec, DesiredArtifacts, EnvParam, IgnoreList, ParamValue, Scope};
pub use report::{RunReport, ScopeReport, UserReport};
pub use state::{AgentEndpoint, DesiredState};
pub use user::{UserPresence, UserSpec, UsersConfig, CREDENTIAL_ROLE};
