//! veloconf CLI: converges a Velociraptor server towards a desired state.
//!
//! # Usage
//!
//! ```text
//! veloconf apply /etc/veloconf/state.yaml
//! veloconf apply --dry-run --format json
//! veloconf plan
//! veloconf facts
//! ```

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use veloconf_core::convergence::Reconciler;
use veloconf_core::facts;
use veloconf_core::infrastructure::credentials::FsCredentialStore;
use veloconf_core::infrastructure::runner::ProcessRunner;
use veloconf_core::infrastructure::velociraptor::CliAgent;
use veloconf_core::infrastructure::CredentialStore;
use veloconf_core::types::{DesiredState, RunReport};

const DEFAULT_STATE_PATH: &str = "/etc/veloconf/state.yaml";

#[derive(Parser)]
#[command(name = "veloconf", about = "Converge a Velociraptor server towards a desired state", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the desired state to the agent.
    Apply {
        /// Desired-state YAML. Defaults to $VELOCONF_STATE, then /etc/veloconf/state.yaml.
        state: Option<PathBuf>,

        /// Compute and report changes without applying them.
        #[arg(long)]
        dry_run: bool,

        #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
        format: OutputFormat,
    },

    /// Show what `apply` would change.
    Plan {
        state: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
        format: OutputFormat,
    },

    /// Print the client enrollment facts exported by the server host.
    Facts {
        #[arg(long, default_value = "/etc/velociraptor/client.config")]
        client_config: PathBuf,

        #[arg(long, default_value = "/etc/velociraptor/server.config")]
        server_config: PathBuf,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}


fn main() {
    init_tracing();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Apply {
            state,
            dry_run,
            format,
        } => apply(&resolve_state_path(state), dry_run, format),
        Commands::Plan { state, format } => apply(&resolve_state_path(state), true, format),
        Commands::Facts {
            client_config,
            server_config,
        } => print_facts(&client_config, &server_config),
    };
    process::exit(code);
}


fn init_tracing() {
    let filter = std::env::var("VELOCONF_LOG")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}


fn resolve_state_path(arg: Option<PathBuf>) -> PathBuf {
    if let Some(path) = arg {
        return path;
    }
    if let Ok(path) = std::env::var("VELOCONF_STATE") {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_STATE_PATH)
}


fn apply(path: &Path, dry_run: bool, format: OutputFormat) -> i32 {
    let state = match DesiredState::load(path) {
        Ok(state) => state,
        Err(e) => {
            error!(path = %path.display(), "{}", e);
            return 1;
        }
    };
    info!(path = %path.display(), dry_run, "starting convergence run");

    let mut agent = CliAgent::new(state.agent.clone(), ProcessRunner);
    let mut store = state.users_config.clone().map(FsCredentialStore::new);
    let creds = store.as_mut().map(|s| s as &mut dyn CredentialStore);

    let report = Reconciler::new(&mut agent, dry_run).run(&state, creds);
    print_report(&report, format);
    if report.success {
        0
    } else {
        1
    }
}


fn print_report(report: &RunReport, format: OutputFormat) {
    match format {
        OutputFormat::Human => println!("{}", report.summary()),
        OutputFormat::Json => match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("cannot serialize report: {}", e),
        },
    }
}


fn print_facts(client_config: &Path, server_config: &Path) -> i32 {
    match facts::client_settings(client_config, server_config) {
        Ok(found) => {
            println!("{}", facts::to_document(found.as_ref()));
            0
        }
        Err(e) => {
            error!("{}", e);
            1
        }
    }
}
