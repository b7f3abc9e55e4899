//! rdb - command line front end of the rudi rule debugger.
//!
//! Reads the location file written by the rule compiler, shows the rule tree
//! with its logging states, remembers logging choices across compiles and
//! sessions, and follows a running dialogue runtime.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rudi_debug_core::LoggingState;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;

mod commands;
mod config;
mod session;

use commands::config as config_cmd;
use config::Config;
use session::Session;

/// rdb - inspect compiled rudi rules and follow a live runtime.
///
/// Run `rdb` or `rdb show` in a project to print the rule tree.
#[derive(Parser, Debug)]
#[command(
    name = "rdb",
    author,
    version,
    about = "rdb: rule debugger for rudi dialogue projects",
    long_about = None
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Project directory holding `rdb.json`.
    #[arg(short, long, global = true, env = "RDB_PROJECT", default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the rule tree, logging states and compile results (default).
    Show {
        /// Also list rule source files and their usage.
        #[arg(long)]
        files: bool,
    },

    /// Print `file:line` where a rule is defined.
    Open {
        /// Rule id from the location file.
        rule_id: i32,
    },

    /// Set the logging state of a rule or of every rule in an import.
    Set {
        /// Rule id, or a label path such as `sub/bye`.
        target: String,

        /// never, if-false, if-true or always.
        state: LoggingState,
    },

    /// Manage named logging setups.
    #[command(subcommand)]
    Snapshot(SnapshotCommands),

    /// Follow source edits and recompiles until interrupted.
    Watch {
        /// Connect to the runtime at the configured address.
        #[arg(short, long)]
        connect: bool,

        /// Runtime address, overriding the configuration.
        #[arg(long)]
        address: Option<String>,
    },

    /// Inspect or create the project configuration.
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Snapshot subcommands.
#[derive(Subcommand, Debug)]
enum SnapshotCommands {
    /// Save the current logging setup under a name.
    Save { name: String },

    /// Restore a saved logging setup.
    Apply { name: String },

    /// List the most recent snapshots.
    List,
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show the effective configuration.
    Show,

    /// Write the effective configuration to `rdb.json`.
    Init,

    /// Show path to the project config file.
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup tracing based on verbosity
    let level = if cli.quiet {
        Level::ERROR
    } else if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let project = project_dir(&cli.project)?;
    let mut config = Config::load(&project)?;

    match cli.command.unwrap_or(Commands::Show { files: false }) {
        Commands::Show { files } => {
            let session = Session::open(&config)?;
            commands::show::execute(&session, files)?;
        }

        Commands::Open { rule_id } => {
            let session = Session::open(&config)?;
            commands::open::execute(&session, rule_id)?;
        }

        Commands::Set { target, state } => {
            let mut session = Session::open(&config)?;
            commands::set::execute(&mut session, &target, state)?;
        }

        Commands::Snapshot(snapshot_cmd) => {
            let mut session = Session::open(&config)?;
            match snapshot_cmd {
                SnapshotCommands::Save { name } => commands::snapshot::save(&mut session, &name)?,
                SnapshotCommands::Apply { name } => {
                    commands::snapshot::apply(&mut session, &name)?
                }
                SnapshotCommands::List => commands::snapshot::list(&session)?,
            }
        }

        Commands::Watch { connect, address } => {
            if let Some(address) = address {
                config.runtime_address = address;
            }
            commands::watch::execute(&config, connect).await?;
        }

        Commands::Config(config_cmd_inner) => match config_cmd_inner {
            ConfigCommands::Show => config_cmd::show(&config)?,
            ConfigCommands::Init => config_cmd::init(&config, &project)?,
            ConfigCommands::Path => config_cmd::path(&project),
        },
    }

    Ok(())
}

fn project_dir(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .with_context(|| format!("Project directory {} not found", path.display()))
}
