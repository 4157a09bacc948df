//! Veritas CLI, the main entry point.
//!
//! Commands:
//! - `ask`     Research a question against a local workspace
//! - `tools`   List the tools the model is offered
//! - `config`  Show, locate or validate the configuration
//! - `doctor`  Diagnose the local setup

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

#[derive(Parser)]
#[command(
    name = "veritas",
    about = "Veritas: a citation-first research agent",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "VERITAS_LOG_JSON")]
    log_json: bool,

    /// Config file to use instead of ~/.veritas/config.toml
    #[arg(short, long, global = true, env = "VERITAS_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Research a question and print a cited answer
    Ask {
        /// The question to research
        question: String,

        /// Workspace root the tools may read
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Override the tool-call budget
        #[arg(long)]
        max_tool_calls: Option<u32>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the tools offered to the model
    Tools {
        /// Workspace root used to build the registry
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Diagnose the local setup
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print a default configuration file
    Init,
    /// Print the default config file path
    Path,
    /// Load and validate the configuration
    Validate,
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "veritas=debug" } else { "veritas=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Ask {
            question,
            root,
            max_tool_calls,
            json,
        } => {
            let options = commands::ask::AskOptions {
                root,
                max_tool_calls,
                json,
            };
            return commands::ask::run(config, &question, options).await;
        }
        Commands::Tools { root } => commands::tools::run(config, &root).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config)?,
            ConfigAction::Init => commands::config_cmd::init(),
            ConfigAction::Path => commands::config_cmd::path(),
            ConfigAction::Validate => commands::config_cmd::validate(config)?,
        },
        Commands::Doctor => commands::doctor::run(config).await?,
    }

    Ok(ExitCode::SUCCESS)
}
