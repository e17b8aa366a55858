#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::cast_precision_loss)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about = "A module-graph asset bundler", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Build the project described by kiln.json
    Build {
        /// Path to the config file (default: ./kiln.json)
        #[arg(long, short = 'c', value_name = "PATH", env = "KILN_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Print the resolved configuration, including the dev-server port
    Config {
        /// Path to the config file (default: ./kiln.json)
        #[arg(long, short = 'c', value_name = "PATH", env = "KILN_CONFIG")]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    logging::init(cli.verbose, cli.json);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(cli.json),
        Some(Commands::Build { config }) => {
            let path = commands::config_path(&cwd, config.as_deref());
            commands::build::run(&path, cli.json)
        }
        Some(Commands::Config { config }) => {
            let path = commands::config_path(&cwd, config.as_deref());
            commands::config::run(&path, cli.json)
        }
    }
}
