//! cmdtoy - CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cmdtoy::builtins::BUILTINS;
use cmdtoy::runtime::console::Console;
use cmdtoy::util::config::{load_config, ToyConfig};
use cmdtoy::util::logger::{self, LogLevel};
use cmdtoy::{run, run_script, NAME, VERSION};

/// A command-driven runtime with loadable modules
#[derive(Parser, Debug)]
#[command(name = "cmdtoy")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the toy and read commands (the default)
    Run {
        /// Read commands from a file instead of the console
        #[arg(short, long, value_name = "FILE")]
        script: Option<PathBuf>,

        /// Plugin image to load at start-up; may be repeated
        #[arg(short, long = "load", value_name = "PLUGIN")]
        load: Vec<PathBuf>,
    },

    /// List the built-in modules
    Modules,

    /// Print version information
    Version,
}

fn init_logging(
    config: &ToyConfig,
    verbose: bool,
) -> Result<()> {
    let level = if verbose {
        LogLevel::Debug
    } else {
        config.log.level()?
    };
    logger::init_with_level(level);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&config, args.verbose)?;

    match args.command.unwrap_or(Commands::Run {
        script: None,
        load: Vec::new(),
    }) {
        Commands::Run { script, load } => {
            config.modules.autoload.extend(load);
            match script {
                Some(path) => run_script(config, &path)
                    .with_context(|| format!("Failed to run: {}", path.display()))?,
                None => {
                    let console = Console::stdio(config.runtime.history)
                        .context("Failed to open the console")?;
                    run(config, console)?;
                }
            }
        }
        Commands::Modules => {
            for descriptor in BUILTINS {
                let enabled = config
                    .modules
                    .builtins
                    .iter()
                    .any(|name| name == descriptor.nice_name);
                println!(
                    "{:<16} {} api {}{}",
                    descriptor.nice_name,
                    descriptor.serial(),
                    descriptor.api_version,
                    if enabled { "" } else { " (disabled)" }
                );
            }
        }
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        }
    }

    Ok(())
}
