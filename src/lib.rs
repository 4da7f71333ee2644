//! cmdtoy: a command-driven runtime with loadable modules
//!
//! Modules are reference-counted and torn down through dependency
//! tracking. Work runs on a single cooperative queue; built-in modules
//! read command lines and dispatch them to registered commands.
//!
//! # Example
//!
//! ```no_run
//! use cmdtoy::runtime::console::Console;
//! use cmdtoy::util::config::ToyConfig;
//!
//! fn main() -> cmdtoy::Result<()> {
//!     let console = Console::stdio(true)?;
//!     cmdtoy::run(ToyConfig::default(), console)
//! }
//! ```

#![warn(rust_2018_idioms)]

pub mod builtins;
pub mod runtime;

// Utility modules
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use thiserror::Error;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::debug;

use crate::runtime::console::{Console, ReaderSource};
use crate::runtime::Toy;
use crate::util::config::ToyConfig;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Program name
pub const NAME: &str = "cmdtoy";

/// Run a toy on `console` until every module has been unloaded.
pub fn run(
    config: ToyConfig,
    console: Console,
) -> Result<()> {
    debug!("starting {} {}", NAME, VERSION);
    let toy = Toy::new(config, console);
    toy.run()?;
    debug!("{} finished", NAME);
    Ok(())
}

/// Run a toy reading its commands from a script file.
pub fn run_script(
    config: ToyConfig,
    path: &Path,
) -> Result<()> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open script: {}", path.display()))?;
    let console = Console::new(
        Box::new(ReaderSource::new(BufReader::new(file))),
        Box::new(std::io::stdout()),
    );
    run(config, console)
}
