//! Runtime system
//!
//! Containers, the dependency engine, the module manager and the
//! cooperative scheduler, tied together by the [`Toy`] runtime handle.

pub mod btree;
pub mod command;
pub mod console;
pub mod depend;
pub mod list;
pub mod module;
pub mod process;
pub mod scheduler;
pub mod scope;
pub mod toy;

pub use toy::{Context, Toy, WeakToy};

use thiserror::Error;

/// Runtime errors
#[derive(Debug, Error)]
pub enum ToyError {
    #[error(transparent)]
    Depend(#[from] depend::DependError),

    #[error(transparent)]
    Module(#[from] module::ModuleError),

    #[error(transparent)]
    Work(#[from] scheduler::WorkError),

    #[error(transparent)]
    Command(#[from] command::CommandError),

    #[error(transparent)]
    Process(#[from] process::ProcessError),

    #[error(transparent)]
    Scope(#[from] scope::ScopeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
