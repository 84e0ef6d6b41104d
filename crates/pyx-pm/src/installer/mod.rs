//! Planning and applying operations to an environment.
//!
//! [`Installer`] turns the project and its lock file into a plan,
//! [`Executor`] applies it with the help of a [`Chooser`] and an
//! [`InstallBackend`].

mod backend;
mod chooser;
mod executor;
mod installer;

pub use backend::{BackendCall, InstallBackend, InstallMode, PipBackend, RecordingBackend};
pub use chooser::{Chooser, ALL_PACKAGES};
pub use executor::{default_max_workers, is_parallel_unsafe, ExecutionReport, ExecutionSummary, Executor};
pub use installer::Installer;
