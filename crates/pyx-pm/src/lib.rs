pub mod cache;
pub mod config;
pub mod downloader;
pub mod env;
pub mod error;
pub mod http;
pub mod installer;
pub mod locker;
pub mod package;
pub mod progress;
pub mod project;
pub mod pyproject;
pub mod pyx;
pub mod repository;
pub mod solver;
pub mod util;

pub use error::{PyxError, Result};
pub use package::Package;
pub use project::ProjectManifest;
pub use locker::Locker;
pub use repository::{Repository, RepositoryPool};
pub use solver::{Operation, Request, Solver, Transaction};
pub use installer::{ExecutionSummary, Executor, Installer};
pub use progress::{OperationState, ProgressEvent, ProgressReporter};
pub use pyx::{Pyx, PyxBuilder};
pub use util::canonicalize_name;
