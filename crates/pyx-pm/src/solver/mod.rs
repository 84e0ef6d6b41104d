mod operation;
mod request;
#[allow(clippy::module_inception)]
mod solver;
mod transaction;
mod walk;

pub use operation::{JobKind, Operation, OperationKind};
pub use request::Request;
pub use solver::{Solver, SolverContext, SolverResult};
pub use transaction::Transaction;
pub use walk::{walk_dependencies, TransitivePackageInfo};
