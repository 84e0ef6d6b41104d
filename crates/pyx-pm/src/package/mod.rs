// Package model for Python distributions
//
// This module provides the types describing resolved releases, the
// requirements between them, their source descriptors, environment markers
// and the downloadable artifacts (links) that realize them.

mod dependency;
mod link;
mod marker;
mod package;
mod source;

pub use dependency::{Dependency, MAIN_GROUP};
pub use link::{Link, SUPPORTED_HASHES};
pub use marker::{Marker, MarkerEnvironment, MarkerExpression, MarkerOp, MarkerValue};
pub use package::{Package, PackageFile};
pub use source::{PackageSource, SourceKind};
