use std::fmt;

use crate::package::Package;

/// What an operation does, used to dispatch and to count results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobKind {
    Install,
    Update,
    Uninstall,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Install => "install",
            JobKind::Update => "update",
            JobKind::Uninstall => "uninstall",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    Install { package: Package },
    Update { from: Package, to: Package },
    Uninstall { package: Package },
}

/// One planned action against the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    kind: OperationKind,
    skip_reason: Option<String>,
    priority: u32,
}

impl Operation {
    pub fn install(package: Package) -> Self {
        Self::new(OperationKind::Install { package })
    }

    pub fn update(from: Package, to: Package) -> Self {
        Self::new(OperationKind::Update { from, to })
    }

    /// Removals always run in the first band
    pub fn uninstall(package: Package) -> Self {
        Self::new(OperationKind::Uninstall { package }).with_priority(u32::MAX)
    }

    fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            skip_reason: None,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Mark as skipped; the reason must not be empty
    pub fn skip(mut self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        self.skip_reason = Some(if reason.is_empty() { "Skipped".to_string() } else { reason });
        self
    }

    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    pub fn job_kind(&self) -> JobKind {
        match self.kind {
            OperationKind::Install { .. } => JobKind::Install,
            OperationKind::Update { .. } => JobKind::Update,
            OperationKind::Uninstall { .. } => JobKind::Uninstall,
        }
    }

    /// The package the environment ends up with, or the one removed
    pub fn package(&self) -> &Package {
        match &self.kind {
            OperationKind::Install { package } | OperationKind::Uninstall { package } => package,
            OperationKind::Update { to, .. } => to,
        }
    }

    /// The package present before the operation, for updates and removals
    pub fn initial_package(&self) -> Option<&Package> {
        match &self.kind {
            OperationKind::Install { .. } => None,
            OperationKind::Update { from, .. } => Some(from),
            OperationKind::Uninstall { package } => Some(package),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skip_reason.is_some()
    }

    pub fn skip_reason(&self) -> Option<&str> {
        self.skip_reason.as_deref()
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Sort key: higher priority first, then name and version
    pub fn sort_key(&self) -> (std::cmp::Reverse<u32>, String, pyx_semver::Version) {
        let package = self.package();
        (std::cmp::Reverse(self.priority), package.name.clone(), package.version.clone())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            OperationKind::Install { package } => {
                write!(f, "Installing {} ({})", package.pretty_name, package.full_pretty_version())
            }
            OperationKind::Update { from, to } => write!(
                f,
                "Updating {} ({} -> {})",
                to.pretty_name,
                from.full_pretty_version(),
                to.full_pretty_version()
            ),
            OperationKind::Uninstall { package } => {
                write!(f, "Removing {} ({})", package.pretty_name, package.full_pretty_version())
            }
        }
    }
}
