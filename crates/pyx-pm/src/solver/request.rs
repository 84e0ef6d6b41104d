use std::collections::{BTreeMap, BTreeSet};

use pyx_semver::VersionConstraint;

use crate::package::{Dependency, Package};
use crate::util::canonicalize_name;

/// A request specifies what needs to be resolved.
///
/// Root requirements of every dependency group are resolved together so the
/// result is valid for any combination of groups and extras.
#[derive(Debug, Clone)]
pub struct Request {
    /// Name of the project being resolved
    pub root: String,

    /// Root requirements, optional extras members included
    pub requires: Vec<Dependency>,

    /// Root extra name -> names of the optional requirements it activates
    pub extras: BTreeMap<String, BTreeSet<String>>,

    /// Packages from the lock file, preferred when still acceptable
    pub locked_packages: Vec<Package>,

    /// Packages allowed to move away from their locked version.
    /// `None` allows every package to change.
    pub update_allowlist: Option<BTreeSet<String>>,

    /// Interpreter versions the project supports
    pub python_versions: VersionConstraint,

    pub allow_prereleases: bool,
}

impl Request {
    pub fn new(root: &str) -> Self {
        Self {
            root: canonicalize_name(root),
            requires: Vec::new(),
            extras: BTreeMap::new(),
            locked_packages: Vec::new(),
            update_allowlist: Some(BTreeSet::new()),
            python_versions: VersionConstraint::any(),
            allow_prereleases: false,
        }
    }

    pub fn require(&mut self, dependency: Dependency) -> &mut Self {
        self.requires.push(dependency);
        self
    }

    pub fn extra<I, S>(&mut self, extra: &str, members: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extras.insert(
            canonicalize_name(extra),
            members.into_iter().map(|s| canonicalize_name(s.as_ref())).collect(),
        );
        self
    }

    pub fn lock(&mut self, package: Package) -> &mut Self {
        self.locked_packages.push(package);
        self
    }

    /// Allow only the named packages to change (partial update)
    pub fn update<I, S>(&mut self, packages: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.update_allowlist = Some(packages.into_iter().map(|s| canonicalize_name(s.as_ref())).collect());
        self
    }

    /// Allow every package to change
    pub fn update_all(&mut self) -> &mut Self {
        self.update_allowlist = None;
        self
    }

    pub fn with_python_versions(&mut self, python_versions: VersionConstraint) -> &mut Self {
        self.python_versions = python_versions;
        self
    }

    pub fn allow_prereleases(&mut self, allow: bool) -> &mut Self {
        self.allow_prereleases = allow;
        self
    }

    pub fn is_update_allowed(&self, name: &str) -> bool {
        match &self.update_allowlist {
            None => true,
            Some(allowlist) => allowlist.contains(&canonicalize_name(name)),
        }
    }

    pub fn get_locked(&self, name: &str) -> Option<&Package> {
        let name = canonicalize_name(name);
        self.locked_packages.iter().find(|p| p.name == name)
    }
}
