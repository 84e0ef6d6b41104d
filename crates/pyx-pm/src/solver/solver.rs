use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Instant;

use pyx_semver::VersionConstraint;

use super::request::Request;
use super::transaction::Transaction;
use super::walk::{walk_dependencies, TransitivePackageInfo};
use crate::package::{Dependency, Package};
use crate::repository::MetadataProvider;
use crate::{PyxError, Result};

/// Result of dependency resolution.
///
/// Holds one package per name together with how it is reached from the
/// root. Use [`Transaction`] to turn it into operations.
#[derive(Debug, Clone, Default)]
pub struct SolverResult {
    pub packages: Vec<Package>,
    pub infos: HashMap<String, TransitivePackageInfo>,
}

impl SolverResult {
    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.name == name)
    }

    pub fn info(&self, name: &str) -> Option<&TransitivePackageInfo> {
        self.infos.get(name)
    }
}

/// Lookups memoized for the duration of one resolution
pub struct SolverContext<'a> {
    provider: &'a dyn MetadataProvider,
    candidates: HashMap<String, Vec<Package>>,
    completed: HashMap<String, Package>,
}

impl<'a> SolverContext<'a> {
    pub fn new(provider: &'a dyn MetadataProvider) -> Self {
        Self {
            provider,
            candidates: HashMap::new(),
            completed: HashMap::new(),
        }
    }

    /// Every known release of a package, newest first
    pub fn find_packages(&mut self, name: &str) -> Result<&[Package]> {
        if !self.candidates.contains_key(name) {
            let mut packages = self.provider.find_packages(name, &VersionConstraint::any())?;
            packages.sort_by(|a, b| b.version.cmp(&a.version));
            log::debug!("Found {} candidates for {}", packages.len(), name);
            self.candidates.insert(name.to_string(), packages);
        }
        Ok(self.candidates.get(name).map(Vec::as_slice).unwrap_or_default())
    }

    /// The package with its dependencies loaded
    pub fn complete(&mut self, package: &Package) -> Result<Package> {
        let key = Self::key(package);
        if let Some(completed) = self.completed.get(&key) {
            return Ok(completed.clone());
        }

        let completed = self.provider.complete_package(package)?;
        self.completed.insert(key, completed.clone());
        Ok(completed)
    }

    fn key(package: &Package) -> String {
        match &package.source {
            Some(source) => format!("{} {} {}", package.unique_name(), source.kind.as_str(), source.url),
            None => package.unique_name(),
        }
    }
}

#[derive(Debug, Clone)]
struct Requirement {
    dependency: Dependency,
    /// Who asked for it, from the root down
    chain: Vec<String>,
}

impl Requirement {
    fn describe(&self) -> String {
        format!("{} ({})", self.dependency.pretty_name, self.dependency.pretty_constraint)
    }

    fn failure(&self, reason: String) -> PyxError {
        let mut chain = self.chain.clone();
        chain.push(self.describe());
        PyxError::ResolutionFailure {
            message: format!("Because {} {}, version solving failed.", chain.join(" -> "), reason),
            chain,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SearchState {
    decisions: Vec<Package>,
    constraints: HashMap<String, VersionConstraint>,
    extras: HashMap<String, BTreeSet<String>>,
    pending: VecDeque<Requirement>,
}

impl SearchState {
    fn decided(&self, name: &str) -> Option<&Package> {
        self.decisions.iter().find(|p| p.name == name)
    }

    /// Queue the dependencies of `package` that `extras` newly switches on
    fn activate(&mut self, package: &Package, extras: &BTreeSet<String>, chain: &[String]) {
        let active = self.extras.entry(package.name.clone()).or_default();
        let fresh: Vec<String> = extras.iter().filter(|e| !active.contains(*e)).cloned().collect();
        active.extend(fresh.iter().cloned());

        for extra in fresh {
            match package.extras.get(&extra) {
                Some(members) => {
                    for member in members {
                        self.pending.push_back(Requirement {
                            dependency: member.clone().with_optional(false),
                            chain: chain.to_vec(),
                        });
                    }
                }
                None => log::warn!("{} does not provide the extra '{}'", package, extra),
            }
        }
    }

    fn decide(&mut self, package: Package, requirement: &Requirement) {
        let mut chain = requirement.chain.clone();
        chain.push(package.to_string());

        for dependency in package.requires() {
            self.pending.push_back(Requirement {
                dependency: dependency.clone(),
                chain: chain.clone(),
            });
        }
        self.activate(&package, &requirement.dependency.extras, &chain);
        self.decisions.push(package);
    }
}

/// Backtracking dependency resolver
pub struct Solver<'a> {
    provider: &'a dyn MetadataProvider,
}

impl<'a> Solver<'a> {
    pub fn new(provider: &'a dyn MetadataProvider) -> Self {
        Self { provider }
    }

    /// Resolve the request to one package per name.
    ///
    /// Root requirements of every group, optional ones included, are
    /// resolved so the result fits any group or extra selection.
    pub fn resolve(&self, request: &Request) -> Result<SolverResult> {
        let start = Instant::now();
        let mut context = SolverContext::new(self.provider);

        let mut state = SearchState::default();
        for dependency in &request.requires {
            state.pending.push_back(Requirement {
                dependency: dependency.clone(),
                chain: vec![request.root.clone()],
            });
        }

        let state = self.search(&mut context, request, state)?;
        let infos = walk_dependencies(&request.requires, &request.extras, &state.decisions);

        log::info!(
            "Resolved {} packages in {:.3} seconds",
            state.decisions.len(),
            start.elapsed().as_secs_f64()
        );

        Ok(SolverResult {
            packages: state.decisions,
            infos,
        })
    }

    /// Resolve and diff against the locked and installed package sets
    pub fn solve(&self, request: &Request, installed: &[Package]) -> Result<(SolverResult, Transaction)> {
        let result = self.resolve(request)?;
        let transaction = Transaction::new(
            request.locked_packages.clone(),
            result.packages.clone(),
            result.infos.clone(),
            installed.to_vec(),
            &request.root,
        );
        Ok((result, transaction))
    }

    fn search(&self, context: &mut SolverContext<'_>, request: &Request, mut state: SearchState) -> Result<SearchState> {
        while let Some(requirement) = state.pending.pop_front() {
            let dependency = &requirement.dependency;
            let name = dependency.name.clone();
            if name == request.root {
                continue;
            }

            let constraint = match state.constraints.get(&name) {
                Some(existing) => existing.intersect(&dependency.constraint),
                None => dependency.constraint.clone(),
            };
            if constraint.is_empty() {
                return Err(requirement.failure(format!(
                    "and no version of {} satisfies every requirement on it",
                    dependency.pretty_name
                )));
            }
            state.constraints.insert(name.clone(), constraint.clone());

            if let Some(decided) = state.decided(&name).cloned() {
                if !dependency.accepts(&decided) || !constraint.allows(&decided.version) {
                    return Err(requirement.failure(format!("conflicts with {}", decided)));
                }
                let mut chain = requirement.chain.clone();
                chain.push(decided.to_string());
                state.activate(&decided, &dependency.extras, &chain);
                continue;
            }

            let candidates = self.candidates(context, request, dependency, &constraint)?;
            if candidates.is_empty() {
                return Err(requirement.failure("and no matching version exists".to_string()));
            }

            let mut last_error = None;
            for (candidate, locked) in candidates {
                let package = if locked {
                    candidate
                } else {
                    context.complete(&candidate)?
                };
                // Indexes may only reveal the interpreter range once metadata is fetched
                if !Self::supports_python(request, &package) {
                    log::trace!("Skipping {}: requires Python {}", package, package.python_versions);
                    if last_error.is_none() {
                        last_error = Some(requirement.failure(format!(
                            "but {} requires Python {}",
                            package, package.python_versions
                        )));
                    }
                    continue;
                }
                log::trace!("Trying {}", package);

                let mut next = state.clone();
                next.decide(package, &requirement);
                match self.search(context, request, next) {
                    Ok(solved) => return Ok(solved),
                    Err(e @ PyxError::ResolutionFailure { .. }) => {
                        log::trace!("Backtracking: {}", e);
                        last_error = Some(e);
                    }
                    Err(e) => return Err(e),
                }
            }

            return Err(last_error.unwrap_or_else(|| requirement.failure("and no matching version exists".to_string())));
        }

        Ok(state)
    }

    /// Acceptable releases in preference order, flagged when taken from the lock
    fn candidates(
        &self,
        context: &mut SolverContext<'_>,
        request: &Request,
        dependency: &Dependency,
        constraint: &VersionConstraint,
    ) -> Result<Vec<(Package, bool)>> {
        let mut packages: Vec<Package> = context
            .find_packages(&dependency.name)?
            .iter()
            .filter(|p| dependency.accepts(p) && constraint.allows(&p.version))
            .filter(|p| Self::supports_python(request, p))
            .cloned()
            .collect();

        if !(request.allow_prereleases || constraint.allows_prereleases()) {
            let stable: Vec<Package> = packages.iter().filter(|p| !p.version.is_prerelease()).cloned().collect();
            if !stable.is_empty() {
                packages = stable;
            }
        }

        let mut candidates: Vec<(Package, bool)> = packages.into_iter().map(|p| (p, false)).collect();

        if let Some(locked) = request.get_locked(&dependency.name) {
            if dependency.accepts(locked) && constraint.allows(&locked.version) {
                if !request.is_update_allowed(&dependency.name) {
                    candidates.retain(|(p, _)| p.version != locked.version);
                    candidates.insert(0, (locked.clone(), true));
                } else if dependency.is_direct_origin() && candidates.is_empty() {
                    candidates.push((locked.clone(), true));
                }
            }
        }

        Ok(candidates)
    }

    fn supports_python(request: &Request, package: &Package) -> bool {
        if request.python_versions.is_any() {
            return true;
        }
        match VersionConstraint::parse(&package.python_versions) {
            Ok(supported) => !request.python_versions.intersect(&supported).is_empty(),
            Err(_) => true,
        }
    }
}
