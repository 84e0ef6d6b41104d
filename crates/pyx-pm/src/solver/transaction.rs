use std::collections::{BTreeSet, HashMap};

use super::operation::Operation;
use super::walk::TransitivePackageInfo;
use crate::package::{Package, SourceKind};
use crate::util::is_environment_tool;

/// The difference between a resolved package set and an environment
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    /// Packages of the previous resolution (the lock)
    current_packages: Vec<Package>,
    result_packages: Vec<Package>,
    infos: HashMap<String, TransitivePackageInfo>,
    installed_packages: Vec<Package>,
    root_name: String,
}

impl Transaction {
    pub fn new(
        current_packages: Vec<Package>,
        result_packages: Vec<Package>,
        infos: HashMap<String, TransitivePackageInfo>,
        installed_packages: Vec<Package>,
        root_name: &str,
    ) -> Self {
        Self {
            current_packages,
            result_packages,
            infos,
            installed_packages,
            root_name: root_name.to_string(),
        }
    }

    pub fn result_packages(&self) -> &[Package] {
        &self.result_packages
    }

    pub fn infos(&self) -> &HashMap<String, TransitivePackageInfo> {
        &self.infos
    }

    /// Operations turning the installed set into the result set.
    ///
    /// With `with_uninstalls`, installed packages dropped since the previous
    /// resolution are removed. With `synchronize`, every installed package
    /// outside the result is removed, except the project itself and the
    /// packaging tools the environment ships with.
    pub fn calculate_operations(&self, with_uninstalls: bool, synchronize: bool) -> Vec<Operation> {
        let installed: HashMap<&str, &Package> = self
            .installed_packages
            .iter()
            .map(|p| (p.name.as_str(), p))
            .collect();

        let mut operations = Vec::new();

        for package in &self.result_packages {
            let priority = self.infos.get(&package.name).map(|i| i.depth as u32).unwrap_or(0);

            match installed.get(package.name.as_str()) {
                Some(present) if Self::needs_update(present, package) => {
                    operations.push(Operation::update((*present).clone(), package.clone()).with_priority(priority));
                }
                Some(_) => {
                    operations.push(Operation::install(package.clone()).with_priority(priority).skip("Already installed"));
                }
                None => operations.push(Operation::install(package.clone()).with_priority(priority)),
            }
        }

        if with_uninstalls {
            let result_names: BTreeSet<&str> = self.result_packages.iter().map(|p| p.name.as_str()).collect();
            let mut removed: BTreeSet<String> = BTreeSet::new();

            for current in &self.current_packages {
                if result_names.contains(current.name.as_str()) {
                    continue;
                }
                if let Some(present) = installed.get(current.name.as_str()) {
                    if removed.insert(present.name.clone()) {
                        operations.push(Operation::uninstall((*present).clone()));
                    }
                }
            }

            if synchronize {
                for present in &self.installed_packages {
                    if removed.contains(&present.name)
                        || result_names.contains(present.name.as_str())
                        || present.name == self.root_name
                        || is_environment_tool(&present.name)
                    {
                        continue;
                    }
                    removed.insert(present.name.clone());
                    operations.push(Operation::uninstall(present.clone()));
                }
            }
        }

        operations.sort_by_key(|op| op.sort_key());
        operations
    }

    /// Whether the installed copy differs from the target in version or origin
    fn needs_update(present: &Package, target: &Package) -> bool {
        if present.version != target.version {
            return true;
        }

        // Index packages carry no install-time provenance
        if present.source.is_none() && target.source_kind() == Some(SourceKind::Legacy) {
            return false;
        }

        !present.is_same_source_as(target) || present.develop != target.develop
    }
}
