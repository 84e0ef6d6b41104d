use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::package::{Dependency, Marker, Package};

/// How a resolved package is reached from the root requirements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitivePackageInfo {
    /// Longest distance from a root requirement (root requirements are 0)
    pub depth: usize,
    /// Root dependency groups that pull the package in
    pub groups: BTreeSet<String>,
    /// Union of the path markers under which the package is needed
    pub marker: Marker,
    /// Only reachable through optional root requirements
    pub optional: bool,
    /// Root extras that pull the package in
    pub extras: BTreeSet<String>,
    /// Extras of this package requested by its dependents
    pub activated: BTreeSet<String>,
}

impl TransitivePackageInfo {
    fn from_path(path: &PathInfo, activated: &BTreeSet<String>) -> Self {
        Self {
            depth: path.depth,
            groups: path.groups.clone(),
            marker: path.marker.clone(),
            optional: path.optional,
            extras: path.extras.clone(),
            activated: activated.clone(),
        }
    }

    /// Fold another path in; returns whether anything changed
    fn merge(&mut self, path: &PathInfo, activated: &BTreeSet<String>) -> bool {
        let before = self.clone();

        self.depth = self.depth.max(path.depth);
        self.groups.extend(path.groups.iter().cloned());
        self.marker = self.marker.clone().or(path.marker.clone());
        self.optional = self.optional && path.optional;
        self.extras.extend(path.extras.iter().cloned());
        self.activated.extend(activated.iter().cloned());

        *self != before
    }
}

#[derive(Debug, Clone)]
struct PathInfo {
    depth: usize,
    groups: BTreeSet<String>,
    marker: Marker,
    optional: bool,
    extras: BTreeSet<String>,
}

/// Walk the resolved graph from the root requirements.
///
/// A name already on the current path is a cycle and is not descended into
/// again. Packages unreachable from the root get no entry.
pub fn walk_dependencies(
    requires: &[Dependency],
    root_extras: &BTreeMap<String, BTreeSet<String>>,
    packages: &[Package],
) -> HashMap<String, TransitivePackageInfo> {
    let by_name: HashMap<&str, &Package> = packages.iter().map(|p| (p.name.as_str(), p)).collect();
    let mut infos = HashMap::new();

    for dependency in requires {
        let extras = if dependency.optional {
            root_extras
                .iter()
                .filter(|(_, members)| members.contains(&dependency.name))
                .map(|(extra, _)| extra.clone())
                .collect()
        } else {
            BTreeSet::new()
        };

        let path = PathInfo {
            depth: 0,
            groups: dependency.groups.clone(),
            marker: dependency.marker.clone(),
            optional: dependency.optional,
            extras,
        };

        let mut stack = Vec::new();
        visit(&by_name, dependency, &path, &mut stack, &mut infos);
    }

    infos
}

fn visit(
    by_name: &HashMap<&str, &Package>,
    dependency: &Dependency,
    path: &PathInfo,
    stack: &mut Vec<String>,
    infos: &mut HashMap<String, TransitivePackageInfo>,
) {
    let Some(package) = by_name.get(dependency.name.as_str()) else {
        return;
    };

    if stack.contains(&package.name) {
        log::trace!("Dependency cycle through {} terminated", package.name);
        return;
    }

    let changed = match infos.get_mut(&package.name) {
        Some(info) => info.merge(path, &dependency.extras),
        None => {
            infos.insert(
                package.name.clone(),
                TransitivePackageInfo::from_path(path, &dependency.extras),
            );
            true
        }
    };
    if !changed {
        return;
    }

    let activated = infos
        .get(&package.name)
        .map(|info| info.activated.clone())
        .unwrap_or_default();

    let mut children: Vec<&Dependency> = package.requires().collect();
    for extra in &activated {
        if let Some(members) = package.extras.get(extra) {
            children.extend(members.iter());
        }
    }

    stack.push(package.name.clone());
    for child in children {
        let child_path = PathInfo {
            depth: path.depth + 1,
            groups: path.groups.clone(),
            marker: path.marker.clone().and(child.marker.clone()),
            optional: path.optional,
            extras: path.extras.clone(),
        };
        visit(by_name, child, &child_path, stack, infos);
    }
    stack.pop();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(name: &str) -> Dependency {
        Dependency::new(name, "*").unwrap()
    }

    fn pkg(name: &str, deps: &[&str]) -> Package {
        let mut package = Package::parse(name, "1.0").unwrap();
        for d in deps {
            package = package.with_dependency(dep(d));
        }
        package
    }

    #[test]
    fn test_depth_is_longest_path() {
        let packages = vec![pkg("a", &["b", "c"]), pkg("b", &["c"]), pkg("c", &[])];
        let infos = walk_dependencies(&[dep("a")], &BTreeMap::new(), &packages);

        assert_eq!(infos["a"].depth, 0);
        assert_eq!(infos["b"].depth, 1);
        assert_eq!(infos["c"].depth, 2);
    }

    #[test]
    fn test_cycle_terminates() {
        let packages = vec![pkg("a", &["b"]), pkg("b", &["a"])];
        let infos = walk_dependencies(&[dep("a")], &BTreeMap::new(), &packages);

        assert_eq!(infos.len(), 2);
        assert_eq!(infos["a"].depth, 0);
        assert_eq!(infos["b"].depth, 1);
    }

    #[test]
    fn test_groups_and_optional_propagate() {
        let packages = vec![pkg("pytest", &["pluggy"]), pkg("pluggy", &[]), pkg("pysocks", &[])];
        let requires = vec![
            dep("pytest").with_group("dev"),
            dep("pysocks").with_optional(true),
        ];
        let mut extras = BTreeMap::new();
        extras.insert("socks".to_string(), ["pysocks".to_string()].into_iter().collect());

        let infos = walk_dependencies(&requires, &extras, &packages);

        assert!(infos["pluggy"].groups.contains("dev"));
        assert!(!infos["pluggy"].optional);
        assert!(infos["pysocks"].optional);
        assert!(infos["pysocks"].extras.contains("socks"));
    }

    #[test]
    fn test_activated_extras_are_followed() {
        let requests = pkg("requests", &[]).with_extra("socks", vec![dep("pysocks").with_optional(true)]);
        let packages = vec![requests, pkg("pysocks", &[])];
        let requires = vec![dep("requests").with_extras(["socks"])];

        let infos = walk_dependencies(&requires, &BTreeMap::new(), &packages);
        assert_eq!(infos["pysocks"].depth, 1);
        assert!(infos["requests"].activated.contains("socks"));
    }

    #[test]
    fn test_markers_combine() {
        let packages = vec![pkg("a", &[])];
        let linux = Marker::parse("sys_platform == \"linux\"").unwrap();
        let win = Marker::parse("sys_platform == \"win32\"").unwrap();
        let requires = vec![
            dep("a").with_marker(linux.clone()),
            dep("a").with_marker(win.clone()),
        ];

        let infos = walk_dependencies(&requires, &BTreeMap::new(), &packages);
        assert_eq!(infos["a"].marker, linux.or(win));
    }
}
