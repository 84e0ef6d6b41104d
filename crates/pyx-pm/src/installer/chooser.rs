use std::collections::BTreeSet;

use pyx_semver::Version;

use crate::env::{Environment, Wheel};
use crate::package::{Link, Package};
use crate::repository::LinkSource;
use crate::{PyxError, Result};

/// Artifact kinds that are never installed
const IGNORED_EXTENSIONS: &[&str] = &[".egg", ".exe", ".msi", ".rpm", ".srpm"];

/// Matches every package in the binary preference lists
pub const ALL_PACKAGES: &str = ":all:";

/// Ranking of one candidate; greater is better
type SortKey = (u8, Option<Version>, Option<(u64, String)>, i64);

/// Picks the artifact to install for a package
pub struct Chooser<'a> {
    links: &'a dyn LinkSource,
    env: &'a dyn Environment,
    no_binary: BTreeSet<String>,
    only_binary: BTreeSet<String>,
}

impl<'a> Chooser<'a> {
    pub fn new(links: &'a dyn LinkSource, env: &'a dyn Environment) -> Self {
        Self {
            links,
            env,
            no_binary: BTreeSet::new(),
            only_binary: BTreeSet::new(),
        }
    }

    /// Packages that must be built from source
    pub fn with_no_binary<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.no_binary = names.into_iter().map(|n| normalize(n.as_ref())).collect();
        self
    }

    /// Packages that must not be built from source
    pub fn with_only_binary<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.only_binary = names.into_iter().map(|n| normalize(n.as_ref())).collect();
        self
    }

    pub async fn choose_for(&self, package: &Package) -> Result<Link> {
        let links = self.get_links(package).await?;

        let mut candidates = Vec::new();
        for link in links {
            let filename = link.filename();
            if IGNORED_EXTENSIONS.iter().any(|ext| filename.ends_with(ext)) {
                continue;
            }

            if link.is_wheel() {
                if self.wants_source(&package.name) {
                    log::debug!("Skipping {} as binaries are disabled for {}", filename, package.name);
                    continue;
                }
                let Ok(wheel) = Wheel::parse(&filename) else {
                    log::debug!("Skipping invalid wheel {}", filename);
                    continue;
                };
                if !wheel.is_supported_by(self.env.supported_tags()) {
                    log::debug!("Skipping wheel {} as it is not supported by the current environment", filename);
                    continue;
                }
            } else if self.wants_binary(&package.name) {
                log::debug!("Skipping {} as only binaries are allowed for {}", filename, package.name);
                continue;
            } else if !link.is_sdist() {
                continue;
            }

            candidates.push(link);
        }

        // Yanked files are only used when nothing else remains
        if candidates.iter().any(|link| !link.yanked) {
            candidates.retain(|link| !link.yanked);
        } else if let Some(link) = candidates.first() {
            log::warn!("The file chosen for {} ({}) is yanked", package.pretty_name, link.filename());
        }

        let mut chosen: Option<(SortKey, Link)> = None;
        for link in candidates {
            let key = self.sort_key(&link);
            let better = match &chosen {
                Some((best, _)) => key > *best,
                None => true,
            };
            if better {
                chosen = Some((key, link));
            }
        }

        chosen.map(|(_, link)| link).ok_or_else(|| PyxError::NoCandidates {
            name: package.pretty_name.clone(),
            version: package.version.to_string(),
        })
    }

    /// Links of the package, restricted to known hashes when it pins any
    async fn get_links(&self, package: &Package) -> Result<Vec<Link>> {
        let links = self.links.find_links_for_package(package).await?;

        let known_hashes = package.known_hashes();
        if known_hashes.is_empty() {
            return Ok(links);
        }

        let selected: Vec<Link> = links
            .into_iter()
            .filter(|link| link.hashes.is_empty() || link.hash_strings().iter().any(|h| known_hashes.contains(h.as_str())))
            .collect();

        if selected.is_empty() {
            return Err(PyxError::NoCandidates {
                name: package.pretty_name.clone(),
                version: package.version.to_string(),
            });
        }

        Ok(selected)
    }

    fn sort_key(&self, link: &Link) -> SortKey {
        if link.is_wheel() {
            if let Ok(wheel) = Wheel::parse(&link.filename()) {
                let rank = wheel
                    .min_support_index(self.env.supported_tags())
                    .map(|index| -(index as i64))
                    .unwrap_or(i64::MIN);
                return (1, Some(wheel.version), wheel.build_tag, rank);
            }
        }

        (0, link.version(), None, i64::MIN)
    }

    fn wants_source(&self, name: &str) -> bool {
        self.no_binary.contains(ALL_PACKAGES) || self.no_binary.contains(name)
    }

    fn wants_binary(&self, name: &str) -> bool {
        self.only_binary.contains(ALL_PACKAGES) || self.only_binary.contains(name)
    }
}

fn normalize(name: &str) -> String {
    if name == ALL_PACKAGES {
        name.to_string()
    } else {
        crate::util::canonicalize_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MockEnvironment;
    use crate::repository::ArrayRepository;

    fn repository(links: Vec<Link>) -> ArrayRepository {
        ArrayRepository::new("test")
            .with_package(Package::parse("demo", "1.0").unwrap())
            .with_links("demo", "1.0", links)
            .unwrap()
    }

    fn demo() -> Package {
        Package::parse("demo", "1.0").unwrap()
    }

    #[tokio::test]
    async fn test_prefers_most_specific_wheel() {
        let env = MockEnvironment::new("/venv");
        let repo = repository(vec![
            Link::new("https://files.example.com/demo-1.0.tar.gz"),
            Link::new("https://files.example.com/demo-1.0-py3-none-any.whl"),
            Link::new("https://files.example.com/demo-1.0-cp311-cp311-manylinux_2_17_x86_64.whl"),
            Link::new("https://files.example.com/demo-1.0-cp311-cp311-win_amd64.whl"),
        ]);
        let chooser = Chooser::new(&repo, &env);

        let first = chooser.choose_for(&demo()).await.unwrap();
        assert_eq!(first.filename(), "demo-1.0-cp311-cp311-manylinux_2_17_x86_64.whl");
        for _ in 0..5 {
            assert_eq!(chooser.choose_for(&demo()).await.unwrap(), first);
        }
    }

    #[tokio::test]
    async fn test_build_tag_breaks_ties() {
        let env = MockEnvironment::new("/venv");
        let repo = repository(vec![
            Link::new("https://files.example.com/demo-1.0-1-py3-none-any.whl"),
            Link::new("https://files.example.com/demo-1.0-2-py3-none-any.whl"),
        ]);

        let chosen = Chooser::new(&repo, &env).choose_for(&demo()).await.unwrap();
        assert_eq!(chosen.filename(), "demo-1.0-2-py3-none-any.whl");
    }

    #[tokio::test]
    async fn test_falls_back_to_sdist() {
        let env = MockEnvironment::new("/venv");
        let repo = repository(vec![
            Link::new("https://files.example.com/demo-1.0-cp27-cp27m-win32.whl"),
            Link::new("https://files.example.com/demo-1.0.tar.gz"),
            Link::new("https://files.example.com/demo-1.0.win32.exe"),
        ]);

        let chosen = Chooser::new(&repo, &env).choose_for(&demo()).await.unwrap();
        assert_eq!(chosen.filename(), "demo-1.0.tar.gz");
    }

    #[tokio::test]
    async fn test_binary_preferences() {
        let env = MockEnvironment::new("/venv");
        let repo = repository(vec![
            Link::new("https://files.example.com/demo-1.0.tar.gz"),
            Link::new("https://files.example.com/demo-1.0-py3-none-any.whl"),
        ]);

        let chosen = Chooser::new(&repo, &env)
            .with_no_binary([":all:"])
            .choose_for(&demo())
            .await
            .unwrap();
        assert!(chosen.is_sdist());

        let source_only = repository(vec![Link::new("https://files.example.com/demo-1.0.tar.gz")]);
        let result = Chooser::new(&source_only, &env)
            .with_only_binary(["Demo"])
            .choose_for(&demo())
            .await;
        assert!(matches!(result, Err(PyxError::NoCandidates { .. })));
    }

    #[tokio::test]
    async fn test_known_hashes_filter_links() {
        let env = MockEnvironment::new("/venv");
        let repo = repository(vec![
            Link::new("https://files.example.com/demo-1.0-cp311-cp311-manylinux_2_17_x86_64.whl#sha256=bad"),
            Link::new("https://files.example.com/demo-1.0-py3-none-any.whl#sha256=good"),
        ]);
        let package = demo().with_file("demo-1.0-py3-none-any.whl", "sha256:good");

        let chosen = Chooser::new(&repo, &env).choose_for(&package).await.unwrap();
        assert_eq!(chosen.filename(), "demo-1.0-py3-none-any.whl");

        let pinned = demo().with_file("demo-1.0.tar.gz", "sha256:other");
        let result = Chooser::new(&repo, &env).choose_for(&pinned).await;
        match result {
            Err(PyxError::NoCandidates { name, version }) => {
                assert_eq!(name, "demo");
                assert_eq!(version, "1.0");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_yanked_only_as_last_resort() {
        let env = MockEnvironment::new("/venv");
        let repo = repository(vec![
            Link::new("https://files.example.com/demo-1.0-cp311-cp311-manylinux_2_17_x86_64.whl").with_yanked(true),
            Link::new("https://files.example.com/demo-1.0-py3-none-any.whl"),
        ]);

        let chosen = Chooser::new(&repo, &env).choose_for(&demo()).await.unwrap();
        assert_eq!(chosen.filename(), "demo-1.0-py3-none-any.whl");
    }
}
