//! JSON simple repository API client (PEP 691).

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use url::Url;

use pyx_semver::{Version, VersionConstraint};

use super::metadata::{read_sdist_metadata, read_wheel_metadata};
use super::{CoreMetadata, LinkSource, MetadataProvider};
use crate::cache::find_project_root;
use crate::downloader::ArchiveExtractor;
use crate::http::{HttpClient, HttpError};
use crate::package::{Link, Package, PackageSource};
use crate::util::canonicalize_name;
use crate::{PyxError, Result};

pub const PYPI_SIMPLE_URL: &str = "https://pypi.org/simple/";

const SIMPLE_JSON: &str = "application/vnd.pypi.simple.v1+json";

#[derive(Debug, Clone, Default, Deserialize)]
struct ProjectPage {
    #[serde(default)]
    files: Vec<ProjectFile>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProjectFile {
    filename: String,
    url: String,
    #[serde(default)]
    hashes: BTreeMap<String, String>,
    #[serde(rename = "requires-python", default)]
    requires_python: Option<String>,
    #[serde(default)]
    yanked: serde_json::Value,
    #[serde(rename = "core-metadata", alias = "dist-info-metadata", default)]
    core_metadata: serde_json::Value,
}

impl ProjectFile {
    fn is_yanked(&self) -> bool {
        self.yanked.as_bool().unwrap_or(self.yanked.is_string())
    }

    fn has_core_metadata(&self) -> bool {
        !(self.core_metadata.is_null() || self.core_metadata == serde_json::Value::Bool(false))
    }
}

/// A package index speaking the JSON simple API
///
/// The synchronous [`MetadataProvider`] methods drive the async client on
/// the runtime the repository was created in, so they must be called from
/// a blocking context such as `spawn_blocking`.
pub struct SimpleRepository {
    name: String,
    url: Url,
    /// `None` for the default index
    source: Option<PackageSource>,
    client: Arc<HttpClient>,
    handle: Option<Handle>,
    pages: Mutex<HashMap<String, Arc<ProjectPage>>>,
}

impl SimpleRepository {
    pub fn new(name: &str, url: &str, client: Arc<HttpClient>) -> Result<Self> {
        let mut url = url.to_string();
        if !url.ends_with('/') {
            url.push('/');
        }
        let parsed = Url::parse(&url)
            .map_err(|e| PyxError::Config(format!("Invalid repository URL {}: {}", url, e)))?;

        Ok(Self {
            name: name.to_string(),
            url: parsed,
            source: None,
            client,
            handle: Handle::try_current().ok(),
            pages: Mutex::new(HashMap::new()),
        })
    }

    pub fn pypi(client: Arc<HttpClient>) -> Result<Self> {
        Self::new("PyPI", PYPI_SIMPLE_URL, client)
    }

    /// Mark packages from this index with a `legacy` source
    pub fn as_secondary(mut self) -> Self {
        self.source = Some(PackageSource::legacy(&self.name, self.url.as_str()));
        self
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        match &self.handle {
            Some(handle) => Ok(handle.block_on(future)),
            None => {
                let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
                Ok(runtime.block_on(future))
            }
        }
    }

    async fn project_page(&self, name: &str) -> Result<Arc<ProjectPage>> {
        let name = canonicalize_name(name);
        if let Some(page) = self.pages.lock().ok().and_then(|pages| pages.get(&name).cloned()) {
            return Ok(page);
        }

        let url = self.page_url(&name)?;
        log::debug!("Fetching {}", url);

        let page = match self.client.get_json_with_accept::<ProjectPage>(url.as_str(), SIMPLE_JSON).await {
            Ok(page) => page,
            Err(HttpError::HttpStatus { status: 404, .. }) => ProjectPage::default(),
            Err(e) => return Err(e.into()),
        };

        let page = Arc::new(page);
        if let Ok(mut pages) = self.pages.lock() {
            pages.insert(name, page.clone());
        }
        Ok(page)
    }

    fn page_url(&self, name: &str) -> Result<Url> {
        self.url
            .join(&format!("{}/", canonicalize_name(name)))
            .map_err(|e| PyxError::Config(e.to_string()))
    }

    /// File URLs may be relative to the project page
    fn to_link(page_url: &Url, file: &ProjectFile) -> Link {
        let url = page_url
            .join(&file.url)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| file.url.clone());

        let mut link = Link::new(url).with_yanked(file.is_yanked());
        for (name, value) in &file.hashes {
            link = link.with_hash(name.as_str(), value.as_str());
        }
        if let Some(requires_python) = &file.requires_python {
            link = link.with_requires_python(requires_python.as_str());
        }
        link
    }

    /// Links of every release, grouped by version
    async fn releases(&self, name: &str) -> Result<Vec<(Version, Vec<(Link, bool)>)>> {
        let page = self.project_page(name).await?;
        let page_url = self.page_url(name)?;
        let mut releases: Vec<(Version, Vec<(Link, bool)>)> = Vec::new();

        for file in &page.files {
            let link = Self::to_link(&page_url, file);
            let Some(version) = link.version() else {
                log::trace!("Skipping {}: no version in file name", file.filename);
                continue;
            };
            match releases.iter_mut().find(|(v, _)| *v == version) {
                Some((_, links)) => links.push((link, file.has_core_metadata())),
                None => releases.push((version, vec![(link, file.has_core_metadata())])),
            }
        }

        Ok(releases)
    }

    async fn fetch_packages(&self, name: &str, constraint: &VersionConstraint) -> Result<Vec<Package>> {
        let mut packages = Vec::new();

        for (version, links) in self.releases(name).await? {
            if !constraint.allows(&version) {
                continue;
            }
            // A release with only yanked files is only chosen when pinned exactly
            if links.iter().all(|(link, _)| link.yanked) && constraint.as_exact().is_none() {
                continue;
            }

            let mut package = Package::new(name, version);
            if let Some(requires_python) = links.iter().find_map(|(link, _)| link.requires_python.as_deref()) {
                package = package.with_python_versions(requires_python);
            }
            if let Some(source) = &self.source {
                package = package.with_source(source.clone());
            }
            for (link, _) in &links {
                if let Some((hash_name, value)) = link.preferred_hash() {
                    package = package.with_file(link.filename(), format!("{}:{}", hash_name, value));
                }
            }
            packages.push(package);
        }

        Ok(packages)
    }

    async fn fetch_metadata(&self, package: &Package) -> Result<Package> {
        let releases = self.releases(&package.name).await?;
        let Some((_, links)) = releases.into_iter().find(|(v, _)| *v == package.version) else {
            return Ok(package.clone());
        };

        let published = links
            .iter()
            .find(|(link, has_metadata)| *has_metadata && link.is_wheel())
            .map(|(link, _)| link.clone());

        let metadata = match published {
            Some(link) => {
                let metadata_url = format!("{}.metadata", link.url_without_fragment());
                let text = self.client.get(&metadata_url).await?.text().await.map_err(HttpError::from)?;
                CoreMetadata::parse(&text)?
            }
            None => {
                let links: Vec<Link> = links.into_iter().map(|(link, _)| link).collect();
                self.metadata_from_archive(package, &links).await?
            }
        };
        let metadata = metadata.into_package()?;

        let mut completed = package.clone();
        completed.description = metadata.description;
        completed.python_versions = metadata.python_versions;
        completed.dependencies = metadata.dependencies;
        completed.extras = metadata.extras;
        Ok(completed)
    }

    /// Read metadata out of a release artifact, preferring a wheel over an sdist
    async fn metadata_from_archive(&self, package: &Package, links: &[Link]) -> Result<CoreMetadata> {
        let unavailable = |reason: String| PyxError::MetadataUnavailable {
            package: package.to_string(),
            reason,
        };

        let by_preference = |wheel: bool| {
            links
                .iter()
                .filter(move |link| if wheel { link.is_wheel() } else { link.is_sdist() })
                .min_by_key(|link| link.yanked)
        };
        let Some(link) = by_preference(true).or_else(|| by_preference(false)) else {
            return Err(unavailable("no wheel or source archive is published".to_string()));
        };

        log::debug!("No core metadata published for {}, inspecting {}", package, link.filename());
        let scratch = tempfile::tempdir()?;
        let archive = match link.file_path() {
            Some(path) => path,
            None => {
                let dest = scratch.path().join(link.filename());
                self.client
                    .download(link.url_without_fragment(), &dest, None::<fn(u64, u64)>)
                    .await?;
                dest
            }
        };

        if link.is_wheel() {
            return read_wheel_metadata(&archive);
        }

        let extracted = scratch.path().join("src");
        ArchiveExtractor::extract(&archive, &extracted)?;
        let metadata = read_sdist_metadata(&find_project_root(&extracted))?;
        if !metadata.has_static_requirements() {
            return Err(unavailable(format!(
                "{} does not declare its requirements statically",
                link.filename()
            )));
        }
        Ok(metadata)
    }
}

impl MetadataProvider for SimpleRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn find_packages(&self, name: &str, constraint: &VersionConstraint) -> Result<Vec<Package>> {
        self.block_on(self.fetch_packages(name, constraint))?
    }

    fn complete_package(&self, package: &Package) -> Result<Package> {
        self.block_on(self.fetch_metadata(package))?
    }
}

#[async_trait]
impl LinkSource for SimpleRepository {
    async fn find_links_for_package(&self, package: &Package) -> Result<Vec<Link>> {
        Ok(self
            .releases(&package.name)
            .await?
            .into_iter()
            .find(|(version, _)| *version == package.version)
            .map(|(_, links)| links.into_iter().map(|(link, _)| link).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
        "meta": {"api-version": "1.1"},
        "name": "demo",
        "files": [
            {"filename": "demo-1.0.tar.gz", "url": "../../packages/demo-1.0.tar.gz",
             "hashes": {"sha256": "aaa"}, "yanked": false},
            {"filename": "demo-1.0-py3-none-any.whl", "url": "https://files.example.com/demo-1.0-py3-none-any.whl",
             "hashes": {"sha256": "bbb"}, "requires-python": ">=3.8", "core-metadata": {"sha256": "ccc"}},
            {"filename": "demo-2.0-py3-none-any.whl", "url": "https://files.example.com/demo-2.0-py3-none-any.whl",
             "hashes": {"sha256": "ddd"}, "yanked": "broken release"}
        ]
    }"#;

    fn repository() -> SimpleRepository {
        let repo = SimpleRepository::new("test", "https://index.example.com/simple", Arc::new(HttpClient::new().unwrap())).unwrap();
        let page: ProjectPage = serde_json::from_str(PAGE).unwrap();
        repo.pages.lock().unwrap().insert("demo".to_string(), Arc::new(page));
        repo
    }

    #[tokio::test]
    async fn test_links_resolve_relative_urls() {
        let repo = repository();
        let package = Package::parse("demo", "1.0").unwrap();
        let links = repo.find_links_for_package(&package).await.unwrap();

        assert_eq!(links.len(), 2);
        assert_eq!(links[0].url, "https://index.example.com/packages/demo-1.0.tar.gz");
        assert_eq!(links[1].requires_python.as_deref(), Some(">=3.8"));
    }

    #[tokio::test]
    async fn test_yanked_releases_need_exact_pin() {
        let repo = repository();

        let any = repo.fetch_packages("demo", &VersionConstraint::any()).await.unwrap();
        assert_eq!(any.len(), 1);
        assert_eq!(any[0].files.len(), 2);
        assert!(any[0].known_hashes().contains("sha256:bbb"));

        let pinned = repo
            .fetch_packages("demo", &VersionConstraint::parse("==2.0").unwrap())
            .await
            .unwrap();
        assert_eq!(pinned.len(), 1);
    }

    #[tokio::test]
    async fn test_secondary_source() {
        let repo = repository().as_secondary();
        let packages = repo.fetch_packages("demo", &VersionConstraint::any()).await.unwrap();
        let source = packages[0].source.as_ref().unwrap();
        assert_eq!(source.reference.as_deref(), Some("test"));
        assert_eq!(source.url, "https://index.example.com/simple/");
    }

    fn local_repository(temp: &tempfile::TempDir, files: &str) -> SimpleRepository {
        let index = Url::from_directory_path(temp.path()).unwrap();
        let repo = SimpleRepository::new("local", index.as_str(), Arc::new(HttpClient::new().unwrap())).unwrap();
        let page: ProjectPage = serde_json::from_str(&format!(r#"{{"files": [{}]}}"#, files)).unwrap();
        repo.pages.lock().unwrap().insert("demo".to_string(), Arc::new(page));
        repo
    }

    fn file_entry(path: &std::path::Path) -> String {
        format!(
            r#"{{"filename": "{}", "url": "{}"}}"#,
            path.file_name().unwrap().to_string_lossy(),
            Url::from_file_path(path).unwrap()
        )
    }

    #[tokio::test]
    async fn test_requires_python_known_before_completion() {
        let repo = repository();
        let packages = repo.fetch_packages("demo", &VersionConstraint::any()).await.unwrap();
        assert_eq!(packages[0].python_versions, ">=3.8");
    }

    #[tokio::test]
    async fn test_metadata_read_from_wheel_without_core_metadata() {
        use std::io::Write;

        let temp = tempfile::TempDir::new().unwrap();
        let wheel = temp.path().join("demo-1.0-py3-none-any.whl");
        let mut writer = zip::ZipWriter::new(std::fs::File::create(&wheel).unwrap());
        writer
            .start_file("demo-1.0.dist-info/METADATA", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer
            .write_all(b"Metadata-Version: 2.1\nName: demo\nVersion: 1.0\nRequires-Dist: idna>=2.5\n")
            .unwrap();
        writer.finish().unwrap();

        let repo = local_repository(&temp, &file_entry(&wheel));
        let package = Package::parse("demo", "1.0").unwrap();
        let completed = repo.fetch_metadata(&package).await.unwrap();

        let requires: Vec<&str> = completed.requires().map(|d| d.name.as_str()).collect();
        assert_eq!(requires, vec!["idna"]);
    }

    #[tokio::test]
    async fn test_sdist_with_dynamic_requirements_fails() {
        let temp = tempfile::TempDir::new().unwrap();
        let tree = temp.path().join("tree").join("demo-1.0");
        std::fs::create_dir_all(&tree).unwrap();
        std::fs::write(
            tree.join("PKG-INFO"),
            "Metadata-Version: 2.2\nName: demo\nVersion: 1.0\nDynamic: Requires-Dist\n",
        )
        .unwrap();

        let sdist = temp.path().join("demo-1.0.tar.gz");
        let encoder = flate2::write::GzEncoder::new(std::fs::File::create(&sdist).unwrap(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all("demo-1.0", &tree).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let repo = local_repository(&temp, &file_entry(&sdist));
        let result = repo.fetch_metadata(&Package::parse("demo", "1.0").unwrap()).await;
        assert!(matches!(result, Err(PyxError::MetadataUnavailable { .. })));
    }
}
