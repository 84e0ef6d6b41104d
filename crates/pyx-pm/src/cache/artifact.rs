use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::downloader::{hash_file, ArchiveType, ChecksumType};
use crate::env::{Environment, InterpreterInfo, Wheel};
use crate::http::HttpClient;
use crate::package::Link;
use crate::pyproject::canonical_json;
use crate::{PyxError, Result};

/// Anything that can put the bytes behind a URL into a file
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

#[async_trait]
impl ArchiveFetcher for HttpClient {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        self.download(url, dest, None::<fn(u64, u64)>).await?;
        Ok(())
    }
}

/// Downloaded and built distribution archives, keyed per link and interpreter
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    cache_dir: PathBuf,
}

impl ArtifactCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Directory holding the archives for a link.
    ///
    /// The key is split into a short nested path to bound directory fan-out.
    pub fn get_cache_directory_for_link(&self, link: &Link, interpreter: &InterpreterInfo) -> PathBuf {
        let key = cache_key(link, interpreter);
        self.cache_dir
            .join("artifacts")
            .join(&key[0..2])
            .join(&key[2..4])
            .join(&key[4..6])
            .join(&key[6..])
    }

    /// Find the cached archive to use for a link.
    ///
    /// In strict mode only an archive named like the link qualifies;
    /// otherwise the most specific compatible wheel wins, then any source
    /// archive. With a fetcher, a missing archive is downloaded first.
    pub async fn get_cached_archive_for_link(
        &self,
        link: &Link,
        env: &dyn Environment,
        strict: bool,
        download: Option<&dyn ArchiveFetcher>,
    ) -> Result<Option<PathBuf>> {
        let cache_dir = self.get_cache_directory_for_link(link, env.interpreter_info());

        let cached = if strict {
            let path = cache_dir.join(link.filename());
            path.is_file().then_some(path)
        } else {
            best_cached_archive(&cache_dir, env)
        };

        if let Some(path) = cached {
            match self.check_cached(link, &path).await {
                Ok(()) => return Ok(Some(path)),
                Err(PyxError::CacheCorruption { path }) => {
                    log::warn!("Removing corrupted cache entry {}", path.display());
                    tokio::fs::remove_file(&path).await?;
                }
                Err(e) => return Err(e),
            }
        }

        let Some(fetcher) = download else {
            return Ok(None);
        };

        let path = self.download_link(link, &cache_dir, fetcher).await?;
        Ok(Some(path))
    }

    /// A cached file must be non-empty and match the link's hash
    async fn check_cached(&self, link: &Link, path: &Path) -> Result<()> {
        let corrupted = || PyxError::CacheCorruption { path: path.to_path_buf() };

        let metadata = tokio::fs::metadata(path).await?;
        if metadata.len() == 0 {
            return Err(corrupted());
        }

        if path.file_name().map(|n| n.to_string_lossy() == link.filename()) != Some(true) {
            return Ok(());
        }
        if let Some((name, expected)) = link.preferred_hash() {
            if let Some(kind) = ChecksumType::from_name(name) {
                if !hash_file(path, kind).await?.eq_ignore_ascii_case(expected) {
                    return Err(corrupted());
                }
            }
        }

        Ok(())
    }

    async fn download_link(&self, link: &Link, cache_dir: &Path, fetcher: &dyn ArchiveFetcher) -> Result<PathBuf> {
        tokio::fs::create_dir_all(cache_dir).await?;
        let target = cache_dir.join(link.filename());

        // Written under a temporary name, then renamed into place
        let temp = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(cache_dir)?
            .into_temp_path();

        match link.file_path() {
            Some(source) => {
                tokio::fs::copy(&source, &temp).await?;
            }
            None => {
                log::debug!("Downloading {}", link);
                fetcher.fetch(link.url_without_fragment(), &temp).await?;
            }
        }

        if let Some((name, expected)) = link.preferred_hash() {
            if let Some(kind) = ChecksumType::from_name(name) {
                let actual = hash_file(&temp, kind).await?;
                if !actual.eq_ignore_ascii_case(expected) {
                    return Err(PyxError::HashMismatch {
                        package: link.filename(),
                        archive: link.filename(),
                        actual: format!("{}:{}", name, actual),
                    });
                }
            }
        }

        temp.persist(&target).map_err(|e| PyxError::Io(e.error))?;
        Ok(target)
    }
}

/// Key for a link and interpreter: sha256 over canonical JSON of
/// url, strongest hash, subdirectory and interpreter
pub fn cache_key(link: &Link, interpreter: &InterpreterInfo) -> String {
    let mut parts = Map::new();
    parts.insert("url".to_string(), Value::String(link.url_without_fragment().to_string()));
    if let Some((name, value)) = link.preferred_hash() {
        parts.insert(name.to_string(), Value::String(value.to_string()));
    }
    if let Some(subdirectory) = link.subdirectory_fragment() {
        parts.insert("subdirectory".to_string(), Value::String(subdirectory.to_string()));
    }
    parts.insert("interpreter_name".to_string(), Value::String(interpreter.short_name()));
    parts.insert("interpreter_version".to_string(), Value::String(interpreter.version_nodot()));

    let mut hasher = Sha256::new();
    hasher.update(canonical_json(&Value::Object(parts)).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Archive files in a cache directory, sorted by name
pub fn get_cached_archives(cache_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(cache_dir) else {
        return Vec::new();
    };

    let mut archives: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            !name.starts_with('.') && (name.ends_with(".whl") || ArchiveType::from_path(path).is_some())
        })
        .collect();
    archives.sort();
    archives
}

fn best_cached_archive(cache_dir: &Path, env: &dyn Environment) -> Option<PathBuf> {
    let archives = get_cached_archives(cache_dir);

    let best_wheel = archives
        .iter()
        .filter_map(|path| {
            let name = path.file_name()?.to_string_lossy().into_owned();
            let wheel = Wheel::parse(&name).ok()?;
            wheel.min_support_index(env.supported_tags()).map(|index| (index, path))
        })
        .min_by_key(|(index, _)| *index)
        .map(|(_, path)| path.clone());

    best_wheel.or_else(|| archives.into_iter().find(|path| !path.to_string_lossy().ends_with(".whl")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MockEnvironment;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct StaticFetcher {
        content: &'static [u8],
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ArchiveFetcher for StaticFetcher {
        async fn fetch(&self, _url: &str, dest: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(dest, self.content).await?;
            Ok(())
        }
    }

    fn cp311() -> InterpreterInfo {
        InterpreterInfo::new("cpython", 3, 11)
    }

    #[test]
    fn test_cache_key_known_value() {
        let link = Link::new("https://files.example.com/demo-1.0.tar.gz#sha256=abc");

        // sha256 of {"interpreter_name":"cp","interpreter_version":"311","sha256":"abc","url":"https://files.example.com/demo-1.0.tar.gz"}
        assert_eq!(
            cache_key(&link, &cp311()),
            "b387d5411f483cc13d27f2316cd8e60795f400621f56f9019fd7d981d5694d46"
        );
    }

    #[test]
    fn test_cache_key_inputs() {
        let base = Link::new("https://files.example.com/demo-1.0.tar.gz#sha256=abc");
        let key = cache_key(&base, &cp311());

        assert_eq!(key, cache_key(&base.clone(), &cp311()));
        assert_ne!(key, cache_key(&Link::new("https://files.example.com/demo-1.1.tar.gz#sha256=abc"), &cp311()));
        assert_ne!(key, cache_key(&Link::new("https://files.example.com/demo-1.0.tar.gz#sha256=abd"), &cp311()));
        assert_ne!(
            key,
            cache_key(
                &Link::new("https://files.example.com/demo-1.0.tar.gz#sha256=abc&subdirectory=pkg"),
                &cp311()
            )
        );
        assert_ne!(key, cache_key(&base, &InterpreterInfo::new("cpython", 3, 12)));
    }

    #[test]
    fn test_cache_directory_layout() {
        let cache = ArtifactCache::new("/cache");
        let link = Link::new("https://files.example.com/demo-1.0.tar.gz#sha256=abc");
        let key = cache_key(&link, &cp311());

        let expected = PathBuf::from("/cache/artifacts")
            .join(&key[0..2])
            .join(&key[2..4])
            .join(&key[4..6])
            .join(&key[6..]);
        assert_eq!(cache.get_cache_directory_for_link(&link, &cp311()), expected);
    }

    #[tokio::test]
    async fn test_prefers_most_specific_wheel() {
        let temp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(temp.path());
        let env = MockEnvironment::new(temp.path().join("venv"));
        let link = Link::new("https://files.example.com/demo-1.0.tar.gz");

        let dir = cache.get_cache_directory_for_link(&link, env.interpreter_info());
        std::fs::create_dir_all(&dir).unwrap();
        for name in [
            "demo-1.0.tar.gz",
            "demo-1.0-py3-none-any.whl",
            "demo-1.0-cp311-cp311-manylinux_2_17_x86_64.whl",
            "demo-1.0-cp27-cp27m-win32.whl",
        ] {
            std::fs::write(dir.join(name), b"data").unwrap();
        }

        let found = cache.get_cached_archive_for_link(&link, &env, false, None).await.unwrap();
        assert_eq!(found, Some(dir.join("demo-1.0-cp311-cp311-manylinux_2_17_x86_64.whl")));

        let strict = cache.get_cached_archive_for_link(&link, &env, true, None).await.unwrap();
        assert_eq!(strict, Some(dir.join("demo-1.0.tar.gz")));
    }

    #[tokio::test]
    async fn test_download_and_reuse() {
        let temp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(temp.path());
        let env = MockEnvironment::new(temp.path().join("venv"));
        let fetcher = StaticFetcher {
            content: b"wheel",
            calls: AtomicUsize::new(0),
        };
        let link = Link::new("https://files.example.com/demo-1.0-py3-none-any.whl");

        let first = cache
            .get_cached_archive_for_link(&link, &env, true, Some(&fetcher))
            .await
            .unwrap()
            .unwrap();
        let second = cache
            .get_cached_archive_for_link(&link, &env, true, Some(&fetcher))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(get_cached_archives(first.parent().unwrap()), vec![first.clone()]);
    }

    #[tokio::test]
    async fn test_hash_mismatch_leaves_no_entry() {
        let temp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(temp.path());
        let env = MockEnvironment::new(temp.path().join("venv"));
        let fetcher = StaticFetcher {
            content: b"tampered",
            calls: AtomicUsize::new(0),
        };
        let link = Link::new("https://files.example.com/demo-1.0-py3-none-any.whl#sha256=0000");

        let result = cache.get_cached_archive_for_link(&link, &env, true, Some(&fetcher)).await;
        assert!(matches!(result, Err(PyxError::HashMismatch { .. })));

        let dir = cache.get_cache_directory_for_link(&link, env.interpreter_info());
        assert!(get_cached_archives(&dir).is_empty());
    }

    #[tokio::test]
    async fn test_empty_entry_is_refetched() {
        let temp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(temp.path());
        let env = MockEnvironment::new(temp.path().join("venv"));
        let fetcher = StaticFetcher {
            content: b"wheel",
            calls: AtomicUsize::new(0),
        };
        let link = Link::new("https://files.example.com/demo-1.0-py3-none-any.whl");

        let dir = cache.get_cache_directory_for_link(&link, env.interpreter_info());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(link.filename()), b"").unwrap();

        let path = cache
            .get_cached_archive_for_link(&link, &env, true, Some(&fetcher))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"wheel");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }
}
