use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::backend::{InstallBackend, InstallMode};
use super::chooser::Chooser;
use crate::cache::{ArchiveFetcher, ArtifactCache, BuildCache};
use crate::downloader::{hash_file, parse_hash, GitDownloader};
use crate::env::Environment;
use crate::package::{Link, Package, SourceKind};
use crate::progress::{OperationState, ProgressEvent, ProgressSender};
use crate::repository::LinkSource;
use crate::solver::{JobKind, Operation, OperationKind};
use crate::{PyxError, Result};

/// Counts of a plan, rendered the way the installer reports it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub installs: usize,
    pub updates: usize,
    pub removals: usize,
    pub skipped: usize,
}

impl ExecutionSummary {
    pub fn from_operations(operations: &[Operation]) -> Self {
        let mut summary = Self::default();
        for operation in operations {
            if operation.is_skipped() {
                summary.skipped += 1;
                continue;
            }
            match operation.job_kind() {
                JobKind::Install => summary.installs += 1,
                JobKind::Update => summary.updates += 1,
                JobKind::Uninstall => summary.removals += 1,
            }
        }
        summary
    }

    /// Nothing would be executed
    pub fn is_empty(&self) -> bool {
        self.installs + self.updates + self.removals == 0
    }
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{} {}", count, word)
    } else {
        format!("{} {}s", count, word)
    }
}

impl fmt::Display for ExecutionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "No dependencies to install or update");
        }
        write!(
            f,
            "Package operations: {}, {}, {}",
            plural(self.installs, "install"),
            plural(self.updates, "update"),
            plural(self.removals, "removal")
        )?;
        if self.skipped > 0 {
            write!(f, ", {} skipped", self.skipped)?;
        }
        Ok(())
    }
}

/// Outcome of the last [`Executor::execute`] call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub installs: usize,
    pub updates: usize,
    pub removals: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// `operation: error` for every failed operation
    pub errors: Vec<String>,
    pub interrupted: bool,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> bool {
        self.failed == 0 && self.cancelled == 0 && !self.interrupted
    }
}

#[derive(Debug, Default)]
struct ExecutorState {
    states: HashMap<usize, OperationState>,
    report: ExecutionReport,
    /// Package unique name -> hash of the archive that was installed
    hashes: HashMap<String, String>,
}

/// Used when no fetcher is configured: only local and cached artifacts work
struct OfflineFetcher;

#[async_trait]
impl ArchiveFetcher for OfflineFetcher {
    async fn fetch(&self, url: &str, _dest: &Path) -> Result<()> {
        Err(PyxError::Archive(format!("Downloads are disabled, {} is not cached", url)))
    }
}

/// Operations that mutate shared parts of the environment non-atomically
pub fn is_parallel_unsafe(operation: &Operation) -> bool {
    match operation.kind() {
        OperationKind::Uninstall { .. } => true,
        OperationKind::Update { from, to } if index_kind(from) != index_kind(to) => true,
        _ => {
            let package = operation.package();
            package.develop && matches!(package.source_kind(), Some(SourceKind::Git | SourceKind::Directory))
        }
    }
}

/// Source kind with index packages folded together
fn index_kind(package: &Package) -> Option<SourceKind> {
    match package.source_kind() {
        Some(SourceKind::Legacy) | None => None,
        kind => kind,
    }
}

/// Default worker pool size from the available hardware parallelism
pub fn default_max_workers() -> usize {
    let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    (cpus + 4).min(32)
}

/// Runs an operation plan against an environment
pub struct Executor {
    env: Arc<dyn Environment>,
    links: Arc<dyn LinkSource>,
    backend: Arc<dyn InstallBackend>,
    fetcher: Option<Arc<dyn ArchiveFetcher>>,
    artifacts: ArtifactCache,
    max_workers: Option<usize>,
    parallel: bool,
    dry_run: bool,
    verbose: bool,
    handle_interrupts: bool,
    no_binary: Vec<String>,
    only_binary: Vec<String>,
    progress: Option<ProgressSender>,
    shutdown: Arc<AtomicBool>,
    interrupted: Arc<AtomicBool>,
    state: Arc<Mutex<ExecutorState>>,
}

impl Executor {
    pub fn new(
        env: Arc<dyn Environment>,
        links: Arc<dyn LinkSource>,
        backend: Arc<dyn InstallBackend>,
        artifacts: ArtifactCache,
    ) -> Self {
        Self {
            env,
            links,
            backend,
            fetcher: None,
            artifacts,
            max_workers: None,
            parallel: true,
            dry_run: false,
            verbose: false,
            handle_interrupts: true,
            no_binary: Vec::new(),
            only_binary: Vec::new(),
            progress: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            interrupted: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(ExecutorState::default())),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ArchiveFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_max_workers(mut self, max_workers: Option<usize>) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Listen for Ctrl-C while operations run
    pub fn with_interrupt_handling(mut self, enabled: bool) -> Self {
        self.handle_interrupts = enabled;
        self
    }

    pub fn with_no_binary(mut self, names: Vec<String>) -> Self {
        self.no_binary = names;
        self
    }

    pub fn with_only_binary(mut self, names: Vec<String>) -> Self {
        self.only_binary = names;
        self
    }

    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Attach or detach the progress channel between runs
    pub fn set_progress(&mut self, progress: Option<ProgressSender>) {
        self.progress = progress;
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Size of the worker pool for parallel-safe operations
    pub fn worker_count(&self) -> usize {
        if !self.parallel {
            return 1;
        }
        let default = default_max_workers();
        self.max_workers.map(|max| max.clamp(1, default)).unwrap_or(default)
    }

    /// Stop scheduling; running operations finish, the rest are cancelled
    pub fn interrupt(&self) {
        log::warn!("Interrupted, waiting for running operations to finish");
        self.interrupted.store(true, Ordering::SeqCst);
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn report(&self) -> ExecutionReport {
        self.state.lock().map(|s| s.report.clone()).unwrap_or_default()
    }

    /// Final state of each operation of the last run, by plan index
    pub fn states(&self) -> HashMap<usize, OperationState> {
        self.state.lock().map(|s| s.states.clone()).unwrap_or_default()
    }

    /// Hashes of the archives installed in the last run, by package
    pub fn archive_hashes(&self) -> HashMap<String, String> {
        self.state.lock().map(|s| s.hashes.clone()).unwrap_or_default()
    }

    /// Execute a plan, returning the process exit code
    pub async fn execute(&self, operations: &[Operation]) -> i32 {
        self.shutdown.store(false, Ordering::SeqCst);
        self.interrupted.store(false, Ordering::SeqCst);
        if let Ok(mut state) = self.state.lock() {
            *state = ExecutorState::default();
        }

        log::info!("{}", ExecutionSummary::from_operations(operations));

        let worker = Arc::new(self.worker());

        let mut bands: BTreeMap<Reverse<u32>, Vec<(usize, Operation)>> = BTreeMap::new();
        for (id, operation) in operations.iter().enumerate() {
            if operation.is_skipped() {
                worker.skip(id, operation, self.verbose);
                continue;
            }
            bands
                .entry(Reverse(operation.priority()))
                .or_default()
                .push((id, operation.clone()));
        }

        for (_, band) in bands {
            let (unsafe_operations, safe_operations): (Vec<_>, Vec<_>) =
                band.into_iter().partition(|(_, operation)| is_parallel_unsafe(operation));

            self.run_batch(&worker, safe_operations, self.worker_count()).await;

            for operation in unsafe_operations {
                self.run_batch(&worker, vec![operation], 1).await;
            }
        }

        let report = self.report();
        if report.succeeded() {
            0
        } else {
            1
        }
    }

    fn worker(&self) -> Worker {
        Worker {
            env: self.env.clone(),
            links: self.links.clone(),
            backend: self.backend.clone(),
            fetcher: self.fetcher.clone(),
            artifacts: self.artifacts.clone(),
            builds: BuildCache::new(),
            dry_run: self.dry_run,
            no_binary: self.no_binary.clone(),
            only_binary: self.only_binary.clone(),
            progress: self.progress.clone(),
            shutdown: self.shutdown.clone(),
            interrupted: self.interrupted.clone(),
            state: self.state.clone(),
            git_locks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Run operations on at most `workers` tasks and wait for all of them
    async fn run_batch(&self, worker: &Arc<Worker>, operations: Vec<(usize, Operation)>, workers: usize) {
        if operations.is_empty() {
            return;
        }

        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let mut tasks = JoinSet::new();

        for (id, operation) in operations {
            let worker = worker.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if worker.shutdown.load(Ordering::SeqCst) {
                    worker.finish(id, &operation, OperationState::Cancelled);
                    return;
                }
                worker.execute_operation(id, &operation).await;
            });
        }

        let mut listen = self.handle_interrupts;
        loop {
            let joined = if listen {
                tokio::select! {
                    joined = tasks.join_next() => joined,
                    signal = tokio::signal::ctrl_c() => {
                        match signal {
                            Ok(()) => self.interrupt(),
                            Err(e) => {
                                log::debug!("Unable to listen for interrupts: {}", e);
                                listen = false;
                            }
                        }
                        continue;
                    }
                }
            } else {
                tasks.join_next().await
            };

            match joined {
                None => break,
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    log::error!("Operation task stopped unexpectedly: {}", e);
                    self.shutdown.store(true, Ordering::SeqCst);
                    if let Ok(mut state) = self.state.lock() {
                        state.report.failed += 1;
                        state.report.errors.push(e.to_string());
                    }
                }
            }
        }
    }
}

/// State shared by the tasks of one run
struct Worker {
    env: Arc<dyn Environment>,
    links: Arc<dyn LinkSource>,
    backend: Arc<dyn InstallBackend>,
    fetcher: Option<Arc<dyn ArchiveFetcher>>,
    artifacts: ArtifactCache,
    builds: BuildCache,
    dry_run: bool,
    no_binary: Vec<String>,
    only_binary: Vec<String>,
    progress: Option<ProgressSender>,
    shutdown: Arc<AtomicBool>,
    interrupted: Arc<AtomicBool>,
    state: Arc<Mutex<ExecutorState>>,
    /// One lock per repository URL
    git_locks: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Worker {
    fn emit(&self, id: usize, state: OperationState, message: String) {
        if let Ok(mut shared) = self.state.lock() {
            shared.states.insert(id, state);
        }
        if let Some(progress) = &self.progress {
            let _ = progress.send(ProgressEvent::new(id, state, message));
        }
    }

    fn skip(&self, id: usize, operation: &Operation, verbose: bool) {
        let reason = operation.skip_reason().unwrap_or("Skipped");
        if let Ok(mut shared) = self.state.lock() {
            shared.report.skipped += 1;
        }
        if verbose {
            log::info!("{}: Skipped ({})", operation, reason);
            self.emit(id, OperationState::Skipped, format!("{} ({})", operation, reason));
        } else if let Ok(mut shared) = self.state.lock() {
            shared.states.insert(id, OperationState::Skipped);
        }
    }

    fn finish(&self, id: usize, operation: &Operation, state: OperationState) {
        if let Ok(mut shared) = self.state.lock() {
            let report = &mut shared.report;
            match state {
                OperationState::Done => match operation.job_kind() {
                    JobKind::Install => report.installs += 1,
                    JobKind::Update => report.updates += 1,
                    JobKind::Uninstall => report.removals += 1,
                },
                OperationState::Failed => report.failed += 1,
                OperationState::Cancelled => report.cancelled += 1,
                _ => {}
            }
            if self.interrupted.load(Ordering::SeqCst) {
                report.interrupted = true;
            }
        }
        self.emit(id, state, operation.to_string());
    }

    async fn execute_operation(&self, id: usize, operation: &Operation) {
        let result = if self.dry_run {
            Ok(())
        } else {
            self.dispatch(id, operation).await
        };

        match result {
            Ok(()) => self.finish(id, operation, OperationState::Done),
            Err(PyxError::Cancelled) => {
                self.interrupted.store(true, Ordering::SeqCst);
                self.shutdown.store(true, Ordering::SeqCst);
                self.finish(id, operation, OperationState::Cancelled);
            }
            Err(e) => {
                log::error!("Failed to execute {}: {}", operation, e);

                // A bad archive only fails its own operation
                let contained = matches!(e, PyxError::HashMismatch { .. }) && !is_parallel_unsafe(operation);
                if !contained {
                    self.shutdown.store(true, Ordering::SeqCst);
                }
                if let Ok(mut shared) = self.state.lock() {
                    shared.report.errors.push(format!("{}: {}", operation, e));
                }
                self.finish(id, operation, OperationState::Failed);
            }
        }
    }

    async fn dispatch(&self, id: usize, operation: &Operation) -> Result<()> {
        match operation.kind() {
            OperationKind::Install { package } => self.install(id, operation, package, false).await,
            OperationKind::Update { from, to } => {
                if index_kind(from) != index_kind(to) {
                    self.remove(id, operation, from).await?;
                    self.install(id, operation, to, false).await
                } else {
                    self.install(id, operation, to, true).await
                }
            }
            OperationKind::Uninstall { package } => self.remove(id, operation, package).await,
        }
    }

    async fn install(&self, id: usize, operation: &Operation, package: &Package, upgrade: bool) -> Result<()> {
        let message = operation.to_string();
        let editable = package.develop;
        // Holds build output until the backend is done with it
        let mut scratch = None;
        let mut commit = None;

        let target = match package.source_kind() {
            Some(SourceKind::Git) => {
                self.emit(id, OperationState::Cloning, message.clone());
                let (checkout, head) = self.clone_git(package).await?;
                commit = Some(head);
                let root = with_subdirectory(checkout, package);
                self.build_tree(id, &message, root, editable, &mut scratch).await?
            }
            Some(SourceKind::Directory) => {
                self.emit(id, OperationState::Preparing, message.clone());
                let root = with_subdirectory(PathBuf::from(package.source_url().unwrap_or_default()), package);
                self.build_tree(id, &message, root, editable, &mut scratch).await?
            }
            Some(SourceKind::File) => {
                self.emit(id, OperationState::Preparing, message.clone());
                let archive = PathBuf::from(package.source_url().unwrap_or_default());
                self.validate_hash(package, &archive).await?;
                self.build_archive(id, &message, &archive, None, &mut scratch).await?
            }
            Some(SourceKind::Url) => {
                let link = Link::new(package.source_url().unwrap_or_default());
                let archive = self.download(id, &message, &link).await?;
                self.validate_hash(package, &archive).await?;
                self.build_archive(id, &message, &archive, Some(&link), &mut scratch).await?
            }
            Some(SourceKind::Legacy) | None => {
                self.emit(id, OperationState::Preparing, message.clone());
                let chooser = Chooser::new(self.links.as_ref(), self.env.as_ref())
                    .with_no_binary(&self.no_binary)
                    .with_only_binary(&self.only_binary);
                let link = chooser.choose_for(package).await?;
                let archive = self.download(id, &message, &link).await?;
                self.validate_hash(package, &archive).await?;
                self.build_archive(id, &message, &archive, Some(&link), &mut scratch).await?
            }
        };

        self.emit(id, OperationState::Installing, message);
        self.backend
            .install(self.env.as_ref(), package, &target, InstallMode { upgrade, editable })
            .await?;

        if package.source_kind().map(|k| k.is_direct_origin()).unwrap_or(false) {
            self.write_direct_url(package, commit.as_deref()).await?;
        }

        drop(scratch);
        Ok(())
    }

    async fn remove(&self, id: usize, operation: &Operation, package: &Package) -> Result<()> {
        self.emit(id, OperationState::Installing, operation.to_string());
        self.backend.uninstall(self.env.as_ref(), package).await?;

        if package.source_kind() == Some(SourceKind::Git) {
            let checkout = self.env.src_dir().join(&package.name);
            if checkout.exists() {
                tokio::fs::remove_dir_all(&checkout).await?;
            }
        }
        Ok(())
    }

    /// Cached or freshly downloaded archive for a link
    async fn download(&self, id: usize, message: &str, link: &Link) -> Result<PathBuf> {
        self.emit(id, OperationState::Downloading, message.to_string());

        let fetcher: &dyn ArchiveFetcher = match &self.fetcher {
            Some(fetcher) => fetcher.as_ref(),
            None => &OfflineFetcher,
        };
        self.artifacts
            .get_cached_archive_for_link(link, self.env.as_ref(), true, Some(fetcher))
            .await?
            .ok_or_else(|| PyxError::Archive(format!("Unable to download {}", link)))
    }

    /// Wheel for an archive, building source archives when needed
    async fn build_archive(
        &self,
        id: usize,
        message: &str,
        archive: &Path,
        link: Option<&Link>,
        scratch: &mut Option<tempfile::TempDir>,
    ) -> Result<PathBuf> {
        if archive.extension().map(|e| e == "whl").unwrap_or(false) {
            return Ok(archive.to_path_buf());
        }

        let output_dir = match link {
            Some(link) => {
                if let Some(cached) = self
                    .artifacts
                    .get_cached_archive_for_link(link, self.env.as_ref(), false, None)
                    .await?
                    .filter(|path| path.extension().map(|e| e == "whl").unwrap_or(false))
                {
                    log::debug!("Using cached build {}", cached.display());
                    return Ok(cached);
                }
                self.artifacts
                    .get_cache_directory_for_link(link, self.env.interpreter_info())
            }
            None => scratch.insert(tempfile::tempdir()?).path().to_path_buf(),
        };

        self.emit(id, OperationState::Building, message.to_string());
        self.builds.prepare(archive, &output_dir, false, self.env.as_ref()).await
    }

    /// Editable trees install as-is, others are built into a scratch directory
    async fn build_tree(
        &self,
        id: usize,
        message: &str,
        root: PathBuf,
        editable: bool,
        scratch: &mut Option<tempfile::TempDir>,
    ) -> Result<PathBuf> {
        if editable {
            return Ok(root);
        }

        self.emit(id, OperationState::Building, message.to_string());
        let output_dir = scratch.insert(tempfile::tempdir()?).path().to_path_buf();
        self.builds.prepare(&root, &output_dir, false, self.env.as_ref()).await
    }

    /// Clone or update `<env>/src/<name>`, returning the checkout and its commit
    async fn clone_git(&self, package: &Package) -> Result<(PathBuf, String)> {
        let source = package
            .source
            .clone()
            .ok_or_else(|| PyxError::InstallBackend(format!("{} has no git source", package)))?;

        let lock = {
            let mut locks = self.git_locks.lock().await;
            locks.entry(source.url.clone()).or_default().clone()
        };
        let _guard = lock.lock().await;

        let dest = self.env.src_dir().join(&package.name);
        let reference = source.resolved_reference.clone().or(source.reference.clone());
        let url = source.url.clone();
        let checkout = dest.clone();

        let commit = tokio::task::spawn_blocking(move || {
            GitDownloader::new().checkout_into(&url, &checkout, reference.as_deref())
        })
        .await
        .map_err(|e| PyxError::InstallBackend(format!("Git checkout of {} stopped: {}", source.url, e)))??;

        log::debug!("Checked out {} at {}", source.url, commit);
        Ok((dest, commit))
    }

    /// The archive must match one of the hashes the package pins
    async fn validate_hash(&self, package: &Package, archive: &Path) -> Result<()> {
        let known = package.known_hashes();
        let sha256 = format!("sha256:{}", hash_file(archive, crate::downloader::ChecksumType::Sha256).await?);

        if !known.is_empty() {
            let mut matched = known.contains(sha256.as_str());
            for hash in &known {
                if matched {
                    break;
                }
                if let Some((kind, expected)) = parse_hash(hash) {
                    matched = hash_file(archive, kind).await?.eq_ignore_ascii_case(expected);
                }
            }
            if !matched {
                return Err(PyxError::HashMismatch {
                    package: package.pretty_name.clone(),
                    archive: archive
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    actual: sha256,
                });
            }
        }

        if let Ok(mut shared) = self.state.lock() {
            shared.hashes.insert(package.unique_name(), sha256);
        }
        Ok(())
    }

    /// Record where a package came from in its `.dist-info`
    async fn write_direct_url(&self, package: &Package, commit: Option<&str>) -> Result<()> {
        let Some(source) = &package.source else {
            return Ok(());
        };

        let mut document = match source.kind {
            SourceKind::Git => {
                let mut vcs_info = json!({ "vcs": "git" });
                if let Some(reference) = &source.reference {
                    vcs_info["requested_revision"] = json!(reference);
                }
                if let Some(commit) = commit.or(source.resolved_reference.as_deref()) {
                    vcs_info["commit_id"] = json!(commit);
                }
                json!({ "url": source.url, "vcs_info": vcs_info })
            }
            SourceKind::Directory => {
                let dir_info = if package.develop { json!({ "editable": true }) } else { json!({}) };
                json!({ "url": file_url(Path::new(&source.url)), "dir_info": dir_info })
            }
            SourceKind::File => {
                let hash = self
                    .state
                    .lock()
                    .ok()
                    .and_then(|s| s.hashes.get(&package.unique_name()).cloned());
                let archive_info = match hash {
                    Some(hash) => json!({ "hash": hash.replacen(':', "=", 1) }),
                    None => json!({}),
                };
                json!({ "url": file_url(Path::new(&source.url)), "archive_info": archive_info })
            }
            SourceKind::Url => json!({ "url": source.url, "archive_info": {} }),
            SourceKind::Legacy => return Ok(()),
        };
        if let Some(subdirectory) = &source.subdirectory {
            document["subdirectory"] = json!(subdirectory);
        }

        let Some(dist_info) = self.env.find_distributions(&package.name).pop() else {
            log::debug!("No .dist-info found for {}, provenance not recorded", package);
            return Ok(());
        };

        let direct_url = dist_info.join("direct_url.json");
        tokio::fs::write(&direct_url, serde_json::to_string(&document)?).await?;

        let record = dist_info.join("RECORD");
        if record.is_file() {
            let site = dist_info.parent().unwrap_or(dist_info.as_path());
            let relative = pathdiff::diff_paths(&direct_url, site).unwrap_or_else(|| direct_url.clone());
            let mut content = tokio::fs::read_to_string(&record).await?;
            if !content.is_empty() && !content.ends_with('\n') {
                content.push('\n');
            }
            content.push_str(&format!("{},,\n", relative.to_string_lossy().replace('\\', "/")));
            tokio::fs::write(&record, content).await?;
        }

        Ok(())
    }
}

fn with_subdirectory(root: PathBuf, package: &Package) -> PathBuf {
    match package.source_subdirectory() {
        Some(subdirectory) => root.join(subdirectory),
        None => root,
    }
}

fn file_url(path: &Path) -> String {
    url::Url::from_file_path(path)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("file://{}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MockEnvironment;
    use crate::installer::{BackendCall, RecordingBackend};
    use crate::package::PackageSource;
    use crate::repository::ArrayRepository;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        env: Arc<MockEnvironment>,
        repository: ArrayRepository,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let env = Arc::new(MockEnvironment::new(temp.path().join("venv")));
            Self {
                temp,
                env,
                repository: ArrayRepository::new("test"),
            }
        }

        /// Register a package whose only artifact is a local wheel
        fn wheel(&mut self, name: &str, version: &str) -> Package {
            let dir = self.temp.path().join("wheels");
            std::fs::create_dir_all(&dir).unwrap();
            let path = dir.join(format!("{}-{}-py3-none-any.whl", name, version));
            std::fs::write(&path, format!("{}-{}", name, version)).unwrap();

            let package = Package::parse(name, version).unwrap();
            let repository = std::mem::replace(&mut self.repository, ArrayRepository::new("test"));
            self.repository = repository
                .with_package(package.clone())
                .with_links(name, version, vec![Link::from_path(&path)])
                .unwrap();
            package
        }

        fn executor(&self, backend: Arc<RecordingBackend>) -> Executor {
            Executor::new(
                self.env.clone(),
                Arc::new(self.repository.clone()),
                backend,
                ArtifactCache::new(self.temp.path().join("cache")),
            )
            .with_interrupt_handling(false)
        }
    }

    #[test]
    fn test_summary_display() {
        let a = Package::parse("a", "1.0").unwrap();
        let b = Package::parse("b", "1.0").unwrap();
        let operations = vec![
            Operation::install(a.clone()),
            Operation::install(b.clone()),
            Operation::update(a.clone(), Package::parse("a", "2.0").unwrap()),
            Operation::install(b).skip("Not required"),
        ];

        assert_eq!(
            ExecutionSummary::from_operations(&operations).to_string(),
            "Package operations: 2 installs, 1 update, 0 removals, 1 skipped"
        );
        assert_eq!(
            ExecutionSummary::from_operations(&[Operation::install(a).skip("Already installed")]).to_string(),
            "No dependencies to install or update"
        );
    }

    #[test]
    fn test_parallel_safety() {
        let index = Package::parse("a", "1.0").unwrap();
        let editable = Package::parse("lib", "1.0")
            .unwrap()
            .with_source(PackageSource::directory("/src/lib"))
            .with_develop(true);
        let archive = Package::parse("lib", "1.0")
            .unwrap()
            .with_source(PackageSource::directory("/src/lib"));

        assert!(!is_parallel_unsafe(&Operation::install(index.clone())));
        assert!(is_parallel_unsafe(&Operation::uninstall(index.clone())));
        assert!(is_parallel_unsafe(&Operation::install(editable)));
        assert!(!is_parallel_unsafe(&Operation::install(archive.clone())));
        assert!(is_parallel_unsafe(&Operation::update(index, archive)));
    }

    #[tokio::test]
    async fn test_counters_sum_to_operation_count() {
        let mut fixture = Fixture::new();
        let operations: Vec<Operation> = (0..8)
            .map(|i| Operation::install(fixture.wheel(&format!("pkg{}", i), "1.0")))
            .collect();
        let backend = Arc::new(RecordingBackend::new().with_delay(Duration::from_millis(20)));
        let executor = fixture.executor(backend.clone()).with_max_workers(Some(4));

        assert_eq!(executor.execute(&operations).await, 0);

        let report = executor.report();
        assert_eq!(report.installs, 8);
        assert_eq!(report.installs + report.failed + report.cancelled, operations.len());
        assert_eq!(backend.calls().len(), 8);
        assert!(backend.max_concurrency() <= executor.worker_count());
        assert_eq!(executor.archive_hashes().len(), 8);
    }

    #[tokio::test]
    async fn test_failure_stops_scheduling() {
        let mut fixture = Fixture::new();
        let operations = vec![
            Operation::install(fixture.wheel("a", "1.0")),
            Operation::install(fixture.wheel("b", "1.0")),
            Operation::install(fixture.wheel("c", "1.0")),
        ];
        let backend = Arc::new(RecordingBackend::new().with_failure("a"));
        let executor = fixture.executor(backend).with_max_workers(Some(1));

        assert_eq!(executor.execute(&operations).await, 1);

        let report = executor.report();
        assert_eq!(report.failed, 1);
        assert!(report.installs <= 2);
        assert_eq!(report.installs + report.cancelled, 2);
        assert!(report.errors[0].contains("Installing a (1.0)"));
        assert!(!report.interrupted);
    }

    #[tokio::test]
    async fn test_interrupt_cancels_pending_operations() {
        let mut fixture = Fixture::new();
        let operations: Vec<Operation> = (0..6)
            .map(|i| Operation::install(fixture.wheel(&format!("pkg{}", i), "1.0")))
            .collect();
        let backend = Arc::new(RecordingBackend::new().with_delay(Duration::from_millis(100)));
        let executor = fixture.executor(backend.clone()).with_max_workers(Some(2));

        let (code, _) = tokio::join!(executor.execute(&operations), async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            executor.interrupt();
        });

        assert_ne!(code, 0);
        let report = executor.report();
        assert!(report.interrupted);
        assert_eq!(report.failed, 0);
        assert!(report.cancelled >= 1);
        assert_eq!(report.installs + report.cancelled, operations.len());
        assert_eq!(backend.calls().len(), report.installs);
    }

    #[tokio::test]
    async fn test_removals_run_first_and_sequentially() {
        let mut fixture = Fixture::new();
        let install = Operation::install(fixture.wheel("new", "1.0"));
        let old_one = Package::parse("old-one", "1.0").unwrap();
        let old_two = Package::parse("old-two", "1.0").unwrap();
        let operations = vec![install, Operation::uninstall(old_one), Operation::uninstall(old_two)];

        let backend = Arc::new(RecordingBackend::new().with_delay(Duration::from_millis(10)));
        let executor = fixture.executor(backend.clone());

        assert_eq!(executor.execute(&operations).await, 0);

        let calls = backend.calls();
        assert!(matches!(calls[0], BackendCall::Uninstall { .. }));
        assert!(matches!(calls[1], BackendCall::Uninstall { .. }));
        assert_eq!(calls[2].name(), "new");
        assert_eq!(backend.max_concurrency(), 1);
        assert_eq!(executor.report().removals, 2);
    }

    #[tokio::test]
    async fn test_skipped_operations_never_run() {
        let mut fixture = Fixture::new();
        let operations = vec![
            Operation::install(fixture.wheel("a", "1.0")).skip("Already installed"),
            Operation::install(fixture.wheel("b", "1.0")),
        ];
        let backend = Arc::new(RecordingBackend::new());
        let executor = fixture.executor(backend.clone()).with_verbose(true);

        assert_eq!(executor.execute(&operations).await, 0);

        assert_eq!(backend.calls().len(), 1);
        assert_eq!(executor.report().skipped, 1);
        assert_eq!(executor.states()[&0], OperationState::Skipped);
    }

    #[tokio::test]
    async fn test_hash_mismatch_fails_only_its_operation() {
        let mut fixture = Fixture::new();
        let pinned = fixture.wheel("pinned", "1.0").with_file("pinned-1.0-py3-none-any.whl", "sha256:0000");
        let operations = vec![Operation::install(pinned), Operation::install(fixture.wheel("other", "1.0"))];
        let backend = Arc::new(RecordingBackend::new());
        let executor = fixture.executor(backend.clone()).with_max_workers(Some(1));

        assert_eq!(executor.execute(&operations).await, 1);

        let report = executor.report();
        assert_eq!(report.failed, 1);
        assert_eq!(report.installs, 1);
        assert_eq!(backend.calls()[0].name(), "other");
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let mut fixture = Fixture::new();
        let operations = vec![Operation::install(fixture.wheel("a", "1.0"))];
        let backend = Arc::new(RecordingBackend::new());
        let executor = fixture.executor(backend.clone()).with_dry_run(true);

        assert_eq!(executor.execute(&operations).await, 0);
        assert!(backend.calls().is_empty());
        assert_eq!(executor.report().installs, 1);
    }

    #[tokio::test]
    async fn test_editable_directory_records_provenance() {
        let fixture = Fixture::new();
        let source_dir = fixture.temp.path().join("lib");
        std::fs::create_dir_all(&source_dir).unwrap();

        let dist_info = fixture.env.site_packages()[0].join("lib-0.1.0.dist-info");
        std::fs::create_dir_all(&dist_info).unwrap();
        std::fs::write(dist_info.join("RECORD"), "lib/__init__.py,,\n").unwrap();

        let package = Package::parse("lib", "0.1.0")
            .unwrap()
            .with_source(PackageSource::directory(source_dir.to_string_lossy()))
            .with_develop(true);
        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
        let backend = Arc::new(RecordingBackend::new());
        let executor = fixture.executor(backend.clone()).with_progress(sender);

        assert_eq!(executor.execute(&[Operation::install(package)]).await, 0);
        drop(executor);

        match &backend.calls()[0] {
            BackendCall::Install { target, mode, .. } => {
                assert_eq!(target, &source_dir);
                assert!(mode.editable);
            }
            other => panic!("unexpected call: {:?}", other),
        }

        let direct_url: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dist_info.join("direct_url.json")).unwrap()).unwrap();
        assert_eq!(direct_url["dir_info"]["editable"], json!(true));
        assert!(direct_url["url"].as_str().unwrap().starts_with("file://"));

        let record = std::fs::read_to_string(dist_info.join("RECORD")).unwrap();
        assert!(record.ends_with("lib-0.1.0.dist-info/direct_url.json,,\n"));

        let mut states = Vec::new();
        while let Some(event) = receiver.recv().await {
            states.push(event.state);
        }
        assert_eq!(states.first(), Some(&OperationState::Preparing));
        assert_eq!(states.last(), Some(&OperationState::Done));
    }
}
