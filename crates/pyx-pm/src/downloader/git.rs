//! Git checkouts for VCS-sourced packages.

use git2::{build::RepoBuilder, Cred, FetchOptions, RemoteCallbacks, Repository};
use std::path::{Path, PathBuf};

use crate::Result;

/// Clones and updates repositories with `git2`
#[derive(Debug, Clone)]
pub struct GitDownloader {
    ssh_key: Option<PathBuf>,
    use_ssh_agent: bool,
}

impl GitDownloader {
    pub fn new() -> Self {
        Self {
            ssh_key: None,
            use_ssh_agent: true,
        }
    }

    pub fn with_ssh_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssh_key = Some(path.into());
        self
    }

    pub fn without_ssh_agent(mut self) -> Self {
        self.use_ssh_agent = false;
        self
    }

    fn fetch_options(&self) -> FetchOptions<'static> {
        let mut callbacks = RemoteCallbacks::new();
        let ssh_key = self.ssh_key.clone();
        let use_ssh_agent = self.use_ssh_agent;

        callbacks.credentials(move |_url, username_from_url, allowed_types| {
            if allowed_types.contains(git2::CredentialType::SSH_KEY) {
                let username = username_from_url.unwrap_or("git");

                if let Some(ref key_path) = ssh_key {
                    return Cred::ssh_key(username, None, key_path, None);
                }

                if use_ssh_agent {
                    return Cred::ssh_key_from_agent(username);
                }

                if let Some(base) = directories::BaseDirs::new() {
                    for key in ["id_ed25519", "id_rsa"] {
                        let path = base.home_dir().join(".ssh").join(key);
                        if path.exists() {
                            return Cred::ssh_key(username, None, &path, None);
                        }
                    }
                }
            }

            if allowed_types.contains(git2::CredentialType::DEFAULT) {
                return Cred::default();
            }

            Err(git2::Error::from_str("no valid credentials found"))
        });

        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(callbacks);
        fetch_opts
    }

    /// Clone `url` into `dest` and check out `reference`, returning the commit id
    pub fn clone(&self, url: &str, dest: &Path, reference: Option<&str>) -> Result<String> {
        log::debug!("Cloning {} into {}", url, dest.display());

        let mut builder = RepoBuilder::new();
        builder.fetch_options(self.fetch_options());
        let repo = builder.clone(url, dest)?;

        if let Some(reference) = reference {
            self.checkout(&repo, reference)?;
        }

        Self::get_head_commit(dest)
    }

    /// Fetch into an existing checkout and move it to `reference`
    pub fn update(&self, repo_path: &Path, reference: Option<&str>) -> Result<String> {
        log::debug!("Updating checkout at {}", repo_path.display());

        let repo = Repository::open(repo_path)?;
        {
            let mut remote = repo.find_remote("origin")?;
            let mut fetch_opts = self.fetch_options();
            remote.fetch(
                &["refs/heads/*:refs/remotes/origin/*", "refs/tags/*:refs/tags/*"],
                Some(&mut fetch_opts),
                None,
            )?;
        }

        if let Some(reference) = reference {
            self.checkout(&repo, reference)?;
        }

        Self::get_head_commit(repo_path)
    }

    /// Clone, or update when `dest` already holds a repository
    pub fn checkout_into(&self, url: &str, dest: &Path, reference: Option<&str>) -> Result<String> {
        if Self::is_git_repo(dest) {
            self.update(dest, reference)
        } else {
            if dest.exists() {
                std::fs::remove_dir_all(dest)?;
            }
            self.clone(url, dest, reference)
        }
    }

    /// Checkout a commit, tag or branch
    fn checkout(&self, repo: &Repository, reference: &str) -> Result<()> {
        if reference.len() >= 7 {
            if let Ok(oid) = git2::Oid::from_str(reference) {
                if let Ok(commit) = repo.find_commit(oid) {
                    repo.checkout_tree(commit.as_object(), Some(git2::build::CheckoutBuilder::new().force()))?;
                    repo.set_head_detached(oid)?;
                    return Ok(());
                }
            }
        }

        for candidate in [
            format!("refs/tags/{}", reference),
            format!("refs/remotes/origin/{}", reference),
        ] {
            if let Ok(reference_obj) = repo.find_reference(&candidate) {
                let commit = reference_obj.peel_to_commit()?;
                repo.checkout_tree(commit.as_object(), Some(git2::build::CheckoutBuilder::new().force()))?;
                repo.set_head_detached(commit.id())?;
                return Ok(());
            }
        }

        let obj = repo.revparse_single(reference)?;
        let commit = obj.peel_to_commit()?;
        repo.checkout_tree(commit.as_object(), Some(git2::build::CheckoutBuilder::new().force()))?;
        repo.set_head_detached(commit.id())?;

        Ok(())
    }

    /// Commit id at HEAD
    pub fn get_head_commit(repo_path: &Path) -> Result<String> {
        let repo = Repository::open(repo_path)?;
        let commit = repo.head()?.peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    pub fn is_git_repo(path: &Path) -> bool {
        Repository::open(path).is_ok()
    }
}

impl Default for GitDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn commit_file(repo: &Repository, name: &str, content: &str, message: &str) -> git2::Oid {
        let workdir = repo.workdir().unwrap();
        std::fs::write(workdir.join(name), content).unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let signature = git2::Signature::now("pyx", "pyx@example.com").unwrap();

        let parents: Vec<git2::Commit> = repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok())
            .into_iter()
            .collect();
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();

        repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parent_refs)
            .unwrap()
    }

    #[test]
    fn test_is_git_repo() {
        let temp_dir = TempDir::new().unwrap();
        assert!(!GitDownloader::is_git_repo(temp_dir.path()));
        Repository::init(temp_dir.path()).unwrap();
        assert!(GitDownloader::is_git_repo(temp_dir.path()));
    }

    #[test]
    fn test_clone_local_repo_at_revision() {
        let origin_dir = TempDir::new().unwrap();
        let origin = Repository::init(origin_dir.path()).unwrap();
        let first = commit_file(&origin, "setup.py", "v1", "first");
        let second = commit_file(&origin, "setup.py", "v2", "second");

        let dest = TempDir::new().unwrap();
        let checkout = dest.path().join("demo");
        let url = origin_dir.path().to_string_lossy().into_owned();

        let downloader = GitDownloader::new().without_ssh_agent();
        let head = downloader.clone(&url, &checkout, None).unwrap();
        assert_eq!(head, second.to_string());

        let pinned = downloader
            .checkout_into(&url, &checkout, Some(&first.to_string()))
            .unwrap();
        assert_eq!(pinned, first.to_string());
        assert_eq!(std::fs::read_to_string(checkout.join("setup.py")).unwrap(), "v1");
    }
}
