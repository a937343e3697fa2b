//! Git source - a library checked out from a repository at a pinned commit.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use git2::build::CheckoutBuilder;
use git2::{AutotagOption, FetchOptions, ObjectType, Repository, ResetType, StatusOptions};

use crate::sources::{Source, SourceOptions};
use crate::util::fs::{ensure_dir, remove_path};
use crate::util::process::CancellationToken;

/// A library cloned from a git repository.
pub struct GitSource {
    /// Remote URL or local path
    repository: String,

    /// Commit hash, tag or branch to check out
    commit: String,

    source_directory: PathBuf,

    offline: bool,

    cancel: CancellationToken,
}

impl GitSource {
    pub fn new(
        repository: String,
        commit: String,
        source_directory: PathBuf,
        options: &SourceOptions,
    ) -> Self {
        GitSource {
            repository,
            commit,
            source_directory,
            offline: options.offline,
            cancel: options.cancel.clone(),
        }
    }

    fn has_checkout(&self) -> bool {
        self.source_directory.join(".git").exists()
    }

    fn open_or_clone(&self) -> Result<Repository> {
        if self.has_checkout() {
            return Repository::open(&self.source_directory).with_context(|| {
                format!(
                    "failed to open git repository: {}",
                    self.source_directory.display()
                )
            });
        }

        tracing::info!("cloning {}", self.repository);
        remove_path(&self.source_directory)?;
        if let Some(parent) = self.source_directory.parent() {
            ensure_dir(parent)?;
        }
        let repo = Repository::clone(&self.repository, &self.source_directory)
            .with_context(|| format!("failed to clone {}", self.repository))?;
        update_submodules(&repo)?;
        Ok(repo)
    }

    fn fetch(&self, repo: &Repository) -> Result<()> {
        let mut remote = repo
            .find_remote("origin")
            .context("repository has no `origin` remote")?;
        let mut options = FetchOptions::new();
        options.download_tags(AutotagOption::All);
        remote
            .fetch(&[] as &[&str], Some(&mut options), None)
            .with_context(|| format!("failed to fetch {}", self.repository))
    }

    /// Resolve the pinned ref.
    ///
    /// A branch resolves to the fetched `origin/<branch>`, since the local
    /// branch created by the clone never moves. Tags and hashes go through
    /// revparse.
    fn resolve_commit<'r>(&self, repo: &'r Repository) -> Result<git2::Commit<'r>> {
        let object = repo
            .find_reference(&format!("refs/remotes/origin/{}", self.commit))
            .and_then(|r| r.peel(ObjectType::Commit))
            .or_else(|_| repo.revparse_single(&self.commit))
            .with_context(|| {
                format!("`{}` does not name a commit in {}", self.commit, self.repository)
            })?;
        object
            .peel_to_commit()
            .with_context(|| format!("`{}` is not a commit", self.commit))
    }

    /// Delete untracked and ignored files, like `git clean -xffd`.
    fn remove_untracked(&self, repo: &Repository) -> Result<()> {
        let Some(workdir) = repo.workdir() else {
            return Ok(());
        };

        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .include_ignored(true)
            .recurse_untracked_dirs(false)
            .recurse_ignored_dirs(false);

        let statuses = repo
            .statuses(Some(&mut options))
            .context("failed to read repository status")?;

        for entry in statuses.iter() {
            let status = entry.status();
            if !(status.is_wt_new() || status.is_ignored()) {
                continue;
            }
            if let Some(path) = entry.path() {
                tracing::debug!("removing untracked {}", path);
                remove_path(&workdir.join(path))?;
            }
        }
        Ok(())
    }
}

impl Source for GitSource {
    fn name(&self) -> &str {
        "git"
    }

    fn source_directory(&self) -> &Path {
        &self.source_directory
    }

    fn clean(&self) -> Result<()> {
        self.cancel.check()?;
        let repo = self.open_or_clone()?;

        self.remove_untracked(&repo)?;

        if self.offline {
            tracing::debug!("offline, not fetching {}", self.repository);
        } else if let Err(e) = self.fetch(&repo) {
            // a previously fetched commit is still buildable
            tracing::warn!(
                "git fetch failed for {}: {:#}",
                self.source_directory.display(),
                e
            );
        }

        let commit = self.resolve_commit(&repo)?;
        repo.set_head_detached(commit.id())
            .context("failed to detach HEAD")?;
        repo.reset(
            commit.as_object(),
            ResetType::Hard,
            Some(CheckoutBuilder::new().force()),
        )
        .with_context(|| format!("failed to reset to {}", self.commit))?;

        update_submodules(&repo)
    }

    fn synchronize(&self) -> Result<()> {
        self.cancel.check()?;
        let repo = self.open_or_clone()?;

        if !self.offline {
            self.fetch(&repo)?;
        }

        let commit = self.resolve_commit(&repo)?;
        repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().safe()))
            .with_context(|| {
                format!(
                    "failed to check out {} without discarding local changes",
                    self.commit
                )
            })?;
        repo.set_head_detached(commit.id())
            .context("failed to detach HEAD")?;

        update_submodules(&repo)
    }

    /// The commit hash of HEAD.
    fn status(&self) -> Result<String> {
        let repo = Repository::open(&self.source_directory).with_context(|| {
            format!(
                "failed to open git repository: {}",
                self.source_directory.display()
            )
        })?;
        let head = repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .context("repository has no HEAD commit")?;
        Ok(head.id().to_string())
    }

    fn identity(&self) -> String {
        format!("git:{}@{}", self.repository, self.commit)
    }
}

/// Initialize and update submodules, recursively.
fn update_submodules(repo: &Repository) -> Result<()> {
    for mut submodule in repo.submodules().context("failed to list submodules")? {
        let name = submodule.name().unwrap_or("<unnamed>").to_string();
        submodule
            .update(true, None)
            .with_context(|| format!("failed to update submodule {}", name))?;
        let nested = submodule
            .open()
            .with_context(|| format!("failed to open submodule {}", name))?;
        update_submodules(&nested)?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_repos {
    use std::path::Path;

    use git2::{Oid, Repository, Signature};

    /// Commit `contents` to `name` on the current branch.
    pub fn commit_file(repo: &Repository, name: &str, contents: &str) -> Oid {
        let workdir = repo.workdir().unwrap();
        std::fs::write(workdir.join(name), contents).unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

        let sig = Signature::now("needy", "needy@example.com").unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, &format!("update {}", name), &tree, &parents)
            .unwrap()
    }

    /// Register `url` as a submodule at `path` and commit the gitlink.
    pub fn add_submodule(repo: &Repository, url: &Path, path: &str) -> Oid {
        let mut submodule = repo
            .submodule(&url.display().to_string(), Path::new(path), true)
            .unwrap();
        submodule.clone(None).unwrap();
        submodule.add_finalize().unwrap();
        commit_file(repo, "README", &format!("uses {}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::test_repos::{add_submodule, commit_file};
    use super::*;
    use crate::util::shell::Shell;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn source(origin: &Path, commit: &str, dest: &Path) -> GitSource {
        let options = SourceOptions::new(dest.join("../cache"), Arc::new(Shell::captured()));
        GitSource::new(
            origin.display().to_string(),
            commit.to_string(),
            dest.to_path_buf(),
            &options,
        )
    }

    #[test]
    fn test_clean_fresh_checkout_at_pinned_commit() {
        let tmp = TempDir::new().unwrap();
        let origin_path = tmp.path().join("origin");
        let origin = Repository::init(&origin_path).unwrap();
        let pinned = commit_file(&origin, "lib.c", "int v1;");
        commit_file(&origin, "lib.c", "int v2;");

        let dest = tmp.path().join("needs/lib/source");
        let git = source(&origin_path, &pinned.to_string(), &dest);
        git.clean().unwrap();

        assert_eq!(git.status().unwrap(), pinned.to_string());
        assert_eq!(std::fs::read_to_string(dest.join("lib.c")).unwrap(), "int v1;");
    }

    #[test]
    fn test_clean_discards_local_changes() {
        let tmp = TempDir::new().unwrap();
        let origin_path = tmp.path().join("origin");
        let origin = Repository::init(&origin_path).unwrap();
        let pinned = commit_file(&origin, "lib.c", "int pinned;");

        let dest = tmp.path().join("source");
        let git = source(&origin_path, &pinned.to_string(), &dest);
        git.clean().unwrap();

        std::fs::write(dest.join("lib.c"), "int modified;").unwrap();
        std::fs::write(dest.join("untracked.o"), "junk").unwrap();
        std::fs::create_dir_all(dest.join("objdir")).unwrap();
        std::fs::write(dest.join("objdir/x.o"), "junk").unwrap();

        git.clean().unwrap();

        assert_eq!(
            std::fs::read_to_string(dest.join("lib.c")).unwrap(),
            "int pinned;"
        );
        assert!(!dest.join("untracked.o").exists());
        assert!(!dest.join("objdir").exists());
        assert_eq!(git.status().unwrap(), pinned.to_string());
    }

    #[test]
    fn test_clean_tolerates_unreachable_remote() {
        let tmp = TempDir::new().unwrap();
        let origin_path = tmp.path().join("origin");
        let origin = Repository::init(&origin_path).unwrap();
        let pinned = commit_file(&origin, "lib.c", "int v;");

        let dest = tmp.path().join("source");
        let git = source(&origin_path, &pinned.to_string(), &dest);
        git.clean().unwrap();

        std::fs::remove_dir_all(&origin_path).unwrap();
        git.clean().unwrap();
        assert_eq!(git.status().unwrap(), pinned.to_string());
    }

    #[test]
    fn test_synchronize_keeps_local_changes() {
        let tmp = TempDir::new().unwrap();
        let origin_path = tmp.path().join("origin");
        let origin = Repository::init(&origin_path).unwrap();
        commit_file(&origin, "lib.c", "int v;");
        let pinned = commit_file(&origin, "README", "readme");

        let dest = tmp.path().join("source");
        let git = source(&origin_path, &pinned.to_string(), &dest);
        git.synchronize().unwrap();

        std::fs::write(dest.join("lib.c"), "int edited;").unwrap();
        std::fs::write(dest.join("notes.txt"), "mine").unwrap();
        git.synchronize().unwrap();

        assert_eq!(
            std::fs::read_to_string(dest.join("lib.c")).unwrap(),
            "int edited;"
        );
        assert!(dest.join("notes.txt").exists());
    }

    #[test]
    fn test_clean_branch_follows_remote() {
        let tmp = TempDir::new().unwrap();
        let origin_path = tmp.path().join("origin");
        let origin = Repository::init(&origin_path).unwrap();
        commit_file(&origin, "lib.c", "int v1;");
        let branch = origin.head().unwrap().shorthand().unwrap().to_string();

        let dest = tmp.path().join("source");
        let git = source(&origin_path, &branch, &dest);
        git.clean().unwrap();

        let advanced = commit_file(&origin, "lib.c", "int v2;");
        git.clean().unwrap();

        assert_eq!(git.status().unwrap(), advanced.to_string());
        assert_eq!(std::fs::read_to_string(dest.join("lib.c")).unwrap(), "int v2;");
    }

    #[test]
    fn test_clean_initializes_nested_submodules() {
        let tmp = TempDir::new().unwrap();
        let leaf_path = tmp.path().join("leaf");
        let leaf = Repository::init(&leaf_path).unwrap();
        commit_file(&leaf, "leaf.c", "int leaf;");

        let middle_path = tmp.path().join("middle");
        let middle = Repository::init(&middle_path).unwrap();
        commit_file(&middle, "middle.c", "int middle;");
        add_submodule(&middle, &leaf_path, "vendor/leaf");

        let origin_path = tmp.path().join("origin");
        let origin = Repository::init(&origin_path).unwrap();
        commit_file(&origin, "lib.c", "int v;");
        let pinned = add_submodule(&origin, &middle_path, "vendor/middle");

        let dest = tmp.path().join("source");
        let git = source(&origin_path, &pinned.to_string(), &dest);
        git.clean().unwrap();

        assert_eq!(
            std::fs::read_to_string(dest.join("vendor/middle/middle.c")).unwrap(),
            "int middle;"
        );
        assert_eq!(
            std::fs::read_to_string(dest.join("vendor/middle/vendor/leaf/leaf.c")).unwrap(),
            "int leaf;"
        );
    }

    #[test]
    fn test_unknown_commit() {
        let tmp = TempDir::new().unwrap();
        let origin_path = tmp.path().join("origin");
        let origin = Repository::init(&origin_path).unwrap();
        commit_file(&origin, "lib.c", "int v;");

        let git = source(&origin_path, "no-such-ref", &tmp.path().join("source"));
        assert!(git.clean().is_err());
    }
}
