//! Directory source - a library copied from a local path.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::sources::Source;
use crate::util::fs::{copy_tree_without_dotfiles, remove_path};

/// A library whose source lives elsewhere on disk.
pub struct DirectorySource {
    /// Tree to copy from
    origin: PathBuf,

    /// Managed copy
    source_directory: PathBuf,
}

impl DirectorySource {
    pub fn new(origin: PathBuf, source_directory: PathBuf) -> Self {
        DirectorySource {
            origin,
            source_directory,
        }
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }
}

impl Source for DirectorySource {
    fn name(&self) -> &str {
        "directory"
    }

    fn source_directory(&self) -> &Path {
        &self.source_directory
    }

    /// Always a full refresh: the old copy is removed first.
    fn clean(&self) -> Result<()> {
        if !self.origin.is_dir() {
            bail!("source directory does not exist: {}", self.origin.display());
        }
        tracing::debug!(
            "copying {} to {}",
            self.origin.display(),
            self.source_directory.display()
        );
        remove_path(&self.source_directory)?;
        copy_tree_without_dotfiles(&self.origin, &self.source_directory)
    }

    fn status(&self) -> Result<String> {
        Ok(format!("directory: {}", self.origin.display()))
    }

    fn identity(&self) -> String {
        format!("directory:{}", self.origin.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_clean_refreshes_copy() {
        let tmp = TempDir::new().unwrap();
        let origin = tmp.path().join("origin");
        std::fs::create_dir_all(origin.join("src")).unwrap();
        std::fs::write(origin.join("src/lib.c"), "int x;").unwrap();
        std::fs::write(origin.join(".hidden"), "secret").unwrap();

        let dest = tmp.path().join("needs/lib/source");
        let source = DirectorySource::new(origin.clone(), dest.clone());
        assert!(!source.is_initialized());

        source.clean().unwrap();
        assert!(dest.join("src/lib.c").exists());
        assert!(!dest.join(".hidden").exists());

        std::fs::write(dest.join("stale.o"), "junk").unwrap();
        source.clean().unwrap();
        assert!(!dest.join("stale.o").exists());
    }

    #[test]
    fn test_synchronize_keeps_local_edits() {
        let tmp = TempDir::new().unwrap();
        let origin = tmp.path().join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        std::fs::write(origin.join("a.c"), "original").unwrap();

        let dest = tmp.path().join("source");
        let source = DirectorySource::new(origin, dest.clone());
        source.synchronize().unwrap();
        std::fs::write(dest.join("a.c"), "edited").unwrap();
        source.synchronize().unwrap();

        assert_eq!(std::fs::read_to_string(dest.join("a.c")).unwrap(), "edited");
    }

    #[cfg(unix)]
    #[test]
    fn test_clean_preserves_symlinks() {
        let tmp = TempDir::new().unwrap();
        let origin = tmp.path().join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        std::fs::write(origin.join("real.h"), "").unwrap();
        std::os::unix::fs::symlink("real.h", origin.join("alias.h")).unwrap();

        let dest = tmp.path().join("source");
        DirectorySource::new(origin, dest.clone()).clean().unwrap();

        let link = std::fs::read_link(dest.join("alias.h")).unwrap();
        assert_eq!(link, PathBuf::from("real.h"));
    }
}
