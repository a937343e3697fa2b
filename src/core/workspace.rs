//! Workspace - the project a needs file belongs to.
//!
//! The workspace root is the nearest directory, walking upward from where
//! needy was invoked, that contains a needs file. Everything needy manages
//! lives in `needs/` beside it.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::manifest::MANIFEST_NAMES;
use crate::util::errors::NeedyError;

/// A project directory with its needs file.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    manifest_path: PathBuf,
}

impl Workspace {
    /// Find the workspace containing `start`.
    pub fn discover(start: &Path) -> Result<Self> {
        for directory in start.ancestors() {
            if let Some(manifest_path) = find_manifest(directory)? {
                tracing::debug!("using needs file {}", manifest_path.display());
                return Ok(Workspace {
                    root: directory.to_path_buf(),
                    manifest_path,
                });
            }
        }

        Err(NeedyError::NoManifestFound {
            directory: start.to_path_buf(),
        }
        .into())
    }

    /// Open the workspace rooted exactly at `root`.
    pub fn at(root: &Path) -> Result<Self> {
        match find_manifest(root)? {
            Some(manifest_path) => Ok(Workspace {
                root: root.to_path_buf(),
                manifest_path,
            }),
            None => Err(NeedyError::NoManifestFound {
                directory: root.to_path_buf(),
            }
            .into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// The `needs/` directory.
    pub fn needs_dir(&self) -> PathBuf {
        self.root.join("needs")
    }

    /// Directory owned by one library: `needs/<name>`.
    pub fn library_dir(&self, name: &str) -> PathBuf {
        self.needs_dir().join(name)
    }

    /// Content-addressed download cache.
    pub fn download_cache_dir(&self) -> PathBuf {
        self.needs_dir().join(".cache").join("download")
    }

    /// Per-checkout settings file.
    pub fn local_config_path(&self) -> PathBuf {
        self.needs_dir().join("config.json")
    }
}

/// Locate the needs file in `directory`.
///
/// Returns `None` when there is none and fails when more than one exists.
pub fn find_manifest(directory: &Path) -> Result<Option<PathBuf>> {
    let candidates: Vec<PathBuf> = MANIFEST_NAMES
        .iter()
        .map(|name| directory.join(name))
        .filter(|path| path.is_file())
        .collect();

    match candidates.len() {
        0 => Ok(None),
        1 => Ok(candidates.into_iter().next()),
        _ => Err(NeedyError::AmbiguousManifest {
            directory: directory.to_path_buf(),
            candidates,
        }
        .into()),
    }
}
