//! Source trait - common interface for all library sources.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use url::Url;

use crate::core::manifest::LibraryConfig;
use crate::util::errors::NeedyError;
use crate::util::hash::Checksum;
use crate::util::process::CancellationToken;
use crate::util::shell::Shell;

/// Populates a library's source tree.
pub trait Source: Send + Sync {
    /// Kind of source, for display.
    fn name(&self) -> &str;

    /// Directory the source tree is written to.
    fn source_directory(&self) -> &Path;

    /// Fetch if needed and make the tree pristine, discarding local changes.
    fn clean(&self) -> Result<()>;

    /// Fetch if needed while keeping local modifications.
    ///
    /// The default populates the tree once and leaves it alone afterwards.
    fn synchronize(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        self.clean()
    }

    /// Human-readable identity of what is currently checked out.
    fn status(&self) -> Result<String>;

    /// The configured pin (path, checksum, commit), recorded in build markers.
    fn identity(&self) -> String;

    fn is_initialized(&self) -> bool {
        self.source_directory().exists()
    }
}

/// Where a library's source comes from, as declared in the needs file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Directory { path: PathBuf },
    Download { url: String, checksum: Checksum },
    Git { repository: String, commit: String },
}

impl SourceSpec {
    /// Read the source keys of a library configuration.
    ///
    /// Relative directories resolve against `manifest_dir`. Downloads must
    /// carry a checksum and repositories a commit.
    pub fn from_config(library: &str, config: &LibraryConfig, manifest_dir: &Path) -> Result<Self> {
        let invalid = |message: &str| NeedyError::InvalidConfiguration {
            library: library.to_string(),
            message: message.to_string(),
        };

        if let Some(ref url) = config.download {
            let Some(ref checksum) = config.checksum else {
                return Err(invalid("checksums are required for downloads").into());
            };
            let checksum = Checksum::parse(checksum).map_err(|e| invalid(&format!("{e:#}")))?;
            let parsed = Url::parse(url).map_err(|e| invalid(&format!("invalid download url `{url}`: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(invalid(&format!("unsupported download scheme `{}`", parsed.scheme())).into());
            }
            return Ok(SourceSpec::Download {
                url: url.clone(),
                checksum,
            });
        }

        if let Some(ref repository) = config.repository {
            let Some(ref commit) = config.commit else {
                return Err(invalid("`repository` requires a `commit`").into());
            };
            return Ok(SourceSpec::Git {
                repository: repository.clone(),
                commit: commit.clone(),
            });
        }

        if let Some(ref directory) = config.directory {
            let path = Path::new(directory);
            let path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                manifest_dir.join(path)
            };
            return Ok(SourceSpec::Directory { path });
        }

        Err(invalid("no source specified (expected `download`, `repository` or `directory`)").into())
    }
}

/// Settings shared by every source of one invocation.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Content-addressed download cache
    pub download_cache: PathBuf,

    /// Per-attempt download timeout
    pub download_timeout: Option<Duration>,

    /// Skip remote fetches where a local copy is usable
    pub offline: bool,

    pub cancel: CancellationToken,

    pub shell: Arc<Shell>,
}

impl SourceOptions {
    pub fn new(download_cache: PathBuf, shell: Arc<Shell>) -> Self {
        SourceOptions {
            download_cache,
            download_timeout: None,
            offline: false,
            cancel: CancellationToken::new(),
            shell,
        }
    }
}
