//! Global context for needy operations.
//!
//! Provides centralized access to the working directory and configuration
//! locations for one invocation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::workspace::Workspace;
use crate::util::config::{global_config_path, load_config, project_config_path, NeedyConfig};

/// Global context for one invocation.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Current working directory
    cwd: PathBuf,

    /// Global config file location, if a home directory is known
    global_config: Option<PathBuf>,

    /// Verbose output
    verbose: bool,
}

impl GlobalContext {
    /// Create a context rooted at the process working directory.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;
        Ok(GlobalContext::with_cwd(cwd))
    }

    /// Create a context rooted at an explicit directory.
    pub fn with_cwd(cwd: impl Into<PathBuf>) -> Self {
        GlobalContext {
            cwd: cwd.into(),
            global_config: global_config_path(),
            verbose: false,
        }
    }

    /// Override the global config location (mostly for tests).
    pub fn with_global_config(mut self, path: Option<PathBuf>) -> Self {
        self.global_config = path;
        self
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Locate the workspace containing the working directory.
    pub fn workspace(&self) -> Result<Workspace> {
        Workspace::discover(&self.cwd)
    }

    /// Load merged global + project configuration.
    pub fn config(&self, project_root: &Path) -> NeedyConfig {
        load_config(
            self.global_config.as_deref(),
            &project_config_path(project_root),
        )
    }
}
