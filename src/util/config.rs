//! Configuration file support.
//!
//! Two kinds of configuration exist:
//! - Tool configuration (`config.toml`), global at `~/.needy/config.toml` and
//!   per project at `.needy/config.toml`. Project config takes precedence.
//! - Local configuration (`needs/config.json`), recording which libraries are
//!   in development mode for this checkout.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::util::fs::{read_to_string, write_string};

/// Tool configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NeedyConfig {
    /// Build settings
    pub build: BuildConfig,

    /// Build cache settings
    pub cache: CacheConfig,

    /// Network settings
    pub net: NetConfig,

    /// Universal binary settings
    pub universal: UniversalConfig,
}

/// Build-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct BuildConfig {
    /// Parallel jobs handed to native build tools (None = processor count)
    pub concurrency: Option<usize>,

    /// How many independent libraries may build at once (None = 1)
    pub parallel_libraries: Option<usize>,

    /// Stream external tool output to the terminal
    pub verbose_tools: bool,
}

/// Build cache configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Directories holding cached build outputs
    pub directories: Vec<PathBuf>,
}

/// Network-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct NetConfig {
    /// Per-attempt download timeout in seconds
    pub download_timeout: Option<u64>,

    /// Skip remote fetches where a local copy is usable
    pub offline: bool,
}

/// Universal binary configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct UniversalConfig {
    /// Architecture-merging tool (default: `lipo`, then `llvm-lipo`)
    pub fuse_tool: Option<PathBuf>,
}

impl NeedyConfig {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = read_to_string(path)?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {:#}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: NeedyConfig) {
        if other.build.concurrency.is_some() {
            self.build.concurrency = other.build.concurrency;
        }
        if other.build.parallel_libraries.is_some() {
            self.build.parallel_libraries = other.build.parallel_libraries;
        }
        if other.build.verbose_tools {
            self.build.verbose_tools = true;
        }

        if !other.cache.directories.is_empty() {
            self.cache.directories = other.cache.directories;
        }

        if other.net.download_timeout.is_some() {
            self.net.download_timeout = other.net.download_timeout;
        }
        if other.net.offline {
            self.net.offline = true;
        }

        if other.universal.fuse_tool.is_some() {
            self.universal.fuse_tool = other.universal.fuse_tool;
        }
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.needy/config.toml)
/// 2. Global config (~/.needy/config.toml)
/// 3. Defaults
pub fn load_config(global_path: Option<&Path>, project_path: &Path) -> NeedyConfig {
    let mut config = NeedyConfig::default();

    if let Some(global_path) = global_path {
        config.merge(NeedyConfig::load_or_default(global_path));
    }

    config.merge(NeedyConfig::load_or_default(project_path));

    config
}

/// Get the global needy config directory (~/.needy).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".needy"))
}

/// Get the global config path (~/.needy/config.toml).
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the project config path (.needy/config.toml).
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".needy").join("config.toml")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct LibraryLocalSettings {
    development_mode: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct LocalConfigurationFile {
    libraries: BTreeMap<String, LibraryLocalSettings>,
}

/// Per-checkout settings stored in `needs/config.json`.
#[derive(Debug, Clone)]
pub struct LocalConfiguration {
    path: PathBuf,
    contents: LocalConfigurationFile,
}

impl LocalConfiguration {
    /// Load the local configuration, or start empty if the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = if path.exists() {
            let text = read_to_string(path)?;
            serde_json::from_str(&text)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            LocalConfigurationFile::default()
        };

        Ok(LocalConfiguration {
            path: path.to_path_buf(),
            contents,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn development_mode(&self, library: &str) -> bool {
        self.contents
            .libraries
            .get(library)
            .map(|s| s.development_mode)
            .unwrap_or(false)
    }

    pub fn set_development_mode(&mut self, library: &str, enable: bool) {
        self.contents
            .libraries
            .entry(library.to_string())
            .or_default()
            .development_mode = enable;
    }

    /// Names of all libraries with development mode enabled, sorted.
    pub fn development_mode_libraries(&self) -> Vec<String> {
        self.contents
            .libraries
            .iter()
            .filter(|(_, s)| s.development_mode)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn save(&self) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.contents)
            .context("failed to serialize local configuration")?;
        write_string(&self.path, &text)
    }
}
