//! A needs file entry bound to one target.
//!
//! [`Library`] owns everything on disk below `needs/<name>`: the `source/`
//! tree and one build directory per target. It decides whether a build is
//! fresh and drives fetch, configure, build and install.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::{Map, Value};

use crate::builder::cache::{restore_from_any, store_in_all, BuildCache};
use crate::builder::fingerprint::{configuration_fingerprint, BuildMarker};
use crate::builder::project::{evaluate_conditionals, select_project, ProjectContext, ProjectDefinition};
use crate::core::manifest::LibraryConfig;
use crate::core::target::Target;
use crate::core::workspace::Workspace;
use crate::sources::{create_source, Source, SourceOptions, SourceSpec};
use crate::util::errors::{BuildPhase, NeedyError};
use crate::util::fs::{recreate_dir, remove_path};
use crate::util::process::CancellationToken;
use crate::util::shell::Shell;

/// Settings shared by every library of one invocation.
#[derive(Debug, Clone)]
pub struct LibraryOptions {
    /// Parallel jobs handed to native build tools
    pub concurrency: usize,

    /// Stream tool output
    pub verbose: bool,

    pub caches: Vec<BuildCache>,

    pub sources: SourceOptions,
}

impl LibraryOptions {
    pub fn new(sources: SourceOptions) -> Self {
        LibraryOptions {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            verbose: false,
            caches: Vec::new(),
            sources,
        }
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.sources.cancel
    }

    pub fn shell(&self) -> &Arc<Shell> {
        &self.sources.shell
    }
}

/// Where a library stands for one target.
///
/// Only states that can be read back from disk are listed. Building, built
/// and failed exist only while [`Library::build`] runs: a success leaves
/// `UpToDate`, a failure removes the build directory and leaves `Initialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryState {
    /// No source tree yet
    Uninitialized,
    /// Source present, never built for this target
    Initialized,
    UpToDate,
    /// Built, but from different inputs
    Stale,
}

impl fmt::Display for LibraryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LibraryState::Uninitialized => "uninitialized",
            LibraryState::Initialized => "initialized",
            LibraryState::UpToDate => "up to date",
            LibraryState::Stale => "out of date",
        })
    }
}

pub struct Library {
    name: String,
    target: Target,
    config: LibraryConfig,
    directory: PathBuf,
    source: Box<dyn Source>,
    development_mode: bool,
    options: LibraryOptions,
}

impl Library {
    pub fn new(
        name: &str,
        config: &LibraryConfig,
        target: &Target,
        workspace: &Workspace,
        development_mode: bool,
        options: &LibraryOptions,
    ) -> Result<Self> {
        let directory = workspace.library_dir(name);
        let spec = SourceSpec::from_config(name, config, workspace.root())?;
        let source = create_source(spec, directory.join("source"), &options.sources);

        Ok(Library {
            name: name.to_string(),
            target: target.clone(),
            config: config.clone(),
            directory,
            source,
            development_mode,
            options: options.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    pub fn dependencies(&self) -> Vec<String> {
        self.config.dependencies()
    }

    pub fn is_development_mode(&self) -> bool {
        self.development_mode
    }

    /// `needs/<name>`
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn source_directory(&self) -> &Path {
        self.source.source_directory()
    }

    /// `needs/<name>/build/<platform>/<arch>`
    pub fn build_directory(&self) -> PathBuf {
        build_directory_in(&self.directory, &self.target)
    }

    pub fn universal_binary_directory(&self, universal_binary: &str) -> PathBuf {
        self.directory
            .join("build")
            .join("universal")
            .join(universal_binary)
    }

    pub fn include_path(&self) -> PathBuf {
        self.build_directory().join("include")
    }

    pub fn library_path(&self) -> PathBuf {
        self.build_directory().join("lib")
    }

    /// The `project` section with this target's conditionals applied.
    pub fn project_configuration(&self) -> Result<Map<String, Value>> {
        evaluate_conditionals(&self.name, &self.config.project, &self.target)
    }

    fn definition(&self) -> Result<ProjectDefinition> {
        ProjectDefinition::new(
            &self.name,
            &self.target,
            self.source_directory(),
            &self.project_configuration()?,
        )
    }

    /// Whether this target has anything to build at all.
    pub fn should_build(&self) -> Result<bool> {
        Ok(self.definition()?.settings.build)
    }

    /// Fingerprint of the resolved configuration for this target.
    pub fn configuration_fingerprint(&self) -> Result<String> {
        let mut top_level = serde_json::to_value(&self.config)?;
        if let Value::Object(ref mut map) = top_level {
            map.remove("project");
        }
        Ok(configuration_fingerprint(
            &top_level,
            &self.project_configuration()?,
        ))
    }

    pub fn is_initialized(&self) -> bool {
        self.source.is_initialized()
    }

    /// Populate the source tree, discarding local changes.
    pub fn initialize_source(&self) -> Result<()> {
        self.source.clean()
    }

    /// Update the source tree while keeping local changes.
    ///
    /// Only available in development mode on an initialized tree.
    pub fn synchronize_source(&self) -> Result<()> {
        if !self.development_mode {
            return Err(NeedyError::DevelopmentModeRequired {
                library: self.name.clone(),
                reason: "development mode is not enabled".to_string(),
            }
            .into());
        }
        if !self.is_initialized() {
            return Err(NeedyError::DevelopmentModeRequired {
                library: self.name.clone(),
                reason: "the source has not been initialized".to_string(),
            }
            .into());
        }
        self.source.synchronize()
    }

    /// Identity of the checked-out source.
    pub fn status(&self) -> Result<String> {
        self.source.status()
    }

    pub fn has_up_to_date_build(&self) -> Result<bool> {
        if !self.should_build()? {
            return Ok(true);
        }
        if self.development_mode {
            return Ok(false);
        }
        let Some(marker) = BuildMarker::load(&self.build_directory()) else {
            return Ok(false);
        };
        Ok(marker.matches(
            &self.configuration_fingerprint()?,
            &self.source.identity(),
        ))
    }

    pub fn state(&self) -> Result<LibraryState> {
        if self.has_up_to_date_build()? {
            return Ok(LibraryState::UpToDate);
        }
        if !self.is_initialized() {
            return Ok(LibraryState::Uninitialized);
        }
        if BuildMarker::path(&self.build_directory()).is_file() || self.development_mode {
            Ok(LibraryState::Stale)
        } else {
            Ok(LibraryState::Initialized)
        }
    }

    /// Build for this library's target.
    ///
    /// Failures remove the build directory and are wrapped in
    /// [`NeedyError::LibraryBuildFailure`]. A cancelled build fails with
    /// [`NeedyError::Cancelled`] instead.
    pub fn build(&self) -> Result<()> {
        if !self.should_build()? {
            return Ok(());
        }

        let started = Instant::now();
        let build_directory = self.build_directory();
        let mut phase = BuildPhase::Fetch;

        match self.run_build(&build_directory, &mut phase) {
            Ok(()) => Ok(()),
            Err(source) => {
                if let Err(e) = remove_path(&build_directory) {
                    tracing::warn!("failed to remove {}: {:#}", build_directory.display(), e);
                }
                if self.options.cancel().is_cancelled() {
                    tracing::debug!("{} cancelled during {}", self.name, phase);
                    return Err(NeedyError::Cancelled.into());
                }
                Err(self.failure(phase, started.elapsed(), source))
            }
        }
    }

    fn failure(&self, phase: BuildPhase, elapsed: Duration, source: anyhow::Error) -> anyhow::Error {
        NeedyError::LibraryBuildFailure {
            library: self.name.clone(),
            target: self.target.to_string(),
            phase,
            elapsed,
            source,
        }
        .into()
    }

    fn run_build(&self, build_directory: &Path, phase: &mut BuildPhase) -> Result<()> {
        BuildMarker::invalidate(build_directory)?;
        let fingerprint = self.configuration_fingerprint()?;
        let caches: &[BuildCache] = if self.development_mode {
            &[]
        } else {
            &self.options.caches
        };

        *phase = BuildPhase::Cache;
        if restore_from_any(caches, &self.name, &self.target, &fingerprint, build_directory) {
            return BuildMarker::new(&fingerprint, self.source.identity()).save(build_directory);
        }

        tracing::info!("building {} for {}", self.name, self.target);
        if self.directory.to_string_lossy().contains(' ') {
            self.options.shell().warn(
                "The build path contains spaces. Some build systems don't handle spaces well.",
            );
        }

        *phase = BuildPhase::Fetch;
        if self.development_mode {
            self.source.synchronize()?;
        } else {
            self.source.clean()?;
        }

        *phase = BuildPhase::Configure;
        let definition = self.definition()?;
        let ctx = ProjectContext::new(
            &definition,
            self.options.concurrency,
            self.options.verbose,
            self.options.cancel(),
        );
        ctx.run_commands(&definition.settings.post_clean, build_directory)?;

        let project = select_project(&definition)?;
        let missing = project.missing_prerequisites(&definition);
        if !missing.is_empty() {
            return Err(NeedyError::MissingPrerequisite {
                library: self.name.clone(),
                tools: missing,
            }
            .into());
        }

        recreate_dir(build_directory)?;
        project.configure(&ctx, build_directory)?;

        *phase = BuildPhase::Build;
        ctx.run_commands(&definition.settings.pre_build, build_directory)?;
        project.build(&ctx, build_directory)?;

        *phase = BuildPhase::Install;
        ctx.run_commands(&definition.settings.post_build, build_directory)?;
        BuildMarker::new(&fingerprint, self.source.identity()).save(build_directory)?;

        store_in_all(caches, &self.name, &self.target, &fingerprint, build_directory);
        Ok(())
    }
}

/// Build directory for `target` below a library directory.
pub fn build_directory_in(library_directory: &Path, target: &Target) -> PathBuf {
    library_directory
        .join("build")
        .join(target.build_subdirectory())
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Library")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("source", &self.source.name())
            .field("development_mode", &self.development_mode)
            .finish()
    }
}
