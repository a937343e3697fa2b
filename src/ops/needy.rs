//! The orchestrator: everything a `needy` command does to a workspace.
//!
//! One [`Needy`] value lives for one top-level invocation. It owns the
//! evaluated-manifest memo and the per-(library, target) build locks, so two
//! invocations never share state.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::builder::cache::BuildCache;
use crate::builder::universal::{resolve_fuse_tool, Constituent, UniversalBinary};
use crate::core::library::{build_directory_in, Library, LibraryOptions};
use crate::core::manifest::{BuildDirectories, EvaluationStage, FileManifest, Manifest, ManifestEvaluator};
use crate::core::target::Target;
use crate::core::workspace::Workspace;
use crate::resolver::{resolve, LibraryFilter};
use crate::sources::SourceOptions;
use crate::util::config::{LocalConfiguration, NeedyConfig};
use crate::util::context::GlobalContext;
use crate::util::errors::NeedyError;
use crate::util::process::CancellationToken;
use crate::util::shell::{Shell, Status};

/// Invocation settings that override configuration.
#[derive(Debug, Clone, Default)]
pub struct NeedyOptions {
    /// Parallel jobs for native build tools (`-j`)
    pub jobs: Option<usize>,

    /// Independent libraries built at once
    pub parallel_libraries: Option<usize>,

    /// Stream tool output
    pub verbose: bool,

    pub cancel: CancellationToken,
}

/// What a query is about: one target or a universal binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Target(Target),
    UniversalBinary(String),
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Target(target) => write!(f, "{}", target),
            Selector::UniversalBinary(name) => write!(f, "universal binary {}", name),
        }
    }
}

/// Answers build directory lookups for libraries seen during discovery.
struct DeclaredBuildDirectories<'a> {
    workspace: &'a Workspace,
    libraries: HashSet<String>,
}

impl BuildDirectories for DeclaredBuildDirectories<'_> {
    fn build_directory(&self, library: &str, target: &Target) -> Option<PathBuf> {
        self.libraries
            .contains(library)
            .then(|| build_directory_in(&self.workspace.library_dir(library), target))
    }
}

type BuildLocks = HashMap<(String, String), Arc<Mutex<()>>>;

pub struct Needy {
    workspace: Workspace,
    evaluator: Box<dyn ManifestEvaluator>,
    config: NeedyConfig,
    local: Mutex<LocalConfiguration>,
    library_options: LibraryOptions,
    parallel_libraries: usize,
    manifests: Mutex<HashMap<Target, Arc<Manifest>>>,
    build_locks: Mutex<BuildLocks>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Needy {
    /// Open the workspace around the context's working directory.
    pub fn open(gctx: &GlobalContext, options: NeedyOptions, shell: Arc<Shell>) -> Result<Self> {
        let workspace = gctx.workspace()?;
        let evaluator = FileManifest::load(workspace.manifest_path())?;
        let config = gctx.config(workspace.root());
        let local = LocalConfiguration::load(&workspace.local_config_path())?;
        Ok(Needy::new(
            workspace,
            Box::new(evaluator),
            config,
            local,
            options,
            shell,
        ))
    }

    pub fn new(
        workspace: Workspace,
        evaluator: Box<dyn ManifestEvaluator>,
        config: NeedyConfig,
        local: LocalConfiguration,
        options: NeedyOptions,
        shell: Arc<Shell>,
    ) -> Self {
        let concurrency = options
            .jobs
            .or(config.build.concurrency)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1);
        let parallel_libraries = options
            .parallel_libraries
            .or(config.build.parallel_libraries)
            .unwrap_or(1)
            .clamp(1, concurrency);

        let mut sources = SourceOptions::new(workspace.download_cache_dir(), shell);
        sources.download_timeout = config.net.download_timeout.map(Duration::from_secs);
        sources.offline = config.net.offline;
        sources.cancel = options.cancel.clone();

        let mut library_options = LibraryOptions::new(sources);
        library_options.concurrency = concurrency;
        library_options.verbose = options.verbose || config.build.verbose_tools;
        library_options.caches = config
            .cache
            .directories
            .iter()
            .map(|dir| BuildCache::new(workspace.root().join(dir)))
            .collect();

        tracing::debug!(
            "build concurrency {}, {} librar{} at a time",
            concurrency,
            parallel_libraries,
            if parallel_libraries == 1 { "y" } else { "ies" }
        );

        Needy {
            workspace,
            evaluator,
            config,
            local: Mutex::new(local),
            library_options,
            parallel_libraries,
            manifests: Mutex::new(HashMap::new()),
            build_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn shell(&self) -> &Shell {
        self.library_options.shell()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        self.library_options.cancel()
    }

    /// The needs document for `target`, evaluated once per invocation.
    pub fn manifest(&self, target: &Target) -> Result<Arc<Manifest>> {
        if let Some(manifest) = lock(&self.manifests).get(target) {
            return Ok(manifest.clone());
        }

        let discovered = self
            .evaluator
            .evaluate(target, EvaluationStage::Discovery)?;
        let directories = DeclaredBuildDirectories {
            workspace: &self.workspace,
            libraries: discovered
                .libraries()
                .map(|(name, _)| name.to_string())
                .collect(),
        };
        let manifest = Arc::new(
            self.evaluator
                .evaluate(target, EvaluationStage::Final(&directories))?,
        );

        lock(&self.manifests).insert(target.clone(), manifest.clone());
        Ok(manifest)
    }

    /// Bind library `name` to `target`.
    pub fn library(&self, target: &Target, name: &str) -> Result<Library> {
        let manifest = self.manifest(target)?;
        let config = manifest
            .library(name)
            .ok_or_else(|| NeedyError::UnknownLibrary(name.to_string()))?;
        let development_mode = lock(&self.local).development_mode(name);
        Library::new(
            name,
            config,
            target,
            &self.workspace,
            development_mode,
            &self.library_options,
        )
    }

    /// Libraries selected by `filters`, in needs file order, without dependencies.
    pub fn libraries(&self, target: &Target, filters: &[String]) -> Result<Vec<Library>> {
        let filter = LibraryFilter::new(filters)?;
        let manifest = self.manifest(target)?;
        manifest
            .libraries()
            .filter(|(name, _)| filter.matches(name))
            .map(|(name, _)| self.library(target, name))
            .collect()
    }

    /// Selected libraries plus their dependencies, dependencies first.
    pub fn libraries_to_build(&self, target: &Target, filters: &[String]) -> Result<Vec<Library>> {
        Ok(self.build_waves(target, filters)?.into_iter().flatten().collect())
    }

    fn build_waves(&self, target: &Target, filters: &[String]) -> Result<Vec<Vec<Library>>> {
        let filter = LibraryFilter::new(filters)?;
        let manifest = self.manifest(target)?;
        let graph = resolve(&manifest, &filter)?;
        graph
            .waves()?
            .into_iter()
            .map(|wave| {
                wave.iter()
                    .map(|name| self.library(target, name))
                    .collect::<Result<Vec<_>>>()
            })
            .collect()
    }

    /// Build everything selected for `target` that is not up to date.
    pub fn satisfy_target(&self, target: &Target, filters: &[String]) -> Result<()> {
        self.report(|| self.satisfy_target_quietly(target, filters))
    }

    fn satisfy_target_quietly(&self, target: &Target, filters: &[String]) -> Result<()> {
        let waves = self.build_waves(target, filters)?;
        if waves.is_empty() {
            return Ok(());
        }
        tracing::info!(
            "satisfying {} in {}",
            target,
            self.workspace.root().display()
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallel_libraries)
            .build()
            .context("failed to start build threads")?;

        for wave in waves {
            self.cancellation().check()?;
            let results: Vec<Result<()>> =
                pool.install(|| wave.par_iter().map(|lib| self.satisfy_library(lib)).collect());
            for result in results {
                result?;
            }
        }
        Ok(())
    }

    fn satisfy_library(&self, library: &Library) -> Result<()> {
        let build_lock = self.build_lock(library.name(), &library.target().to_string());
        let _guard = lock(&build_lock);

        if library.has_up_to_date_build()? {
            self.shell().status(Status::UpToDate, library.name());
            return Ok(());
        }

        self.shell().status(Status::OutOfDate, library.name());
        let started = Instant::now();
        library.build()?;
        self.shell().status(
            Status::Success,
            format!(
                "{} in {:.2}s",
                library.name(),
                started.elapsed().as_secs_f64()
            ),
        );
        Ok(())
    }

    fn build_lock(&self, library: &str, key: &str) -> Arc<Mutex<()>> {
        lock(&self.build_locks)
            .entry((library.to_string(), key.to_string()))
            .or_default()
            .clone()
    }

    /// Print `[ERROR]` if `f` fails.
    fn report<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let result = f();
        if result.is_err() {
            self.shell().bare_status(Status::Error);
        }
        result
    }

    /// Build every constituent target of a universal binary, then fuse.
    pub fn satisfy_universal_binary(&self, name: &str, filters: &[String]) -> Result<()> {
        self.report(|| {
            let targets = self.universal_binary_targets(name)?;
            for target in &targets {
                self.satisfy_target_quietly(target, filters)?;
            }

            tracing::info!("satisfying universal binary {}", name);
            for binary in self.universal_binaries(name, filters)? {
                self.satisfy_universal_library(&binary)?;
            }
            Ok(())
        })
    }

    fn satisfy_universal_library(&self, binary: &UniversalBinary) -> Result<()> {
        let library = binary.library();
        let build_lock = self.build_lock(library, &format!("universal:{}", binary.name()));
        let _guard = lock(&build_lock);

        if binary.is_up_to_date() {
            self.shell().status(Status::UpToDate, library);
            return Ok(());
        }

        self.shell().status(Status::OutOfDate, library);
        let started = Instant::now();
        let tool = resolve_fuse_tool(library, self.config.universal.fuse_tool.as_deref())?;
        binary.fuse(&tool, self.cancellation())?;
        self.shell().status(
            Status::Success,
            format!("{} in {:.2}s", library, started.elapsed().as_secs_f64()),
        );
        Ok(())
    }

    fn universal_binary_targets(&self, name: &str) -> Result<Vec<Target>> {
        self.manifest(&Target::host())?.universal_binary(name)?.targets()
    }

    /// One [`UniversalBinary`] per selected library that builds anything.
    pub fn universal_binaries(&self, name: &str, filters: &[String]) -> Result<Vec<UniversalBinary>> {
        let targets = self.universal_binary_targets(name)?;
        let Some(first) = targets.first() else {
            return Ok(Vec::new());
        };

        let mut binaries = Vec::new();
        for library in self.libraries(first, filters)? {
            let mut constituents = Vec::with_capacity(targets.len());
            let mut builds = true;
            for target in &targets {
                let bound = self.library(target, library.name())?;
                builds &= bound.should_build()?;
                constituents.push(Constituent {
                    target: target.clone(),
                    build_directory: bound.build_directory(),
                });
            }
            if !builds {
                tracing::debug!("{}: nothing to fuse for {}", library.name(), name);
                continue;
            }
            binaries.push(UniversalBinary::new(
                library.name(),
                name,
                library.universal_binary_directory(name),
                constituents,
            ));
        }
        Ok(binaries)
    }

    pub fn include_paths(&self, selector: &Selector, filters: &[String]) -> Result<Vec<PathBuf>> {
        match selector {
            Selector::Target(target) => Ok(self
                .libraries(target, filters)?
                .iter()
                .map(Library::include_path)
                .collect()),
            Selector::UniversalBinary(name) => Ok(self
                .universal_binaries(name, filters)?
                .iter()
                .filter_map(UniversalBinary::include_path)
                .collect()),
        }
    }

    pub fn library_paths(&self, selector: &Selector, filters: &[String]) -> Result<Vec<PathBuf>> {
        match selector {
            Selector::Target(target) => Ok(self
                .libraries(target, filters)?
                .iter()
                .map(Library::library_path)
                .collect()),
            Selector::UniversalBinary(name) => Ok(self
                .universal_binaries(name, filters)?
                .iter()
                .map(UniversalBinary::library_path)
                .collect()),
        }
    }

    pub fn pkg_config_paths(&self, selector: &Selector, filters: &[String]) -> Result<Vec<PathBuf>> {
        Ok(self
            .library_paths(selector, filters)?
            .into_iter()
            .map(|path| path.join("pkgconfig"))
            .collect())
    }

    pub fn build_directory(&self, library: &str, selector: &Selector) -> Result<PathBuf> {
        match selector {
            Selector::Target(target) => Ok(self.library(target, library)?.build_directory()),
            Selector::UniversalBinary(name) => {
                self.universal_binary_targets(name)?;
                Ok(self
                    .library(&Target::host(), library)?
                    .universal_binary_directory(name))
            }
        }
    }

    /// Populate pristine source trees for the selected libraries.
    pub fn initialize(&self, target: &Target, filters: &[String]) -> Result<()> {
        for library in self.libraries(target, filters)? {
            tracing::info!("initializing {}", library.name());
            library.initialize_source()?;
        }
        Ok(())
    }

    /// Update development-mode libraries while keeping local changes.
    ///
    /// With filters, every selected library must be in development mode.
    pub fn synchronize(&self, target: &Target, filters: &[String]) -> Result<()> {
        let mut selected = Vec::new();
        for library in self.libraries(target, filters)? {
            if library.is_development_mode() {
                selected.push(library);
            } else if !filters.is_empty() {
                return Err(NeedyError::DevelopmentModeRequired {
                    library: library.name().to_string(),
                    reason: "development mode is not enabled".to_string(),
                }
                .into());
            }
        }

        if selected.is_empty() {
            self.shell()
                .warn("no libraries have development mode enabled");
        }
        for library in selected {
            tracing::info!("synchronizing {}", library.name());
            library.synchronize_source()?;
        }
        Ok(())
    }

    /// Human-readable identity of a library's checked-out source.
    pub fn status(&self, target: &Target, name: &str) -> Result<String> {
        self.library(target, name)?.status()
    }

    pub fn source_directory(&self, name: &str) -> PathBuf {
        self.workspace.library_dir(name).join("source")
    }

    /// Toggle development mode. Returns whether it was already in that state.
    pub fn set_development_mode(&self, name: &str, enable: bool) -> Result<bool> {
        if !self.source_directory(name).is_dir() {
            return Err(NeedyError::DevelopmentModeRequired {
                library: name.to_string(),
                reason: "initialize the library before changing development mode".to_string(),
            }
            .into());
        }

        let mut local = lock(&self.local);
        let already = local.development_mode(name) == enable;
        local.set_development_mode(name, enable);
        local.save()?;
        Ok(already)
    }

    pub fn development_mode_libraries(&self) -> Vec<String> {
        lock(&self.local).development_mode_libraries()
    }

    pub fn manifest_path(&self) -> &Path {
        self.evaluator.path()
    }
}
