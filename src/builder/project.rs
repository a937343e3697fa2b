//! Build strategies ("projects").
//!
//! A project turns a populated source tree into installed headers and
//! libraries under an output directory. The set of strategies is closed
//! ([`ProjectKind`]); each variant detects itself from the source tree,
//! reports missing tools, then runs `configure` and `build`.
//!
//! The `project` section of a library entry holds keys common to every
//! strategy (see [`ProjectSettings`]) plus strategy options that are parsed
//! into a per-strategy struct rejecting unknown keys.

use std::cmp::Reverse;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::builder::autotools::AutotoolsProject;
use crate::builder::cmake::CMakeProject;
use crate::builder::custom::CustomProject;
use crate::builder::make::MakeProject;
use crate::core::manifest::StringOrList;
use crate::core::target::Target;
use crate::util::errors::NeedyError;
use crate::util::process::{CancellationToken, ProcessBuilder};

/// Preferred library linkage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    Static,
    #[serde(alias = "dynamic")]
    Shared,
}

/// Keys understood for every strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectSettings {
    /// Explicit strategy; detected when absent
    pub project_type: Option<String>,

    /// `false` marks a library with nothing to build
    pub build: bool,

    pub linkage: Option<Linkage>,

    pub max_concurrency: Option<usize>,

    /// Shell commands run in the source tree after it is cleaned
    pub post_clean: Vec<String>,

    pub pre_build: Vec<String>,

    pub post_build: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawProject {
    #[serde(rename = "type", default)]
    project_type: Option<String>,
    #[serde(default = "default_build")]
    build: bool,
    #[serde(default)]
    linkage: Option<Linkage>,
    #[serde(default)]
    max_concurrency: Option<usize>,
    #[serde(default)]
    post_clean: StringOrList,
    #[serde(default)]
    pre_build: StringOrList,
    #[serde(default)]
    post_build: StringOrList,
    #[serde(flatten)]
    options: Map<String, Value>,
}

fn default_build() -> bool {
    true
}

/// Apply `conditionals` for `target` and drop the key.
///
/// Each conditional is `{platform: id | [ids], architecture: ..., true: {...},
/// false: {...}}`; the selected branch's keys replace top-level keys.
pub fn evaluate_conditionals(
    library: &str,
    project: &Map<String, Value>,
    target: &Target,
) -> Result<Map<String, Value>> {
    let invalid = |message: String| NeedyError::InvalidConfiguration {
        library: library.to_string(),
        message,
    };

    let mut result = project.clone();
    let Some(conditionals) = result.remove("conditionals") else {
        return Ok(result);
    };
    let Value::Array(conditionals) = conditionals else {
        return Err(invalid("`conditionals` must be a list".to_string()).into());
    };

    for conditional in conditionals {
        let Value::Object(conditional) = conditional else {
            return Err(invalid("each conditional must be a mapping".to_string()).into());
        };

        let mut holds = true;
        for (key, value) in &conditional {
            let actual = match key.as_str() {
                "true" | "false" => continue,
                "platform" => target.platform().identifier(),
                "architecture" => target.architecture(),
                other => {
                    return Err(invalid(format!("unknown conditional key `{}`", other)).into())
                }
            };
            let matched = match value {
                Value::String(expected) => expected == actual,
                Value::Array(options) => options.iter().any(|o| o.as_str() == Some(actual)),
                _ => {
                    return Err(invalid(format!(
                        "conditional `{}` must be a string or a list",
                        key
                    ))
                    .into())
                }
            };
            holds &= matched;
        }

        let branch = conditional.get(if holds { "true" } else { "false" });
        match branch {
            None => {}
            Some(Value::Object(overrides)) => {
                for (key, value) in overrides {
                    result.insert(key.clone(), value.clone());
                }
            }
            Some(_) => {
                return Err(invalid("conditional branches must be mappings".to_string()).into())
            }
        }
    }

    Ok(result)
}

/// Everything known about a library's project for one target.
#[derive(Debug, Clone)]
pub struct ProjectDefinition {
    pub library: String,
    pub target: Target,
    pub source_directory: PathBuf,
    pub settings: ProjectSettings,
    /// Strategy-specific keys
    pub options: Map<String, Value>,
}

impl ProjectDefinition {
    /// Split an evaluated `project` section into common settings and options.
    pub fn new(
        library: &str,
        target: &Target,
        source_directory: &Path,
        evaluated: &Map<String, Value>,
    ) -> Result<Self> {
        let raw: RawProject = serde_json::from_value(Value::Object(evaluated.clone())).map_err(
            |e| NeedyError::InvalidConfiguration {
                library: library.to_string(),
                message: format!("project: {}", e),
            },
        )?;

        Ok(ProjectDefinition {
            library: library.to_string(),
            target: target.clone(),
            source_directory: source_directory.to_path_buf(),
            settings: ProjectSettings {
                project_type: raw.project_type,
                build: raw.build,
                linkage: raw.linkage,
                max_concurrency: raw.max_concurrency,
                post_clean: raw.post_clean.into_vec(),
                pre_build: raw.pre_build.into_vec(),
                post_build: raw.post_build.into_vec(),
            },
            options: raw.options,
        })
    }

    /// Parse the strategy options, rejecting keys the strategy doesn't know.
    pub fn parse_options<T: DeserializeOwned>(&self, kind: ProjectKind) -> Result<T> {
        serde_json::from_value(Value::Object(self.options.clone())).map_err(|e| {
            NeedyError::InvalidConfiguration {
                library: self.library.clone(),
                message: format!("{} project: {}", kind, e),
            }
            .into()
        })
    }

    pub fn source_file(&self, name: &str) -> PathBuf {
        self.source_directory.join(name)
    }
}

/// Outcome of a strategy inspecting a source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    Valid(String),
    Invalid(Vec<String>),
}

impl Detection {
    pub fn is_valid(&self) -> bool {
        matches!(self, Detection::Valid(_))
    }
}

/// The closed set of build strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectKind {
    Autotools,
    CMake,
    Make,
    Custom,
}

impl ProjectKind {
    /// Detection order when scores tie.
    pub const ALL: [ProjectKind; 4] = [
        ProjectKind::Autotools,
        ProjectKind::CMake,
        ProjectKind::Make,
        ProjectKind::Custom,
    ];

    pub fn identifier(&self) -> &'static str {
        match self {
            ProjectKind::Autotools => "autotools",
            ProjectKind::CMake => "cmake",
            ProjectKind::Make => "make",
            ProjectKind::Custom => "custom",
        }
    }

    pub fn from_identifier(id: &str) -> Option<Self> {
        ProjectKind::ALL.into_iter().find(|k| k.identifier() == id)
    }

    /// Strategy-specific keys this strategy understands.
    pub fn configuration_keys(&self) -> &'static [&'static str] {
        match self {
            ProjectKind::Autotools => AutotoolsProject::CONFIGURATION_KEYS,
            ProjectKind::CMake => CMakeProject::CONFIGURATION_KEYS,
            ProjectKind::Make => MakeProject::CONFIGURATION_KEYS,
            ProjectKind::Custom => CustomProject::CONFIGURATION_KEYS,
        }
    }

    fn score(&self, definition: &ProjectDefinition) -> usize {
        self.configuration_keys()
            .iter()
            .filter(|key| definition.options.contains_key(**key))
            .count()
    }

    pub fn is_valid_project(&self, definition: &ProjectDefinition) -> Detection {
        match self {
            ProjectKind::Autotools => AutotoolsProject::is_valid_project(definition),
            ProjectKind::CMake => CMakeProject::is_valid_project(definition),
            ProjectKind::Make => MakeProject::is_valid_project(definition),
            ProjectKind::Custom => CustomProject::is_valid_project(definition),
        }
    }

    pub fn instantiate(&self, definition: &ProjectDefinition) -> Result<Box<dyn Project>> {
        Ok(match self {
            ProjectKind::Autotools => Box::new(AutotoolsProject::new(definition)?),
            ProjectKind::CMake => Box::new(CMakeProject::new(definition)?),
            ProjectKind::Make => Box::new(MakeProject::new(definition)?),
            ProjectKind::Custom => Box::new(CustomProject::new(definition)?),
        })
    }
}

impl fmt::Display for ProjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

/// A strategy bound to one library's options.
pub trait Project: Send + Sync {
    fn kind(&self) -> ProjectKind;

    /// Tools the strategy needs that are not on `PATH`.
    fn missing_prerequisites(&self, definition: &ProjectDefinition) -> Vec<String>;

    fn configure(&self, ctx: &ProjectContext<'_>, output_directory: &Path) -> Result<()>;

    fn build(&self, ctx: &ProjectContext<'_>, output_directory: &Path) -> Result<()>;
}

/// Pick the strategy for a definition.
///
/// An explicit `type` wins. Otherwise strategies are tried in order of how
/// many of their keys appear in the options, and the first one recognizing
/// the source tree is used.
pub fn select_project(definition: &ProjectDefinition) -> Result<Box<dyn Project>> {
    if let Some(ref project_type) = definition.settings.project_type {
        let Some(kind) = ProjectKind::from_identifier(project_type) else {
            return Err(NeedyError::UnknownProjectType {
                library: definition.library.clone(),
                reasons: vec![format!("`{}` is not a known project type", project_type)],
            }
            .into());
        };
        return kind.instantiate(definition);
    }

    let mut candidates = ProjectKind::ALL.to_vec();
    candidates.sort_by_key(|kind| Reverse(kind.score(definition)));

    let mut reasons = Vec::new();
    for kind in candidates {
        match kind.is_valid_project(definition) {
            Detection::Valid(reason) => {
                tracing::debug!("{}: {} project ({})", definition.library, kind, reason);
                return kind.instantiate(definition);
            }
            Detection::Invalid(why) => {
                for reason in why {
                    tracing::debug!("{}: not {}: {}", definition.library, kind, reason);
                    reasons.push(format!("{}: {}", kind, reason));
                }
            }
        }
    }

    Err(NeedyError::UnknownProjectType {
        library: definition.library.clone(),
        reasons,
    }
    .into())
}

/// Execution environment handed to a strategy.
pub struct ProjectContext<'a> {
    pub definition: &'a ProjectDefinition,

    /// Parallel jobs for native build tools
    pub concurrency: usize,

    /// Stream tool output instead of capturing it
    pub verbose: bool,

    pub cancel: &'a CancellationToken,
}

impl<'a> ProjectContext<'a> {
    pub fn new(
        definition: &'a ProjectDefinition,
        concurrency: usize,
        verbose: bool,
        cancel: &'a CancellationToken,
    ) -> Self {
        let concurrency = match definition.settings.max_concurrency {
            Some(max) => concurrency.min(max),
            None => concurrency,
        }
        .max(1);
        ProjectContext {
            definition,
            concurrency,
            verbose,
            cancel,
        }
    }

    pub fn target(&self) -> &Target {
        &self.definition.target
    }

    pub fn source_directory(&self) -> &Path {
        &self.definition.source_directory
    }

    /// Requested linkage; mobile platforms default to static.
    pub fn linkage(&self) -> Option<Linkage> {
        self.definition.settings.linkage.or_else(|| {
            self.target()
                .platform()
                .is_mobile()
                .then_some(Linkage::Static)
        })
    }

    /// `-j` arguments for make-like tools.
    pub fn jobs_args(&self) -> Vec<String> {
        vec!["-j".to_string(), self.concurrency.to_string()]
    }

    /// A tool invocation in the source tree with the target toolchain on `PATH`.
    pub fn command(&self, program: impl AsRef<Path>) -> ProcessBuilder {
        self.prepare(ProcessBuilder::new(program))
    }

    /// A shell command line run in the source tree.
    pub fn shell(&self, line: &str) -> ProcessBuilder {
        self.prepare(ProcessBuilder::shell(line))
    }

    fn prepare(&self, builder: ProcessBuilder) -> ProcessBuilder {
        let target = self.target();
        let architecture = target.architecture();
        let mut builder = builder
            .cwd(self.source_directory())
            .path_prepend(target.platform().binary_paths(architecture))
            .stream_output(self.verbose)
            .cancellation(self.cancel);
        for (key, value) in target.platform().toolchain_environment(architecture) {
            builder = builder.env(key, value);
        }
        builder
    }

    /// Substitute `{build_directory}`, `{platform}` and `{architecture}`.
    pub fn evaluate(&self, text: &str, build_directory: &Path) -> String {
        text.replace("{build_directory}", &build_directory.display().to_string())
            .replace("{platform}", self.target().platform().identifier())
            .replace("{architecture}", self.target().architecture())
    }

    pub fn evaluate_all(&self, items: &[String], build_directory: &Path) -> Vec<String> {
        items
            .iter()
            .map(|item| self.evaluate(item, build_directory))
            .collect()
    }

    /// Run shell commands in order, stopping at the first failure.
    pub fn run_commands(&self, commands: &[String], build_directory: &Path) -> Result<()> {
        for command in self.evaluate_all(commands, build_directory) {
            self.shell(&command).exec_and_check()?;
        }
        Ok(())
    }
}
