//! Domain error kinds.
//!
//! Operations return `anyhow::Result`; anything a caller may want to match on
//! is raised as a [`NeedyError`] and can be recovered with `downcast_ref`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::util::diagnostic::{suggestions, Diagnostic};

/// Phase of a library build in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Fetch,
    Configure,
    Build,
    Install,
    Cache,
}

impl std::fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BuildPhase::Fetch => "fetch",
            BuildPhase::Configure => "configure",
            BuildPhase::Build => "build",
            BuildPhase::Install => "install",
            BuildPhase::Cache => "cache",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum NeedyError {
    #[error("no needs file found in {}", .directory.display())]
    NoManifestFound { directory: PathBuf },

    #[error("more than one needs file is present in {}", .directory.display())]
    AmbiguousManifest {
        directory: PathBuf,
        candidates: Vec<PathBuf>,
    },

    #[error("circular dependency detected between: {}", .libraries.join(", "))]
    CircularDependency { libraries: Vec<String> },

    #[error("unknown platform `{0}`")]
    UnknownPlatform(String),

    #[error("unknown architecture `{architecture}` for platform `{platform}`")]
    UnknownArchitecture {
        platform: String,
        architecture: String,
    },

    #[error("unknown universal binary `{0}`")]
    UnknownUniversalBinary(String),

    #[error("unknown library `{0}`")]
    UnknownLibrary(String),

    #[error("unknown project type for `{library}`")]
    UnknownProjectType {
        library: String,
        reasons: Vec<String>,
    },

    #[error("invalid configuration for `{library}`: {message}")]
    InvalidConfiguration { library: String, message: String },

    #[error("missing prerequisite{} for `{library}`: {}", if .tools.len() == 1 { "" } else { "s" }, .tools.join(", "))]
    MissingPrerequisite { library: String, tools: Vec<String> },

    #[error("checksum mismatch for {url}: expected {expected}, found {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("unable to download {url} after {attempts} attempts")]
    DownloadFailure { url: String, attempts: u32 },

    #[error("`{command}` failed with exit code {}", .code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()))]
    ToolInvocationFailure {
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("{library}: {reason}")]
    DevelopmentModeRequired { library: String, reason: String },

    #[error("failed to build `{library}` for {target} during {phase} after {:.2}s", .elapsed.as_secs_f64())]
    LibraryBuildFailure {
        library: String,
        target: String,
        phase: BuildPhase,
        elapsed: Duration,
        #[source]
        source: anyhow::Error,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl NeedyError {
    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diag = Diagnostic::error(self.to_string());
        match self {
            NeedyError::NoManifestFound { .. } => {
                diag.with_suggestion(suggestions::NO_MANIFEST.to_string())
            }
            NeedyError::AmbiguousManifest { candidates, .. } => {
                let mut diag = diag;
                for candidate in candidates {
                    diag = diag.with_context(format!("found {}", candidate.display()));
                }
                diag.with_suggestion("Keep exactly one of needs.json or needs.yaml".to_string())
            }
            NeedyError::CircularDependency { libraries } => diag
                .with_context(format!("cycle involves: {}", libraries.join(" -> ")))
                .with_suggestion(
                    "Break the cycle by removing one of the `dependencies` entries".to_string(),
                ),
            NeedyError::UnknownProjectType { reasons, .. } => {
                let mut diag = diag;
                for reason in reasons {
                    diag = diag.with_context(reason.clone());
                }
                diag.with_suggestion("Set `project.type` explicitly in the needs file".to_string())
            }
            NeedyError::MissingPrerequisite { tools, .. } => diag.with_suggestion(format!(
                "Install {} and ensure it is on your PATH",
                tools.join(", ")
            )),
            NeedyError::DownloadFailure { .. } => {
                diag.with_suggestion(suggestions::FETCH_FAILED.to_string())
            }
            NeedyError::ToolInvocationFailure { output, .. } => {
                let mut diag = diag;
                if !output.trim().is_empty() {
                    diag = diag.with_context(output.trim_end().to_string());
                }
                diag.with_suggestion(suggestions::BUILD_FAILED.to_string())
            }
            NeedyError::DevelopmentModeRequired { library, .. } => diag.with_suggestion(format!(
                "Run `needy init {library}` and then `needy dev enable {library}`"
            )),
            NeedyError::LibraryBuildFailure { source, .. } => diag
                .with_context(format!("{source:#}"))
                .with_suggestion(suggestions::BUILD_FAILED.to_string()),
            _ => diag,
        }
    }
}

/// Find the first [`NeedyError`] in an error chain.
pub fn find_needy_error(err: &anyhow::Error) -> Option<&NeedyError> {
    err.chain().find_map(|cause| cause.downcast_ref::<NeedyError>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_diagnostic_names_libraries() {
        let err = NeedyError::CircularDependency {
            libraries: vec!["a".to_string(), "b".to_string()],
        };
        let output = err.to_diagnostic().format(false);
        assert!(output.contains("circular dependency"));
        assert!(output.contains("a -> b"));
    }

    #[test]
    fn test_find_needy_error_through_context() {
        let err = anyhow::Error::new(NeedyError::UnknownPlatform("wasm".to_string()))
            .context("while resolving target");
        assert!(matches!(
            find_needy_error(&err),
            Some(NeedyError::UnknownPlatform(p)) if p == "wasm"
        ));
    }

    #[test]
    fn test_missing_prerequisite_plural() {
        let one = NeedyError::MissingPrerequisite {
            library: "zlib".to_string(),
            tools: vec!["make".to_string()],
        };
        let two = NeedyError::MissingPrerequisite {
            library: "zlib".to_string(),
            tools: vec!["make".to_string(), "autoreconf".to_string()],
        };
        assert_eq!(one.to_string(), "missing prerequisite for `zlib`: make");
        assert_eq!(
            two.to_string(),
            "missing prerequisites for `zlib`: make, autoreconf"
        );
    }
}
