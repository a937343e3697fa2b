//! Dependency resolution.
//!
//! Versions are pinned in the needs file, so resolving only means ordering:
//! pick the requested libraries, pull in what they depend on, and sort the
//! result so dependencies build first.

pub mod graph;

pub use graph::DependencyGraph;

use anyhow::{Context, Result};
use glob::Pattern;

use crate::core::manifest::Manifest;
use crate::util::errors::NeedyError;

/// Compiled library name filters (`fnmatch`-style globs).
#[derive(Debug, Clone, Default)]
pub struct LibraryFilter {
    patterns: Vec<Pattern>,
}

impl LibraryFilter {
    pub fn new<S: AsRef<str>>(filters: &[S]) -> Result<Self> {
        let patterns = filters
            .iter()
            .map(|f| {
                Pattern::new(f.as_ref())
                    .with_context(|| format!("invalid library filter `{}`", f.as_ref()))
            })
            .collect::<Result<_>>()?;
        Ok(LibraryFilter { patterns })
    }

    /// No filters selects everything.
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.matches(name))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Resolve the build graph of the libraries selected by `filter`.
pub fn resolve(manifest: &Manifest, filter: &LibraryFilter) -> Result<DependencyGraph> {
    let roots: Vec<String> = manifest
        .libraries()
        .filter(|(name, _)| filter.matches(name))
        .map(|(name, _)| name.to_string())
        .collect();

    DependencyGraph::discover(roots, |name| {
        let config = manifest
            .library(name)
            .ok_or_else(|| NeedyError::UnknownLibrary(name.to_string()))?;
        Ok(config.dependencies())
    })
}
