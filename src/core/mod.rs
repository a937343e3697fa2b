//! Core data structures for needy.
//!
//! - Targets and platforms
//! - Needs files and their two-stage evaluation
//! - Libraries bound to a target
//! - Workspace discovery

pub mod library;
pub mod manifest;
pub mod target;
pub mod workspace;

pub use library::{Library, LibraryOptions, LibraryState};
pub use manifest::{
    BuildDirectories, EvaluationStage, FileManifest, LibraryConfig, Manifest, ManifestEvaluator,
    MANIFEST_NAMES,
};
pub use target::{Platform, Target};
pub use workspace::{find_manifest, Workspace};
