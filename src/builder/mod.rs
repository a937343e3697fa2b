//! Building libraries.
//!
//! This module holds the build strategies, the build markers that decide
//! freshness, directory build caches, and universal binary fusion.

pub mod autotools;
pub mod cache;
pub mod cmake;
pub mod custom;
pub mod fingerprint;
pub mod make;
pub mod project;
pub mod universal;

pub use cache::BuildCache;
pub use fingerprint::{configuration_fingerprint, BuildMarker, MARKER_FILE};
pub use project::{
    select_project, Linkage, Project, ProjectContext, ProjectDefinition, ProjectKind,
};
pub use universal::{Constituent, UniversalBinary};
