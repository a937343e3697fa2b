//! needy - a native library dependency manager
//!
//! This crate provides the core library functionality for needy: reading
//! needs files, fetching library sources, building them with their native
//! build systems for many targets, and fusing universal binaries.

pub mod builder;
pub mod core;
pub mod ops;
pub mod resolver;
pub mod sources;
pub mod util;

pub use core::{Library, Manifest, Platform, Target, Workspace};
pub use ops::{Needy, NeedyOptions, Selector};
pub use util::context::GlobalContext;
pub use util::errors::NeedyError;
