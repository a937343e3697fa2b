//! High-level operations.
//!
//! This module contains the implementation of needy commands.

pub mod needy;

pub use needy::{Needy, NeedyOptions, Selector};
