//! Command implementations

pub mod builddir;
pub mod dev;
pub mod init;
pub mod paths;
pub mod satisfy;
pub mod status;
pub mod sync;

use std::sync::Arc;

use anyhow::Result;

use crate::cli::{GlobalArgs, SelectArgs};
use needy::ops::{Needy, NeedyOptions, Selector};
use needy::util::shell::{ColorChoice, Shell, Verbosity};
use needy::util::GlobalContext;
use needy::Target;

/// Open the workspace around the current directory.
pub fn open(global: &GlobalArgs, jobs: Option<usize>) -> Result<Needy> {
    let mut gctx = GlobalContext::new()?;
    gctx.set_verbose(global.verbose);

    let verbosity = if global.verbose {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    };
    let color = if global.no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };

    let options = NeedyOptions {
        jobs,
        verbose: gctx.is_verbose(),
        ..Default::default()
    };
    Needy::open(&gctx, options, Arc::new(Shell::new(verbosity, color)))
}

/// `-t` parsed, or the host.
pub fn target(target: Option<&str>) -> Result<Target> {
    target.map(Target::parse).unwrap_or_else(|| Ok(Target::host()))
}

pub fn selector(select: &SelectArgs) -> Result<Selector> {
    match &select.universal_binary {
        Some(name) => Ok(Selector::UniversalBinary(name.clone())),
        None => Ok(Selector::Target(target(select.target.as_deref())?)),
    }
}
