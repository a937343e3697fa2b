//! `needy includedir`, `needy librarydir` and `needy pkg-config-path`

use anyhow::{Context, Result};

use crate::cli::{GlobalArgs, SelectorArgs};

pub fn includedir(global: &GlobalArgs, args: SelectorArgs) -> Result<()> {
    let needy = super::open(global, None)?;
    let selector = super::selector(&args.select)?;
    for path in needy.include_paths(&selector, &args.libraries)? {
        println!("{}", path.display());
    }
    Ok(())
}

pub fn librarydir(global: &GlobalArgs, args: SelectorArgs) -> Result<()> {
    let needy = super::open(global, None)?;
    let selector = super::selector(&args.select)?;
    for path in needy.library_paths(&selector, &args.libraries)? {
        println!("{}", path.display());
    }
    Ok(())
}

/// Prints a single search-path value suitable for `PKG_CONFIG_PATH`.
pub fn pkg_config_path(global: &GlobalArgs, args: SelectorArgs) -> Result<()> {
    let needy = super::open(global, None)?;
    let selector = super::selector(&args.select)?;
    let paths = needy.pkg_config_paths(&selector, &args.libraries)?;
    let joined = std::env::join_paths(paths).context("pkg-config path contains a separator")?;
    println!("{}", joined.to_string_lossy());
    Ok(())
}
