//! `needy builddir` command

use anyhow::Result;

use crate::cli::{BuilddirArgs, GlobalArgs};

pub fn execute(global: &GlobalArgs, args: BuilddirArgs) -> Result<()> {
    let needy = super::open(global, None)?;
    let selector = super::selector(&args.select)?;
    println!("{}", needy.build_directory(&args.library, &selector)?.display());
    Ok(())
}
