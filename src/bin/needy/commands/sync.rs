//! `needy sync` command

use anyhow::Result;

use crate::cli::{GlobalArgs, TargetArgs};

pub fn execute(global: &GlobalArgs, args: TargetArgs) -> Result<()> {
    let needy = super::open(global, None)?;
    let target = super::target(args.target.as_deref())?;
    needy.synchronize(&target, &args.libraries)
}
