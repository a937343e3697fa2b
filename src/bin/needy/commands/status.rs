//! `needy status` command

use anyhow::Result;

use crate::cli::{GlobalArgs, StatusArgs};

pub fn execute(global: &GlobalArgs, args: StatusArgs) -> Result<()> {
    let needy = super::open(global, None)?;
    let target = super::target(args.target.as_deref())?;

    let library = needy.library(&target, &args.library)?;
    println!("{}: {}", library.name(), library.state()?);
    println!("  {}", needy.status(&target, &args.library)?);
    Ok(())
}
