//! `needy satisfy` command

use anyhow::Result;

use crate::cli::{GlobalArgs, SatisfyArgs};
use needy::ops::Selector;

pub fn execute(global: &GlobalArgs, args: SatisfyArgs) -> Result<()> {
    let needy = super::open(global, args.jobs)?;

    match super::selector(&args.select)? {
        Selector::Target(target) => needy.satisfy_target(&target, &args.libraries),
        Selector::UniversalBinary(name) => {
            needy.satisfy_universal_binary(&name, &args.libraries)
        }
    }
}
