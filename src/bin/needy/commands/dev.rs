//! `needy dev` command

use anyhow::Result;

use crate::cli::{DevAction, DevArgs, GlobalArgs};

pub fn execute(global: &GlobalArgs, args: DevArgs) -> Result<()> {
    let needy = super::open(global, None)?;

    match args.action {
        DevAction::Enable { library } => toggle(&needy, &library, true),
        DevAction::Disable { library } => toggle(&needy, &library, false),
        DevAction::Status { library: Some(library) } => {
            let enabled = needy.development_mode_libraries().contains(&library);
            println!("{}: {}", library, if enabled { "enabled" } else { "disabled" });
            Ok(())
        }
        DevAction::Status { library: None } => {
            for library in needy.development_mode_libraries() {
                println!("{}", library);
            }
            Ok(())
        }
    }
}

fn toggle(needy: &needy::Needy, library: &str, enable: bool) -> Result<()> {
    // Fail early on names the needs file doesn't declare.
    needy.library(&needy::Target::host(), library)?;

    let state = if enable { "enabled" } else { "disabled" };
    if needy.set_development_mode(library, enable)? {
        needy
            .shell()
            .warn(format!("development mode already {} for {}", state, library));
    } else {
        tracing::info!("development mode {} for {}", state, library);
    }
    Ok(())
}
