//! needy CLI - native library dependency manager

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};
use needy::util::diagnostic::emit;
use needy::util::errors::find_needy_error;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let color = !cli.no_color;

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match find_needy_error(&e) {
                Some(needy_error) => {
                    let mut diagnostic = needy_error.to_diagnostic();
                    for cause in e.chain().skip_while(|c| !c.is::<needy::NeedyError>()).skip(1) {
                        diagnostic = diagnostic.with_context(cause.to_string());
                    }
                    emit(&diagnostic, color);
                }
                None => eprintln!("error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let filter = if cli.verbose {
        EnvFilter::new("needy=debug")
    } else {
        EnvFilter::new("needy=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let global = cli::GlobalArgs {
        verbose: cli.verbose,
        no_color: cli.no_color,
    };

    match cli.command {
        Commands::Satisfy(args) => commands::satisfy::execute(&global, args),
        Commands::Init(args) => commands::init::execute(&global, args),
        Commands::Sync(args) => commands::sync::execute(&global, args),
        Commands::Status(args) => commands::status::execute(&global, args),
        Commands::Dev(args) => commands::dev::execute(&global, args),
        Commands::Builddir(args) => commands::builddir::execute(&global, args),
        Commands::Includedir(args) => commands::paths::includedir(&global, args),
        Commands::Librarydir(args) => commands::paths::librarydir(&global, args),
        Commands::PkgConfigPath(args) => commands::paths::pkg_config_path(&global, args),
    }
}
