//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand};

/// needy - build native library dependencies for many platforms
#[derive(Parser)]
#[command(name = "needy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every command.
#[derive(Debug, Clone, Copy)]
pub struct GlobalArgs {
    pub verbose: bool,
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build libraries that are not up to date
    Satisfy(SatisfyArgs),

    /// Populate pristine library sources
    Init(TargetArgs),

    /// Update development-mode library sources, keeping local edits
    Sync(TargetArgs),

    /// Show where a library's source comes from
    Status(StatusArgs),

    /// Manage development mode
    Dev(DevArgs),

    /// Print a library's build directory
    Builddir(BuilddirArgs),

    /// Print include directories
    Includedir(SelectorArgs),

    /// Print library directories
    Librarydir(SelectorArgs),

    /// Print a PKG_CONFIG_PATH value
    PkgConfigPath(SelectorArgs),
}

/// Target or universal binary selection.
#[derive(Args, Debug, Clone)]
pub struct SelectArgs {
    /// Target as `platform[:architecture]`
    #[arg(short, long, conflicts_with = "universal_binary")]
    pub target: Option<String>,

    /// Universal binary declared in the needs file
    #[arg(short, long)]
    pub universal_binary: Option<String>,
}

#[derive(Args)]
pub struct SatisfyArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Parallel jobs for native build tools
    #[arg(short, long, env = "NEEDY_JOBS")]
    pub jobs: Option<usize>,

    /// Libraries to satisfy (globs; defaults to all)
    pub libraries: Vec<String>,
}

#[derive(Args)]
pub struct TargetArgs {
    /// Target as `platform[:architecture]`
    #[arg(short, long)]
    pub target: Option<String>,

    /// Libraries to act on (globs; defaults to all)
    pub libraries: Vec<String>,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Library name
    pub library: String,

    /// Target as `platform[:architecture]`
    #[arg(short, long)]
    pub target: Option<String>,
}

#[derive(Args)]
pub struct DevArgs {
    #[command(subcommand)]
    pub action: DevAction,
}

#[derive(Subcommand)]
pub enum DevAction {
    /// Enable development mode for a library
    Enable {
        library: String,
    },

    /// Disable development mode for a library
    Disable {
        library: String,
    },

    /// Show development mode state
    Status {
        /// Library to report on (defaults to every enabled library)
        library: Option<String>,
    },
}

#[derive(Args)]
pub struct BuilddirArgs {
    /// Library name
    pub library: String,

    #[command(flatten)]
    pub select: SelectArgs,
}

#[derive(Args)]
pub struct SelectorArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Libraries to include (globs; defaults to all)
    pub libraries: Vec<String>,
}
