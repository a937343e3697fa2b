//! Library sources.
//!
//! Sources populate a library's `source/` tree from a local directory, a
//! downloaded archive, or a git repository.

pub mod archive;
pub mod directory;
pub mod download;
pub mod git;
pub mod source;

use std::path::PathBuf;

pub use directory::DirectorySource;
pub use download::DownloadSource;
pub use git::GitSource;
pub use source::{Source, SourceOptions, SourceSpec};

/// Instantiate the source described by `spec`, writing into `source_directory`.
pub fn create_source(
    spec: SourceSpec,
    source_directory: PathBuf,
    options: &SourceOptions,
) -> Box<dyn Source> {
    match spec {
        SourceSpec::Directory { path } => Box::new(DirectorySource::new(path, source_directory)),
        SourceSpec::Download { url, checksum } => Box::new(DownloadSource::new(
            url,
            checksum,
            source_directory,
            options,
        )),
        SourceSpec::Git { repository, commit } => Box::new(GitSource::new(
            repository,
            commit,
            source_directory,
            options,
        )),
    }
}
