//! Directory-backed build caches.
//!
//! A cache entry is a gzipped tarball of a finished build directory, stored
//! at `<cache>/<library>/<platform>-<arch>/<fingerprint>.tar.gz`. Caches are
//! an optimization only: every I/O failure is logged and treated as a miss.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::NamedTempFile;

use crate::builder::fingerprint::MARKER_FILE;
use crate::core::target::Target;
use crate::sources::archive;
use crate::util::fs::{ensure_dir, recreate_dir};

/// One cache directory.
#[derive(Debug, Clone)]
pub struct BuildCache {
    root: PathBuf,
}

impl BuildCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        BuildCache { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the entry for a build of `library` for `target`.
    pub fn entry_path(&self, library: &str, target: &Target, fingerprint: &str) -> PathBuf {
        self.root
            .join(library)
            .join(format!(
                "{}-{}",
                target.platform().identifier(),
                target.architecture()
            ))
            .join(format!("{}.tar.gz", fingerprint))
    }

    /// Unpack a cached build into `build_directory`. Returns false on a miss.
    pub fn restore(
        &self,
        library: &str,
        target: &Target,
        fingerprint: &str,
        build_directory: &Path,
    ) -> Result<bool> {
        let entry = self.entry_path(library, target, fingerprint);
        if !entry.is_file() {
            return Ok(false);
        }

        recreate_dir(build_directory)?;
        archive::unpack(&entry, build_directory)
            .with_context(|| format!("failed to restore {}", entry.display()))?;
        Ok(true)
    }

    /// Store `build_directory` as the entry for this fingerprint.
    ///
    /// The marker is left out; whoever restores the entry writes a fresh one.
    pub fn store(
        &self,
        library: &str,
        target: &Target,
        fingerprint: &str,
        build_directory: &Path,
    ) -> Result<()> {
        let entry = self.entry_path(library, target, fingerprint);
        let parent = entry.parent().unwrap_or(&self.root);
        ensure_dir(parent)?;

        let tmp = NamedTempFile::new_in(parent)
            .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
        {
            let encoder = GzEncoder::new(BufWriter::new(tmp.as_file()), Compression::default());
            let mut builder = tar::Builder::new(encoder);
            builder.follow_symlinks(false);
            append_tree(&mut builder, build_directory, build_directory)?;
            let mut writer = builder
                .into_inner()
                .context("failed to finish cache archive")?
                .finish()
                .context("failed to compress cache archive")?;
            writer.flush()?;
        }
        tmp.persist(&entry)
            .with_context(|| format!("failed to write {}", entry.display()))?;

        tracing::debug!("stored {} in build cache {}", library, self.root.display());
        Ok(())
    }
}

fn append_tree<W: Write>(builder: &mut tar::Builder<W>, base: &Path, dir: &Path) -> Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let relative = path.strip_prefix(base).unwrap_or(&path);
        if dir == base && entry.file_name() == MARKER_FILE {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            builder.append_dir(relative, &path)?;
            append_tree(builder, base, &path)?;
        } else {
            builder
                .append_path_with_name(&path, relative)
                .with_context(|| format!("failed to archive {}", path.display()))?;
        }
    }
    Ok(())
}

/// Restore from the first cache holding an entry. Errors count as misses.
pub fn restore_from_any(
    caches: &[BuildCache],
    library: &str,
    target: &Target,
    fingerprint: &str,
    build_directory: &Path,
) -> bool {
    for cache in caches {
        match cache.restore(library, target, fingerprint, build_directory) {
            Ok(true) => {
                tracing::info!("{}: restored from cache {}", library, cache.root().display());
                return true;
            }
            Ok(false) => {}
            Err(e) => tracing::warn!("{}: ignoring cache error: {:#}", library, e),
        }
    }
    false
}

/// Store in every cache, logging failures.
pub fn store_in_all(
    caches: &[BuildCache],
    library: &str,
    target: &Target,
    fingerprint: &str,
    build_directory: &Path,
) {
    for cache in caches {
        if let Err(e) = cache.store(library, target, fingerprint, build_directory) {
            tracing::warn!("{}: ignoring cache error: {:#}", library, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_and_restore() {
        let cache_dir = TempDir::new().unwrap();
        let build = TempDir::new().unwrap();
        std::fs::create_dir_all(build.path().join("include")).unwrap();
        std::fs::write(build.path().join("include/z.h"), "int z;").unwrap();
        std::fs::write(build.path().join(MARKER_FILE), "{}").unwrap();

        let cache = BuildCache::new(cache_dir.path());
        let target = Target::parse("android:arm64").unwrap();
        cache.store("z", &target, "abc", build.path()).unwrap();
        assert!(cache_dir.path().join("z/android-arm64/abc.tar.gz").is_file());

        let restored = TempDir::new().unwrap();
        let dest = restored.path().join("out");
        assert!(cache.restore("z", &target, "abc", &dest).unwrap());
        assert_eq!(
            std::fs::read_to_string(dest.join("include/z.h")).unwrap(),
            "int z;"
        );
        assert!(!dest.join(MARKER_FILE).exists());

        assert!(!cache.restore("z", &target, "other", &dest).unwrap());
    }

    #[test]
    fn test_restore_from_any_ignores_broken_entries() {
        let cache_dir = TempDir::new().unwrap();
        let cache = BuildCache::new(cache_dir.path());
        let target = Target::host();
        let entry = cache.entry_path("z", &target, "abc");
        std::fs::create_dir_all(entry.parent().unwrap()).unwrap();
        std::fs::write(&entry, "not an archive").unwrap();

        let out = TempDir::new().unwrap();
        assert!(!restore_from_any(&[cache], "z", &target, "abc", out.path()));
    }
}
