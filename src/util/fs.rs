//! Filesystem utilities.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Recursively copy a directory, skipping dotfiles and preserving symlinks.
///
/// Entries whose name starts with `.` are skipped together with everything
/// below them. Symlinks are recreated rather than followed.
pub fn copy_tree_without_dotfiles(src: &Path, dst: &Path) -> Result<()> {
    ensure_dir(dst)?;

    let walker = WalkDir::new(src)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| !is_dotfile(entry.file_name()));

    for entry in walker {
        let entry = entry.with_context(|| format!("failed to walk {}", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("{} escaped {}", entry.path().display(), src.display()))?;
        let target = dst.join(relative);
        let ty = entry.file_type();

        if ty.is_symlink() {
            let link = fs::read_link(entry.path())
                .with_context(|| format!("failed to read link: {}", entry.path().display()))?;
            symlink(&link, &target)
                .with_context(|| format!("failed to create symlink: {}", target.display()))?;
        } else if ty.is_dir() {
            ensure_dir(&target)?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
        }
    }

    Ok(())
}

fn is_dotfile(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// Remove whatever is at `path` (directory, file, or symlink), if anything.
pub fn remove_path(path: &Path) -> Result<()> {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return Ok(());
    };
    if meta.is_dir() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove directory: {}", path.display()))
    } else {
        fs::remove_file(path).with_context(|| format!("failed to remove file: {}", path.display()))
    }
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Remove and recreate a directory.
pub fn recreate_dir(path: &Path) -> Result<()> {
    remove_path(path)?;
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

/// Read a file to string, with nice error messages.
pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read file: {}", path.display()))
}

/// Write a string to a file, creating parent directories if needed.
///
/// The contents land in a sibling temporary file first and are renamed into
/// place so readers never observe a half-written file.
pub fn write_string(path: &Path, contents: &str) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    ensure_dir(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temporary file in {}", parent.display()))?;
    io::Write::write_all(&mut tmp, contents.as_bytes())
        .with_context(|| format!("failed to write file: {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("failed to write file: {}", path.display()))?;
    Ok(())
}

/// While `dir` contains exactly one entry and that entry is a directory,
/// replace `dir`'s contents with that directory's contents.
///
/// Returns the number of wrapper levels removed.
pub fn collapse_lone_directories(dir: &Path) -> Result<usize> {
    let mut collapsed = 0;

    loop {
        let entries: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("failed to read directory: {}", dir.display()))?
            .map(|e| e.map(|e| e.path()))
            .collect::<io::Result<_>>()?;

        let [lone] = entries.as_slice() else {
            break;
        };
        let is_real_dir = fs::symlink_metadata(lone)
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_real_dir {
            break;
        }

        let staging = sibling_staging_path(dir);
        fs::rename(lone, &staging).with_context(|| {
            format!("failed to move {} to {}", lone.display(), staging.display())
        })?;
        fs::remove_dir(dir)
            .with_context(|| format!("failed to remove directory: {}", dir.display()))?;
        fs::rename(&staging, dir).with_context(|| {
            format!("failed to move {} to {}", staging.display(), dir.display())
        })?;
        collapsed += 1;
    }

    Ok(collapsed)
}

fn sibling_staging_path(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.with_file_name(format!(".{}.collapse-{}", name, std::process::id()))
}

/// Create a symlink (platform-aware).
#[cfg(unix)]
pub fn symlink(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(windows)]
pub fn symlink(src: &Path, dst: &Path) -> io::Result<()> {
    if src.is_dir() {
        std::os::windows::fs::symlink_dir(src, dst)
    } else {
        std::os::windows::fs::symlink_file(src, dst)
    }
}
