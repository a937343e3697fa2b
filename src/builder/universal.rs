//! Universal binaries: per-architecture builds of one library fused into
//! multi-architecture artifacts.
//!
//! A fused directory carries its own `needy.status` whose configuration is a
//! hash over the markers of every constituent build. Rebuilding any
//! constituent rewrites its marker, which makes the fused output stale.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::builder::fingerprint::BuildMarker;
use crate::core::target::Target;
use crate::util::errors::NeedyError;
use crate::util::fs::{copy_tree_without_dotfiles, ensure_dir, recreate_dir, remove_path, symlink};
use crate::util::hash::Fingerprint;
use crate::util::process::{find_executable, CancellationToken, ProcessBuilder};

const FUSABLE_EXTENSIONS: [&str; 3] = ["a", "dylib", "so"];

/// One per-target build that feeds a universal binary.
#[derive(Debug, Clone)]
pub struct Constituent {
    pub target: Target,
    pub build_directory: PathBuf,
}

#[derive(Debug, Clone)]
pub struct UniversalBinary {
    library: String,
    name: String,
    directory: PathBuf,
    constituents: Vec<Constituent>,
}

impl UniversalBinary {
    pub fn new(
        library: impl Into<String>,
        name: impl Into<String>,
        directory: PathBuf,
        constituents: Vec<Constituent>,
    ) -> Self {
        UniversalBinary {
            library: library.into(),
            name: name.into(),
            directory,
            constituents,
        }
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn constituents(&self) -> &[Constituent] {
        &self.constituents
    }

    /// Headers are architecture independent, so any constituent's will do.
    pub fn include_path(&self) -> Option<PathBuf> {
        self.constituents
            .first()
            .map(|c| c.build_directory.join("include"))
    }

    pub fn library_path(&self) -> PathBuf {
        self.directory.join("lib")
    }

    fn source_identity(&self) -> String {
        format!("universal:{}", self.name)
    }

    /// Hash of every constituent marker, or None if one hasn't been built.
    pub fn constituent_fingerprint(&self) -> Option<String> {
        let mut fp = Fingerprint::new();
        for constituent in &self.constituents {
            let text = std::fs::read_to_string(BuildMarker::path(&constituent.build_directory))
                .ok()?;
            fp.update_str(&constituent.target.to_string());
            fp.update_str(&text);
        }
        Some(fp.finish())
    }

    /// Whether the fused output reflects the current constituent builds.
    pub fn is_up_to_date(&self) -> bool {
        let Some(current) = self.constituent_fingerprint() else {
            return false;
        };
        BuildMarker::load(&self.directory)
            .map(|marker| marker.matches(&current, &self.source_identity()))
            .unwrap_or(false)
    }

    /// Fuse the constituents' libraries with `tool` (a lipo-compatible tool).
    ///
    /// Only libraries present in every constituent are fused. Symlinks and
    /// `pkgconfig` are taken from the first constituent.
    pub fn fuse(&self, tool: &Path, cancel: &CancellationToken) -> Result<()> {
        let Some(fingerprint) = self.constituent_fingerprint() else {
            anyhow::bail!(
                "universal binary `{}` of `{}` has unbuilt constituents",
                self.name,
                self.library
            );
        };

        recreate_dir(&self.directory)?;
        let result = self.fuse_into(tool, cancel);
        if result.is_err() {
            if let Err(e) = remove_path(&self.directory) {
                tracing::warn!("failed to remove {}: {:#}", self.directory.display(), e);
            }
            return result;
        }

        BuildMarker::new(fingerprint, self.source_identity()).save(&self.directory)
    }

    fn fuse_into(&self, tool: &Path, cancel: &CancellationToken) -> Result<()> {
        let output = self.library_path();
        ensure_dir(&output)?;

        let Some(first) = self.constituents.first() else {
            return Ok(());
        };
        let first_lib = first.build_directory.join("lib");
        if !first_lib.is_dir() {
            tracing::debug!("{}: {} has no lib directory", self.library, first.target);
            return Ok(());
        }

        let mut entries: Vec<_> = std::fs::read_dir(&first_lib)
            .with_context(|| format!("failed to read {}", first_lib.display()))?
            .collect::<std::io::Result<_>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let file_name = entry.file_name();
            let path = entry.path();
            let destination = output.join(&file_name);
            let file_type = entry.file_type()?;

            if file_type.is_symlink() {
                let link = std::fs::read_link(&path)
                    .with_context(|| format!("failed to read link {}", path.display()))?;
                symlink(&link, &destination)
                    .with_context(|| format!("failed to create {}", destination.display()))?;
            } else if file_type.is_dir() {
                if file_name == "pkgconfig" {
                    copy_tree_without_dotfiles(&path, &destination)?;
                }
            } else if is_fusable(&path) {
                let inputs: Vec<PathBuf> = self
                    .constituents
                    .iter()
                    .map(|c| c.build_directory.join("lib").join(&file_name))
                    .collect();
                if !inputs.iter().all(|p| p.is_file()) {
                    tracing::debug!(
                        "{}: skipping {}, not built for every architecture",
                        self.library,
                        path.display()
                    );
                    continue;
                }

                tracing::info!("{}: creating universal {}", self.library, destination.display());
                ProcessBuilder::new(tool)
                    .arg("-create")
                    .args(&inputs)
                    .arg("-output")
                    .arg(&destination)
                    .cancellation(cancel)
                    .exec_and_check()?;
            }
        }
        Ok(())
    }
}

fn is_fusable(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| FUSABLE_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

/// Locate the architecture-merging tool: configured, then `lipo`, then `llvm-lipo`.
pub fn resolve_fuse_tool(library: &str, configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(tool) = configured {
        return Ok(tool.to_path_buf());
    }
    ["lipo", "llvm-lipo"]
        .iter()
        .find_map(|name| find_executable(name))
        .ok_or_else(|| {
            NeedyError::MissingPrerequisite {
                library: library.to_string(),
                tools: vec!["lipo".to_string()],
            }
            .into()
        })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// A stand-in for lipo that concatenates its inputs.
    fn fake_lipo(dir: &Path) -> PathBuf {
        let tool = dir.join("fake-lipo");
        std::fs::write(
            &tool,
            "#!/bin/sh\nshift\nout=\"\"\nfiles=\"\"\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"-output\" ]; then out=\"$2\"; shift 2; else files=\"$files $1\"; shift; fi\ndone\ncat $files > \"$out\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        tool
    }

    fn constituent(root: &Path, arch: &str, lib_contents: &str) -> Constituent {
        let target = Target::parse(&format!("ios:{}", arch)).unwrap();
        let build_directory = root.join(arch);
        std::fs::create_dir_all(build_directory.join("lib/pkgconfig")).unwrap();
        std::fs::create_dir_all(build_directory.join("include")).unwrap();
        std::fs::write(build_directory.join("lib/libz.a"), lib_contents).unwrap();
        std::fs::write(build_directory.join("lib/pkgconfig/z.pc"), "Name: z\n").unwrap();
        BuildMarker::new("cfg", "src").save(&build_directory).unwrap();
        Constituent {
            target,
            build_directory,
        }
    }

    #[test]
    fn test_fuse_and_freshness() {
        let tmp = TempDir::new().unwrap();
        let tool = fake_lipo(tmp.path());
        let arm = constituent(tmp.path(), "arm64", "ARM");
        let x86 = constituent(tmp.path(), "x86_64", "X86");
        std::fs::write(arm.build_directory.join("lib/libonly-arm.a"), "A").unwrap();

        let ub = UniversalBinary::new(
            "z",
            "fat",
            tmp.path().join("universal/fat"),
            vec![arm.clone(), x86],
        );
        assert!(!ub.is_up_to_date());

        let cancel = CancellationToken::new();
        ub.fuse(&tool, &cancel).unwrap();
        assert!(ub.is_up_to_date());
        assert_eq!(
            std::fs::read_to_string(ub.library_path().join("libz.a")).unwrap(),
            "ARMX86"
        );
        assert!(!ub.library_path().join("libonly-arm.a").exists());
        assert!(ub.library_path().join("pkgconfig/z.pc").is_file());
        assert_eq!(ub.include_path(), Some(arm.build_directory.join("include")));

        // Rebuilding a constituent writes a new marker.
        std::thread::sleep(std::time::Duration::from_millis(2));
        BuildMarker::new("cfg", "src").save(&arm.build_directory).unwrap();
        assert!(!ub.is_up_to_date());
    }

    #[test]
    fn test_failed_fuse_removes_output() {
        let tmp = TempDir::new().unwrap();
        let arm = constituent(tmp.path(), "arm64", "ARM");
        let ub = UniversalBinary::new("z", "fat", tmp.path().join("universal/fat"), vec![arm]);

        let cancel = CancellationToken::new();
        assert!(ub.fuse(Path::new("/bin/false"), &cancel).is_err());
        assert!(!ub.directory().exists());
    }

    #[test]
    fn test_configured_tool_wins() {
        let tool = resolve_fuse_tool("z", Some(Path::new("/opt/lipo"))).unwrap();
        assert_eq!(tool, PathBuf::from("/opt/lipo"));
    }
}
