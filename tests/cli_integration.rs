//! CLI integration tests for needy.
//!
//! These tests drive the binary against throwaway workspaces whose libraries
//! are plain directories built with shell steps.

use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get the needy binary command, isolated from the user's global config.
fn needy(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("needy").unwrap();
    cmd.current_dir(dir)
        .env("HOME", dir)
        .env_remove("NEEDY_JOBS")
        .arg("--no-color");
    cmd
}

/// A workspace with `zlib` and `png` (which depends on `zlib`).
fn workspace() -> TempDir {
    let tmp = TempDir::new().unwrap();
    for lib in ["zlib", "png"] {
        let dir = tmp.path().join("vendor").join(lib);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{}.h", lib)), "#pragma once\n").unwrap();
    }
    fs::write(
        tmp.path().join("needs.json"),
        r#"{
  "libraries": {
    "zlib": {
      "directory": "vendor/zlib",
      "project": {
        "type": "custom",
        "build-steps": [
          "mkdir -p {build_directory}/include {build_directory}/lib/pkgconfig",
          "cp zlib.h {build_directory}/include/"
        ]
      }
    },
    "png": {
      "directory": "vendor/png",
      "dependencies": "zlib",
      "project": {
        "type": "custom",
        "build-steps": ["mkdir -p {build_directory}/include", "cp png.h {build_directory}/include/"]
      }
    }
  },
  "universal-binaries": {
    "fat": {"linux": ["x86_64", "arm64"]}
  }
}
"#,
    )
    .unwrap();
    tmp
}

// ============================================================================
// needy satisfy
// ============================================================================

#[cfg(unix)]
#[test]
fn test_satisfy_builds_in_dependency_order() {
    let tmp = workspace();

    needy(tmp.path())
        .arg("satisfy")
        .assert()
        .success()
        .stderr(
            predicate::str::contains("[OUT-OF-DATE] zlib")
                .and(predicate::str::contains("[SUCCESS] zlib in "))
                .and(predicate::str::contains("[OUT-OF-DATE] png")),
        );

    let output = needy(tmp.path()).arg("satisfy").output().unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr);
    let zlib = stderr.find("[UP-TO-DATE] zlib").unwrap();
    let png = stderr.find("[UP-TO-DATE] png").unwrap();
    assert!(zlib < png);
}

#[cfg(unix)]
#[test]
fn test_satisfy_filter_pulls_in_dependencies() {
    let tmp = workspace();

    needy(tmp.path())
        .args(["satisfy", "png"])
        .assert()
        .success()
        .stderr(predicate::str::contains("[SUCCESS] zlib in "));
}

#[cfg(unix)]
#[test]
fn test_satisfy_failure_prints_error() {
    let tmp = workspace();
    fs::remove_file(tmp.path().join("vendor/zlib/zlib.h")).unwrap();

    needy(tmp.path())
        .arg("satisfy")
        .assert()
        .failure()
        .stderr(
            predicate::str::contains("[ERROR]")
                .and(predicate::str::contains("failed to build `zlib`"))
                .and(predicate::str::contains("[OUT-OF-DATE] png").not()),
        );
}

#[test]
fn test_satisfy_unknown_universal_binary() {
    let tmp = workspace();

    needy(tmp.path())
        .args(["satisfy", "-u", "thin"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown universal binary `thin`"));
}

#[test]
fn test_satisfy_unknown_platform() {
    let tmp = workspace();

    needy(tmp.path())
        .args(["satisfy", "-t", "beos"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown platform `beos`"));
}

#[test]
fn test_target_and_universal_binary_conflict() {
    let tmp = workspace();

    needy(tmp.path())
        .args(["satisfy", "-t", "linux", "-u", "fat"])
        .assert()
        .failure();
}

#[test]
fn test_missing_needs_file() {
    let tmp = TempDir::new().unwrap();

    needy(tmp.path())
        .arg("satisfy")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no needs file found"));
}

// ============================================================================
// needy builddir / includedir / librarydir / pkg-config-path
// ============================================================================

#[test]
fn test_builddir_for_target() {
    let tmp = workspace();

    needy(tmp.path())
        .args(["builddir", "zlib", "-t", "linux:arm64"])
        .assert()
        .success()
        .stdout(predicate::str::ends_with(
            "needs/zlib/build/linux/arm64\n",
        ));
}

#[test]
fn test_builddir_for_universal_binary() {
    let tmp = workspace();

    needy(tmp.path())
        .args(["builddir", "zlib", "-u", "fat"])
        .assert()
        .success()
        .stdout(predicate::str::ends_with("needs/zlib/build/universal/fat\n"));
}

#[test]
fn test_builddir_unknown_library() {
    let tmp = workspace();

    needy(tmp.path())
        .args(["builddir", "jpeg"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown library `jpeg`"));
}

#[test]
fn test_includedir_lists_selected_libraries() {
    let tmp = workspace();

    needy(tmp.path())
        .args(["includedir", "-t", "linux:x86_64", "z*"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("needs/zlib/build/linux/x86_64/include")
                .and(predicate::str::contains("png").not()),
        );
}

#[test]
fn test_librarydir_and_pkg_config_path() {
    let tmp = workspace();

    needy(tmp.path())
        .args(["librarydir", "-t", "linux"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("needs/zlib/build/linux/x86_64/lib")
                .and(predicate::str::contains("needs/png/build/linux/x86_64/lib")),
        );

    needy(tmp.path())
        .args(["pkg-config-path", "-t", "linux", "zlib", "png"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/lib/pkgconfig:").and(predicate::str::contains(
            "needs/png/build/linux/x86_64/lib/pkgconfig",
        )));
}

// ============================================================================
// needy init / sync / status / dev
// ============================================================================

#[test]
fn test_init_populates_sources() {
    let tmp = workspace();

    needy(tmp.path()).args(["init", "zlib"]).assert().success();

    assert!(tmp.path().join("needs/zlib/source/zlib.h").exists());
    assert!(!tmp.path().join("needs/png/source").exists());
}

#[test]
fn test_dev_mode_requires_initialized_source() {
    let tmp = workspace();

    needy(tmp.path())
        .args(["dev", "enable", "zlib"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("zlib: initialize"));
}

#[test]
fn test_dev_mode_roundtrip() {
    let tmp = workspace();

    needy(tmp.path()).args(["init", "zlib"]).assert().success();
    needy(tmp.path()).args(["dev", "enable", "zlib"]).assert().success();

    needy(tmp.path())
        .args(["dev", "status"])
        .assert()
        .success()
        .stdout("zlib\n");

    needy(tmp.path())
        .args(["sync", "png"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("png: development mode is not enabled"));

    needy(tmp.path()).args(["sync"]).assert().success();

    needy(tmp.path()).args(["dev", "disable", "zlib"]).assert().success();
    needy(tmp.path())
        .args(["dev", "status", "zlib"])
        .assert()
        .success()
        .stdout("zlib: disabled\n");
}

#[test]
fn test_sync_without_dev_libraries_warns() {
    let tmp = workspace();

    needy(tmp.path())
        .arg("sync")
        .assert()
        .success()
        .stderr(predicate::str::contains("no libraries have development mode enabled"));
}

#[test]
fn test_status_reports_source() {
    let tmp = workspace();

    needy(tmp.path())
        .args(["status", "png"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("png: uninitialized")
                .and(predicate::str::contains("directory: ")),
        );
}

// ============================================================================
// Help / version
// ============================================================================

#[test]
fn test_help_lists_commands() {
    let tmp = TempDir::new().unwrap();

    needy(tmp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("satisfy")
                .and(predicate::str::contains("builddir"))
                .and(predicate::str::contains("pkg-config-path")),
        );
}
