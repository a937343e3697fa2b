//! Build targets: a (platform, architecture) pair.
//!
//! A [`Target`] is an immutable value used as a lookup key everywhere: build
//! directories, build markers and universal binaries are all keyed by it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;

use crate::util::errors::NeedyError;
use crate::util::process::ProcessBuilder;

/// Android API level used when composing NDK compiler names.
pub const DEFAULT_ANDROID_API: u32 = 21;

/// Platforms a library can be built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Platform {
    Host,
    Linux,
    Macos,
    Ios,
    Tvos,
    Android,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::Host,
        Platform::Linux,
        Platform::Macos,
        Platform::Ios,
        Platform::Tvos,
        Platform::Android,
    ];

    pub fn identifier(&self) -> &'static str {
        match self {
            Platform::Host => "host",
            Platform::Linux => "linux",
            Platform::Macos => "macos",
            Platform::Ios => "ios",
            Platform::Tvos => "tvos",
            Platform::Android => "android",
        }
    }

    /// Look up a platform by identifier (`osx` is accepted for macOS).
    pub fn from_identifier(id: &str) -> Result<Self> {
        match id {
            "host" => Ok(Platform::Host),
            "linux" => Ok(Platform::Linux),
            "macos" | "osx" => Ok(Platform::Macos),
            "ios" => Ok(Platform::Ios),
            "tvos" => Ok(Platform::Tvos),
            "android" => Ok(Platform::Android),
            other => Err(NeedyError::UnknownPlatform(other.to_string()).into()),
        }
    }

    pub fn default_architecture(&self) -> String {
        match self {
            Platform::Host => host_architecture(),
            Platform::Linux | Platform::Macos => "x86_64".to_string(),
            Platform::Ios | Platform::Tvos => "arm64".to_string(),
            Platform::Android => "armv7".to_string(),
        }
    }

    /// Supported architectures; `None` means any architecture is accepted.
    pub fn architectures(&self) -> Option<&'static [&'static str]> {
        match self {
            Platform::Host => None,
            Platform::Linux => Some(&["x86_64", "x86", "arm64", "armv7"]),
            Platform::Macos => Some(&["x86_64", "arm64"]),
            Platform::Ios => Some(&["armv7", "armv7s", "arm64", "i386", "x86_64"]),
            Platform::Tvos => Some(&["arm64", "x86_64"]),
            Platform::Android => Some(&["armv7", "arm64", "x86", "x86_64"]),
        }
    }

    /// Mobile platforms default to static linkage.
    pub fn is_mobile(&self) -> bool {
        matches!(self, Platform::Ios | Platform::Tvos | Platform::Android)
    }

    /// Whether building for this platform means cross-compiling.
    pub fn is_cross(&self) -> bool {
        match self {
            Platform::Host => false,
            Platform::Linux => !cfg!(target_os = "linux"),
            Platform::Macos => !cfg!(target_os = "macos"),
            Platform::Ios | Platform::Tvos | Platform::Android => true,
        }
    }

    fn apple_sdk(&self, architecture: &str) -> Option<&'static str> {
        let simulator = matches!(architecture, "i386" | "x86_64");
        match (self, simulator) {
            (Platform::Macos, _) => Some("macosx"),
            (Platform::Ios, false) => Some("iphoneos"),
            (Platform::Ios, true) => Some("iphonesimulator"),
            (Platform::Tvos, false) => Some("appletvos"),
            (Platform::Tvos, true) => Some("appletvsimulator"),
            _ => None,
        }
    }

    /// Root of the platform SDK, if the platform defines one and it is installed.
    pub fn sysroot(&self, architecture: &str) -> Option<PathBuf> {
        match self {
            Platform::Android => android_toolchain_root().map(|root| root.join("sysroot")),
            Platform::Ios | Platform::Tvos => {
                let sdk = self.apple_sdk(architecture)?;
                ProcessBuilder::new("xcrun")
                    .args(["--sdk", sdk, "--show-sdk-path"])
                    .exec_stdout()
                    .ok()
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
            }
            _ => None,
        }
    }

    /// Directories holding the platform's compilers, searched ahead of `PATH`.
    pub fn binary_paths(&self, architecture: &str) -> Vec<PathBuf> {
        match self {
            Platform::Android => android_toolchain_root()
                .map(|root| vec![root.join("bin")])
                .unwrap_or_default(),
            Platform::Ios | Platform::Tvos => self
                .apple_sdk(architecture)
                .and_then(|sdk| {
                    ProcessBuilder::new("xcrun")
                        .args(["--sdk", sdk, "--find", "clang"])
                        .exec_stdout()
                        .ok()
                })
                .and_then(|clang| Path::new(&clang).parent().map(Path::to_path_buf))
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Environment handed to build tools for cross-compilation.
    pub fn toolchain_environment(&self, architecture: &str) -> Vec<(String, String)> {
        match self {
            Platform::Ios | Platform::Tvos => {
                let mut flags = format!("-arch {}", architecture);
                if let Some(sysroot) = self.sysroot(architecture) {
                    flags.push_str(&format!(" -isysroot {}", sysroot.display()));
                }
                vec![
                    ("CC".to_string(), "clang".to_string()),
                    ("CXX".to_string(), "clang++".to_string()),
                    ("CFLAGS".to_string(), flags.clone()),
                    ("CXXFLAGS".to_string(), flags.clone()),
                    ("LDFLAGS".to_string(), flags),
                ]
            }
            Platform::Android => {
                let compiler_triple = match architecture {
                    "armv7" => "armv7a-linux-androideabi",
                    "arm64" => "aarch64-linux-android",
                    "x86" => "i686-linux-android",
                    _ => "x86_64-linux-android",
                };
                vec![
                    (
                        "CC".to_string(),
                        format!("{}{}-clang", compiler_triple, DEFAULT_ANDROID_API),
                    ),
                    (
                        "CXX".to_string(),
                        format!("{}{}-clang++", compiler_triple, DEFAULT_ANDROID_API),
                    ),
                    ("AR".to_string(), "llvm-ar".to_string()),
                    ("RANLIB".to_string(), "llvm-ranlib".to_string()),
                ]
            }
            _ => Vec::new(),
        }
    }

    /// Candidate `--host` triples for autotools, in priority order.
    ///
    /// Each candidate's pattern is searched for literally in the configure
    /// script; the first one present selects its triple. `None` means the
    /// platform is built natively and needs no `--host`.
    pub fn configure_host_candidates(&self, architecture: &str) -> Option<HostTriples> {
        match self {
            Platform::Ios | Platform::Tvos => {
                if matches!(architecture, "i386" | "x86_64") {
                    let triple = format!("{}-apple-darwin", architecture);
                    return Some(HostTriples::exact(triple));
                }
                let own = format!("{}-apple-darwin", architecture);
                let mut candidates = Vec::new();
                if architecture == "arm64" {
                    candidates.push(HostCandidate::same("aarch64-apple-darwin"));
                    candidates.push(HostCandidate::new("aarch64*", "aarch64-apple-darwin"));
                    candidates.push(HostCandidate::same("aarch64"));
                }
                candidates.push(HostCandidate::same(&own));
                candidates.push(HostCandidate::new("arm*-apple-darwin", &own));
                candidates.push(HostCandidate::same("arm-apple-darwin"));
                candidates.push(HostCandidate::new("arm*", architecture));
                candidates.push(HostCandidate::same("arm"));
                Some(HostTriples {
                    candidates,
                    fallback: "arm-apple-darwin".to_string(),
                })
            }
            Platform::Android => match architecture {
                "x86" => Some(HostTriples::exact("i686-linux-android")),
                "x86_64" => Some(HostTriples::exact("x86_64-linux-android")),
                _ => {
                    let mut candidates = Vec::new();
                    let fallback = if architecture == "arm64" {
                        candidates.push(HostCandidate::same("aarch64-linux-android"));
                        candidates.push(HostCandidate::new("aarch64*", "aarch64-linux-android"));
                        candidates.push(HostCandidate::same("aarch64"));
                        "aarch64-linux-android"
                    } else {
                        "arm-linux-androideabi"
                    };
                    candidates.push(HostCandidate::new("linux*android*", fallback));
                    candidates.push(HostCandidate::new("arm*", architecture));
                    candidates.push(HostCandidate::same("arm"));
                    Some(HostTriples {
                        candidates,
                        fallback: fallback.to_string(),
                    })
                }
            },
            Platform::Linux | Platform::Macos if self.is_cross() => {
                let os = if *self == Platform::Linux {
                    "linux-gnu"
                } else {
                    "apple-darwin"
                };
                let cpu = match architecture {
                    "arm64" => "aarch64",
                    "armv7" => "arm",
                    "x86" => "i686",
                    other => other,
                };
                Some(HostTriples::exact(format!("{}-{}", cpu, os)))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

/// A `--host` candidate: text to look for and the triple it selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCandidate {
    pub pattern: String,
    pub triple: String,
}

impl HostCandidate {
    pub fn new(pattern: &str, triple: &str) -> Self {
        HostCandidate {
            pattern: pattern.to_string(),
            triple: triple.to_string(),
        }
    }

    fn same(triple: &str) -> Self {
        HostCandidate::new(triple, triple)
    }
}

/// Ordered `--host` candidates with a fallback when none is found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTriples {
    pub candidates: Vec<HostCandidate>,
    pub fallback: String,
}

impl HostTriples {
    fn exact(triple: impl Into<String>) -> Self {
        HostTriples {
            candidates: Vec::new(),
            fallback: triple.into(),
        }
    }

    /// Pick the first candidate whose pattern appears in `script`.
    pub fn select(&self, script: &str) -> &str {
        self.candidates
            .iter()
            .find(|c| script.contains(&c.pattern))
            .map(|c| c.triple.as_str())
            .unwrap_or(&self.fallback)
    }
}

/// A (platform, architecture) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target {
    platform: Platform,
    architecture: String,
}

impl Target {
    /// Create a target, validating the architecture against the platform.
    pub fn new(platform: Platform, architecture: impl Into<String>) -> Result<Self> {
        let architecture = architecture.into();
        let known = match platform.architectures() {
            None => !architecture.is_empty(),
            Some(archs) => archs.contains(&architecture.as_str()),
        };
        if !known {
            return Err(NeedyError::UnknownArchitecture {
                platform: platform.identifier().to_string(),
                architecture,
            }
            .into());
        }
        Ok(Target {
            platform,
            architecture,
        })
    }

    /// A target for the platform's default architecture.
    pub fn with_default_architecture(platform: Platform) -> Self {
        Target {
            platform,
            architecture: platform.default_architecture(),
        }
    }

    /// The machine needy runs on.
    pub fn host() -> Self {
        Target::with_default_architecture(Platform::Host)
    }

    /// Parse `platform[:architecture]`.
    pub fn parse(identifier: &str) -> Result<Self> {
        let (platform, architecture) = match identifier.split_once(':') {
            Some((p, a)) => (p, Some(a)),
            None => (identifier, None),
        };
        let platform = Platform::from_identifier(platform)?;
        match architecture {
            Some(arch) => Target::new(platform, arch),
            None => Ok(Target::with_default_architecture(platform)),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    /// Relative directory for this target's build output: `platform/arch`.
    pub fn build_subdirectory(&self) -> PathBuf {
        Path::new(self.platform.identifier()).join(&self.architecture)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.architecture)
    }
}

impl FromStr for Target {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Target::parse(s)
    }
}

/// Architecture name of the running machine, in needy's vocabulary.
pub fn host_architecture() -> String {
    match std::env::consts::ARCH {
        "aarch64" if cfg!(target_vendor = "apple") => "arm64".to_string(),
        "x86" => "x86".to_string(),
        other => other.to_string(),
    }
}

fn android_toolchain_root() -> Option<PathBuf> {
    let ndk = ["ANDROID_NDK_HOME", "ANDROID_NDK_ROOT", "ANDROID_NDK"]
        .iter()
        .find_map(|var| std::env::var_os(var))
        .map(PathBuf::from)?;
    let host_tag = if cfg!(target_os = "macos") {
        "darwin-x86_64"
    } else if cfg!(windows) {
        "windows-x86_64"
    } else {
        "linux-x86_64"
    };
    Some(
        ndk.join("toolchains")
            .join("llvm")
            .join("prebuilt")
            .join(host_tag),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::errors::find_needy_error;

    #[test]
    fn test_parse_with_architecture() {
        let target = Target::parse("ios:armv7").unwrap();
        assert_eq!(target.platform(), Platform::Ios);
        assert_eq!(target.architecture(), "armv7");
        assert_eq!(target.to_string(), "ios:armv7");
    }

    #[test]
    fn test_parse_defaults_architecture() {
        let target = Target::parse("android").unwrap();
        assert_eq!(target.architecture(), "armv7");
        assert_eq!(Target::parse("host").unwrap(), Target::host());
    }

    #[test]
    fn test_unknown_platform() {
        let err = Target::parse("amiga:m68k").unwrap_err();
        assert!(matches!(
            find_needy_error(&err),
            Some(NeedyError::UnknownPlatform(p)) if p == "amiga"
        ));
    }

    #[test]
    fn test_unknown_architecture() {
        let err = Target::parse("tvos:armv7").unwrap_err();
        assert!(matches!(
            find_needy_error(&err),
            Some(NeedyError::UnknownArchitecture { .. })
        ));
    }

    #[test]
    fn test_build_subdirectory() {
        let target = Target::parse("ios:arm64").unwrap();
        assert_eq!(target.build_subdirectory(), Path::new("ios").join("arm64"));
    }

    #[test]
    fn test_host_triples_priority() {
        let triples = Platform::Ios.configure_host_candidates("arm64").unwrap();
        assert_eq!(triples.select("case aarch64-apple-darwin"), "aarch64-apple-darwin");
        assert_eq!(triples.select("aarch64*) ;;"), "aarch64-apple-darwin");
        assert_eq!(triples.select("arm*-apple-darwin"), "arm64-apple-darwin");
        assert_eq!(triples.select("nothing relevant"), "arm-apple-darwin");

        let armv7 = Platform::Android.configure_host_candidates("armv7").unwrap();
        assert_eq!(armv7.select("linux*android*"), "arm-linux-androideabi");
        assert_eq!(armv7.select("arm*"), "armv7");

        assert!(Platform::Host.configure_host_candidates("x86_64").is_none());
    }

    #[test]
    fn test_mobile_platforms() {
        assert!(Platform::Ios.is_mobile());
        assert!(Platform::Android.is_mobile());
        assert!(!Platform::Host.is_mobile());
        assert!(!Platform::Host.is_cross());
    }
}
