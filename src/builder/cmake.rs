//! CMake adapter for existing CMake projects.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;

use crate::builder::project::{
    Detection, Linkage, Project, ProjectContext, ProjectDefinition, ProjectKind,
};
use crate::core::manifest::StringOrList;
use crate::core::target::Platform;
use crate::util::fs::ensure_dir;
use crate::util::process::missing_tools;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct CMakeOptions {
    /// Extra `-D...` (or other) arguments for the configure step
    pub cmake_options: StringOrList,

    /// Targets to build before installing
    pub cmake_targets: StringOrList,
}

/// CMake build adapter.
pub struct CMakeProject {
    options: CMakeOptions,
}

impl CMakeProject {
    pub const CONFIGURATION_KEYS: &'static [&'static str] = &["cmake-options", "cmake-targets"];

    pub fn new(definition: &ProjectDefinition) -> Result<Self> {
        Ok(CMakeProject {
            options: definition.parse_options(ProjectKind::CMake)?,
        })
    }

    pub fn is_valid_project(definition: &ProjectDefinition) -> Detection {
        if definition.source_file("CMakeLists.txt").is_file() {
            Detection::Valid("CMakeLists.txt exists".to_string())
        } else {
            Detection::Invalid(vec!["no CMakeLists.txt found".to_string()])
        }
    }

    /// Scratch directory for CMake's own files.
    fn cmake_build_dir(output_directory: &Path) -> PathBuf {
        output_directory.join("cmake-build")
    }

    fn configure_args(&self, ctx: &ProjectContext<'_>, output_directory: &Path) -> Vec<String> {
        let mut args = vec![
            "-S".to_string(),
            ctx.source_directory().display().to_string(),
            "-B".to_string(),
            Self::cmake_build_dir(output_directory).display().to_string(),
            "-DCMAKE_BUILD_TYPE=Release".to_string(),
            format!("-DCMAKE_INSTALL_PREFIX={}", output_directory.display()),
            "-DCMAKE_POSITION_INDEPENDENT_CODE=ON".to_string(),
        ];

        match ctx.linkage() {
            Some(Linkage::Static) => args.push("-DBUILD_SHARED_LIBS=OFF".to_string()),
            Some(Linkage::Shared) => args.push("-DBUILD_SHARED_LIBS=ON".to_string()),
            None => {}
        }

        let target = ctx.target();
        let architecture = target.architecture();
        match target.platform() {
            platform @ (Platform::Ios | Platform::Tvos) => {
                let system = if platform == Platform::Ios { "iOS" } else { "tvOS" };
                args.push(format!("-DCMAKE_SYSTEM_NAME={}", system));
                args.push(format!("-DCMAKE_OSX_ARCHITECTURES={}", architecture));
                if let Some(sysroot) = platform.sysroot(architecture) {
                    args.push(format!("-DCMAKE_OSX_SYSROOT={}", sysroot.display()));
                }
            }
            Platform::Macos => {
                args.push(format!("-DCMAKE_OSX_ARCHITECTURES={}", architecture));
            }
            Platform::Android => {
                let abi = match architecture {
                    "armv7" => "armeabi-v7a",
                    "arm64" => "arm64-v8a",
                    other => other,
                };
                args.push("-DCMAKE_SYSTEM_NAME=Android".to_string());
                args.push(format!("-DCMAKE_ANDROID_ARCH_ABI={}", abi));
            }
            Platform::Host | Platform::Linux => {}
        }

        args.extend(ctx.evaluate_all(&self.options.cmake_options.as_vec(), output_directory));
        args
    }
}

impl Project for CMakeProject {
    fn kind(&self) -> ProjectKind {
        ProjectKind::CMake
    }

    fn missing_prerequisites(&self, _definition: &ProjectDefinition) -> Vec<String> {
        missing_tools(["cmake"])
    }

    fn configure(&self, ctx: &ProjectContext<'_>, output_directory: &Path) -> Result<()> {
        tracing::info!("{}: configuring CMake project", ctx.definition.library);
        ensure_dir(&Self::cmake_build_dir(output_directory))?;

        ctx.command("cmake")
            .args(self.configure_args(ctx, output_directory))
            .exec_and_check()?;
        Ok(())
    }

    fn build(&self, ctx: &ProjectContext<'_>, output_directory: &Path) -> Result<()> {
        let build_dir = Self::cmake_build_dir(output_directory);
        let parallel = ctx.concurrency.to_string();

        let targets = ctx.evaluate_all(&self.options.cmake_targets.as_vec(), output_directory);
        if !targets.is_empty() {
            ctx.command("cmake")
                .arg("--build")
                .arg(&build_dir)
                .args(["--parallel", parallel.as_str(), "--config", "Release", "--target"])
                .args(&targets)
                .exec_and_check()?;
        }

        ctx.command("cmake")
            .arg("--build")
            .arg(&build_dir)
            .args(["--parallel", parallel.as_str(), "--config", "Release", "--target", "install"])
            .exec_and_check()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::target::Target;
    use crate::util::process::CancellationToken;
    use serde_json::{json, Value};

    fn definition(target: &str, project: Value) -> ProjectDefinition {
        let Value::Object(map) = project else {
            panic!("not an object")
        };
        ProjectDefinition::new("z", &Target::parse(target).unwrap(), Path::new("/src"), &map)
            .unwrap()
    }

    #[test]
    fn test_configure_args() {
        let def = definition(
            "android:arm64",
            json!({"linkage": "shared", "cmake-options": ["-DZ_OPT={architecture}"]}),
        );
        let project = CMakeProject::new(&def).unwrap();
        let cancel = CancellationToken::new();
        let ctx = ProjectContext::new(&def, 2, false, &cancel);

        let args = project.configure_args(&ctx, Path::new("/out"));
        assert!(args.contains(&"-DCMAKE_INSTALL_PREFIX=/out".to_string()));
        assert!(args.contains(&"-DBUILD_SHARED_LIBS=ON".to_string()));
        assert!(args.contains(&"-DCMAKE_ANDROID_ARCH_ABI=arm64-v8a".to_string()));
        assert_eq!(args.last().unwrap(), "-DZ_OPT=arm64");
    }

    #[test]
    fn test_rejects_autotools_keys() {
        let def = definition("host", json!({"configure-args": []}));
        assert!(CMakeProject::new(&def).is_err());
    }
}
