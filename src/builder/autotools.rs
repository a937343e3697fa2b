//! Autotools projects: `./configure && make && make install`.

use std::path::Path;

use anyhow::Result;
use serde::Deserialize;

use crate::builder::project::{
    Detection, Linkage, Project, ProjectContext, ProjectDefinition, ProjectKind,
};
use crate::core::manifest::StringOrList;
use crate::util::fs::read_to_string;
use crate::util::process::{missing_tools, ProcessBuilder};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct AutotoolsOptions {
    pub configure_args: StringOrList,
    pub make_targets: StringOrList,
}

/// GNU Autoconf based project.
pub struct AutotoolsProject {
    options: AutotoolsOptions,
}

impl AutotoolsProject {
    pub const CONFIGURATION_KEYS: &'static [&'static str] = &["configure-args", "make-targets"];

    pub fn new(definition: &ProjectDefinition) -> Result<Self> {
        Ok(AutotoolsProject {
            options: definition.parse_options(ProjectKind::Autotools)?,
        })
    }

    /// Valid when `configure` was generated by Autoconf, or when the
    /// autogen.sh / configure.ac / Makefile.am triad is present.
    pub fn is_valid_project(definition: &ProjectDefinition) -> Detection {
        let mut failures = Vec::new();

        let configure = definition.source_file("configure");
        if configure.is_file() {
            let version = ProcessBuilder::new("sh")
                .arg("./configure")
                .arg("--version")
                .cwd(&definition.source_directory)
                .exec_stdout();
            match version {
                Ok(text) if text.contains("generated by GNU Autoconf") => {
                    return Detection::Valid(
                        "./configure script was generated by GNU Autoconf".to_string(),
                    );
                }
                _ => failures
                    .push("./configure script was not generated by GNU Autoconf".to_string()),
            }
        } else {
            failures.push("no ./configure script found".to_string());
        }

        let triad = ["autogen.sh", "configure.ac", "Makefile.am"];
        if triad.iter().all(|f| definition.source_file(f).is_file()) {
            return Detection::Valid("autogen.sh, configure.ac and Makefile.am exist".to_string());
        }
        failures.push("autogen.sh, configure.ac and Makefile.am were not all found".to_string());

        Detection::Invalid(failures)
    }

    fn configure_args(&self, ctx: &ProjectContext<'_>, output_directory: &Path) -> Result<Vec<String>> {
        let mut args = ctx.evaluate_all(&self.options.configure_args.as_vec(), output_directory);
        let has_host = args.iter().any(|a| a == "--host" || a.starts_with("--host="));
        let has_linkage = args.iter().any(|a| {
            a.starts_with("--enable-shared")
                || a.starts_with("--disable-shared")
                || a.starts_with("--enable-static")
                || a.starts_with("--disable-static")
        });

        args.push(format!("--prefix={}", output_directory.display()));

        let target = ctx.target();
        let platform = target.platform();
        let architecture = target.architecture();

        if !has_host {
            if let Some(triples) = platform.configure_host_candidates(architecture) {
                let script = read_to_string(&ctx.source_directory().join("configure"))?;
                let host = triples.select(&script);
                tracing::debug!("{}: using --host={}", ctx.definition.library, host);
                args.push(format!("--host={}", host));
            }
        }

        if platform.is_cross() {
            if let Some(sysroot) = platform.sysroot(architecture) {
                args.push(format!("--with-sysroot={}", sysroot.display()));
            }
        }

        if !has_linkage {
            match ctx.linkage() {
                Some(Linkage::Static) => {
                    args.push("--enable-static".to_string());
                    args.push("--disable-shared".to_string());
                }
                Some(Linkage::Shared) => {
                    args.push("--enable-shared".to_string());
                    args.push("--disable-static".to_string());
                }
                None => {}
            }
        }

        Ok(args)
    }
}

impl Project for AutotoolsProject {
    fn kind(&self) -> ProjectKind {
        ProjectKind::Autotools
    }

    fn missing_prerequisites(&self, definition: &ProjectDefinition) -> Vec<String> {
        let mut tools = vec!["make"];
        if !definition.source_file("configure").is_file() {
            tools.push("autoreconf");
        }
        missing_tools(tools)
    }

    fn configure(&self, ctx: &ProjectContext<'_>, output_directory: &Path) -> Result<()> {
        if !ctx.source_directory().join("configure").is_file() {
            tracing::info!("{}: generating configure script", ctx.definition.library);
            ctx.command("sh").arg("./autogen.sh").exec_and_check()?;
        }

        let args = self.configure_args(ctx, output_directory)?;
        ctx.command("sh")
            .arg("./configure")
            .args(&args)
            .exec_and_check()?;
        Ok(())
    }

    fn build(&self, ctx: &ProjectContext<'_>, output_directory: &Path) -> Result<()> {
        let targets = ctx.evaluate_all(&self.options.make_targets.as_vec(), output_directory);
        let jobs = ctx.jobs_args();

        ctx.command("make").args(&targets).args(&jobs).exec_and_check()?;
        ctx.command("make")
            .arg("install")
            .args(&jobs)
            .exec_and_check()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::target::Target;
    use crate::util::process::CancellationToken;
    use serde_json::{json, Map, Value};
    use tempfile::TempDir;

    fn definition(dir: &Path, target: &str, project: Value) -> ProjectDefinition {
        let Value::Object(map) = project else {
            panic!("not an object")
        };
        ProjectDefinition::new("z", &Target::parse(target).unwrap(), dir, &map).unwrap()
    }

    #[test]
    fn test_detects_autogen_triad() {
        let tmp = TempDir::new().unwrap();
        for f in ["autogen.sh", "configure.ac", "Makefile.am"] {
            std::fs::write(tmp.path().join(f), "").unwrap();
        }
        let def = definition(tmp.path(), "host", json!({}));
        assert!(AutotoolsProject::is_valid_project(&def).is_valid());
    }

    #[test]
    fn test_rejects_plain_tree() {
        let tmp = TempDir::new().unwrap();
        let def = definition(tmp.path(), "host", json!({}));
        match AutotoolsProject::is_valid_project(&def) {
            Detection::Invalid(reasons) => assert_eq!(reasons.len(), 2),
            Detection::Valid(_) => panic!("empty tree detected as autotools"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_detects_generated_configure() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("configure"),
            "#!/bin/sh\necho 'configure generated by GNU Autoconf 2.71'\n",
        )
        .unwrap();
        let def = definition(tmp.path(), "host", json!({}));
        assert!(AutotoolsProject::is_valid_project(&def).is_valid());
    }

    #[test]
    fn test_configure_args_for_ios() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("configure"), "case $host in\n  arm*-apple-darwin*) ;;\nesac\n")
            .unwrap();
        let def = definition(
            tmp.path(),
            "ios:armv7",
            json!({"configure-args": ["--without-docs", "--libdir={build_directory}/lib"]}),
        );
        let project = AutotoolsProject::new(&def).unwrap();
        let cancel = CancellationToken::new();
        let ctx = ProjectContext::new(&def, 4, false, &cancel);

        let args = project.configure_args(&ctx, Path::new("/out")).unwrap();
        assert_eq!(args[0], "--without-docs");
        assert_eq!(args[1], "--libdir=/out/lib");
        assert!(args.contains(&"--prefix=/out".to_string()));
        assert!(args.contains(&"--host=armv7-apple-darwin".to_string()));
        assert!(args.contains(&"--enable-static".to_string()));
        assert!(args.contains(&"--disable-shared".to_string()));
    }

    #[test]
    fn test_explicit_host_and_linkage_respected() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("configure"), "").unwrap();
        let def = definition(
            tmp.path(),
            "android:arm64",
            json!({"configure-args": ["--host=aarch64-linux-android", "--enable-shared"]}),
        );
        let project = AutotoolsProject::new(&def).unwrap();
        let cancel = CancellationToken::new();
        let ctx = ProjectContext::new(&def, 1, false, &cancel);

        let args = project.configure_args(&ctx, Path::new("/out")).unwrap();
        assert_eq!(args.iter().filter(|a| a.starts_with("--host")).count(), 1);
        assert!(!args.contains(&"--disable-shared".to_string()));
    }

    #[test]
    fn test_host_build_has_no_cross_flags() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("configure"), "").unwrap();
        let def = definition(tmp.path(), "host", Value::Object(Map::new()));
        let project = AutotoolsProject::new(&def).unwrap();
        let cancel = CancellationToken::new();
        let ctx = ProjectContext::new(&def, 1, false, &cancel);

        let args = project.configure_args(&ctx, Path::new("/out")).unwrap();
        assert_eq!(args, vec!["--prefix=/out".to_string()]);
    }
}
