//! Plain makefile projects.

use std::path::Path;

use anyhow::Result;
use serde::Deserialize;

use crate::builder::project::{Detection, Project, ProjectContext, ProjectDefinition, ProjectKind};
use crate::core::manifest::StringOrList;
use crate::util::process::missing_tools;

const MAKEFILE_NAMES: [&str; 3] = ["GNUmakefile", "makefile", "Makefile"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct MakeOptions {
    pub make_targets: StringOrList,

    /// Extra arguments passed to every make invocation
    pub make_args: StringOrList,
}

pub struct MakeProject {
    options: MakeOptions,
}

impl MakeProject {
    pub const CONFIGURATION_KEYS: &'static [&'static str] = &["make-targets", "make-args"];

    pub fn new(definition: &ProjectDefinition) -> Result<Self> {
        Ok(MakeProject {
            options: definition.parse_options(ProjectKind::Make)?,
        })
    }

    pub fn is_valid_project(definition: &ProjectDefinition) -> Detection {
        match MAKEFILE_NAMES
            .iter()
            .find(|name| definition.source_file(name).is_file())
        {
            Some(name) => Detection::Valid(format!("{} exists", name)),
            None => Detection::Invalid(vec!["no makefile found".to_string()]),
        }
    }

    fn prefix_arg(output_directory: &Path) -> String {
        format!("PREFIX={}", output_directory.display())
    }
}

impl Project for MakeProject {
    fn kind(&self) -> ProjectKind {
        ProjectKind::Make
    }

    fn missing_prerequisites(&self, _definition: &ProjectDefinition) -> Vec<String> {
        missing_tools(["make"])
    }

    fn configure(&self, _ctx: &ProjectContext<'_>, _output_directory: &Path) -> Result<()> {
        Ok(())
    }

    fn build(&self, ctx: &ProjectContext<'_>, output_directory: &Path) -> Result<()> {
        let targets = ctx.evaluate_all(&self.options.make_targets.as_vec(), output_directory);
        let extra = ctx.evaluate_all(&self.options.make_args.as_vec(), output_directory);
        let prefix = Self::prefix_arg(output_directory);

        ctx.command("make")
            .args(ctx.jobs_args())
            .arg(&prefix)
            .args(&extra)
            .args(&targets)
            .exec_and_check()?;
        ctx.command("make")
            .arg("install")
            .arg(&prefix)
            .args(&extra)
            .exec_and_check()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::target::Target;
    use crate::util::process::CancellationToken;
    use serde_json::Map;
    use tempfile::TempDir;

    #[test]
    fn test_detects_makefile_variants() {
        let tmp = TempDir::new().unwrap();
        let def = ProjectDefinition::new("z", &Target::host(), tmp.path(), &Map::new()).unwrap();
        assert!(!MakeProject::is_valid_project(&def).is_valid());

        std::fs::write(tmp.path().join("GNUmakefile"), "all:\n").unwrap();
        assert_eq!(
            MakeProject::is_valid_project(&def),
            Detection::Valid("GNUmakefile exists".to_string())
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_build_installs_into_prefix() {
        if crate::util::process::find_executable("make").is_none() {
            return;
        }
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        std::fs::write(
            src.path().join("Makefile"),
            "all:\n\techo built > built.txt\n\ninstall:\n\tmkdir -p $(PREFIX)/include\n\tcp built.txt $(PREFIX)/include/\n",
        )
        .unwrap();

        let def = ProjectDefinition::new("z", &Target::host(), src.path(), &Map::new()).unwrap();
        let project = MakeProject::new(&def).unwrap();
        let cancel = CancellationToken::new();
        let ctx = ProjectContext::new(&def, 1, false, &cancel);

        project.configure(&ctx, out.path()).unwrap();
        project.build(&ctx, out.path()).unwrap();
        assert!(out.path().join("include/built.txt").is_file());
    }
}
