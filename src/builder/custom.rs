//! Projects built by user-supplied shell steps.

use std::path::Path;

use anyhow::Result;
use serde::Deserialize;

use crate::builder::project::{Detection, Project, ProjectContext, ProjectDefinition, ProjectKind};
use crate::core::manifest::StringOrList;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct CustomOptions {
    pub configure_steps: StringOrList,
    pub build_steps: StringOrList,
}

/// Runs `configure-steps` then `build-steps`; the fallback when no other
/// strategy recognizes the source tree.
pub struct CustomProject {
    options: CustomOptions,
}

impl CustomProject {
    pub const CONFIGURATION_KEYS: &'static [&'static str] = &["configure-steps", "build-steps"];

    pub fn new(definition: &ProjectDefinition) -> Result<Self> {
        Ok(CustomProject {
            options: definition.parse_options(ProjectKind::Custom)?,
        })
    }

    pub fn is_valid_project(_definition: &ProjectDefinition) -> Detection {
        Detection::Valid("custom steps always apply".to_string())
    }
}

impl Project for CustomProject {
    fn kind(&self) -> ProjectKind {
        ProjectKind::Custom
    }

    fn missing_prerequisites(&self, _definition: &ProjectDefinition) -> Vec<String> {
        Vec::new()
    }

    fn configure(&self, ctx: &ProjectContext<'_>, output_directory: &Path) -> Result<()> {
        ctx.run_commands(&self.options.configure_steps.as_vec(), output_directory)
    }

    fn build(&self, ctx: &ProjectContext<'_>, output_directory: &Path) -> Result<()> {
        ctx.run_commands(&self.options.build_steps.as_vec(), output_directory)
    }
}
