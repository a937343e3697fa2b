//! Needs file parsing and schema.
//!
//! A needs file (`needs.json` or `needs.yaml`) declares the libraries a
//! project requires:
//!
//! ```yaml
//! libraries:
//!   zlib:
//!     download: https://zlib.net/zlib-1.3.1.tar.gz
//!     checksum: 9855b6d802d7fe5b7bd5b196a2271655
//!     project:
//!       type: autotools
//!   png:
//!     repository: https://github.com/glennrp/libpng.git
//!     commit: v1.6.43
//!     dependencies: [zlib]
//! universal-binaries:
//!   iphone:
//!     ios: [armv7, arm64]
//! ```
//!
//! Templating is not performed here. A [`ManifestEvaluator`] hands the core an
//! already-resolved document in two stages; [`FileManifest`] is the plain
//! evaluator that reads the file as-is.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::target::{Platform, Target};
use crate::util::errors::NeedyError;
use crate::util::fs::read_to_string;

/// Recognized needs file names, in lookup order.
pub const MANIFEST_NAMES: [&str; 2] = ["needs.json", "needs.yaml"];

/// A string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StringOrList::One(s) => vec![s],
            StringOrList::Many(v) => v,
        }
    }

    pub fn as_vec(&self) -> Vec<String> {
        self.clone().into_vec()
    }
}

impl Default for StringOrList {
    fn default() -> Self {
        StringOrList::Many(Vec::new())
    }
}

/// Configuration of one library in the needs file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LibraryConfig {
    /// Local source tree, relative to the needs file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,

    /// Archive URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<String>,

    /// MD5 or SHA-1 of the archive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    /// Git remote
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// Git commit or ref
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,

    /// Names of libraries that must be built first
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<StringOrList>,

    /// Build strategy settings; validated per strategy at build time
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub project: Map<String, Value>,
}

impl LibraryConfig {
    /// Declared dependency names (absent means none).
    pub fn dependencies(&self) -> Vec<String> {
        self.dependencies
            .as_ref()
            .map(StringOrList::as_vec)
            .unwrap_or_default()
    }
}

/// Platform -> architectures map naming the targets fused into one binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniversalBinarySpec {
    entries: Vec<(String, Vec<String>)>,
}

impl UniversalBinarySpec {
    fn from_value(name: &str, value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            bail!("universal binary `{}` must map platforms to architecture lists", name);
        };
        let mut entries = Vec::with_capacity(map.len());
        for (platform, architectures) in map {
            let architectures: StringOrList = serde_json::from_value(architectures)
                .with_context(|| {
                    format!(
                        "universal binary `{}`: architectures for `{}` must be a list",
                        name, platform
                    )
                })?;
            entries.push((platform, architectures.into_vec()));
        }
        Ok(UniversalBinarySpec { entries })
    }

    /// Constituent targets in declaration order.
    pub fn targets(&self) -> Result<Vec<Target>> {
        let mut targets = Vec::new();
        for (platform, architectures) in &self.entries {
            let platform = Platform::from_identifier(platform)?;
            for architecture in architectures {
                targets.push(Target::new(platform, architecture.as_str())?);
            }
        }
        Ok(targets)
    }
}

/// A resolved needs document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    libraries: Vec<(String, LibraryConfig)>,
    universal_binaries: Vec<(String, UniversalBinarySpec)>,
}

impl Manifest {
    /// Build a manifest from an already-parsed document.
    pub fn from_value(document: Value) -> Result<Self> {
        let Value::Object(document) = document else {
            bail!("needs file must contain an object at the top level");
        };

        let mut manifest = Manifest::default();
        for (key, value) in document {
            match key.as_str() {
                "libraries" => manifest.libraries = parse_libraries(value)?,
                "universal-binaries" => {
                    let Value::Object(map) = value else {
                        bail!("`universal-binaries` must be a mapping");
                    };
                    for (name, spec) in map {
                        let spec = UniversalBinarySpec::from_value(&name, spec)?;
                        manifest.universal_binaries.push((name, spec));
                    }
                }
                other => bail!("unknown key `{}` in needs file", other),
            }
        }
        Ok(manifest)
    }

    pub fn parse_json(text: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(text).context("invalid JSON in needs file")?;
        Manifest::from_value(document)
    }

    pub fn parse_yaml(text: &str) -> Result<Self> {
        let document: Value = serde_yaml::from_str(text).context("invalid YAML in needs file")?;
        Manifest::from_value(document)
    }

    /// Libraries in declaration order.
    pub fn libraries(&self) -> impl Iterator<Item = (&str, &LibraryConfig)> {
        self.libraries.iter().map(|(n, c)| (n.as_str(), c))
    }

    pub fn library(&self, name: &str) -> Option<&LibraryConfig> {
        self.libraries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    pub fn universal_binary(&self, name: &str) -> Result<&UniversalBinarySpec> {
        self.universal_binaries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, spec)| spec)
            .ok_or_else(|| NeedyError::UnknownUniversalBinary(name.to_string()).into())
    }
}

fn parse_libraries(value: Value) -> Result<Vec<(String, LibraryConfig)>> {
    let map = match value {
        Value::Object(map) => map,
        Value::Null => return Ok(Vec::new()),
        _ => bail!("`libraries` must be a mapping of names to configurations"),
    };
    let mut libraries = Vec::with_capacity(map.len());
    for (name, config) in map {
        let config: LibraryConfig =
            serde_json::from_value(config).map_err(|e| NeedyError::InvalidConfiguration {
                library: name.clone(),
                message: e.to_string(),
            })?;
        libraries.push((name, config));
    }
    Ok(libraries)
}

/// Build directory lookups available during final evaluation.
pub trait BuildDirectories: Sync {
    fn build_directory(&self, library: &str, target: &Target) -> Option<PathBuf>;
}

/// Which evaluation pass is running.
///
/// Discovery runs first with every build directory query answered by `None`;
/// the final pass may resolve build directories of other libraries.
#[derive(Clone, Copy)]
pub enum EvaluationStage<'a> {
    Discovery,
    Final(&'a dyn BuildDirectories),
}

impl EvaluationStage<'_> {
    pub fn build_directory(&self, library: &str, target: &Target) -> Option<PathBuf> {
        match self {
            EvaluationStage::Discovery => None,
            EvaluationStage::Final(directories) => directories.build_directory(library, target),
        }
    }
}

/// Turns a needs file into a [`Manifest`] for a target.
pub trait ManifestEvaluator: Send + Sync {
    /// Path of the needs file.
    fn path(&self) -> &Path;

    fn evaluate(&self, target: &Target, stage: EvaluationStage<'_>) -> Result<Manifest>;
}

/// Format of a needs file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Json,
    Yaml,
}

impl ManifestFormat {
    pub fn for_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(ManifestFormat::Json),
            Some("yaml") | Some("yml") => Ok(ManifestFormat::Yaml),
            _ => bail!("unsupported needs file format: {}", path.display()),
        }
    }
}

/// Needs file read verbatim, identical at every stage.
#[derive(Debug, Clone)]
pub struct FileManifest {
    path: PathBuf,
    manifest: Manifest,
}

impl FileManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let text = read_to_string(path)?;
        FileManifest::from_text(path, &text)
    }

    pub fn from_text(path: &Path, text: &str) -> Result<Self> {
        let manifest = match ManifestFormat::for_path(path)? {
            ManifestFormat::Json => Manifest::parse_json(text),
            ManifestFormat::Yaml => Manifest::parse_yaml(text),
        }
        .with_context(|| format!("failed to parse {}", path.display()))?;

        Ok(FileManifest {
            path: path.to_path_buf(),
            manifest,
        })
    }
}

impl ManifestEvaluator for FileManifest {
    fn path(&self) -> &Path {
        &self.path
    }

    fn evaluate(&self, _target: &Target, _stage: EvaluationStage<'_>) -> Result<Manifest> {
        Ok(self.manifest.clone())
    }
}
