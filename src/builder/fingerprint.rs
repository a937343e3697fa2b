//! Build markers for deciding whether a build is still valid.
//!
//! Every successful build writes `needy.status` into its build directory,
//! recording the inputs that produced it. A build is up to date only while
//! those recorded inputs equal the current ones.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::util::fs::{read_to_string, remove_path, write_string};
use crate::util::hash::Fingerprint;

/// File name of the marker inside a build directory.
pub const MARKER_FILE: &str = "needy.status";

/// Record of the inputs behind a build directory's contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMarker {
    /// Fingerprint of the resolved library configuration
    pub configuration: String,

    /// Identity of the source the build used
    pub source: String,

    /// Nanoseconds since the epoch when the build finished
    pub built_at: u64,
}

impl BuildMarker {
    /// A marker for a build finishing now.
    pub fn new(configuration: impl Into<String>, source: impl Into<String>) -> Self {
        let built_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        BuildMarker {
            configuration: configuration.into(),
            source: source.into(),
            built_at,
        }
    }

    /// Path of the marker in `build_directory`.
    pub fn path(build_directory: &Path) -> PathBuf {
        build_directory.join(MARKER_FILE)
    }

    /// Load the marker from `build_directory`, if present and readable.
    ///
    /// An unreadable marker is treated as absent so the build is redone.
    pub fn load(build_directory: &Path) -> Option<Self> {
        let path = Self::path(build_directory);
        if !path.is_file() {
            return None;
        }
        let parsed = read_to_string(&path).and_then(|text| {
            serde_json::from_str(&text)
                .with_context(|| format!("failed to parse {}", path.display()))
        });
        match parsed {
            Ok(marker) => Some(marker),
            Err(e) => {
                tracing::debug!("ignoring marker: {:#}", e);
                None
            }
        }
    }

    pub fn save(&self, build_directory: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).context("failed to serialize marker")?;
        write_string(&Self::path(build_directory), &text)
    }

    /// Remove the marker so the directory is no longer trusted.
    pub fn invalidate(build_directory: &Path) -> Result<()> {
        remove_path(&Self::path(build_directory))
    }

    /// Whether this marker was produced from the given inputs.
    pub fn matches(&self, configuration: &str, source: &str) -> bool {
        self.configuration == configuration && self.source == source
    }
}

/// Fingerprint a library's resolved configuration.
///
/// `top_level` is the library entry without its `project` section and
/// `project` the project section after conditionals were applied, so the
/// fingerprint differs between targets whose conditionals differ.
pub fn configuration_fingerprint(top_level: &Value, project: &Map<String, Value>) -> String {
    let mut fp = Fingerprint::new();
    fp.update_str(&canonical_json(top_level));
    fp.update_str(&canonical_json(&Value::Object(project.clone())));
    fp.finish()
}

/// Serialize with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_marker_roundtrip_and_invalidate() {
        let tmp = TempDir::new().unwrap();
        assert!(BuildMarker::load(tmp.path()).is_none());

        let marker = BuildMarker::new("abc", "git:repo@v1");
        marker.save(tmp.path()).unwrap();

        let loaded = BuildMarker::load(tmp.path()).unwrap();
        assert_eq!(loaded, marker);
        assert!(loaded.matches("abc", "git:repo@v1"));
        assert!(!loaded.matches("abc", "git:repo@v2"));

        BuildMarker::invalidate(tmp.path()).unwrap();
        assert!(BuildMarker::load(tmp.path()).is_none());
    }

    #[test]
    fn test_corrupt_marker_is_absent() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(MARKER_FILE), "{not json").unwrap();
        assert!(BuildMarker::load(tmp.path()).is_none());
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a = json!({"download": "u", "checksum": "c"});
        let b = json!({"checksum": "c", "download": "u"});
        let project = Map::new();
        assert_eq!(
            configuration_fingerprint(&a, &project),
            configuration_fingerprint(&b, &project)
        );

        let mut changed = Map::new();
        changed.insert("linkage".to_string(), json!("shared"));
        assert_ne!(
            configuration_fingerprint(&a, &project),
            configuration_fingerprint(&a, &changed)
        );
    }
}
