//! # Mapping Files
//!
//! A mapping file is an optional JSON object that overrides a naming
//! convention for one region and environment:
//!
//! - **`parameters`**: parameter-file name -> template-file name. Lets a
//!   parameter file drive a template whose name does not share its stem.
//! - **`templates`**: template-file name -> stack name. Lets the pipeline
//!   adopt stacks that already exist under a custom name.
//!
//! Shared (`all_envs`) templates read `<kind>.<environment>.json` from
//! `all_envs/mappings/`; environment templates read `<kind>.json` from their
//! own `mappings/` folder. A missing file is normal and only degrades lookups
//! to the naming convention, so it is logged as a warning, never an error.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::{Error, Result};
use crate::layout::{EnvScope, DEPLOYMENTS_DIR};

/// Which convention a mapping file overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    Parameters,
    Templates,
}

impl MappingKind {
    fn file_prefix(self) -> &'static str {
        match self {
            MappingKind::Parameters => "parameters",
            MappingKind::Templates => "templates",
        }
    }

    fn fallback_description(self) -> &'static str {
        match self {
            MappingKind::Parameters => "Default naming convention will be used to pair parameter files with templates",
            MappingKind::Templates => "Custom stack names will not be used and previously existing stacks will not be imported into the pipeline",
        }
    }
}

/// Location of the mapping file for `kind` in `region` / `scope`.
///
/// Shared templates need the target environment to pick their mapping file;
/// without one there is no applicable file and `None` is returned.
pub fn mapping_file_path(
    repo_root: &Path,
    kind: MappingKind,
    region: &str,
    scope: &EnvScope,
    environment: Option<&str>,
) -> Option<PathBuf> {
    let region_dir = repo_root.join(DEPLOYMENTS_DIR).join(region);
    match scope {
        EnvScope::AllEnvs => environment.map(|env| {
            region_dir
                .join(EnvScope::AllEnvs.as_str())
                .join("mappings")
                .join(format!("{}.{}.json", kind.file_prefix(), env))
        }),
        EnvScope::Env(env) => Some(
            region_dir
                .join(env)
                .join("mappings")
                .join(format!("{}.json", kind.file_prefix())),
        ),
    }
}

/// An immutable key -> value table loaded from a mapping file.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingTable {
    kind: MappingKind,
    source: Option<PathBuf>,
    entries: Option<BTreeMap<String, String>>,
}

impl MappingTable {
    /// Loads the mapping table for `kind` applicable to files in
    /// `region` / `scope`.
    pub fn load(
        repo_root: &Path,
        kind: MappingKind,
        region: &str,
        scope: &EnvScope,
        environment: Option<&str>,
    ) -> Result<Self> {
        match mapping_file_path(repo_root, kind, region, scope, environment) {
            Some(path) => Self::from_file(kind, &path),
            None => {
                info!(
                    "No target environment for shared {} mapping in {}. {}.",
                    kind.file_prefix(),
                    region,
                    kind.fallback_description()
                );
                Ok(Self::absent(kind))
            }
        }
    }

    /// Loads a mapping table from an explicit file. A missing file yields an
    /// absent table; unreadable JSON is an error.
    pub fn from_file(kind: MappingKind, path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("File {} not found. {}.", path.display(), kind.fallback_description());
                return Ok(Self::absent(kind));
            }
            Err(e) => return Err(e.into()),
        };
        let raw: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&content).map_err(|e| Error::Config {
                message: format!("Mapping file {} is not a JSON object: {}", path.display(), e),
                hint: Some("Mapping files must look like {\"key\": \"value\"}".to_string()),
            })?;
        let entries = raw
            .into_iter()
            .filter_map(|(k, v)| match v {
                serde_json::Value::String(s) => Some((k, s)),
                other => {
                    warn!(
                        "Mapping {} in {} has non-string value {} and will be ignored",
                        k,
                        path.display(),
                        other
                    );
                    None
                }
            })
            .collect();
        Ok(Self {
            kind,
            source: Some(path.to_path_buf()),
            entries: Some(entries),
        })
    }

    /// A table representing a missing mapping file.
    pub fn absent(kind: MappingKind) -> Self {
        Self {
            kind,
            source: None,
            entries: None,
        }
    }

    /// Builds a table directly from entries.
    pub fn from_entries<I, K, V>(kind: MappingKind, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            kind,
            source: None,
            entries: Some(entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
        }
    }

    pub fn kind(&self) -> MappingKind {
        self.kind
    }

    /// Whether a mapping file was found.
    pub fn is_present(&self) -> bool {
        self.entries.is_some()
    }

    /// Path the table was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Looks up `key`. A missing key in a present table is logged and falls
    /// back to the convention (`None`).
    pub fn get(&self, key: &str) -> Option<&str> {
        let entries = self.entries.as_ref()?;
        match entries.get(key) {
            Some(value) => Some(value.as_str()),
            None => {
                match self.kind {
                    MappingKind::Parameters => info!(
                        "Key ({}) not found in mapping file. Default parameter file pairing will be used.",
                        key
                    ),
                    MappingKind::Templates => info!(
                        "Key ({}) not found in mapping file. Default stack naming convention will be used.",
                        key
                    ),
                }
                None
            }
        }
    }

    /// Reverse lookup: the first key (in key order) mapped to `value`.
    pub fn key_for_value(&self, value: &str) -> Option<&str> {
        self.entries
            .as_ref()?
            .iter()
            .find(|(_, v)| v.as_str() == value)
            .map(|(k, _)| k.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_mapping_file_path_all_envs() {
        let path = mapping_file_path(
            Path::new("/repo"),
            MappingKind::Parameters,
            "us-east-1",
            &EnvScope::AllEnvs,
            Some("dev"),
        )
        .unwrap();
        assert_eq!(
            path,
            Path::new("/repo/deployments/us-east-1/all_envs/mappings/parameters.dev.json")
        );
    }

    #[test]
    fn test_mapping_file_path_env() {
        let path = mapping_file_path(
            Path::new("/repo"),
            MappingKind::Templates,
            "us-east-1",
            &EnvScope::Env("prod".into()),
            Some("dev"),
        )
        .unwrap();
        assert_eq!(path, Path::new("/repo/deployments/us-east-1/prod/mappings/templates.json"));
    }

    #[test]
    fn test_mapping_file_path_all_envs_without_environment() {
        assert!(mapping_file_path(
            Path::new("/repo"),
            MappingKind::Templates,
            "us-east-1",
            &EnvScope::AllEnvs,
            None
        )
        .is_none());
    }

    #[test]
    fn test_load_present_table() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "deployments/us-east-1/all_envs/mappings/templates.dev.json",
            r#"{"vpc.yaml": "existing-vpc-stack", "bad": 3}"#,
        );
        let table = MappingTable::load(
            temp.path(),
            MappingKind::Templates,
            "us-east-1",
            &EnvScope::AllEnvs,
            Some("dev"),
        )
        .unwrap();
        assert!(table.is_present());
        assert_eq!(table.get("vpc.yaml"), Some("existing-vpc-stack"));
        assert_eq!(table.get("bad"), None);
        assert_eq!(table.get("other.yaml"), None);
    }

    #[test]
    fn test_load_missing_table_warns() {
        testing_logger::setup();
        let temp = TempDir::new().unwrap();
        let table = MappingTable::load(
            temp.path(),
            MappingKind::Parameters,
            "us-east-1",
            &EnvScope::Env("dev".into()),
            Some("dev"),
        )
        .unwrap();
        assert!(!table.is_present());
        assert_eq!(table.get("anything.json"), None);
        testing_logger::validate(|captured| {
            assert!(captured
                .iter()
                .any(|l| l.level == Level::Warn && l.body.contains("not found")));
        });
    }

    #[test]
    fn test_missing_key_logs_convention_fallback() {
        testing_logger::setup();
        let table = MappingTable::from_entries(MappingKind::Templates, [("a.yaml", "stack-a")]);
        assert_eq!(table.get("fake_file_name"), None);
        testing_logger::validate(|captured| {
            assert!(captured
                .iter()
                .any(|l| l.body.contains("Default stack naming")));
        });
    }

    #[test]
    fn test_invalid_json_is_error() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "m.json", "[1, 2]");
        let err = MappingTable::from_file(MappingKind::Parameters, &temp.path().join("m.json")).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_key_for_value() {
        let table = MappingTable::from_entries(
            MappingKind::Parameters,
            [("shared.json", "app.yaml"), ("net.json", "vpc.yaml")],
        );
        assert_eq!(table.key_for_value("vpc.yaml"), Some("net.json"));
        assert_eq!(table.key_for_value("missing.yaml"), None);
        assert_eq!(MappingTable::absent(MappingKind::Parameters).key_for_value("vpc.yaml"), None);
    }
}
