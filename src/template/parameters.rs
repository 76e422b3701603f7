//! Parameter binding.
//!
//! Every parameter a template declares must end up with a value. Values come
//! from, in priority order: caller overrides, the stack's parameter file, and
//! the parameter's `Default`. A declared parameter with none of these is a
//! configuration error for that stack.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::warn;
use serde::Deserialize;
use serde_json::Value;

use super::TemplateDocument;
use crate::error::{Error, Result};

/// Where a bound value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingSource {
    Override,
    File,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BoundValue {
    value: String,
    source: BindingSource,
}

/// A parameter file: a JSON object `{ParamName: Value}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterFile {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl ParameterFile {
    /// Loads `path`. A missing file is `None`; anything but a JSON object is
    /// a configuration error.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let raw: BTreeMap<String, Value> = serde_json::from_str(&content).map_err(|e| Error::Config {
            message: format!("Parameter file {} is not a JSON object: {}", path.display(), e),
            hint: Some("Parameter files must look like {\"ParamName\": \"value\"}".to_string()),
        })?;
        let values = raw
            .into_iter()
            .map(|(k, v)| (k, scalar_to_string(&v)))
            .collect();
        Ok(Some(Self {
            path: path.to_path_buf(),
            values,
        }))
    }

    /// Builds a parameter file from values.
    pub fn from_values<I, K, V>(path: impl Into<PathBuf>, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            path: path.into(),
            values: values.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }
}

/// Stringifies a parameter value the way the orchestration service expects:
/// lists become comma-separated strings.
fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(scalar_to_string).collect::<Vec<_>>().join(","),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// One entry of a template's `Parameters` section. Other attributes
/// (`AllowedValues`, `NoEcho`, ...) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParameterDeclaration {
    #[serde(rename = "Type")]
    kind: Option<String>,
    default: Option<Value>,
}

impl ParameterDeclaration {
    /// Reads a declaration; a malformed one has no type and no default.
    fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    /// Whether the declared type resolves to a list of strings.
    fn is_list(&self) -> bool {
        self.kind
            .as_deref()
            .map(|t| t == "CommaDelimitedList" || t.starts_with("List<"))
            .unwrap_or(false)
    }
}

/// Concrete values for every parameter a template declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterBinding {
    values: BTreeMap<String, BoundValue>,
    list_parameters: BTreeSet<String>,
}

impl ParameterBinding {
    /// The bound string value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|b| b.value.as_str())
    }

    pub fn source(&self, name: &str) -> Option<BindingSource> {
        self.values.get(name).map(|b| b.source)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The value a `Ref` to `name` resolves to: a string, or a list of
    /// strings for list-typed parameters.
    pub fn resolve_ref(&self, name: &str) -> Option<Value> {
        let bound = self.values.get(name)?;
        if self.list_parameters.contains(name) {
            Some(Value::Array(
                bound
                    .value
                    .split(',')
                    .map(|s| Value::String(s.trim().to_string()))
                    .collect(),
            ))
        } else {
            Some(Value::String(bound.value.clone()))
        }
    }

    /// Explicitly supplied values (overrides and file), in key order. Values
    /// bound from `Default` are left for the service to apply.
    pub fn supplied(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .filter(|(_, b)| b.source != BindingSource::Default)
            .map(|(k, b)| (k.clone(), b.value.clone()))
            .collect()
    }
}

/// Binds every parameter declared by `template`.
///
/// Supplied names the template does not declare are warned about and
/// ignored.
pub fn create_parameter_binding(
    template: &TemplateDocument,
    overrides: &BTreeMap<String, String>,
    file: Option<&ParameterFile>,
) -> Result<ParameterBinding> {
    let declared: BTreeMap<String, ParameterDeclaration> = template
        .parameters()
        .iter()
        .map(|(name, value)| (name.clone(), ParameterDeclaration::from_value(value)))
        .collect();
    let mut binding = ParameterBinding::default();
    let mut needed: BTreeSet<&str> = declared.keys().map(String::as_str).collect();

    for (name, declaration) in &declared {
        if declaration.is_list() {
            binding.list_parameters.insert(name.clone());
        }
    }

    let file_values = file.map(|f| f.values().iter()).into_iter().flatten();
    let sources = overrides
        .iter()
        .map(|(k, v)| (k, v, BindingSource::Override))
        .chain(file_values.map(|(k, v)| (k, v, BindingSource::File)));

    for (name, value, source) in sources {
        if !declared.contains_key(name) {
            warn!(
                "Parameter {} is not declared by template {} and will be ignored",
                name,
                template.name()
            );
            continue;
        }
        if needed.remove(name.as_str()) {
            binding.values.insert(
                name.clone(),
                BoundValue {
                    value: value.clone(),
                    source,
                },
            );
        }
    }

    for name in needed {
        let default = declared.get(name).and_then(|d| d.default.as_ref());
        match default {
            Some(default) => {
                binding.values.insert(
                    name.to_string(),
                    BoundValue {
                        value: scalar_to_string(default),
                        source: BindingSource::Default,
                    },
                );
            }
            None => {
                return Err(Error::MissingParameter {
                    parameter: name.to_string(),
                    template: template.name().to_string(),
                })
            }
        }
    }
    Ok(binding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;
    use serde_json::json;
    use tempfile::TempDir;

    fn template() -> TemplateDocument {
        TemplateDocument::from_value(
            "app.yaml",
            json!({
                "Parameters": {
                    "A": {"Type": "String", "Default": "x"},
                    "Subnets": {"Type": "CommaDelimitedList", "Default": "s1, s2"},
                    "Port": {"Type": "Number", "Default": 443}
                }
            }),
        )
    }

    #[test]
    fn test_file_value_beats_default() {
        let file = ParameterFile::from_values("app.json", [("A", "y")]);
        let binding = create_parameter_binding(&template(), &BTreeMap::new(), Some(&file)).unwrap();
        assert_eq!(binding.get("A"), Some("y"));
        assert_eq!(binding.source("A"), Some(BindingSource::File));
    }

    #[test]
    fn test_default_used_without_file() {
        let binding = create_parameter_binding(&template(), &BTreeMap::new(), None).unwrap();
        assert_eq!(binding.get("A"), Some("x"));
        assert_eq!(binding.get("Port"), Some("443"));
        assert!(binding.supplied().is_empty());
    }

    #[test]
    fn test_override_beats_file() {
        let file = ParameterFile::from_values("app.json", [("A", "y")]);
        let overrides = BTreeMap::from([("A".to_string(), "z".to_string())]);
        let binding = create_parameter_binding(&template(), &overrides, Some(&file)).unwrap();
        assert_eq!(binding.get("A"), Some("z"));
        assert_eq!(binding.supplied(), vec![("A".to_string(), "z".to_string())]);
    }

    #[test]
    fn test_missing_value_without_default_is_configuration_error() {
        let doc = TemplateDocument::from_value("app.yaml", json!({"Parameters": {"Name": {"Type": "String"}}}));
        let err = create_parameter_binding(&doc, &BTreeMap::new(), None).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("Name"));
    }

    #[test]
    fn test_undeclared_supplied_name_warns() {
        testing_logger::setup();
        let file = ParameterFile::from_values("app.json", [("Unknown", "v")]);
        let binding = create_parameter_binding(&template(), &BTreeMap::new(), Some(&file)).unwrap();
        assert_eq!(binding.get("Unknown"), None);
        testing_logger::validate(|captured| {
            assert!(captured
                .iter()
                .any(|l| l.level == Level::Warn && l.body.contains("Unknown")));
        });
    }

    #[test]
    fn test_list_parameter_resolves_to_list() {
        let binding = create_parameter_binding(&template(), &BTreeMap::new(), None).unwrap();
        assert_eq!(binding.resolve_ref("Subnets"), Some(json!(["s1", "s2"])));
        assert_eq!(binding.resolve_ref("A"), Some(json!("x")));
        assert_eq!(binding.resolve_ref("AWS::Region"), None);
    }

    #[test]
    fn test_parameter_declaration_reads_type_and_default() {
        let declaration = ParameterDeclaration::from_value(&json!({
            "Type": "List<AWS::EC2::Subnet::Id>",
            "Default": "subnet-1,subnet-2",
            "Description": "Private subnets",
            "NoEcho": true
        }));
        assert!(declaration.is_list());
        assert_eq!(declaration.default, Some(json!("subnet-1,subnet-2")));

        let malformed = ParameterDeclaration::from_value(&json!({"Type": ["String"]}));
        assert_eq!(malformed, ParameterDeclaration::default());
        assert!(!malformed.is_list());
    }

    #[test]
    fn test_parameter_file_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app.json");
        fs::write(&path, r#"{"A": "y", "Port": 8080, "Zones": ["a", "b"]}"#).unwrap();
        let file = ParameterFile::load(&path).unwrap().unwrap();
        assert_eq!(file.values()["A"], "y");
        assert_eq!(file.values()["Port"], "8080");
        assert_eq!(file.values()["Zones"], "a,b");

        assert!(ParameterFile::load(&temp.path().join("missing.json")).unwrap().is_none());

        fs::write(&path, "[]").unwrap();
        assert!(ParameterFile::load(&path).unwrap_err().is_configuration());
    }
}
