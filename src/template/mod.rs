//! # Template Evaluator
//!
//! A partial interpreter for the intrinsic functions embedded in
//! CloudFormation-style templates. It exists to feed offline policy checks a
//! best-effort resolved document; the template sent to the orchestration
//! service is never rewritten.
//!
//! ## Key Components
//!
//! - **[`TemplateDocument`]**: a parsed template. JSON and YAML sources both
//!   normalize to the long form, so `!Ref Name` and `{"Ref": "Name"}` are the
//!   same node.
//! - **[`parameters`]**: builds the [`ParameterBinding`] for a template from
//!   caller overrides, a parameter file and declared defaults.
//! - **[`intrinsic`]**: the closed set of supported functions and their
//!   semantics.
//! - **[`evaluator`]**: finds every intrinsic node and replaces the ones that
//!   resolve with their literal value.

pub mod evaluator;
pub mod intrinsic;
pub mod parameters;

use std::fs;
use std::path::Path;

use serde_json::{Map, Number, Value};
use serde_yaml::value::TaggedValue;

use crate::error::{Error, Result};

pub use evaluator::{EvaluationReport, EvaluationStrategy, Evaluator};
pub use parameters::{create_parameter_binding, ParameterBinding, ParameterFile};

/// Top-level section declaring template parameters.
pub const PARAMETERS_SECTION: &str = "Parameters";
/// Top-level section holding named boolean conditions.
pub const CONDITIONS_SECTION: &str = "Conditions";
/// Top-level section holding `Fn::FindInMap` tables.
pub const MAPPINGS_SECTION: &str = "Mappings";
/// Top-level section declaring resources.
pub const RESOURCES_SECTION: &str = "Resources";

/// Source syntax of a template file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFormat {
    Json,
    Yaml,
}

impl TemplateFormat {
    /// Picks the parser from the file suffix. `.template` files are YAML,
    /// which also accepts JSON content.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") | Some("jsn") => TemplateFormat::Json,
            _ => TemplateFormat::Yaml,
        }
    }
}

/// A parsed template in long-form JSON representation.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateDocument {
    name: String,
    root: Value,
}

impl TemplateDocument {
    /// Reads and parses the template at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&path.display().to_string(), &content, TemplateFormat::from_path(path))
    }

    /// Parses template text. `name` is only used in messages.
    pub fn parse(name: &str, content: &str, format: TemplateFormat) -> Result<Self> {
        let root = match format {
            TemplateFormat::Json => serde_json::from_str(content).map_err(|e| Error::TemplateParse {
                path: name.to_string(),
                message: e.to_string(),
            })?,
            TemplateFormat::Yaml => {
                let yaml: serde_yaml::Value =
                    serde_yaml::from_str(content).map_err(|e| Error::TemplateParse {
                        path: name.to_string(),
                        message: e.to_string(),
                    })?;
                yaml_to_json(yaml)
            }
        };
        if !root.is_object() {
            return Err(Error::TemplateParse {
                path: name.to_string(),
                message: "template root must be a mapping".to_string(),
            });
        }
        Ok(Self {
            name: name.to_string(),
            root,
        })
    }

    /// Wraps an already-built tree.
    pub fn from_value(name: &str, root: Value) -> Self {
        Self {
            name: name.to_string(),
            root,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Value {
        &mut self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    /// A top-level section, if present.
    pub fn section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.root.get(name).and_then(Value::as_object)
    }

    /// The declared parameters, empty when the template has none.
    pub fn parameters(&self) -> Map<String, Value> {
        self.section(PARAMETERS_SECTION).cloned().unwrap_or_default()
    }

    /// Pretty JSON rendering of the current tree.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.root)?)
    }
}

/// Converts a YAML tree to JSON, expanding short-form intrinsic tags.
pub fn yaml_to_json(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => yaml_number(&n),
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => Value::Array(items.into_iter().map(yaml_to_json).collect()),
        serde_yaml::Value::Mapping(mapping) => {
            let mut map = Map::new();
            for (k, v) in mapping {
                map.insert(yaml_key(k), yaml_to_json(v));
            }
            Value::Object(map)
        }
        serde_yaml::Value::Tagged(tagged) => expand_tag(*tagged),
    }
}

fn yaml_number(n: &serde_yaml::Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::Number(i.into())
    } else if let Some(u) = n.as_u64() {
        Value::Number(u.into())
    } else {
        n.as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn yaml_key(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// `!Ref x` -> `{"Ref": x}`, `!Condition x` -> `{"Condition": x}`,
/// `!GetAtt a.b` -> `{"Fn::GetAtt": ["a", "b"]}`, `!Tag x` -> `{"Fn::Tag": x}`.
fn expand_tag(tagged: TaggedValue) -> Value {
    let tag = tagged.tag.to_string();
    let name = tag.trim_start_matches('!');
    let operand = yaml_to_json(tagged.value);
    let (key, operand) = match name {
        "Ref" | "Condition" => (name.to_string(), operand),
        "GetAtt" => {
            let operand = match operand {
                Value::String(s) => Value::Array(
                    s.splitn(2, '.').map(|p| Value::String(p.to_string())).collect(),
                ),
                other => other,
            };
            ("Fn::GetAtt".to_string(), operand)
        }
        other => (format!("Fn::{}", other), operand),
    };
    let mut map = Map::new();
    map.insert(key, operand);
    Value::Object(map)
}
