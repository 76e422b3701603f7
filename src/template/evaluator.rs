//! Depth-ordered evaluation of intrinsic nodes.
//!
//! Every intrinsic node in the tree is located up front and the worklist is
//! sorted by descending depth, so nested calls are resolved before the calls
//! that contain them. With [`EvaluationStrategy::SinglePass`] the worklist is
//! walked once: a node that depends on a sibling at the same or a shallower
//! depth (a `Condition` that is itself computed, say) stays unresolved.
//! [`EvaluationStrategy::Fixpoint`] repeats passes over the remaining nodes
//! until one resolves nothing.

use log::debug;
use serde_json::Value;

use super::intrinsic::{as_intrinsic, Call, Context};
use super::parameters::ParameterBinding;
use super::{TemplateDocument, CONDITIONS_SECTION, MAPPINGS_SECTION};

/// How many passes the evaluator makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvaluationStrategy {
    /// One deepest-first pass.
    #[default]
    SinglePass,
    /// Deepest-first passes until nothing more resolves.
    Fixpoint,
}

/// Counts from one evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationReport {
    pub resolved: usize,
    pub unresolved: usize,
    pub passes: usize,
}

/// A supported intrinsic node found in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// JSON pointer to the node.
    pub pointer: String,
    pub depth: usize,
}

/// Finds every supported intrinsic node, deepest first. Nodes at equal
/// depth keep document order.
pub fn intrinsic_locations(root: &Value) -> Vec<Location> {
    let mut found = Vec::new();
    collect(root, &mut Vec::new(), &mut found);
    found.sort_by(|a, b| b.depth.cmp(&a.depth));
    found
}

fn collect(value: &Value, path: &mut Vec<String>, found: &mut Vec<Location>) {
    if as_intrinsic(value).is_some() {
        found.push(Location {
            pointer: to_pointer(path),
            depth: path.len(),
        });
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                path.push(key.clone());
                collect(child, path, found);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                path.push(index.to_string());
                collect(child, path, found);
                path.pop();
            }
        }
        _ => {}
    }
}

fn to_pointer(path: &[String]) -> String {
    path.iter()
        .map(|segment| format!("/{}", segment.replace('~', "~0").replace('/', "~1")))
        .collect()
}

/// Resolves intrinsic nodes against a parameter binding.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    binding: &'a ParameterBinding,
    strategy: EvaluationStrategy,
}

impl<'a> Evaluator<'a> {
    pub fn new(binding: &'a ParameterBinding) -> Self {
        Self {
            binding,
            strategy: EvaluationStrategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: EvaluationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Replaces every node that resolves with its literal value.
    pub fn resolve(&self, document: &mut TemplateDocument) -> EvaluationReport {
        let root = document.root_mut();
        let mut report = EvaluationReport::default();
        let mut locations = intrinsic_locations(root);
        let max_passes = match self.strategy {
            EvaluationStrategy::SinglePass => 1,
            EvaluationStrategy::Fixpoint => locations.len().max(1),
        };

        while !locations.is_empty() && report.passes < max_passes {
            let resolved = self.pass(root, &locations);
            report.passes += 1;
            report.resolved += resolved;
            locations = intrinsic_locations(root);
            if resolved == 0 {
                break;
            }
        }
        report.unresolved = locations.len();
        debug!(
            "Evaluated {}: {} resolved, {} unresolved in {} pass(es)",
            document.name(),
            report.resolved,
            report.unresolved,
            report.passes
        );
        report
    }

    fn pass(&self, root: &mut Value, locations: &[Location]) -> usize {
        let mut resolved = 0;
        for location in locations {
            let replacement = self.evaluate_at(root, &location.pointer);
            if let (Some(value), Some(slot)) = (replacement, root.pointer_mut(&location.pointer)) {
                *slot = value;
                resolved += 1;
            }
        }
        resolved
    }

    fn evaluate_at(&self, root: &Value, pointer: &str) -> Option<Value> {
        let (function, operand) = as_intrinsic(root.pointer(pointer)?)?;
        let ctx = Context {
            binding: self.binding,
            mappings: root.get(MAPPINGS_SECTION).and_then(Value::as_object),
            conditions: root.get(CONDITIONS_SECTION).and_then(Value::as_object),
        };
        Call::decode(function, operand)?.evaluate(&ctx)
    }
}
