//! Supported intrinsic functions.
//!
//! An intrinsic node is a single-key mapping whose key is one of the
//! discriminators in [`Intrinsic`]. Before acting, a node's operand is
//! decoded into a typed [`Call`]; a node whose operand does not have the
//! expected shape, or refers to something not yet resolved, is left as is.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};

use super::parameters::ParameterBinding;

/// The closed set of functions the evaluator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    Ref,
    Condition,
    Join,
    Split,
    Select,
    FindInMap,
    Base64,
    And,
    Or,
    Not,
    Equals,
    If,
}

impl Intrinsic {
    pub const ALL: [Intrinsic; 12] = [
        Intrinsic::Ref,
        Intrinsic::Condition,
        Intrinsic::Join,
        Intrinsic::Split,
        Intrinsic::Select,
        Intrinsic::FindInMap,
        Intrinsic::Base64,
        Intrinsic::And,
        Intrinsic::Or,
        Intrinsic::Not,
        Intrinsic::Equals,
        Intrinsic::If,
    ];

    /// The mapping key that marks the node.
    pub fn key(self) -> &'static str {
        match self {
            Intrinsic::Ref => "Ref",
            Intrinsic::Condition => "Condition",
            Intrinsic::Join => "Fn::Join",
            Intrinsic::Split => "Fn::Split",
            Intrinsic::Select => "Fn::Select",
            Intrinsic::FindInMap => "Fn::FindInMap",
            Intrinsic::Base64 => "Fn::Base64",
            Intrinsic::And => "Fn::And",
            Intrinsic::Or => "Fn::Or",
            Intrinsic::Not => "Fn::Not",
            Intrinsic::Equals => "Fn::Equals",
            Intrinsic::If => "Fn::If",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|i| i.key() == key)
    }
}

/// Returns the function and operand if `node` is an intrinsic call.
pub fn as_intrinsic(node: &Value) -> Option<(Intrinsic, &Value)> {
    let map = node.as_object()?;
    if map.len() != 1 {
        return None;
    }
    let (key, operand) = map.iter().next()?;
    Some((Intrinsic::from_key(key)?, operand))
}

/// Whether `value` still contains an intrinsic node of any kind, supported
/// or not (`Fn::Sub`, `Fn::GetAtt`, ...).
pub fn is_unresolved(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            let call_key = map.len() == 1
                && map
                    .keys()
                    .next()
                    .map(|k| k == "Ref" || k == "Condition" || k.starts_with("Fn::"))
                    .unwrap_or(false);
            call_key || map.values().any(is_unresolved)
        }
        Value::Array(items) => items.iter().any(is_unresolved),
        _ => false,
    }
}

/// Values an intrinsic may consult while evaluating.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    pub binding: &'a ParameterBinding,
    pub mappings: Option<&'a Map<String, Value>>,
    pub conditions: Option<&'a Map<String, Value>>,
}

impl<'a> Context<'a> {
    fn condition(&self, name: &str) -> Option<bool> {
        self.conditions?.get(name)?.as_bool()
    }
}

/// A decoded call with type-checked operands.
#[derive(Debug, Clone, PartialEq)]
pub enum Call<'a> {
    Ref(&'a str),
    Condition(&'a str),
    Join { delimiter: &'a str, items: Vec<String> },
    Split { delimiter: &'a str, source: &'a str },
    Select { index: usize, items: &'a [Value] },
    FindInMap { map: &'a str, top: &'a str, second: &'a str },
    Base64(&'a str),
    And(Vec<bool>),
    Or(Vec<bool>),
    Not(bool),
    Equals(&'a Value, &'a Value),
    If { condition: IfCondition<'a>, when_true: &'a Value, when_false: &'a Value },
}

/// The selector of `Fn::If`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfCondition<'a> {
    Named(&'a str),
    Literal(bool),
}

impl<'a> Call<'a> {
    /// Type-checks `operand` for `function`. `None` leaves the node
    /// unresolved.
    pub fn decode(function: Intrinsic, operand: &'a Value) -> Option<Self> {
        match function {
            Intrinsic::Ref => operand.as_str().map(Call::Ref),
            Intrinsic::Condition => operand.as_str().map(Call::Condition),
            Intrinsic::Join => {
                let [delimiter, items] = operands::<2>(operand)?;
                let items = items
                    .as_array()?
                    .iter()
                    .map(scalar_string)
                    .collect::<Option<Vec<_>>>()?;
                Some(Call::Join {
                    delimiter: delimiter.as_str()?,
                    items,
                })
            }
            Intrinsic::Split => {
                let [delimiter, source] = operands::<2>(operand)?;
                let delimiter = delimiter.as_str().filter(|d| !d.is_empty())?;
                Some(Call::Split {
                    delimiter,
                    source: source.as_str()?,
                })
            }
            Intrinsic::Select => {
                let [index, items] = operands::<2>(operand)?;
                let index = match index {
                    Value::Number(n) => usize::try_from(n.as_u64()?).ok()?,
                    Value::String(s) => s.trim().parse().ok()?,
                    _ => return None,
                };
                Some(Call::Select {
                    index,
                    items: items.as_array()?.as_slice(),
                })
            }
            Intrinsic::FindInMap => {
                let [map, top, second] = operands::<3>(operand)?;
                Some(Call::FindInMap {
                    map: map.as_str()?,
                    top: top.as_str()?,
                    second: second.as_str()?,
                })
            }
            Intrinsic::Base64 => operand.as_str().map(Call::Base64),
            Intrinsic::And => booleans(operand, 2..=10).map(Call::And),
            Intrinsic::Or => booleans(operand, 2..=10).map(Call::Or),
            Intrinsic::Not => booleans(operand, 1..=1).and_then(|b| b.first().copied()).map(Call::Not),
            Intrinsic::Equals => {
                let [left, right] = operands::<2>(operand)?;
                if is_unresolved(left) || is_unresolved(right) || !same_type(left, right) {
                    return None;
                }
                Some(Call::Equals(left, right))
            }
            Intrinsic::If => {
                let [condition, when_true, when_false] = operands::<3>(operand)?;
                let condition = match condition {
                    Value::String(name) => IfCondition::Named(name),
                    Value::Bool(b) => IfCondition::Literal(*b),
                    _ => return None,
                };
                Some(Call::If {
                    condition,
                    when_true,
                    when_false,
                })
            }
        }
    }

    /// Evaluates the call. `None` leaves the node unresolved.
    pub fn evaluate(&self, ctx: &Context<'_>) -> Option<Value> {
        match self {
            Call::Ref(name) => ctx.binding.resolve_ref(name),
            Call::Condition(name) => ctx.condition(name).map(Value::Bool),
            Call::Join { delimiter, items } => Some(Value::String(items.join(*delimiter))),
            Call::Split { delimiter, source } => Some(Value::Array(
                source
                    .split(*delimiter)
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
            )),
            Call::Select { index, items } => {
                let item = items.get(*index)?;
                (!is_unresolved(item)).then(|| item.clone())
            }
            Call::FindInMap { map, top, second } => {
                let value = ctx.mappings?.get(*map)?.get(*top)?.get(*second)?;
                Some(value.clone())
            }
            Call::Base64(text) => Some(Value::String(STANDARD.encode(text.as_bytes()))),
            Call::And(values) => Some(Value::Bool(values.iter().all(|b| *b))),
            Call::Or(values) => Some(Value::Bool(values.iter().any(|b| *b))),
            Call::Not(value) => Some(Value::Bool(!value)),
            Call::Equals(left, right) => Some(Value::Bool(left == right)),
            Call::If {
                condition,
                when_true,
                when_false,
            } => {
                let chosen = match condition {
                    IfCondition::Named(name) => ctx.condition(name)?,
                    IfCondition::Literal(b) => *b,
                };
                let value = if chosen { when_true } else { when_false };
                Some((*value).clone())
            }
        }
    }
}

fn operands<const N: usize>(operand: &Value) -> Option<[&Value; N]> {
    let items = operand.as_array()?;
    if items.len() != N {
        return None;
    }
    let refs: Vec<&Value> = items.iter().collect();
    refs.try_into().ok()
}

fn booleans(operand: &Value, count: std::ops::RangeInclusive<usize>) -> Option<Vec<bool>> {
    let items = operand.as_array()?;
    if !count.contains(&items.len()) {
        return None;
    }
    items.iter().map(Value::as_bool).collect()
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn same_type(left: &Value, right: &Value) -> bool {
    std::mem::discriminant(left) == std::mem::discriminant(right)
}
