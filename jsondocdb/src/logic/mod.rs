//! Evaluator for the JSON-encoded logic language used by index keypaths and
//! require predicates.
//!
//! An expression is either a literal (any non-object JSON value, evaluated to
//! itself) or an object with exactly one key naming an operator. The value of
//! that key is the operand list; a bare operand is a one-element list.
//! Operands are evaluated before the operator is applied.
//!
//! ```
//! use jsondocdb::logic::Expression;
//! use serde_json::json;
//!
//! let expr = Expression::parse(&json!({"<": [{"var": "n"}, 10]})).unwrap();
//! assert_eq!(expr.evaluate(&json!({"n": 3})), json!(true));
//! ```

mod coerce;

pub use coerce::{is_truthy, json_equals, loose_equals, strict_equals, to_number, to_text};

use crate::error::{DocDbError, Result};
use coerce::{less, less_or_equal, number_value};
use serde_json::{Map, Value};
use std::fmt;

/// Operators understood by the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Var,
    Missing,
    MissingSome,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Not,
    NotNot,
    And,
    Or,
    Ternary,
    If,
    In,
    Cat,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Min,
    Max,
    Merge,
    Count,
}

impl Operator {
    pub fn from_name(name: &str) -> Option<Self> {
        let op = match name {
            "var" => Operator::Var,
            "missing" => Operator::Missing,
            "missing_some" => Operator::MissingSome,
            "==" => Operator::Equal,
            "!=" => Operator::NotEqual,
            "===" => Operator::StrictEqual,
            "!==" => Operator::StrictNotEqual,
            "<" => Operator::Less,
            "<=" => Operator::LessOrEqual,
            ">" => Operator::Greater,
            ">=" => Operator::GreaterOrEqual,
            "!" => Operator::Not,
            "!!" => Operator::NotNot,
            "and" => Operator::And,
            "or" => Operator::Or,
            "?:" => Operator::Ternary,
            "if" => Operator::If,
            "in" => Operator::In,
            "cat" => Operator::Cat,
            "+" => Operator::Add,
            "-" => Operator::Subtract,
            "*" => Operator::Multiply,
            "/" => Operator::Divide,
            "%" => Operator::Modulo,
            "min" => Operator::Min,
            "max" => Operator::Max,
            "merge" => Operator::Merge,
            "count" => Operator::Count,
            _ => return None,
        };
        Some(op)
    }

    pub fn name(self) -> &'static str {
        match self {
            Operator::Var => "var",
            Operator::Missing => "missing",
            Operator::MissingSome => "missing_some",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::StrictEqual => "===",
            Operator::StrictNotEqual => "!==",
            Operator::Less => "<",
            Operator::LessOrEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::Not => "!",
            Operator::NotNot => "!!",
            Operator::And => "and",
            Operator::Or => "or",
            Operator::Ternary => "?:",
            Operator::If => "if",
            Operator::In => "in",
            Operator::Cat => "cat",
            Operator::Add => "+",
            Operator::Subtract => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::Modulo => "%",
            Operator::Min => "min",
            Operator::Max => "max",
            Operator::Merge => "merge",
            Operator::Count => "count",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An immutable parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    Apply { operator: Operator, args: Vec<Expression> },
}

impl Expression {
    /// Parse a JSON value into an expression tree.
    ///
    /// Fails with `UnknownOperator` when an object node does not have exactly
    /// one key, or when the key names no operator.
    pub fn parse(value: &Value) -> Result<Self> {
        let map = match value {
            Value::Object(map) => map,
            other => return Ok(Expression::Literal(other.clone())),
        };

        let mut entries = map.iter();
        let (name, operands) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(DocDbError::UnknownOperator(format!(
                    "expression node must have exactly one operator key, found {}",
                    map.len()
                )))
            }
        };

        let operator = Operator::from_name(name)
            .ok_or_else(|| DocDbError::UnknownOperator(name.clone()))?;

        let args = match operands {
            Value::Array(items) => items
                .iter()
                .map(Expression::parse)
                .collect::<Result<Vec<_>>>()?,
            other => vec![Expression::parse(other)?],
        };

        Ok(Expression::Apply { operator, args })
    }

    /// `{"var": path}`
    pub fn var(path: &str) -> Self {
        Expression::Apply {
            operator: Operator::Var,
            args: vec![Expression::Literal(Value::String(path.to_string()))],
        }
    }

    /// The JSON form of this expression.
    pub fn to_value(&self) -> Value {
        match self {
            Expression::Literal(value) => value.clone(),
            Expression::Apply { operator, args } => {
                let mut map = Map::new();
                map.insert(
                    operator.name().to_string(),
                    Value::Array(args.iter().map(Expression::to_value).collect()),
                );
                Value::Object(map)
            }
        }
    }

    /// Evaluate against a document. Never fails: lookups that miss yield their
    /// default, and operators given operands they cannot use yield `false` or
    /// null.
    pub fn evaluate(&self, data: &Value) -> Value {
        match self {
            Expression::Literal(value) => value.clone(),
            Expression::Apply { operator, args } => {
                let values: Vec<Value> = args.iter().map(|arg| arg.evaluate(data)).collect();
                apply(*operator, &values, data)
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

/// Parse and evaluate in one step. A null or empty-object expression is
/// vacuously `true`.
pub fn evaluate(expression: &Value, data: &Value) -> Result<Value> {
    if is_vacuous(expression) {
        return Ok(Value::Bool(true));
    }
    Ok(Expression::parse(expression)?.evaluate(data))
}

fn is_vacuous(expression: &Value) -> bool {
    match expression {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// A require predicate. An absent predicate accepts every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    expression: Option<Expression>,
}

impl Predicate {
    pub fn always() -> Self {
        Predicate { expression: None }
    }

    pub fn parse(source: Option<&Value>) -> Result<Self> {
        let expression = match source {
            Some(value) if !is_vacuous(value) => Some(Expression::parse(value)?),
            _ => None,
        };
        Ok(Predicate { expression })
    }

    pub fn is_vacuous(&self) -> bool {
        self.expression.is_none()
    }

    pub fn test(&self, data: &Value) -> bool {
        match &self.expression {
            Some(expression) => is_truthy(&expression.evaluate(data)),
            None => true,
        }
    }
}

/// Resolve a dot-separated path inside `data`. Object segments are keys,
/// array segments are decimal indexes; anything else is a miss.
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn path_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn lookup_name<'a>(data: &'a Value, name: &Value) -> Option<&'a Value> {
    path_name(name).and_then(|path| lookup(data, &path))
}

fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&Value::Null)
}

/// True when `relation` holds for every adjacent pair. Fewer than two
/// operands never hold.
fn chain(args: &[Value], relation: fn(&Value, &Value) -> bool) -> bool {
    args.len() >= 2 && args.windows(2).all(|pair| relation(&pair[0], &pair[1]))
}

fn numbers(args: &[Value]) -> Option<Vec<f64>> {
    args.iter().map(to_number).collect()
}

fn binary_arithmetic(args: &[Value], op: fn(f64, f64) -> Option<f64>) -> Value {
    match (to_number(arg(args, 0)), to_number(arg(args, 1))) {
        (Some(a), Some(b)) => op(a, b).map(number_value).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn missing(data: &Value, names: &[Value]) -> Vec<Value> {
    names
        .iter()
        .filter(|name| lookup_name(data, name).is_none())
        .cloned()
        .collect()
}

fn apply(operator: Operator, args: &[Value], data: &Value) -> Value {
    match operator {
        Operator::Var => match lookup_name(data, arg(args, 0)) {
            Some(found) => found.clone(),
            None => arg(args, 1).clone(),
        },

        Operator::Missing => {
            let names = match args.first() {
                Some(Value::Array(list)) => list.as_slice(),
                _ => args,
            };
            Value::Array(missing(data, names))
        }

        Operator::MissingSome => {
            let min_required = to_number(arg(args, 0)).unwrap_or(0.0);
            let names: &[Value] = match arg(args, 1) {
                Value::Array(list) => list,
                _ => &[],
            };
            if min_required < 1.0 {
                return Value::Array(Vec::new());
            }
            let mut found = 0.0;
            let mut absent = Vec::new();
            for name in names {
                if lookup_name(data, name).is_some() {
                    found += 1.0;
                    if found >= min_required {
                        return Value::Array(Vec::new());
                    }
                } else {
                    absent.push(name.clone());
                }
            }
            Value::Array(absent)
        }

        Operator::Equal => Value::Bool(loose_equals(arg(args, 0), arg(args, 1))),
        Operator::NotEqual => Value::Bool(!loose_equals(arg(args, 0), arg(args, 1))),
        Operator::StrictEqual => Value::Bool(strict_equals(arg(args, 0), arg(args, 1))),
        Operator::StrictNotEqual => Value::Bool(!strict_equals(arg(args, 0), arg(args, 1))),

        Operator::Less => Value::Bool(chain(args, less)),
        Operator::LessOrEqual => Value::Bool(chain(args, less_or_equal)),
        Operator::Greater => Value::Bool(chain(args, |a, b| less(b, a))),
        Operator::GreaterOrEqual => Value::Bool(chain(args, |a, b| less_or_equal(b, a))),

        Operator::Not => Value::Bool(!is_truthy(arg(args, 0))),
        Operator::NotNot => Value::Bool(is_truthy(arg(args, 0))),

        Operator::And => {
            let mut last = Value::Bool(true);
            for value in args {
                if !is_truthy(value) {
                    return value.clone();
                }
                last = value.clone();
            }
            last
        }

        Operator::Or => {
            let mut last = Value::Bool(false);
            for value in args {
                if is_truthy(value) {
                    return value.clone();
                }
                last = value.clone();
            }
            last
        }

        Operator::Ternary => {
            if is_truthy(arg(args, 0)) {
                arg(args, 1).clone()
            } else {
                arg(args, 2).clone()
            }
        }

        Operator::If => {
            for pair in args.chunks(2) {
                match pair {
                    [condition, then] => {
                        if is_truthy(condition) {
                            return then.clone();
                        }
                    }
                    [otherwise] => return otherwise.clone(),
                    _ => {}
                }
            }
            Value::Null
        }

        Operator::In => {
            let needle = arg(args, 0);
            let found = match arg(args, 1) {
                Value::String(haystack) => match needle {
                    Value::String(s) => haystack.contains(s.as_str()),
                    _ => false,
                },
                Value::Array(items) => items.iter().any(|item| json_equals(item, needle)),
                Value::Object(map) => match needle {
                    Value::String(key) => map.contains_key(key),
                    _ => false,
                },
                _ => false,
            };
            Value::Bool(found)
        }

        Operator::Cat => Value::String(args.iter().map(to_text).collect()),

        Operator::Add => match numbers(args) {
            Some(values) => number_value(values.iter().sum()),
            None => Value::Null,
        },

        Operator::Subtract => match args.len() {
            0 => Value::Null,
            1 => to_number(&args[0]).map(|a| number_value(-a)).unwrap_or(Value::Null),
            _ => binary_arithmetic(args, |a, b| Some(a - b)),
        },

        Operator::Multiply => match numbers(args) {
            Some(values) => number_value(values.iter().product()),
            None => Value::Null,
        },

        Operator::Divide => match args.len() {
            0 => Value::Null,
            1 => args[0].clone(),
            _ => binary_arithmetic(args, |a, b| if b == 0.0 { None } else { Some(a / b) }),
        },

        Operator::Modulo => {
            binary_arithmetic(args, |a, b| if b == 0.0 { None } else { Some(a % b) })
        }

        Operator::Min => match numbers(args) {
            Some(values) if !values.is_empty() => {
                number_value(values.into_iter().fold(f64::INFINITY, f64::min))
            }
            _ => Value::Null,
        },

        Operator::Max => match numbers(args) {
            Some(values) if !values.is_empty() => {
                number_value(values.into_iter().fold(f64::NEG_INFINITY, f64::max))
            }
            _ => Value::Null,
        },

        Operator::Merge => {
            let mut merged = Vec::new();
            for value in args {
                match value {
                    Value::Array(items) => merged.extend(items.iter().cloned()),
                    other => merged.push(other.clone()),
                }
            }
            Value::Array(merged)
        }

        Operator::Count => Value::from(args.iter().filter(|value| is_truthy(value)).count()),
    }
}
