// ABOUTME: Runtime value types, map keys, display notation, and JSON bridging

use crate::ast::{CombKind, Node, PathSeg, Pattern, WhereOp};
use crate::builtins::Builtin;
use crate::env::Env;
use crate::error::LispError;
use chrono::NaiveDate;
use regex::Regex;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Map keys form a restricted, totally ordered subset of values so that maps
/// stay deterministic to print and serialize.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    Keyword(String),
}

impl Key {
    pub fn keyword(name: &str) -> Key {
        Key::Keyword(name.to_string())
    }

    /// Which values may serve as map keys. Whole floats collapse to ints so
    /// `group-by` over a numeric field stays usable.
    pub fn from_value(v: &Value) -> Result<Key, LispError> {
        match v {
            Value::Nil => Ok(Key::Nil),
            Value::Bool(b) => Ok(Key::Bool(*b)),
            Value::Int(n) => Ok(Key::Int(*n)),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(Key::Int(*f as i64)),
            Value::Str(s) => Ok(Key::Str(s.clone())),
            Value::Keyword(k) => Ok(Key::Keyword(k.clone())),
            other => Err(LispError::type_error(
                "map key",
                "nil, bool, int, string or keyword",
                other.type_name(),
            )),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Nil => Value::Nil,
            Key::Bool(b) => Value::Bool(*b),
            Key::Int(n) => Value::Int(*n),
            Key::Str(s) => Value::Str(s.clone()),
            Key::Keyword(k) => Value::Keyword(k.clone()),
        }
    }

    /// The keyword/string twin of this key, if it has one.
    pub fn flexed(&self) -> Option<Key> {
        match self {
            Key::Keyword(k) => Some(Key::Str(k.clone())),
            Key::Str(s) => Some(Key::Keyword(s.clone())),
            _ => None,
        }
    }

    /// Host-facing string form (keywords lose their colon, like JSON keys).
    pub fn as_plain_string(&self) -> String {
        match self {
            Key::Nil => "nil".to_string(),
            Key::Bool(b) => b.to_string(),
            Key::Int(n) => n.to_string(),
            Key::Str(s) => s.clone(),
            Key::Keyword(k) => k.clone(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

/// A user function: parameters, body, and a snapshot of the lexical
/// environment and turn history at creation time. The snapshot is immutable
/// and shared read-only, so cloning a closure is cheap.
#[derive(Debug)]
pub struct Closure {
    pub name: Option<String>,
    pub params: Vec<Pattern>,
    pub rest: Option<Pattern>,
    pub body: Vec<Node>,
    pub env: Env,
    pub turn_history: Arc<Vec<Value>>,
    pub docstring: Option<String>,
    pub return_type: Option<String>,
}

/// Runtime predicate values produced by `where` and the combinators.
/// They stay first-class so `filter`/`remove`/`find` can apply them.
#[derive(Debug, Clone)]
pub enum Pred {
    Where {
        path: Vec<PathSeg>,
        op: WhereOp,
        operand: Option<Value>,
    },
    Comb {
        kind: CombKind,
        preds: Vec<Value>,
    },
}

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Keyword(String),
    Vector(Vec<Value>),
    Map(BTreeMap<Key, Value>),
    /// Insertion-ordered, duplicate-free.
    Set(Vec<Value>),
    Closure(Arc<Closure>),
    Builtin(&'static Builtin),
    Pred(Arc<Pred>),
    /// `(juxt f g ...)` — applies each member and collects a vector.
    Juxt(Arc<Vec<Value>>),
    /// The `#'name` marker `def` evaluates to.
    Var(String),
    Date(NaiveDate),
    Regex(Regex),
}

impl Value {
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Keyword(_) => "keyword",
            Value::Vector(_) => "vector",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Closure(_) => "fn",
            Value::Builtin(_) => "fn",
            Value::Pred(_) => "fn",
            Value::Juxt(_) => "fn",
            Value::Var(_) => "var",
            Value::Date(_) => "date",
            Value::Regex(_) => "regex",
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Closure(_)
                | Value::Builtin(_)
                | Value::Pred(_)
                | Value::Juxt(_)
                | Value::Keyword(_)
        )
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Rough, conservative heap footprint for the allocation gauge.
    pub fn approx_size(&self) -> usize {
        match self {
            Value::Nil | Value::Bool(_) | Value::Int(_) | Value::Float(_) => 16,
            Value::Str(s) | Value::Keyword(s) => 24 + s.len(),
            Value::Vector(items) | Value::Set(items) => {
                24 + items.iter().map(Value::approx_size).sum::<usize>()
            }
            Value::Map(m) => {
                24 + m
                    .iter()
                    .map(|(k, v)| k.as_plain_string().len() + 24 + v.approx_size())
                    .sum::<usize>()
            }
            Value::Closure(_) => 256,
            Value::Builtin(_) | Value::Var(_) | Value::Pred(_) | Value::Juxt(_) => 64,
            Value::Date(_) => 16,
            Value::Regex(r) => 64 + r.as_str().len(),
        }
    }

    /// Round every float in the value to `precision` decimals. Applied to the
    /// returned value when the caller sets `float_precision`.
    pub fn round_floats(&self, precision: u32) -> Value {
        let factor = 10f64.powi(precision as i32);
        match self {
            Value::Float(f) => Value::Float((f * factor).round() / factor),
            Value::Vector(items) => {
                Value::Vector(items.iter().map(|v| v.round_floats(precision)).collect())
            }
            Value::Set(items) => {
                Value::Set(items.iter().map(|v| v.round_floats(precision)).collect())
            }
            Value::Map(m) => Value::Map(
                m.iter()
                    .map(|(k, v)| (k.clone(), v.round_floats(precision)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// Flexible map lookup: a keyword key falls back to its string twin and vice
/// versa, with the literal key taking precedence.
pub fn map_lookup<'a>(map: &'a BTreeMap<Key, Value>, key: &Key) -> Option<&'a Value> {
    if let Some(v) = map.get(key) {
        return Some(v);
    }
    key.flexed().and_then(|twin| map.get(&twin))
}

/// Like [`map_lookup`] but reports whether the key (or its twin) is present,
/// so callers can tell an explicit nil from an absent key.
pub fn map_contains(map: &BTreeMap<Key, Value>, key: &Key) -> bool {
    map.contains_key(key) || key.flexed().map(|t| map.contains_key(&t)).unwrap_or(false)
}

// ===== Equality =====
//
// Numbers compare numerically across Int/Float; keyword/string stay distinct
// (the where operators add their own coercion on top of this).

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Keyword(a), Value::Keyword(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => {
                a.len() == b.len() && a.iter().all(|x| b.contains(x))
            }
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
            (Value::Pred(a), Value::Pred(b)) => Arc::ptr_eq(a, b),
            (Value::Juxt(a), Value::Juxt(b)) => Arc::ptr_eq(a, b),
            (Value::Var(a), Value::Var(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

/// Total comparison for `sort`/`sort-by`/`min-by`/`max-by`. Mixed types that
/// have no sensible order produce a `type_error`.
pub fn compare(a: &Value, b: &Value) -> Result<std::cmp::Ordering, LispError> {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Nil, Value::Nil) => Ok(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Ok(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::Keyword(x), Value::Keyword(y)) => Ok(x.cmp(y)),
        (Value::Date(x), Value::Date(y)) => Ok(x.cmp(y)),
        (Value::Vector(x), Value::Vector(y)) => {
            for (xa, ya) in x.iter().zip(y.iter()) {
                match compare(xa, ya)? {
                    Ordering::Equal => continue,
                    ord => return Ok(ord),
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => x
                .partial_cmp(&y)
                .ok_or_else(|| LispError::type_error("compare", "comparable numbers", "NaN")),
            _ => Err(LispError::type_error(
                "compare",
                "two values of the same comparable type",
                format!("{} and {}", a.type_name(), b.type_name()),
            )),
        },
    }
}

// ===== Display (Clojure-like notation) =====

fn write_escaped(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for c in s.chars() {
        match c {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            '\r' => write!(f, "\\r")?,
            _ => write!(f, "{}", c)?,
        }
    }
    write!(f, "\"")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => {
                // Whole floats keep a trailing .0 so they stay floats on re-read
                if x.fract() == 0.0 && x.is_finite() {
                    write!(f, "{:.1}", x)
                } else {
                    write!(f, "{}", x)
                }
            }
            Value::Str(s) => write_escaped(f, s),
            Value::Keyword(k) => write!(f, ":{}", k),
            Value::Vector(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Set(items) => {
                write!(f, "#{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "}}")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Closure(c) => write!(f, "{}", crate::serializer::closure_source(c)),
            Value::Builtin(b) => write!(f, "#<builtin {}>", b.name),
            Value::Pred(_) => write!(f, "#<pred>"),
            Value::Juxt(_) => write!(f, "#<juxt>"),
            Value::Var(name) => write!(f, "#'{}", name),
            Value::Date(d) => write!(f, "#date \"{}\"", d.format("%Y-%m-%d")),
            Value::Regex(r) => write!(f, "#<re {}>", r.as_str()),
        }
    }
}

/// Render for `println`: top-level strings print their raw contents, like
/// Clojure's `println`, while nested values keep the readable notation.
pub fn display_plain(v: &Value) -> String {
    match v {
        Value::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Truncate a rendered line to `width` chars, marking the cut.
pub fn truncate_line(line: String, width: usize) -> String {
    if line.chars().count() <= width {
        return line;
    }
    let mut out: String = line.chars().take(width).collect();
    out.push_str("...");
    out
}

// ===== JSON bridge =====
//
// Hosts that keep context and tool payloads as JSON convert at the boundary.

pub fn from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => Value::Vector(items.iter().map(from_json).collect()),
        serde_json::Value::Object(obj) => {
            let mut map = BTreeMap::new();
            for (k, v) in obj {
                map.insert(Key::Str(k.clone()), from_json(v));
            }
            Value::Map(map)
        }
    }
}

pub fn to_json(value: &Value) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Nil => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Keyword(k) => serializer.serialize_str(k),
            Value::Vector(items) | Value::Set(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(&k.as_plain_string(), v)?;
                }
                map.end()
            }
            Value::Closure(c) => serializer.serialize_str(&crate::serializer::closure_source(c)),
            Value::Builtin(b) => serializer.serialize_str(b.name),
            Value::Pred(_) => serializer.serialize_str("#<pred>"),
            Value::Juxt(_) => serializer.serialize_str("#<juxt>"),
            Value::Var(name) => serializer.serialize_str(&format!("#'{}", name)),
            Value::Date(d) => serializer.serialize_str(&d.format("%Y-%m-%d").to_string()),
            Value::Regex(r) => serializer.serialize_str(r.as_str()),
        }
    }
}
