//! Aggregations over collections of records
//!
//! Key functions accept anything callable, with keywords as the common case.
//! Nil field values are skipped by the numeric aggregations.

use super::{as_seq, check_predicate, Applier, Builtin, Kind};
use crate::error::{Exception, LispError, ARITY_TWO};
use crate::value::{compare, Key, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

fn key_of(applier: &mut dyn Applier, f: &Value, item: &Value) -> Result<Value, Exception> {
    applier.apply(f, &[item.clone()])
}

fn sum_by(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    check_predicate("sum-by", &args[0])?;
    let items = as_seq("sum-by", &args[1])?;
    let mut int_sum: i64 = 0;
    let mut float_sum = 0.0;
    let mut any_float = false;
    for item in items {
        match key_of(applier, &args[0], &item)? {
            Value::Nil => {}
            Value::Int(n) => {
                int_sum = int_sum
                    .checked_add(n)
                    .ok_or_else(|| LispError::type_error("sum-by", "a sum within integer range", "overflow"))?;
            }
            Value::Float(f) => {
                any_float = true;
                float_sum += f;
            }
            other => {
                return Err(LispError::type_error(
                    "sum-by",
                    "numeric field values",
                    other.type_name(),
                )
                .into())
            }
        }
    }
    if any_float {
        Ok(Value::Float(float_sum + int_sum as f64))
    } else {
        Ok(Value::Int(int_sum))
    }
}

fn avg_by(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    check_predicate("avg-by", &args[0])?;
    let items = as_seq("avg-by", &args[1])?;
    let mut sum = 0.0;
    let mut n = 0usize;
    for item in items {
        match key_of(applier, &args[0], &item)? {
            Value::Nil => {}
            Value::Int(v) => {
                sum += v as f64;
                n += 1;
            }
            Value::Float(v) => {
                sum += v;
                n += 1;
            }
            other => {
                return Err(LispError::type_error(
                    "avg-by",
                    "numeric field values",
                    other.type_name(),
                )
                .into())
            }
        }
    }
    if n == 0 {
        return Ok(Value::Nil);
    }
    Ok(Value::Float(sum / n as f64))
}

fn extreme_by(
    applier: &mut dyn Applier,
    args: &[Value],
    function: &str,
    want: Ordering,
) -> Result<Value, Exception> {
    check_predicate(function, &args[0])?;
    let items = as_seq(function, &args[1])?;
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let key = key_of(applier, &args[0], &item)?;
        if matches!(key, Value::Nil) {
            continue;
        }
        best = match best {
            None => Some((key, item)),
            Some((best_key, best_item)) => {
                if compare(&key, &best_key).map_err(|e| rename(e, function))? == want {
                    Some((key, item))
                } else {
                    Some((best_key, best_item))
                }
            }
        };
    }
    Ok(best.map(|(_, item)| item).unwrap_or(Value::Nil))
}

fn rename(e: LispError, function: &str) -> LispError {
    match e {
        LispError::TypeMismatch { expected, actual, .. } => LispError::TypeMismatch {
            function: function.to_string(),
            expected,
            actual,
        },
        other => other,
    }
}

fn min_by(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    extreme_by(applier, args, "min-by", Ordering::Less)
}

fn max_by(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    extreme_by(applier, args, "max-by", Ordering::Greater)
}

fn group_by(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    check_predicate("group-by", &args[0])?;
    let items = as_seq("group-by", &args[1])?;
    let mut groups: BTreeMap<Key, Vec<Value>> = BTreeMap::new();
    for item in items {
        let key = Key::from_value(&key_of(applier, &args[0], &item)?)?;
        groups.entry(key).or_default().push(item);
    }
    Ok(Value::Map(
        groups
            .into_iter()
            .map(|(k, items)| (k, Value::Vector(items)))
            .collect(),
    ))
}

/// `(pluck :id coll)` — project one field out of each record.
fn pluck(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    check_predicate("pluck", &args[0])?;
    let items = as_seq("pluck", &args[1])?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(key_of(applier, &args[0], &item)?);
    }
    Ok(Value::Vector(out))
}

pub const CATALOG: &[Builtin] = &[
    Builtin { name: "sum-by", kind: Kind::Fixed(2), arity: ARITY_TWO, f: sum_by },
    Builtin { name: "avg-by", kind: Kind::Fixed(2), arity: ARITY_TWO, f: avg_by },
    Builtin { name: "min-by", kind: Kind::Fixed(2), arity: ARITY_TWO, f: min_by },
    Builtin { name: "max-by", kind: Kind::Fixed(2), arity: ARITY_TWO, f: max_by },
    Builtin { name: "group-by", kind: Kind::Fixed(2), arity: ARITY_TWO, f: group_by },
    Builtin { name: "pluck", kind: Kind::Fixed(2), arity: ARITY_TWO, f: pluck },
];
