//! String operations
//!
//! Indices are character-based and clamped rather than thrown, since LLM
//! programs routinely run off the end of short strings.

use super::{as_int, as_seq, as_str, Applier, Builtin, Kind};
use crate::error::{Exception, LispError, ARITY_ONE, ARITY_ONE_OR_TWO, ARITY_THREE, ARITY_TWO, ARITY_TWO_OR_THREE};
use crate::value::{display_plain, Value};

fn str_fn(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let mut out = String::new();
    for arg in args {
        match arg {
            Value::Nil => {}
            other => out.push_str(&display_plain(other)),
        }
    }
    Ok(Value::Str(out))
}

fn subs(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let s = as_str("subs", &args[0])?;
    let chars: Vec<char> = s.chars().collect();
    let start = as_int("subs", &args[1])?.clamp(0, chars.len() as i64) as usize;
    let end = match args.get(2) {
        Some(v) => as_int("subs", v)?.clamp(start as i64, chars.len() as i64) as usize,
        None => chars.len(),
    };
    Ok(Value::Str(chars[start..end].iter().collect()))
}

fn join(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let (sep, coll) = match args {
        [coll] => ("".to_string(), coll),
        [sep, coll] => (as_str("join", sep)?.to_string(), coll),
        _ => unreachable!("arity checked"),
    };
    let items = as_seq("join", coll)?;
    let rendered: Vec<String> = items.iter().map(display_plain).collect();
    Ok(Value::Str(rendered.join(&sep)))
}

fn split(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let s = as_str("split", &args[0])?;
    let limit = match args.get(2) {
        Some(v) => Some(as_int("split", v)?.max(0) as usize),
        None => None,
    };
    let parts: Vec<&str> = match &args[1] {
        Value::Str(sep) => match limit {
            Some(n) => s.splitn(n, sep.as_str()).collect(),
            None => s.split(sep.as_str()).collect(),
        },
        Value::Regex(re) => match limit {
            Some(n) => re.splitn(s, n).collect(),
            None => re.split(s).collect(),
        },
        other => {
            return Err(
                LispError::type_error("split", "a string or regex separator", other.type_name())
                    .into(),
            )
        }
    };
    Ok(Value::Vector(
        parts.into_iter().map(|p| Value::Str(p.to_string())).collect(),
    ))
}

fn trim(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    Ok(Value::Str(as_str("trim", &args[0])?.trim().to_string()))
}

fn upper_case(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    Ok(Value::Str(as_str("upper-case", &args[0])?.to_uppercase()))
}

fn lower_case(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    Ok(Value::Str(as_str("lower-case", &args[0])?.to_lowercase()))
}

fn starts_with(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    Ok(Value::Bool(
        as_str("starts-with?", &args[0])?.starts_with(as_str("starts-with?", &args[1])?),
    ))
}

fn ends_with(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    Ok(Value::Bool(
        as_str("ends-with?", &args[0])?.ends_with(as_str("ends-with?", &args[1])?),
    ))
}

fn includes(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    Ok(Value::Bool(
        as_str("includes?", &args[0])?.contains(as_str("includes?", &args[1])?),
    ))
}

fn replace(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let s = as_str("replace", &args[0])?;
    let replacement = as_str("replace", &args[2])?;
    let out = match &args[1] {
        Value::Str(pat) => s.replace(pat.as_str(), replacement),
        Value::Regex(re) => re.replace_all(s, replacement).into_owned(),
        other => {
            return Err(
                LispError::type_error("replace", "a string or regex pattern", other.type_name())
                    .into(),
            )
        }
    };
    Ok(Value::Str(out))
}

/// Returns nil on malformed input rather than erroring, so programs can
/// probe with `(or (parse-long s) 0)`.
fn parse_long(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let s = as_str("parse-long", &args[0])?;
    Ok(s.trim()
        .parse::<i64>()
        .map(Value::Int)
        .unwrap_or(Value::Nil))
}

fn parse_double(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let s = as_str("parse-double", &args[0])?;
    Ok(s.trim()
        .parse::<f64>()
        .map(Value::Float)
        .unwrap_or(Value::Nil))
}

/// String to a vector of single-character strings; other collections pass
/// through `as_seq`. Empty yields nil, so `(seq x)` doubles as a non-empty
/// test.
fn seq_fn(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let items = as_seq("seq", &args[0])?;
    if items.is_empty() {
        return Ok(Value::Nil);
    }
    Ok(Value::Vector(items))
}

fn char_index(s: &str, byte_idx: usize) -> i64 {
    s[..byte_idx].chars().count() as i64
}

fn index_of(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let s = as_str("index-of", &args[0])?;
    let needle = as_str("index-of", &args[1])?;
    Ok(match s.find(needle) {
        Some(i) => Value::Int(char_index(s, i)),
        None => Value::Int(-1),
    })
}

fn last_index_of(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let s = as_str("last-index-of", &args[0])?;
    let needle = as_str("last-index-of", &args[1])?;
    Ok(match s.rfind(needle) {
        Some(i) => Value::Int(char_index(s, i)),
        None => Value::Int(-1),
    })
}

pub const CATALOG: &[Builtin] = &[
    Builtin { name: "str", kind: Kind::Variadic(0), arity: "any", f: str_fn },
    Builtin { name: "subs", kind: Kind::Multi(&[2, 3]), arity: ARITY_TWO_OR_THREE, f: subs },
    Builtin { name: "join", kind: Kind::Multi(&[1, 2]), arity: ARITY_ONE_OR_TWO, f: join },
    Builtin { name: "split", kind: Kind::Multi(&[2, 3]), arity: ARITY_TWO_OR_THREE, f: split },
    Builtin { name: "trim", kind: Kind::Fixed(1), arity: ARITY_ONE, f: trim },
    Builtin { name: "upper-case", kind: Kind::Fixed(1), arity: ARITY_ONE, f: upper_case },
    Builtin { name: "lower-case", kind: Kind::Fixed(1), arity: ARITY_ONE, f: lower_case },
    Builtin { name: "starts-with?", kind: Kind::Fixed(2), arity: ARITY_TWO, f: starts_with },
    Builtin { name: "ends-with?", kind: Kind::Fixed(2), arity: ARITY_TWO, f: ends_with },
    Builtin { name: "includes?", kind: Kind::Fixed(2), arity: ARITY_TWO, f: includes },
    Builtin { name: "replace", kind: Kind::Fixed(3), arity: ARITY_THREE, f: replace },
    Builtin { name: "parse-long", kind: Kind::Fixed(1), arity: ARITY_ONE, f: parse_long },
    Builtin { name: "parse-double", kind: Kind::Fixed(1), arity: ARITY_ONE, f: parse_double },
    Builtin { name: "seq", kind: Kind::Fixed(1), arity: ARITY_ONE, f: seq_fn },
    Builtin { name: "index-of", kind: Kind::Fixed(2), arity: ARITY_TWO, f: index_of },
    Builtin { name: "last-index-of", kind: Kind::Fixed(2), arity: ARITY_TWO, f: last_index_of },
];
