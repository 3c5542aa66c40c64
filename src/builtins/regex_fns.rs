//! Regular expressions over the `regex` crate
//!
//! Patterns are first-class values built with `re-pattern`; every consumer
//! also accepts a pattern string and compiles on the fly.

use super::{as_str, Applier, Builtin, Kind};
use crate::error::{Exception, LispError, ARITY_ONE, ARITY_TWO};
use crate::value::Value;
use regex::Regex;

fn compile(function: &str, v: &Value) -> Result<Regex, LispError> {
    match v {
        Value::Regex(re) => Ok(re.clone()),
        Value::Str(s) => Regex::new(s).map_err(|e| {
            LispError::type_error(function, "a valid regular expression", e.to_string())
        }),
        other => Err(LispError::type_error(
            function,
            "a regex or pattern string",
            other.type_name(),
        )),
    }
}

fn re_pattern(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let s = as_str("re-pattern", &args[0])?;
    Ok(Value::Regex(compile("re-pattern", &Value::Str(s.to_string()))?))
}

/// A match with groups becomes `[full g1 g2 ...]`; without groups, just the
/// matched string.
fn match_value(re: &Regex, caps: regex::Captures<'_>) -> Value {
    if re.captures_len() == 1 {
        return Value::Str(caps[0].to_string());
    }
    let groups: Vec<Value> = (0..re.captures_len())
        .map(|i| match caps.get(i) {
            Some(m) => Value::Str(m.as_str().to_string()),
            None => Value::Nil,
        })
        .collect();
    Value::Vector(groups)
}

fn re_seq(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let re = compile("re-seq", &args[0])?;
    let s = as_str("re-seq", &args[1])?;
    let out: Vec<Value> = re.captures_iter(s).map(|c| match_value(&re, c)).collect();
    Ok(Value::Vector(out))
}

fn re_split(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let re = compile("re-split", &args[0])?;
    let s = as_str("re-split", &args[1])?;
    Ok(Value::Vector(
        re.split(s).map(|p| Value::Str(p.to_string())).collect(),
    ))
}

/// Whole-string match, or nil.
fn re_matches(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let re = compile("re-matches", &args[0])?;
    let s = as_str("re-matches", &args[1])?;
    match re.captures(s) {
        Some(caps) if caps[0].len() == s.len() => Ok(match_value(&re, caps)),
        _ => Ok(Value::Nil),
    }
}

fn re_find(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let re = compile("re-find", &args[0])?;
    let s = as_str("re-find", &args[1])?;
    match re.captures(s) {
        Some(caps) => Ok(match_value(&re, caps)),
        None => Ok(Value::Nil),
    }
}

pub const CATALOG: &[Builtin] = &[
    Builtin { name: "re-pattern", kind: Kind::Fixed(1), arity: ARITY_ONE, f: re_pattern },
    Builtin { name: "re-seq", kind: Kind::Fixed(2), arity: ARITY_TWO, f: re_seq },
    Builtin { name: "re-split", kind: Kind::Fixed(2), arity: ARITY_TWO, f: re_split },
    Builtin { name: "re-matches", kind: Kind::Fixed(2), arity: ARITY_TWO, f: re_matches },
    Builtin { name: "re-find", kind: Kind::Fixed(2), arity: ARITY_TWO, f: re_find },
];

#[cfg(test)]
mod tests {
    use super::super::testing::{call_builtin, call_ok};
    use crate::value::Value;

    #[test]
    fn test_re_pattern_compiles() {
        assert!(matches!(
            call_ok("re-pattern", &[Value::Str("[a-z]+".into())]),
            Value::Regex(_)
        ));
        assert!(call_builtin("re-pattern", &[Value::Str("[unclosed".into())]).is_err());
    }

    #[test]
    fn test_re_seq_plain_matches() {
        let result = call_ok(
            "re-seq",
            &[Value::Str(r"\d+".into()), Value::Str("a1 b22 c333".into())],
        );
        assert_eq!(
            result,
            Value::Vector(vec![
                Value::Str("1".into()),
                Value::Str("22".into()),
                Value::Str("333".into())
            ])
        );
    }

    #[test]
    fn test_re_seq_with_groups() {
        let result = call_ok(
            "re-seq",
            &[Value::Str(r"(\w)=(\d)".into()), Value::Str("a=1 b=2".into())],
        );
        match result {
            Value::Vector(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(
                    items[0],
                    Value::Vector(vec![
                        Value::Str("a=1".into()),
                        Value::Str("a".into()),
                        Value::Str("1".into())
                    ])
                );
            }
            other => panic!("expected vector, got {}", other),
        }
    }

    #[test]
    fn test_re_split() {
        let result = call_ok(
            "re-split",
            &[Value::Str(r"\s*,\s*".into()), Value::Str("a, b ,c".into())],
        );
        assert_eq!(
            result,
            Value::Vector(vec![
                Value::Str("a".into()),
                Value::Str("b".into()),
                Value::Str("c".into())
            ])
        );
    }

    #[test]
    fn test_re_matches_requires_full_match() {
        assert_eq!(
            call_ok(
                "re-matches",
                &[Value::Str(r"\d+".into()), Value::Str("123".into())]
            ),
            Value::Str("123".into())
        );
        assert_eq!(
            call_ok(
                "re-matches",
                &[Value::Str(r"\d+".into()), Value::Str("123a".into())]
            ),
            Value::Nil
        );
    }

    #[test]
    fn test_re_find_first_match() {
        assert_eq!(
            call_ok(
                "re-find",
                &[Value::Str(r"\d+".into()), Value::Str("ab 42 cd".into())]
            ),
            Value::Str("42".into())
        );
    }
}
