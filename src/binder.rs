// ABOUTME: Pattern matcher binding values to destructuring patterns

use crate::ast::{Literal, Pattern};
use crate::error::LispError;
use crate::value::{map_contains, map_lookup, Key, Value};
use std::collections::BTreeMap;

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Nil => Value::Nil,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(n) => Value::Int(*n),
        Literal::Float(f) => Value::Float(*f),
        Literal::Str(s) => Value::Str(s.clone()),
        Literal::Keyword(k) => Value::Keyword(k.clone()),
    }
}

/// Sequence view for seq patterns. Nil destructures like an empty sequence
/// (every name binds nil), matching the leniency of `let`.
fn seq_view(value: &Value) -> Result<Vec<Value>, LispError> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::Vector(items) | Value::Set(items) => Ok(items.clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        other => Err(LispError::type_error(
            "destructure",
            "a sequence to bind [..] against",
            other.type_name(),
        )),
    }
}

/// Bind `value` against `pattern`, extending `out`. Sequence matching is
/// lenient (extras dropped, missing bind nil); map matching flexes between
/// keyword and string keys; `:or` defaults apply only when the key is
/// absent, never over an explicit nil.
pub fn bind(
    pattern: &Pattern,
    value: &Value,
    out: &mut BTreeMap<String, Value>,
) -> Result<(), LispError> {
    match pattern {
        Pattern::Var(name) => {
            out.insert(name.clone(), value.clone());
            Ok(())
        }
        Pattern::Seq(patterns) => {
            let items = seq_view(value)?;
            for (i, sub) in patterns.iter().enumerate() {
                bind(sub, items.get(i).unwrap_or(&Value::Nil), out)?;
            }
            Ok(())
        }
        Pattern::SeqRest(leading, rest) => {
            let items = seq_view(value)?;
            for (i, sub) in leading.iter().enumerate() {
                bind(sub, items.get(i).unwrap_or(&Value::Nil), out)?;
            }
            let tail: Vec<Value> = items.iter().skip(leading.len()).cloned().collect();
            bind(rest, &Value::Vector(tail), out)
        }
        Pattern::MapKeys { entries, defaults } => {
            let empty = BTreeMap::new();
            let map = match value {
                Value::Map(m) => m,
                Value::Nil => &empty,
                other => {
                    return Err(LispError::type_error(
                        "destructure",
                        "a map to bind {..} against",
                        other.type_name(),
                    ))
                }
            };
            for (binding, key_name) in entries {
                let key = Key::keyword(key_name);
                let bound = if map_contains(map, &key) {
                    map_lookup(map, &key).cloned().unwrap_or(Value::Nil)
                } else {
                    defaults
                        .iter()
                        .find(|(name, _)| name == binding)
                        .map(|(_, lit)| literal_value(lit))
                        .unwrap_or(Value::Nil)
                };
                out.insert(binding.clone(), bound);
            }
            Ok(())
        }
        Pattern::As(alias, inner) => {
            out.insert(alias.clone(), value.clone());
            bind(inner, value, out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(pattern: &Pattern, value: &Value) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        bind(pattern, value, &mut out).expect("bind ok");
        out
    }

    fn kw_map(pairs: &[(&str, Value)]) -> Value {
        Value::Map(
            pairs
                .iter()
                .map(|(k, v)| (Key::keyword(k), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_var_binds_unconditionally() {
        let out = bound(&Pattern::Var("x".into()), &Value::Int(1));
        assert_eq!(out.get("x"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_seq_is_lenient_both_ways() {
        let pat = Pattern::Seq(vec![Pattern::Var("a".into()), Pattern::Var("b".into())]);
        // Missing elements bind nil
        let out = bound(&pat, &Value::Vector(vec![Value::Int(1)]));
        assert_eq!(out.get("a"), Some(&Value::Int(1)));
        assert_eq!(out.get("b"), Some(&Value::Nil));
        // Extras are dropped
        let out = bound(
            &pat,
            &Value::Vector(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        );
        assert_eq!(out.get("b"), Some(&Value::Int(2)));
        // Nil behaves like empty
        let out = bound(&pat, &Value::Nil);
        assert_eq!(out.get("a"), Some(&Value::Nil));
    }

    #[test]
    fn test_seq_rejects_non_sequence() {
        let pat = Pattern::Seq(vec![Pattern::Var("a".into())]);
        let mut out = BTreeMap::new();
        let err = bind(&pat, &Value::Int(5), &mut out).unwrap_err();
        assert_eq!(err.reason(), "type_error");
    }

    #[test]
    fn test_seq_rest_collects_vector() {
        let pat = Pattern::SeqRest(
            vec![Pattern::Var("head".into())],
            Box::new(Pattern::Var("tail".into())),
        );
        let out = bound(
            &pat,
            &Value::Vector(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        );
        assert_eq!(out.get("head"), Some(&Value::Int(1)));
        assert_eq!(
            out.get("tail"),
            Some(&Value::Vector(vec![Value::Int(2), Value::Int(3)]))
        );
        // Rest of a too-short sequence is the empty vector
        let out = bound(&pat, &Value::Vector(vec![]));
        assert_eq!(out.get("tail"), Some(&Value::Vector(vec![])));
    }

    #[test]
    fn test_map_keys_flex_string_fallback() {
        let pat = Pattern::MapKeys {
            entries: vec![("name".into(), "name".into())],
            defaults: vec![],
        };
        let mut m = BTreeMap::new();
        m.insert(Key::Str("name".into()), Value::Str("Alice".into()));
        let out = bound(&pat, &Value::Map(m));
        assert_eq!(out.get("name"), Some(&Value::Str("Alice".into())));
    }

    #[test]
    fn test_defaults_apply_only_when_absent() {
        let pat = Pattern::MapKeys {
            entries: vec![("x".into(), "x".into())],
            defaults: vec![("x".into(), Literal::Int(0))],
        };
        // Explicit nil is preserved
        let out = bound(&pat, &kw_map(&[("x", Value::Nil)]));
        assert_eq!(out.get("x"), Some(&Value::Nil));
        // Absent key takes the default
        let out = bound(&pat, &kw_map(&[]));
        assert_eq!(out.get("x"), Some(&Value::Int(0)));
    }

    #[test]
    fn test_rename_entries() {
        let pat = Pattern::MapKeys {
            entries: vec![("the-name".into(), "name".into())],
            defaults: vec![],
        };
        let out = bound(&pat, &kw_map(&[("name", Value::Str("Bo".into()))]));
        assert_eq!(out.get("the-name"), Some(&Value::Str("Bo".into())));
    }

    #[test]
    fn test_as_binds_whole_and_inner() {
        let pat = Pattern::As(
            "whole".into(),
            Box::new(Pattern::MapKeys {
                entries: vec![("a".into(), "a".into())],
                defaults: vec![],
            }),
        );
        let m = kw_map(&[("a", Value::Int(1))]);
        let out = bound(&pat, &m);
        assert_eq!(out.get("whole"), Some(&m));
        assert_eq!(out.get("a"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_map_pattern_on_nil_uses_defaults() {
        let pat = Pattern::MapKeys {
            entries: vec![("x".into(), "x".into()), ("y".into(), "y".into())],
            defaults: vec![("x".into(), Literal::Int(9))],
        };
        let out = bound(&pat, &Value::Nil);
        assert_eq!(out.get("x"), Some(&Value::Int(9)));
        assert_eq!(out.get("y"), Some(&Value::Nil));
    }

    #[test]
    fn test_map_pattern_rejects_non_map() {
        let pat = Pattern::MapKeys {
            entries: vec![("x".into(), "x".into())],
            defaults: vec![],
        };
        let mut out = BTreeMap::new();
        let err = bind(&pat, &Value::Vector(vec![]), &mut out).unwrap_err();
        assert_eq!(err.reason(), "type_error");
        assert!(err.to_string().contains("map"));
    }
}
