//! Map, set, and vector-as-associative operations
//!
//! All keyed access is "flex": a keyword key falls back to its string twin
//! and vice versa, keyword-first. Writes land on whichever twin the map
//! already has, so updates never fork a key into both spellings.

use super::{as_map, as_seq, Applier, Builtin, Kind};
use crate::error::{Exception, LispError, ARITY_ONE, ARITY_THREE, ARITY_TWO, ARITY_TWO_OR_THREE};
use crate::value::{map_lookup, Key, Value};
use std::collections::BTreeMap;

/// The key an insert should use: the twin already present, else the given
/// key itself.
fn write_key(map: &BTreeMap<Key, Value>, key: &Key) -> Key {
    if map.contains_key(key) {
        return key.clone();
    }
    match key.flexed() {
        Some(twin) if map.contains_key(&twin) => twin,
        _ => key.clone(),
    }
}

fn get(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let fallback = args.get(2).cloned().unwrap_or(Value::Nil);
    let found = match (&args[0], &args[1]) {
        (Value::Nil, _) => None,
        (Value::Map(m), key) => map_lookup(m, &Key::from_value(key)?).cloned(),
        (Value::Vector(items), Value::Int(i)) => {
            usize::try_from(*i).ok().and_then(|i| items.get(i)).cloned()
        }
        (Value::Set(items), v) => items.iter().find(|x| *x == v).cloned(),
        (other, _) => {
            return Err(LispError::type_error("get", "a map, vector or set", other.type_name()).into())
        }
    };
    Ok(found.unwrap_or(fallback))
}

fn get_in(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let path = as_seq("get-in", &args[1])?;
    let fallback = args.get(2).cloned().unwrap_or(Value::Nil);
    let mut current = args[0].clone();
    for key in path {
        current = get(applier, &[current, key, Value::Nil])?;
        if matches!(current, Value::Nil) {
            break;
        }
    }
    Ok(match current {
        Value::Nil => fallback,
        v => v,
    })
}

fn assoc(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    if args[1..].len() % 2 != 0 {
        return Err(LispError::arity_error("assoc", "an odd total (map + k/v pairs)", args.len()).into());
    }
    let mut target = match &args[0] {
        Value::Nil => Value::Map(BTreeMap::new()),
        other => other.clone(),
    };
    for kv in args[1..].chunks(2) {
        target = match target {
            Value::Map(mut m) => {
                let key = write_key(&m, &Key::from_value(&kv[0])?);
                m.insert(key, kv[1].clone());
                Value::Map(m)
            }
            Value::Vector(mut items) => {
                let idx = match &kv[0] {
                    Value::Int(i) if *i >= 0 && (*i as usize) <= items.len() => *i as usize,
                    other => {
                        return Err(LispError::type_error(
                            "assoc",
                            "an index within the vector",
                            other.to_string(),
                        )
                        .into())
                    }
                };
                if idx == items.len() {
                    items.push(kv[1].clone());
                } else {
                    items[idx] = kv[1].clone();
                }
                Value::Vector(items)
            }
            other => {
                return Err(LispError::type_error("assoc", "a map or vector", other.type_name()).into())
            }
        };
    }
    Ok(target)
}

fn assoc_in(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let path = as_seq("assoc-in", &args[1])?;
    if path.is_empty() {
        return Err(LispError::type_error("assoc-in", "a non-empty path", "[]").into());
    }
    put_in(applier, args[0].clone(), &path, args[2].clone())
}

fn put_in(
    applier: &mut dyn Applier,
    target: Value,
    path: &[Value],
    value: Value,
) -> Result<Value, Exception> {
    let (key, rest) = path.split_first().expect("non-empty path");
    if rest.is_empty() {
        return assoc(applier, &[target, key.clone(), value]);
    }
    let inner = get(applier, &[target.clone(), key.clone(), Value::Nil])?;
    let inner = match inner {
        Value::Nil => Value::Map(BTreeMap::new()),
        v => v,
    };
    let updated = put_in(applier, inner, rest, value)?;
    assoc(applier, &[target, key.clone(), updated])
}

fn dissoc(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let mut m = as_map("dissoc", &args[0])?.clone();
    for key in &args[1..] {
        let key = Key::from_value(key)?;
        m.remove(&key);
        if let Some(twin) = key.flexed() {
            m.remove(&twin);
        }
    }
    Ok(Value::Map(m))
}

fn merge(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let mut out = BTreeMap::new();
    for arg in args {
        match arg {
            Value::Nil => {}
            Value::Map(m) => {
                for (k, v) in m {
                    let key = write_key(&out, k);
                    out.insert(key, v.clone());
                }
            }
            other => {
                return Err(LispError::type_error("merge", "maps", other.type_name()).into())
            }
        }
    }
    Ok(Value::Map(out))
}

fn select_keys(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let m = as_map("select-keys", &args[0])?;
    let wanted = as_seq("select-keys", &args[1])?;
    let mut out = BTreeMap::new();
    for key in wanted {
        let key = Key::from_value(&key)?;
        if let Some(v) = map_lookup(m, &key) {
            out.insert(key, v.clone());
        }
    }
    Ok(Value::Map(out))
}

fn update(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let current = get(applier, &[args[0].clone(), args[1].clone(), Value::Nil])?;
    let mut call_args = vec![current];
    call_args.extend_from_slice(&args[3..]);
    let updated = applier.apply(&args[2], &call_args)?;
    assoc(applier, &[args[0].clone(), args[1].clone(), updated])
}

fn update_in(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let path = as_seq("update-in", &args[1])?;
    if path.is_empty() {
        return Err(LispError::type_error("update-in", "a non-empty path", "[]").into());
    }
    let current = get_in(applier, &[args[0].clone(), args[1].clone()])?;
    let mut call_args = vec![current];
    call_args.extend_from_slice(&args[3..]);
    let updated = applier.apply(&args[2], &call_args)?;
    put_in(applier, args[0].clone(), &path, updated)
}

fn keys(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let m = as_map("keys", &args[0])?;
    Ok(Value::Vector(m.keys().map(Key::to_value).collect()))
}

fn vals(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let m = as_map("vals", &args[0])?;
    Ok(Value::Vector(m.values().cloned().collect()))
}

/// Duplicate keys resolve later-wins, matching map literals.
fn zipmap(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let ks = as_seq("zipmap", &args[0])?;
    let vs = as_seq("zipmap", &args[1])?;
    let mut out = BTreeMap::new();
    for (k, v) in ks.into_iter().zip(vs.into_iter()) {
        out.insert(Key::from_value(&k)?, v);
    }
    Ok(Value::Map(out))
}

fn to_set(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let items = as_seq("set", &args[0])?;
    let mut out: Vec<Value> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    Ok(Value::Set(out))
}

fn to_vec(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    Ok(Value::Vector(as_seq("vec", &args[0])?))
}

pub const CATALOG: &[Builtin] = &[
    Builtin { name: "get", kind: Kind::Multi(&[2, 3]), arity: ARITY_TWO_OR_THREE, f: get },
    Builtin { name: "get-in", kind: Kind::Multi(&[2, 3]), arity: ARITY_TWO_OR_THREE, f: get_in },
    Builtin { name: "assoc", kind: Kind::Variadic(3), arity: "at least 3", f: assoc },
    Builtin { name: "assoc-in", kind: Kind::Fixed(3), arity: ARITY_THREE, f: assoc_in },
    Builtin { name: "dissoc", kind: Kind::Variadic(2), arity: "at least 2", f: dissoc },
    Builtin { name: "merge", kind: Kind::VariadicNonEmpty, arity: "at least 1", f: merge },
    Builtin { name: "select-keys", kind: Kind::Fixed(2), arity: ARITY_TWO, f: select_keys },
    Builtin { name: "update", kind: Kind::Variadic(3), arity: "at least 3", f: update },
    Builtin { name: "update-in", kind: Kind::Variadic(3), arity: "at least 3", f: update_in },
    Builtin { name: "keys", kind: Kind::Fixed(1), arity: ARITY_ONE, f: keys },
    Builtin { name: "vals", kind: Kind::Fixed(1), arity: ARITY_ONE, f: vals },
    Builtin { name: "zipmap", kind: Kind::Fixed(2), arity: ARITY_TWO, f: zipmap },
    Builtin { name: "set", kind: Kind::Fixed(1), arity: ARITY_ONE, f: to_set },
    Builtin { name: "vec", kind: Kind::Fixed(1), arity: ARITY_ONE, f: to_vec },
];

#[cfg(test)]
mod tests {
    use super::super::testing::{builtin, call_builtin, call_ok};
    use crate::value::{Key, Value};
    use std::collections::BTreeMap;

    fn map_kw(pairs: &[(&str, Value)]) -> Value {
        Value::Map(
            pairs
                .iter()
                .map(|(k, v)| (Key::keyword(k), v.clone()))
                .collect(),
        )
    }

    fn map_str(pairs: &[(&str, Value)]) -> Value {
        Value::Map(
            pairs
                .iter()
                .map(|(k, v)| (Key::Str(k.to_string()), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_get_flexes_between_keyword_and_string() {
        let m = map_str(&[("name", Value::Str("Alice".into()))]);
        assert_eq!(
            call_ok("get", &[m.clone(), Value::Keyword("name".into())]),
            Value::Str("Alice".into())
        );
        let m2 = map_kw(&[("name", Value::Str("Bob".into()))]);
        assert_eq!(
            call_ok("get", &[m2, Value::Str("name".into())]),
            Value::Str("Bob".into())
        );
        assert_eq!(
            call_ok("get", &[m, Value::Keyword("missing".into()), Value::Int(0)]),
            Value::Int(0)
        );
    }

    #[test]
    fn test_get_on_nil_and_vector() {
        assert_eq!(
            call_ok("get", &[Value::Nil, Value::Keyword("x".into())]),
            Value::Nil
        );
        let v = Value::Vector(vec![Value::Int(10), Value::Int(20)]);
        assert_eq!(call_ok("get", &[v.clone(), Value::Int(1)]), Value::Int(20));
        assert_eq!(call_ok("get", &[v, Value::Int(5)]), Value::Nil);
    }

    #[test]
    fn test_get_in_walks_mixed_structures() {
        let inner = Value::Vector(vec![map_kw(&[("id", Value::Int(7))])]);
        let m = map_str(&[("orders", inner)]);
        let path = Value::Vector(vec![
            Value::Keyword("orders".into()),
            Value::Int(0),
            Value::Keyword("id".into()),
        ]);
        assert_eq!(call_ok("get-in", &[m, path]), Value::Int(7));
    }

    #[test]
    fn test_assoc_updates_existing_twin_key() {
        let m = map_str(&[("count", Value::Int(1))]);
        let result = call_ok("assoc", &[m, Value::Keyword("count".into()), Value::Int(2)]);
        match result {
            Value::Map(m) => {
                assert_eq!(m.len(), 1, "should update the string key, not add a keyword twin");
                assert_eq!(m.get(&Key::Str("count".into())), Some(&Value::Int(2)));
            }
            other => panic!("expected map, got {}", other),
        }
    }

    #[test]
    fn test_assoc_on_nil_makes_map() {
        let result = call_ok("assoc", &[Value::Nil, Value::Keyword("a".into()), Value::Int(1)]);
        assert_eq!(result, map_kw(&[("a", Value::Int(1))]));
    }

    #[test]
    fn test_assoc_in_creates_intermediate_maps() {
        let result = call_ok(
            "assoc-in",
            &[
                Value::Nil,
                Value::Vector(vec![Value::Keyword("a".into()), Value::Keyword("b".into())]),
                Value::Int(5),
            ],
        );
        assert_eq!(result, map_kw(&[("a", map_kw(&[("b", Value::Int(5))]))]));
    }

    #[test]
    fn test_dissoc_removes_both_twins() {
        let mut m = BTreeMap::new();
        m.insert(Key::Str("x".into()), Value::Int(1));
        m.insert(Key::keyword("y"), Value::Int(2));
        let result = call_ok("dissoc", &[Value::Map(m), Value::Keyword("x".into())]);
        assert_eq!(result, map_kw(&[("y", Value::Int(2))]));
    }

    #[test]
    fn test_merge_later_wins() {
        let a = map_kw(&[("x", Value::Int(1)), ("y", Value::Int(2))]);
        let b = map_kw(&[("y", Value::Int(9))]);
        let result = call_ok("merge", &[a, Value::Nil, b]);
        assert_eq!(
            result,
            map_kw(&[("x", Value::Int(1)), ("y", Value::Int(9))])
        );
    }

    #[test]
    fn test_select_keys_skips_missing() {
        let m = map_kw(&[("a", Value::Int(1)), ("b", Value::Int(2))]);
        let result = call_ok(
            "select-keys",
            &[m, Value::Vector(vec![Value::Keyword("a".into()), Value::Keyword("z".into())])],
        );
        assert_eq!(result, map_kw(&[("a", Value::Int(1))]));
    }

    #[test]
    fn test_update_with_builtin_and_extra_args() {
        let m = map_kw(&[("n", Value::Int(10))]);
        let plus = Value::Builtin(builtin("+"));
        let result = call_ok(
            "update",
            &[m, Value::Keyword("n".into()), plus, Value::Int(5)],
        );
        assert_eq!(result, map_kw(&[("n", Value::Int(15))]));
    }

    #[test]
    fn test_update_in() {
        let m = map_kw(&[("a", map_kw(&[("n", Value::Int(1))]))]);
        let inc = Value::Builtin(builtin("inc"));
        let result = call_ok(
            "update-in",
            &[
                m,
                Value::Vector(vec![Value::Keyword("a".into()), Value::Keyword("n".into())]),
                inc,
            ],
        );
        assert_eq!(result, map_kw(&[("a", map_kw(&[("n", Value::Int(2))]))]));
    }

    #[test]
    fn test_keys_vals() {
        let m = map_kw(&[("a", Value::Int(1)), ("b", Value::Int(2))]);
        assert_eq!(
            call_ok("keys", &[m.clone()]),
            Value::Vector(vec![Value::Keyword("a".into()), Value::Keyword("b".into())])
        );
        assert_eq!(
            call_ok("vals", &[m]),
            Value::Vector(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn test_zipmap_later_wins() {
        let ks = Value::Vector(vec![
            Value::Keyword("a".into()),
            Value::Keyword("a".into()),
            Value::Keyword("b".into()),
        ]);
        let vs = Value::Vector(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let result = call_ok("zipmap", &[ks, vs]);
        assert_eq!(result, map_kw(&[("a", Value::Int(2)), ("b", Value::Int(3))]));
    }

    #[test]
    fn test_set_and_vec() {
        let v = Value::Vector(vec![Value::Int(1), Value::Int(1), Value::Int(2)]);
        let s = call_ok("set", &[v]);
        assert_eq!(s, Value::Set(vec![Value::Int(1), Value::Int(2)]));
        assert_eq!(
            call_ok("vec", &[s]),
            Value::Vector(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn test_merge_rejects_non_map() {
        assert!(call_builtin("merge", &[Value::Int(1)]).is_err());
    }
}
