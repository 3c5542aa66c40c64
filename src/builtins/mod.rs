//! # Built-in Functions Module
//!
//! The fixed catalog of core runtime functions, organized by category.
//! Dispatch is data-driven: every entry declares its arity shape as one of
//! the tagged variants below, and a single checker produces `arity_error`
//! with the declared arity set and the actual count.
//!
//! ## Categories
//!
//! - **[arithmetic]** — + - * / mod inc dec abs min max round floor ceil
//! - **[comparison]** — = not= < > <= >= not
//! - **[predicates]** — nil? some? number? ... contains?
//! - **[sequences]** — count, first, map, filter, reduce, range, ...
//! - **[maps]** — get, assoc, merge, update-in, keys, vals, set, vec, ...
//! - **[strings]** — str, subs, split, replace, parse-long, ...
//! - **[aggregates]** — sum-by, avg-by, min-by, max-by, group-by, pluck
//! - **[higher_order]** — identity, fnil, apply, comp, partial, juxt
//! - **[regex_fns]** — re-pattern, re-seq, re-split, re-matches, re-find
//! - **[dates]** — today, date-parse, now-millis and the interop targets
//! - **[console]** — println (captured, never real stdout)

use crate::error::{Exception, LispError};
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

pub mod aggregates;
pub mod arithmetic;
pub mod comparison;
pub mod console;
pub mod dates;
pub mod higher_order;
pub mod maps;
pub mod predicates;
pub mod regex_fns;
pub mod sequences;
pub mod strings;

/// Hook back into the evaluator so higher-order builtins can call closures,
/// predicates, and keyword getters, and `println` can reach the captured
/// print stream.
pub trait Applier {
    fn apply(&mut self, f: &Value, args: &[Value]) -> Result<Value, Exception>;
    fn print_line(&mut self, line: String);
    fn float_precision(&self) -> Option<u32>;
    /// Charge the allocation gauge before building a large result.
    fn charge(&mut self, bytes: usize) -> Result<(), LispError>;
}

pub type NativeFn = fn(&mut dyn Applier, &[Value]) -> Result<Value, Exception>;

/// Declared arity shape of a builtin.
#[derive(Debug, Clone, Copy)]
pub enum Kind {
    Fixed(usize),
    Multi(&'static [usize]),
    Variadic(usize),
    VariadicNonEmpty,
}

pub struct Builtin {
    pub name: &'static str,
    pub kind: Kind,
    /// Human arity description used in `arity_error` messages.
    pub arity: &'static str,
    pub f: NativeFn,
}

impl std::fmt::Debug for Builtin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builtin").field("name", &self.name).finish()
    }
}

static REGISTRY: LazyLock<BTreeMap<&'static str, &'static Builtin>> = LazyLock::new(|| {
    let mut registry = BTreeMap::new();
    let groups: &[&'static [Builtin]] = &[
        arithmetic::CATALOG,
        comparison::CATALOG,
        predicates::CATALOG,
        sequences::CATALOG,
        maps::CATALOG,
        strings::CATALOG,
        aggregates::CATALOG,
        higher_order::CATALOG,
        regex_fns::CATALOG,
        dates::CATALOG,
        console::CATALOG,
    ];
    for group in groups {
        for builtin in group.iter() {
            registry.insert(builtin.name, builtin);
        }
    }
    registry
});

/// Look a builtin up by name. This doubles as the "core symbols" set for the
/// symbol budget and the `cannot_shadow_builtin` check.
pub fn lookup(name: &str) -> Option<&'static Builtin> {
    REGISTRY.get(name).copied()
}

pub fn names() -> impl Iterator<Item = &'static str> {
    REGISTRY.keys().copied()
}

fn arity_ok(kind: Kind, n: usize) -> bool {
    match kind {
        Kind::Fixed(want) => n == want,
        Kind::Multi(set) => set.contains(&n),
        Kind::Variadic(min) => n >= min,
        Kind::VariadicNonEmpty => n >= 1,
    }
}

/// Invoke a builtin with central arity checking.
pub fn call(
    applier: &mut dyn Applier,
    builtin: &'static Builtin,
    args: &[Value],
) -> Result<Value, Exception> {
    if !arity_ok(builtin.kind, args.len()) {
        return Err(LispError::arity_error(builtin.name, builtin.arity, args.len()).into());
    }
    (builtin.f)(applier, args)
}

// ===== Shared argument helpers =====

pub(crate) fn as_seq(function: &str, v: &Value) -> Result<Vec<Value>, LispError> {
    match v {
        Value::Nil => Ok(Vec::new()),
        Value::Vector(items) | Value::Set(items) => Ok(items.clone()),
        Value::Map(m) => Ok(m
            .iter()
            .map(|(k, v)| Value::Vector(vec![k.to_value(), v.clone()]))
            .collect()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        other => Err(LispError::type_error(
            function,
            "a sequence",
            other.type_name(),
        )),
    }
}

pub(crate) fn as_str<'a>(function: &str, v: &'a Value) -> Result<&'a str, LispError> {
    match v {
        Value::Str(s) => Ok(s),
        other => Err(LispError::type_error(function, "a string", other.type_name())),
    }
}

pub(crate) fn as_int(function: &str, v: &Value) -> Result<i64, LispError> {
    match v {
        Value::Int(n) => Ok(*n),
        other => Err(LispError::type_error(
            function,
            "an integer",
            other.type_name(),
        )),
    }
}

pub(crate) fn as_map<'a>(
    function: &str,
    v: &'a Value,
) -> Result<&'a BTreeMap<crate::value::Key, Value>, LispError> {
    match v {
        Value::Map(m) => Ok(m),
        other => Err(LispError::type_error(function, "a map", other.type_name())),
    }
}

/// Reject values that cannot act as a predicate, steering toward the
/// single-keyword / `where` forms the language prefers.
pub(crate) fn check_predicate(function: &str, v: &Value) -> Result<(), LispError> {
    if v.is_callable() {
        return Ok(());
    }
    if let Value::Vector(_) = v {
        return Err(LispError::invalid_form(format!(
            "{}: a vector is not a predicate; use a single keyword like (:status item) \
             or a (where ...) clause",
            function
        )));
    }
    Err(LispError::type_error(
        function,
        "a predicate function",
        v.type_name(),
    ))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_no_duplicate_names() {
        // BTreeMap deduplicates; compare against the raw count
        let groups: &[&'static [Builtin]] = &[
            arithmetic::CATALOG,
            comparison::CATALOG,
            predicates::CATALOG,
            sequences::CATALOG,
            maps::CATALOG,
            strings::CATALOG,
            aggregates::CATALOG,
            higher_order::CATALOG,
            regex_fns::CATALOG,
            dates::CATALOG,
            console::CATALOG,
        ];
        let raw: usize = groups.iter().map(|g| g.len()).sum();
        assert_eq!(raw, names().count(), "duplicate builtin name registered");
    }

    #[test]
    fn test_lookup_core_names() {
        for name in ["+", "map", "filter", "get-in", "println", "re-seq", "pluck"] {
            assert!(lookup(name).is_some(), "missing builtin {}", name);
        }
        assert!(lookup("no-such-fn").is_none());
    }

    #[test]
    fn test_central_arity_check() {
        let err = testing::call_builtin("first", &[]).unwrap_err();
        match err {
            Exception::Error(e) => {
                assert_eq!(e.reason(), "arity_error");
                assert!(e.to_string().contains("first"));
            }
            other => panic!("expected error, got {:?}", other),
        }
    }
}
