//! Higher-order adapters
//!
//! `fnil`, `comp`, and `partial` return ordinary closures whose bodies are
//! small synthesized programs over a captured environment, so they serialize
//! and apply exactly like user-written functions.

use super::{as_seq, Applier, Builtin, Kind};
use crate::ast::{Node, Pattern};
use crate::env::Env;
use crate::error::{Exception, LispError, ARITY_ONE, ARITY_TWO};
use crate::value::{Closure, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

fn identity(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    Ok(args[0].clone())
}

fn apply_fn(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let f = &args[0];
    let (last, middles) = args[1..].split_last().expect("arity checked");
    let mut call_args: Vec<Value> = middles.to_vec();
    call_args.extend(as_seq("apply", last)?);
    applier.apply(f, &call_args)
}

fn synth_closure(
    captured: BTreeMap<String, Value>,
    params: Vec<Pattern>,
    rest: Option<Pattern>,
    body: Node,
) -> Value {
    Value::Closure(Arc::new(Closure {
        name: None,
        params,
        rest,
        body: vec![body],
        env: Env::new().extend(captured),
        turn_history: Arc::new(Vec::new()),
        docstring: None,
        return_type: None,
    }))
}

fn var(name: &str) -> Node {
    Node::Var(name.to_string())
}

fn call(target: Node, args: Vec<Node>) -> Node {
    Node::Call {
        target: Box::new(target),
        args,
    }
}

/// `(fnil f default)` — patches a nil first argument before calling f.
fn fnil(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    if !args[0].is_callable() {
        return Err(
            LispError::type_error("fnil", "a function", args[0].type_name()).into(),
        );
    }
    let mut captured = BTreeMap::new();
    captured.insert("__fnil-f".to_string(), args[0].clone());
    captured.insert("__fnil-default".to_string(), args[1].clone());

    // (apply __fnil-f (concat [(if (nil? x) __fnil-default x)] more))
    let patched = Node::If {
        cond: Box::new(call(var("nil?"), vec![var("x")])),
        then: Box::new(var("__fnil-default")),
        els: Some(Box::new(var("x"))),
    };
    let body = call(
        var("apply"),
        vec![
            var("__fnil-f"),
            call(var("concat"), vec![Node::Vector(vec![patched]), var("more")]),
        ],
    );
    Ok(synth_closure(
        captured,
        vec![Pattern::Var("x".to_string())],
        Some(Pattern::Var("more".to_string())),
        body,
    ))
}

/// `(comp f g h)` — right-to-left composition.
fn comp(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    match args {
        [] => Ok(Value::Builtin(
            super::lookup("identity").expect("identity is registered"),
        )),
        [one] => Ok(one.clone()),
        many => {
            let mut captured = BTreeMap::new();
            for (i, f) in many.iter().enumerate() {
                if !f.is_callable() {
                    return Err(
                        LispError::type_error("comp", "functions", f.type_name()).into(),
                    );
                }
                captured.insert(format!("__comp-{}", i), f.clone());
            }
            // innermost gets the argument list, outer wrap one by one
            let mut body = call(
                var("apply"),
                vec![var(&format!("__comp-{}", many.len() - 1)), var("args")],
            );
            for i in (0..many.len() - 1).rev() {
                body = call(var(&format!("__comp-{}", i)), vec![body]);
            }
            Ok(synth_closure(
                captured,
                Vec::new(),
                Some(Pattern::Var("args".to_string())),
                body,
            ))
        }
    }
}

/// `(partial f a b)` — prefixes arguments.
fn partial(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    if !args[0].is_callable() {
        return Err(
            LispError::type_error("partial", "a function", args[0].type_name()).into(),
        );
    }
    let mut captured = BTreeMap::new();
    captured.insert("__partial-f".to_string(), args[0].clone());
    captured.insert(
        "__partial-args".to_string(),
        Value::Vector(args[1..].to_vec()),
    );
    let body = call(
        var("apply"),
        vec![
            var("__partial-f"),
            call(var("concat"), vec![var("__partial-args"), var("more")]),
        ],
    );
    Ok(synth_closure(
        captured,
        Vec::new(),
        Some(Pattern::Var("more".to_string())),
        body,
    ))
}

/// Function-position `juxt`; the special form produces the same value.
fn juxt(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    for f in args {
        if !f.is_callable() {
            return Err(LispError::type_error("juxt", "functions", f.type_name()).into());
        }
    }
    Ok(Value::Juxt(Arc::new(args.to_vec())))
}

fn constantly(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let mut captured = BTreeMap::new();
    captured.insert("__const".to_string(), args[0].clone());
    Ok(synth_closure(
        captured,
        Vec::new(),
        Some(Pattern::Var("_ignored".to_string())),
        var("__const"),
    ))
}

pub const CATALOG: &[Builtin] = &[
    Builtin { name: "identity", kind: Kind::Fixed(1), arity: ARITY_ONE, f: identity },
    Builtin { name: "apply", kind: Kind::Variadic(2), arity: "at least 2", f: apply_fn },
    Builtin { name: "fnil", kind: Kind::Fixed(2), arity: ARITY_TWO, f: fnil },
    Builtin { name: "comp", kind: Kind::Variadic(0), arity: "any", f: comp },
    Builtin { name: "partial", kind: Kind::VariadicNonEmpty, arity: "at least 1", f: partial },
    Builtin { name: "juxt", kind: Kind::VariadicNonEmpty, arity: "at least 1", f: juxt },
    Builtin { name: "constantly", kind: Kind::Fixed(1), arity: ARITY_ONE, f: constantly },
];
