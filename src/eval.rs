// ABOUTME: Evaluator folding the Core AST into values under an EvalContext

use crate::ast::{CombKind, Literal, Node, PathSeg, WhereOp};
use crate::binder;
use crate::builtins::{self, Applier};
use crate::context::{EvalContext, ToolCall};
use crate::env::Env;
use crate::error::{Exception, LispError};
use crate::value::{map_lookup, Closure, Key, Pred, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of evaluating one node: a value, or one of the short-circuits.
/// `Recur` only ever travels from a tail `recur` up to its recursion point;
/// the analyzer guarantees no other path can observe it.
#[derive(Debug, Clone)]
pub enum Flow {
    Value(Value),
    Return(Value),
    Fail(Value),
    Recur(Vec<Value>),
}

macro_rules! try_value {
    ($flow:expr) => {
        match $flow? {
            Flow::Value(v) => v,
            other => return Ok(other),
        }
    };
}

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

fn exception_to_flow(result: Result<Value, Exception>) -> Result<Flow, LispError> {
    match result {
        Ok(v) => Ok(Flow::Value(v)),
        Err(Exception::Error(e)) => Err(e),
        Err(Exception::Return(v)) => Ok(Flow::Return(v)),
        Err(Exception::Fail(v)) => Ok(Flow::Fail(v)),
    }
}

/// Evaluate a whole program against a fresh lexical environment.
pub fn eval_program(node: &Node, ctx: &mut EvalContext) -> Result<Flow, LispError> {
    eval(node, &Env::new(), ctx)
}

pub fn eval(node: &Node, env: &Env, ctx: &mut EvalContext) -> Result<Flow, LispError> {
    ctx.tick()?;
    match node {
        Node::Lit(lit) => Ok(Flow::Value(literal_value(lit))),

        Node::Var(name) => resolve_var(name, env, ctx).map(Flow::Value),

        Node::Data(name) => Ok(Flow::Value(
            ctx.context.get(name).cloned().unwrap_or(Value::Nil),
        )),

        Node::MemoryGet(key) => {
            let key = try_value!(eval(key, env, ctx));
            let name = binding_name("memory/get", &key)?;
            Ok(Flow::Value(
                ctx.user_ns.get(&name).cloned().unwrap_or(Value::Nil),
            ))
        }

        Node::MemoryPut(key, value) => {
            let key = try_value!(eval(key, env, ctx));
            let name = binding_name("memory/put", &key)?;
            check_shadow(&name)?;
            let value = try_value!(eval(value, env, ctx));
            ctx.charge(value.approx_size())?;
            ctx.user_ns.insert(name, value.clone());
            Ok(Flow::Value(value))
        }

        Node::TurnRef(i) => Ok(Flow::Value(
            ctx.turn_history.get(*i).cloned().unwrap_or(Value::Nil),
        )),

        Node::TurnHistory => Ok(Flow::Value(Value::Vector(ctx.turn_history.to_vec()))),

        Node::BudgetRemaining => Ok(Flow::Value(
            ctx.budget_remaining.map(Value::Int).unwrap_or(Value::Nil),
        )),

        Node::Vector(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(try_value!(eval(item, env, ctx)));
            }
            let v = Value::Vector(out);
            ctx.charge(v.approx_size())?;
            Ok(Flow::Value(v))
        }

        Node::SetLit(items) => {
            let mut out: Vec<Value> = Vec::with_capacity(items.len());
            for item in items {
                let v = try_value!(eval(item, env, ctx));
                if !out.contains(&v) {
                    out.push(v);
                }
            }
            let v = Value::Set(out);
            ctx.charge(v.approx_size())?;
            Ok(Flow::Value(v))
        }

        Node::MapLit(pairs) => {
            // Duplicate keys resolve later-wins
            let mut out = BTreeMap::new();
            for (k, v) in pairs {
                let k = try_value!(eval(k, env, ctx));
                let v = try_value!(eval(v, env, ctx));
                out.insert(Key::from_value(&k)?, v);
            }
            let v = Value::Map(out);
            ctx.charge(v.approx_size())?;
            Ok(Flow::Value(v))
        }

        Node::If { cond, then, els } => {
            let test = try_value!(eval(cond, env, ctx));
            if test.truthy() {
                eval(then, env, ctx)
            } else {
                match els {
                    Some(els) => eval(els, env, ctx),
                    None => Ok(Flow::Value(Value::Nil)),
                }
            }
        }

        Node::Do(items) => eval_body(items, env, ctx),

        Node::And(items) => {
            let mut last = Value::Bool(true);
            for item in items {
                let v = try_value!(eval(item, env, ctx));
                if !v.truthy() {
                    return Ok(Flow::Value(v));
                }
                last = v;
            }
            Ok(Flow::Value(last))
        }

        Node::Or(items) => {
            for item in items {
                let v = try_value!(eval(item, env, ctx));
                if v.truthy() {
                    return Ok(Flow::Value(v));
                }
            }
            Ok(Flow::Value(Value::Nil))
        }

        Node::Let { bindings, body } => {
            let mut scope = env.clone();
            for (pattern, expr) in bindings {
                let v = try_value!(eval(expr, &scope, ctx));
                let mut frame = BTreeMap::new();
                binder::bind(pattern, &v, &mut frame)?;
                scope = scope.extend(frame);
            }
            eval_body(body, &scope, ctx)
        }

        Node::Loop { bindings, body } => {
            let mut scope = env.clone();
            for (pattern, expr) in bindings {
                let v = try_value!(eval(expr, &scope, ctx));
                let mut frame = BTreeMap::new();
                binder::bind(pattern, &v, &mut frame)?;
                scope = scope.extend(frame);
            }

            let mut iterations = 0usize;
            loop {
                match eval_body(body, &scope, ctx)? {
                    Flow::Recur(args) => {
                        iterations += 1;
                        if iterations >= ctx.limits.loop_limit {
                            return Err(LispError::LoopLimitExceeded(ctx.limits.loop_limit));
                        }
                        let mut frame = BTreeMap::new();
                        for ((pattern, _), value) in bindings.iter().zip(args.iter()) {
                            ctx.charge(value.approx_size())?;
                            binder::bind(pattern, value, &mut frame)?;
                        }
                        scope = env.extend(frame);
                    }
                    other => return Ok(other),
                }
            }
        }

        Node::Recur(args) => {
            let mut out = Vec::with_capacity(args.len());
            for arg in args {
                out.push(try_value!(eval(arg, env, ctx)));
            }
            Ok(Flow::Recur(out))
        }

        Node::Fn {
            name,
            params,
            rest,
            body,
            docstring,
        } => Ok(Flow::Value(Value::Closure(Arc::new(Closure {
            name: name.clone(),
            params: params.clone(),
            rest: rest.as_deref().cloned(),
            body: body.clone(),
            env: env.clone(),
            turn_history: ctx.turn_history.clone(),
            docstring: docstring.clone(),
            return_type: None,
        })))),

        Node::Def { name, value, .. } => {
            check_shadow(name)?;
            let v = try_value!(eval(value, env, ctx));
            ctx.charge(v.approx_size())?;
            ctx.user_ns.insert(name.clone(), v);
            Ok(Flow::Value(Value::Var(name.clone())))
        }

        Node::Call { target, args } => {
            let f = try_value!(eval(target, env, ctx));
            let mut call_args = Vec::with_capacity(args.len());
            for arg in args {
                call_args.push(try_value!(eval(arg, env, ctx)));
            }
            exception_to_flow(apply_value(&f, &call_args, ctx))
        }

        Node::CallTool { name, args, .. } => {
            let args_v = try_value!(eval(args, env, ctx));
            let arg_map = match args_v {
                Value::Map(m) => keywordize(m),
                other => {
                    return Err(LispError::invalid_form(format!(
                        "tool {} takes an argument map, got {}",
                        name,
                        other.type_name()
                    )))
                }
            };
            log::debug!("dispatching tool {}", name);
            let result = ctx.tools.dispatch(name, &arg_map)?;
            ctx.charge(result.approx_size())?;
            ctx.tool_calls.push(ToolCall {
                name: name.clone(),
                args: Value::Map(arg_map),
                result: result.clone(),
            });
            Ok(Flow::Value(result))
        }

        Node::Task { id, body } => {
            let id_v = try_value!(eval(id, env, ctx));
            let key = task_id_string(&id_v);
            if let Some(journal) = &ctx.journal {
                if let Some(committed) = journal.get(&key) {
                    log::debug!("task {} replayed from journal", key);
                    return Ok(Flow::Value(committed.clone()));
                }
            }
            match eval_body(body, env, ctx)? {
                Flow::Value(v) => {
                    if let Some(journal) = &mut ctx.journal {
                        journal.insert(key, v.clone());
                    }
                    Ok(Flow::Value(v))
                }
                // fail (and any other early exit) leaves the journal untouched
                other => Ok(other),
            }
        }

        Node::StepDone { id, summary } => {
            let id_v = try_value!(eval(id, env, ctx));
            let summary_v = try_value!(eval(summary, env, ctx));
            ctx.summaries
                .insert(task_id_string(&id_v), crate::value::display_plain(&summary_v));
            Ok(Flow::Value(Value::Nil))
        }

        Node::TaskReset(id) => {
            let id_v = try_value!(eval(id, env, ctx));
            let key = task_id_string(&id_v);
            if let Some(journal) = &mut ctx.journal {
                journal.remove(&key);
            }
            Ok(Flow::Value(Value::Nil))
        }

        Node::Pmap { f, coll } => {
            let f = try_value!(eval(f, env, ctx));
            let coll = try_value!(eval(coll, env, ctx));
            exception_to_flow(crate::parallel::pmap(ctx, &f, &coll))
        }

        Node::Pcalls(thunks) => {
            let mut fs = Vec::with_capacity(thunks.len());
            for thunk in thunks {
                fs.push(try_value!(eval(thunk, env, ctx)));
            }
            exception_to_flow(crate::parallel::pcalls(ctx, &fs))
        }

        Node::Juxt(items) => {
            let mut fs = Vec::with_capacity(items.len());
            for item in items {
                let f = try_value!(eval(item, env, ctx));
                if !f.is_callable() {
                    return Err(LispError::type_error(
                        "juxt",
                        "functions or keywords",
                        f.type_name(),
                    ));
                }
                fs.push(f);
            }
            Ok(Flow::Value(Value::Juxt(Arc::new(fs))))
        }

        Node::Where { path, op, operand } => {
            let operand = match operand {
                Some(expr) => Some(try_value!(eval(expr, env, ctx))),
                None => None,
            };
            Ok(Flow::Value(Value::Pred(Arc::new(Pred::Where {
                path: path.clone(),
                op: *op,
                operand,
            }))))
        }

        Node::Combinator { kind, preds } => {
            let mut fs = Vec::with_capacity(preds.len());
            for pred in preds {
                let f = try_value!(eval(pred, env, ctx));
                if !f.is_callable() {
                    return Err(LispError::type_error(
                        kind.name(),
                        "predicate functions",
                        f.type_name(),
                    ));
                }
                fs.push(f);
            }
            Ok(Flow::Value(Value::Pred(Arc::new(Pred::Comb {
                kind: *kind,
                preds: fs,
            }))))
        }

        Node::Return(inner) => {
            let v = try_value!(eval(inner, env, ctx));
            Ok(Flow::Return(v))
        }

        Node::Fail(inner) => {
            let v = try_value!(eval(inner, env, ctx));
            Ok(Flow::Fail(v))
        }
    }
}

/// Evaluate a body sequence: intermediate values are discarded, every
/// short-circuit propagates, the last expression's flow is the result.
fn eval_body(items: &[Node], env: &Env, ctx: &mut EvalContext) -> Result<Flow, LispError> {
    let Some((last, init)) = items.split_last() else {
        return Ok(Flow::Value(Value::Nil));
    };
    for item in init {
        match eval(item, env, ctx)? {
            Flow::Value(_) => {}
            other => return Ok(other),
        }
    }
    eval(last, env, ctx)
}

/// Resolution precedence: lexical env, user namespace, builtins; `%`
/// placeholders outside a short fn and everything else unresolved error out.
fn resolve_var(name: &str, env: &Env, ctx: &EvalContext) -> Result<Value, LispError> {
    if let Some(v) = env.get(name) {
        return Ok(v);
    }
    if let Some(v) = ctx.user_ns.get(name) {
        return Ok(v.clone());
    }
    if let Some(b) = builtins::lookup(name) {
        return Ok(Value::Builtin(b));
    }
    if name.starts_with('%') {
        return Err(LispError::InvalidPlaceholder(name.to_string()));
    }
    Err(LispError::UnboundVar(name.to_string()))
}

fn check_shadow(name: &str) -> Result<(), LispError> {
    if builtins::lookup(name).is_some() || crate::analyzer::SPECIAL_FORMS.contains(&name) {
        return Err(LispError::CannotShadowBuiltin(name.to_string()));
    }
    Ok(())
}

fn binding_name(function: &str, key: &Value) -> Result<String, LispError> {
    match key {
        Value::Keyword(k) => Ok(k.clone()),
        Value::Str(s) => Ok(s.clone()),
        other => Err(LispError::type_error(
            function,
            "a keyword or string key",
            other.type_name(),
        )),
    }
}

fn task_id_string(id: &Value) -> String {
    match id {
        Value::Str(s) => s.clone(),
        Value::Keyword(k) => k.clone(),
        other => other.to_string(),
    }
}

fn keywordize(map: BTreeMap<Key, Value>) -> BTreeMap<Key, Value> {
    map.into_iter()
        .map(|(k, v)| match k {
            Key::Str(s) => (Key::Keyword(s), v),
            other => (other, v),
        })
        .collect()
}

// ============================================================================
// Application
// ============================================================================

/// Call any callable value. This is the bridge the builtin catalog uses for
/// its higher-order members, so closures, builtins, keyword getters, `where`
/// predicates, and `juxt` bundles behave identically everywhere.
pub fn apply_value(f: &Value, args: &[Value], ctx: &mut EvalContext) -> Result<Value, Exception> {
    ctx.tick()?;
    match f {
        Value::Closure(closure) => {
            ctx.enter_frame()?;
            let result = call_closure(closure, args, ctx);
            ctx.exit_frame();
            result
        }
        Value::Builtin(builtin) => {
            let result = builtins::call(ctx, *builtin, args)?;
            ctx.charge(result.approx_size())?;
            Ok(result)
        }
        Value::Keyword(name) => {
            if args.is_empty() || args.len() > 2 {
                return Err(LispError::arity_error(name, "1-2", args.len()).into());
            }
            let fallback = args.get(1).cloned().unwrap_or(Value::Nil);
            match &args[0] {
                Value::Map(m) => Ok(map_lookup(m, &Key::keyword(name))
                    .cloned()
                    .unwrap_or(fallback)),
                Value::Nil => Ok(fallback),
                other => Err(LispError::type_error(
                    name,
                    "a map to look the keyword up in",
                    other.type_name(),
                )
                .into()),
            }
        }
        Value::Pred(pred) => {
            if args.len() != 1 {
                return Err(LispError::arity_error("predicate", "1", args.len()).into());
            }
            apply_pred(pred, &args[0], ctx)
        }
        Value::Juxt(fs) => {
            let mut out = Vec::with_capacity(fs.len());
            for f in fs.iter() {
                out.push(apply_value(f, args, ctx)?);
            }
            Ok(Value::Vector(out))
        }
        other => {
            Err(LispError::type_error("call", "a function", other.type_name()).into())
        }
    }
}

fn call_closure(
    closure: &Closure,
    args: &[Value],
    ctx: &mut EvalContext,
) -> Result<Value, Exception> {
    let fn_name = closure.name.as_deref().unwrap_or("fn");

    if closure.rest.is_none() && args.len() > closure.params.len() {
        return Err(LispError::ArityMismatch {
            function: fn_name.to_string(),
            expected: closure.params.len(),
            actual: args.len(),
        }
        .into());
    }

    let bind_frame = |args: &[Value], recur: bool| -> Result<BTreeMap<String, Value>, LispError> {
        let mut frame = BTreeMap::new();
        for (i, pattern) in closure.params.iter().enumerate() {
            binder::bind(pattern, args.get(i).unwrap_or(&Value::Nil), &mut frame)?;
        }
        if let Some(rest) = &closure.rest {
            let rest_value = if recur {
                // recur passes the rest binding as a single value
                args.get(closure.params.len()).cloned().unwrap_or(Value::Nil)
            } else {
                Value::Vector(args.iter().skip(closure.params.len()).cloned().collect())
            };
            binder::bind(rest, &rest_value, &mut frame)?;
        }
        Ok(frame)
    };

    let first_frame = bind_frame(args, false)?;

    // The closure body sees the captured turn history, not the caller's
    let saved_history = std::mem::replace(&mut ctx.turn_history, closure.turn_history.clone());

    let mut scope = closure.env.extend(first_frame);
    let mut iterations = 0usize;
    let result = loop {
        match eval_body(&closure.body, &scope, ctx) {
            Ok(Flow::Value(v)) => break Ok(v),
            Ok(Flow::Recur(new_args)) => {
                iterations += 1;
                if iterations >= ctx.limits.loop_limit {
                    break Err(Exception::Error(LispError::LoopLimitExceeded(
                        ctx.limits.loop_limit,
                    )));
                }
                match bind_frame(&new_args, true) {
                    Ok(frame) => scope = closure.env.extend(frame),
                    Err(e) => break Err(Exception::Error(e)),
                }
            }
            Ok(Flow::Return(v)) => break Err(Exception::Return(v)),
            Ok(Flow::Fail(v)) => break Err(Exception::Fail(v)),
            Err(e) => break Err(Exception::Error(e)),
        }
    };

    ctx.turn_history = saved_history;
    result
}

// ============================================================================
// where / combinator predicates
// ============================================================================

/// Keyword/string coercing equality used by the where operators. Booleans
/// and numbers never coerce.
fn flex_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    matches!(
        (a, b),
        (Value::Keyword(x), Value::Str(y)) | (Value::Str(x), Value::Keyword(y)) if x == y
    )
}

fn walk_path(item: &Value, path: &[PathSeg]) -> Value {
    let mut current = item.clone();
    for seg in path {
        let key = match seg {
            PathSeg::Keyword(name) => Key::Keyword(name.clone()),
            PathSeg::Str(name) => Key::Str(name.clone()),
        };
        current = match current {
            Value::Map(m) => map_lookup(&m, &key).cloned().unwrap_or(Value::Nil),
            _ => Value::Nil,
        };
    }
    current
}

fn apply_pred(pred: &Pred, item: &Value, ctx: &mut EvalContext) -> Result<Value, Exception> {
    match pred {
        Pred::Where { path, op, operand } => {
            let field = walk_path(item, path);
            let pass = where_test(*op, &field, operand.as_ref())?;
            Ok(Value::Bool(pass))
        }
        Pred::Comb { kind, preds } => {
            let mut hits = 0usize;
            for pred in preds {
                if apply_value(pred, &[item.clone()], ctx)?.truthy() {
                    hits += 1;
                } else if *kind == CombKind::AllOf {
                    return Ok(Value::Bool(false));
                }
            }
            let pass = match kind {
                CombKind::AllOf => hits == preds.len(),
                CombKind::AnyOf => hits > 0,
                CombKind::NoneOf => hits == 0,
            };
            Ok(Value::Bool(pass))
        }
    }
}

fn where_test(op: WhereOp, field: &Value, operand: Option<&Value>) -> Result<bool, LispError> {
    let operand = operand.unwrap_or(&Value::Nil);
    match op {
        WhereOp::Truthy => Ok(field.truthy()),
        WhereOp::Eq => Ok(flex_eq(field, operand)),
        WhereOp::NotEq => Ok(!flex_eq(field, operand)),
        WhereOp::Gt | WhereOp::Lt | WhereOp::Gte | WhereOp::Lte => {
            // A missing field never satisfies an ordering test
            if matches!(field, Value::Nil) || matches!(operand, Value::Nil) {
                return Ok(false);
            }
            let ord = crate::value::compare(field, operand).map_err(|e| match e {
                LispError::TypeMismatch { expected, actual, .. } => LispError::TypeMismatch {
                    function: "where".to_string(),
                    expected,
                    actual,
                },
                other => other,
            })?;
            Ok(match op {
                WhereOp::Gt => ord == std::cmp::Ordering::Greater,
                WhereOp::Lt => ord == std::cmp::Ordering::Less,
                WhereOp::Gte => ord != std::cmp::Ordering::Less,
                WhereOp::Lte => ord != std::cmp::Ordering::Greater,
                _ => unreachable!(),
            })
        }
        WhereOp::Includes => match field {
            Value::Nil => Ok(false),
            Value::Str(s) => match operand {
                Value::Str(needle) => Ok(s.contains(needle.as_str())),
                Value::Keyword(needle) => Ok(s.contains(needle.as_str())),
                other => Err(LispError::InvalidWhereForm(format!(
                    "includes over a string needs a string operand, got {}",
                    other.type_name()
                ))),
            },
            Value::Vector(items) | Value::Set(items) => {
                Ok(items.iter().any(|x| flex_eq(x, operand)))
            }
            other => Err(LispError::InvalidWhereForm(format!(
                "includes needs a string or collection field, got {}",
                other.type_name()
            ))),
        },
        WhereOp::In => match operand {
            Value::Nil => Ok(false),
            Value::Vector(items) | Value::Set(items) => {
                Ok(items.iter().any(|x| flex_eq(x, field)))
            }
            other => Err(LispError::InvalidWhereForm(format!(
                "in needs a collection operand, got {}",
                other.type_name()
            ))),
        },
    }
}

// ============================================================================
// Applier wiring for the builtin catalog
// ============================================================================

impl Applier for EvalContext {
    fn apply(&mut self, f: &Value, args: &[Value]) -> Result<Value, Exception> {
        apply_value(f, args, self)
    }

    fn print_line(&mut self, line: String) {
        self.push_print(line);
    }

    fn float_precision(&self) -> Option<u32> {
        self.float_precision
    }

    fn charge(&mut self, bytes: usize) -> Result<(), LispError> {
        EvalContext::charge(self, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze_program;
    use crate::config::Limits;
    use crate::reader::parse;

    fn run_src(src: &str) -> Result<Flow, LispError> {
        run_with(src, EvalContext::new(Limits::default()))
    }

    fn run_with(src: &str, mut ctx: EvalContext) -> Result<Flow, LispError> {
        let node = analyze_program(&parse(src)?)?;
        eval_program(&node, &mut ctx)
    }

    fn value_of(src: &str) -> Value {
        match run_src(src).expect("eval ok") {
            Flow::Value(v) => v,
            other => panic!("expected value, got {:?}", other),
        }
    }

    #[test]
    fn test_arithmetic_program() {
        assert_eq!(value_of("(+ 1 2 3)"), Value::Int(6));
        assert_eq!(value_of("(* (+ 1 2) 3)"), Value::Int(9));
    }

    #[test]
    fn test_if_and_truthiness() {
        assert_eq!(value_of("(if nil 1 2)"), Value::Int(2));
        assert_eq!(value_of("(if 0 1 2)"), Value::Int(1));
        assert_eq!(value_of("(if false 1)"), Value::Nil);
    }

    #[test]
    fn test_and_or_shortcircuit_values() {
        assert_eq!(value_of("(and 1 2 3)"), Value::Int(3));
        assert_eq!(value_of("(and 1 nil (unbound))"), Value::Nil);
        assert_eq!(value_of("(or nil false 7)"), Value::Int(7));
        assert_eq!(value_of("(or)"), Value::Nil);
        assert_eq!(value_of("(and)"), Value::Bool(true));
    }

    #[test]
    fn test_let_destructuring() {
        assert_eq!(
            value_of("(let [{:keys [a b]} {:a 1 :b 2}] (+ a b))"),
            Value::Int(3)
        );
        assert_eq!(value_of("(let [[x y] [10 20 30]] (+ x y))"), Value::Int(30));
    }

    #[test]
    fn test_nil_preserved_over_default() {
        assert_eq!(
            value_of("(let [{:keys [x] :or {x 0}} {:x nil}] x)"),
            Value::Nil
        );
        assert_eq!(
            value_of("(let [{:keys [x] :or {x 0}} {}] x)"),
            Value::Int(0)
        );
    }

    #[test]
    fn test_loop_recur() {
        assert_eq!(
            value_of("(loop [i 0 acc 0] (if (< i 5) (recur (inc i) (+ acc i)) acc))"),
            Value::Int(10)
        );
    }

    #[test]
    fn test_loop_limit() {
        let err = run_src("(loop [i 0] (recur (inc i)))").unwrap_err();
        assert_eq!(err.reason(), "loop_limit_exceeded");
    }

    #[test]
    fn test_fn_recur() {
        assert_eq!(
            value_of("((fn [i acc] (if (pos? i) (recur (dec i) (+ acc i)) acc)) 4 0)"),
            Value::Int(10)
        );
    }

    #[test]
    fn test_defn_and_call() {
        let mut ctx = EvalContext::new(Limits::default());
        let node = analyze_program(&parse("(defn twice [x] (* x 2)) (twice 21)").unwrap()).unwrap();
        match eval_program(&node, &mut ctx).unwrap() {
            Flow::Value(v) => assert_eq!(v, Value::Int(42)),
            other => panic!("expected value, got {:?}", other),
        }
        assert!(matches!(ctx.user_ns.get("twice"), Some(Value::Closure(_))));
    }

    #[test]
    fn test_def_returns_var_marker() {
        assert_eq!(value_of("(def x 5)"), Value::Var("x".into()));
    }

    #[test]
    fn test_cannot_shadow_builtin() {
        let err = run_src("(def map 1)").unwrap_err();
        assert_eq!(err.reason(), "cannot_shadow_builtin");
        let err = run_src("(defn count [x] x)").unwrap_err();
        assert_eq!(err.reason(), "cannot_shadow_builtin");
    }

    #[test]
    fn test_mutual_recursion_via_user_ns() {
        let src = "(defn my-even? [n] (if (zero? n) true (my-odd? (dec n))))
                   (defn my-odd? [n] (if (zero? n) false (my-even? (dec n))))
                   (my-even? 10)";
        assert_eq!(value_of(src), Value::Bool(true));
    }

    #[test]
    fn test_closure_captures_env() {
        let src = "(let [n 5] (def add-n (fn [x] (+ x n)))) (add-n 10)";
        assert_eq!(value_of(src), Value::Int(15));
    }

    #[test]
    fn test_missing_args_bind_nil_surplus_error() {
        assert_eq!(value_of("((fn [a b] b) 1)"), Value::Nil);
        let err = run_src("((fn [a] a) 1 2)").unwrap_err();
        assert_eq!(err.reason(), "arity_mismatch");
    }

    #[test]
    fn test_variadic_rest_collects() {
        assert_eq!(
            value_of("((fn [a & more] more) 1 2 3)"),
            Value::Vector(vec![Value::Int(2), Value::Int(3)])
        );
        assert_eq!(value_of("((fn [a & more] more) 1)"), Value::Vector(vec![]));
    }

    #[test]
    fn test_unbound_var() {
        let err = run_src("(no-such-thing 1)").unwrap_err();
        assert_eq!(err.reason(), "unbound_var");
    }

    #[test]
    fn test_short_fn() {
        assert_eq!(value_of("(map #(* % 2) [1 2 3])"), value_of("[2 4 6]"));
        assert_eq!(value_of("(#(+ %1 %2) 3 4)"), Value::Int(7));
    }

    #[test]
    fn test_threading_pipeline() {
        assert_eq!(
            value_of("(->> [1 2 3 4] (filter even?) (map inc))"),
            value_of("[3 5]")
        );
    }

    #[test]
    fn test_where_predicate_end_to_end() {
        let src = r#"(->> [{:id 1 :active true} {:id 2 :active false} {:id 3 :active true}]
                          (filter (where :active = true))
                          (pluck :id))"#;
        assert_eq!(
            value_of(src),
            Value::Vector(vec![Value::Int(1), Value::Int(3)])
        );
    }

    #[test]
    fn test_where_keyword_string_coercion() {
        let src = r#"(count (filter (where :status = :active)
                                    [{:status "active"} {:status "done"}]))"#;
        assert_eq!(value_of(src), Value::Int(1));
        // booleans never coerce
        let src = r#"(count (filter (where :flag = "true") [{:flag true}]))"#;
        assert_eq!(value_of(src), Value::Int(0));
    }

    #[test]
    fn test_where_in_and_includes() {
        let src = r#"(count (filter (where :dept in ["a" "b"])
                                    [{:dept "a"} {:dept "c"} {:dept "b"}]))"#;
        assert_eq!(value_of(src), Value::Int(2));
        let src = r#"(count (filter (where :tags includes "hot")
                                    [{:tags ["hot" "new"]} {:tags ["old"]}]))"#;
        assert_eq!(value_of(src), Value::Int(1));
    }

    #[test]
    fn test_where_nested_path() {
        let src = r#"(count (filter (where [:user :age] >= 21)
                                    [{:user {:age 30}} {:user {:age 18}} {}]))"#;
        assert_eq!(value_of(src), Value::Int(1));
    }

    #[test]
    fn test_combinators() {
        let src = r#"(count (filter (all-of (where :a = 1) (where :b = 2))
                                    [{:a 1 :b 2} {:a 1 :b 3}]))"#;
        assert_eq!(value_of(src), Value::Int(1));
        let src = r#"(count (filter (none-of (where :a = 1)) [{:a 1} {:a 2}]))"#;
        assert_eq!(value_of(src), Value::Int(1));
    }

    #[test]
    fn test_juxt() {
        assert_eq!(
            value_of("((juxt :a :b) {:a 1 :b 2})"),
            Value::Vector(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn test_return_short_circuits() {
        match run_src("(do (return 42) (unbound!))").unwrap() {
            Flow::Return(v) => assert_eq!(v, Value::Int(42)),
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_fail_in_unreached_branch_is_inert() {
        match run_src("(if true (return 1) (fail \"no\"))").unwrap() {
            Flow::Return(v) => assert_eq!(v, Value::Int(1)),
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_fail_propagates_through_hof() {
        match run_src("(map (fn [x] (if (= x 2) (fail \"two\") x)) [1 2 3])").unwrap() {
            Flow::Fail(v) => assert_eq!(v, Value::Str("two".into())),
            other => panic!("expected fail, got {:?}", other),
        }
    }

    #[test]
    fn test_println_capture_order() {
        let mut ctx = EvalContext::new(Limits::default());
        let node =
            analyze_program(&parse("(do (println \"a\" 1) (println \"b\") 7)").unwrap()).unwrap();
        let flow = eval_program(&node, &mut ctx).unwrap();
        assert!(matches!(flow, Flow::Value(Value::Int(7))));
        assert_eq!(ctx.prints, vec!["a 1".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_context_access() {
        let mut ctx = EvalContext::new(Limits::default());
        ctx.context.insert("n".into(), Value::Int(5));
        let node = analyze_program(&parse("(inc ctx/n)").unwrap()).unwrap();
        match eval_program(&node, &mut ctx).unwrap() {
            Flow::Value(v) => assert_eq!(v, Value::Int(6)),
            other => panic!("expected value, got {:?}", other),
        }
    }

    #[test]
    fn test_memory_get_put() {
        let mut ctx = EvalContext::new(Limits::default());
        let node = analyze_program(
            &parse("(do (memory/put :seen 3) (inc (memory/get :seen)))").unwrap(),
        )
        .unwrap();
        match eval_program(&node, &mut ctx).unwrap() {
            Flow::Value(v) => assert_eq!(v, Value::Int(4)),
            other => panic!("expected value, got {:?}", other),
        }
        assert_eq!(ctx.user_ns.get("seen"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_turn_history_refs() {
        let mut ctx = EvalContext::new(Limits::default());
        ctx.turn_history = Arc::new(vec![Value::Int(10), Value::Int(20)]);
        let node = analyze_program(&parse("[(inc *1) *2 *3]").unwrap()).unwrap();
        match eval_program(&node, &mut ctx).unwrap() {
            Flow::Value(v) => assert_eq!(
                v,
                Value::Vector(vec![Value::Int(11), Value::Int(20), Value::Nil])
            ),
            other => panic!("expected value, got {:?}", other),
        }
    }

    #[test]
    fn test_task_commits_on_success() {
        let mut ctx = EvalContext::new(Limits::default());
        ctx.journal = Some(BTreeMap::new());
        let node = analyze_program(&parse("(task \"k\" (+ 1 2))").unwrap()).unwrap();
        eval_program(&node, &mut ctx).unwrap();
        assert_eq!(
            ctx.journal.as_ref().unwrap().get("k"),
            Some(&Value::Int(3))
        );
    }

    #[test]
    fn test_task_replays_without_evaluating_body() {
        let mut journal = BTreeMap::new();
        journal.insert("k".to_string(), Value::Int(99));
        let mut ctx = EvalContext::new(Limits::default());
        ctx.journal = Some(journal);
        // Body references an unbound symbol; replay must not evaluate it
        let node = analyze_program(&parse("(task \"k\" (boom))").unwrap()).unwrap();
        match eval_program(&node, &mut ctx).unwrap() {
            Flow::Value(v) => assert_eq!(v, Value::Int(99)),
            other => panic!("expected value, got {:?}", other),
        }
    }

    #[test]
    fn test_task_fail_not_committed() {
        let mut ctx = EvalContext::new(Limits::default());
        ctx.journal = Some(BTreeMap::new());
        let node = analyze_program(&parse("(task \"k\" (fail \"nope\"))").unwrap()).unwrap();
        match eval_program(&node, &mut ctx).unwrap() {
            Flow::Fail(_) => {}
            other => panic!("expected fail, got {:?}", other),
        }
        assert!(ctx.journal.as_ref().unwrap().is_empty());
    }

    #[test]
    fn test_task_without_journal_always_runs() {
        let mut ctx = EvalContext::new(Limits::default());
        let node = analyze_program(&parse("(task \"k\" 7)").unwrap()).unwrap();
        match eval_program(&node, &mut ctx).unwrap() {
            Flow::Value(v) => assert_eq!(v, Value::Int(7)),
            other => panic!("expected value, got {:?}", other),
        }
        assert!(ctx.journal.is_none());
    }

    #[test]
    fn test_step_done_and_task_reset() {
        let mut journal = BTreeMap::new();
        journal.insert("a".to_string(), Value::Int(1));
        let mut ctx = EvalContext::new(Limits::default());
        ctx.journal = Some(journal);
        let node = analyze_program(
            &parse("(do (step-done \"a\" \"fetched orders\") (task-reset \"a\"))").unwrap(),
        )
        .unwrap();
        eval_program(&node, &mut ctx).unwrap();
        assert_eq!(ctx.summaries.get("a"), Some(&"fetched orders".to_string()));
        assert!(ctx.journal.as_ref().unwrap().is_empty());
    }

    #[test]
    fn test_tool_dispatch_and_log_order() {
        let mut ctx = EvalContext::new(Limits::default());
        ctx.tools.register("double", |args| {
            match args.get(&Key::keyword("n")) {
                Some(Value::Int(n)) => Ok(Value::Int(n * 2)),
                _ => Err("missing n".into()),
            }
        });
        let node = analyze_program(
            &parse("[(tool/double {:n 1}) (tool/double {:n 2})]").unwrap(),
        )
        .unwrap();
        match eval_program(&node, &mut ctx).unwrap() {
            Flow::Value(v) => {
                assert_eq!(v, Value::Vector(vec![Value::Int(2), Value::Int(4)]));
            }
            other => panic!("expected value, got {:?}", other),
        }
        let names: Vec<&str> = ctx.tool_calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["double", "double"]);
        assert_eq!(ctx.tool_calls[0].result, Value::Int(2));
    }

    #[test]
    fn test_tool_string_keys_keywordised() {
        let mut ctx = EvalContext::new(Limits::default());
        ctx.tools.register("echo", |args| {
            Ok(args.get(&Key::keyword("q")).cloned().unwrap_or(Value::Nil))
        });
        let node = analyze_program(&parse("(tool/echo {\"q\" 9})").unwrap()).unwrap();
        match eval_program(&node, &mut ctx).unwrap() {
            Flow::Value(v) => assert_eq!(v, Value::Int(9)),
            other => panic!("expected value, got {:?}", other),
        }
    }

    #[test]
    fn test_tool_not_found_and_bad_args() {
        let err = run_src("(tool/missing {})").unwrap_err();
        assert_eq!(err.reason(), "tool_not_found");
        let mut ctx = EvalContext::new(Limits::default());
        ctx.tools.register("t", |_| Ok(Value::Nil));
        let err = run_with("(tool/t 42)", ctx).unwrap_err();
        assert_eq!(err.reason(), "invalid_form");
    }

    #[test]
    fn test_deep_recursion_is_guarded() {
        let err = run_src("(defn f [x] (inc (f x))) (f 1)").unwrap_err();
        assert_eq!(err.reason(), "memory_exceeded");
    }

    #[test]
    fn test_duplicate_map_keys_later_wins() {
        assert_eq!(value_of("(get {:a 1 :a 2} :a)"), Value::Int(2));
    }

    #[test]
    fn test_fnil_patches_nil() {
        assert_eq!(value_of("((fnil inc 0) nil)"), Value::Int(1));
        assert_eq!(value_of("((fnil inc 0) 10)"), Value::Int(11));
    }

    #[test]
    fn test_comp_and_partial() {
        assert_eq!(value_of("((comp inc inc) 1)"), Value::Int(3));
        assert_eq!(value_of("((partial + 10) 1 2)"), Value::Int(13));
    }

    #[test]
    fn test_sort_by_keyword() {
        assert_eq!(
            value_of("(pluck :n (sort-by :n [{:n 3} {:n 1} {:n 2}]))"),
            Value::Vector(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn test_group_by_and_sum_by() {
        let src = r#"(let [groups (group-by :dept [{:dept "a" :x 1} {:dept "b" :x 2} {:dept "a" :x 3}])]
                       (sum-by :x (get groups "a")))"#;
        assert_eq!(value_of(src), Value::Int(4));
    }

    #[test]
    fn test_if_let_and_when_let() {
        assert_eq!(value_of("(if-let [x (get {:a 1} :a)] (inc x) :none)"), Value::Int(2));
        assert_eq!(
            value_of("(if-let [x (get {} :a)] (inc x) :none)"),
            Value::Keyword("none".into())
        );
        assert_eq!(value_of("(when-let [x 5] (* x 2))"), Value::Int(10));
        assert_eq!(value_of("(when-let [x nil] (* x 2))"), Value::Nil);
    }

    #[test]
    fn test_interop_shims_evaluate() {
        assert_eq!(
            value_of("(.indexOf \"hello\" \"ll\")"),
            Value::Int(2)
        );
        assert_eq!(
            value_of("(.getTime (LocalDate/parse \"1970-01-02\"))"),
            Value::Int(86_400_000)
        );
        assert!(matches!(
            value_of("(System/currentTimeMillis)"),
            Value::Int(n) if n > 0
        ));
    }
}
