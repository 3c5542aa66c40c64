// ABOUTME: Analyzer resolving raw forms into the canonical Core AST

use crate::ast::{CombKind, Literal, Node, PathSeg, Pattern, WhereOp};
use crate::error::LispError;
use crate::reader::Form;

/// Names with special meaning at the head of a list. Closed set; everything
/// else in head position is an ordinary call.
pub const SPECIAL_FORMS: &[&str] = &[
    "if", "do", "when", "cond", "and", "or", "let", "loop", "recur", "fn", "def", "defn",
    "if-let", "when-let", "->", "->>", "juxt", "pcalls", "pmap", "task", "task-reset",
    "step-done", "where", "all-of", "any-of", "none-of", "call", "return", "fail",
    "budget-remaining", "turn-history",
];

/// Analysis context: whether `%` placeholders are live, and whether the
/// current position is the tail of a recursion point (carrying its binding
/// count for `recur` arity checking).
#[derive(Clone, Copy)]
struct Ctx {
    short_fn: bool,
    recur_arity: Option<usize>,
    tail: bool,
}

impl Ctx {
    fn top() -> Ctx {
        Ctx {
            short_fn: false,
            recur_arity: None,
            tail: false,
        }
    }

    fn value(self) -> Ctx {
        Ctx { tail: false, ..self }
    }

    fn tail_of(self, recur_arity: Option<usize>) -> Ctx {
        Ctx {
            recur_arity,
            tail: true,
            ..self
        }
    }
}

/// Analyze a whole program. Multiple top-level forms become a `do`.
pub fn analyze_program(forms: &[Form]) -> Result<Node, LispError> {
    let ctx = Ctx::top();
    match forms {
        [] => Ok(Node::nil()),
        [single] => analyze(single, ctx),
        many => {
            let nodes = many
                .iter()
                .map(|f| analyze(f, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Node::Do(nodes))
        }
    }
}

fn analyze(form: &Form, ctx: Ctx) -> Result<Node, LispError> {
    match form {
        Form::Nil => Ok(Node::Lit(Literal::Nil)),
        Form::Bool(b) => Ok(Node::Lit(Literal::Bool(*b))),
        Form::Int(n) => Ok(Node::Lit(Literal::Int(*n))),
        Form::Float(f) => Ok(Node::Lit(Literal::Float(*f))),
        Form::Str(s) => Ok(Node::Lit(Literal::Str(s.clone()))),
        Form::Keyword(k) => Ok(Node::Lit(Literal::Keyword(k.clone()))),
        Form::Symbol(name) => analyze_symbol(name, ctx),
        Form::NsSymbol { ns, name } => analyze_ns_symbol(ns, name),
        Form::Vector(items) => Ok(Node::Vector(analyze_all(items, ctx.value())?)),
        Form::SetForm(items) => Ok(Node::SetLit(analyze_all(items, ctx.value())?)),
        Form::MapForm(items) => {
            let mut pairs = Vec::with_capacity(items.len() / 2);
            for kv in items.chunks(2) {
                let k = analyze(&kv[0], ctx.value())?;
                let v = analyze(&kv[1], ctx.value())?;
                pairs.push((k, v));
            }
            Ok(Node::MapLit(pairs))
        }
        Form::ShortFn(body) => analyze_short_fn(body, ctx),
        Form::List(items) => analyze_list(items, ctx),
    }
}

fn analyze_all(forms: &[Form], ctx: Ctx) -> Result<Vec<Node>, LispError> {
    forms.iter().map(|f| analyze(f, ctx)).collect()
}

// ============================================================================
// Symbols
// ============================================================================

fn placeholder_index(name: &str) -> Option<usize> {
    if name == "%" {
        return Some(1);
    }
    let digits = name.strip_prefix('%')?;
    let n: usize = digits.parse().ok()?;
    (1..=9).contains(&n).then_some(n)
}

fn analyze_symbol(name: &str, ctx: Ctx) -> Result<Node, LispError> {
    if let Some(n) = placeholder_index(name) {
        if !ctx.short_fn {
            return Err(LispError::InvalidPlaceholder(name.to_string()));
        }
        return Ok(Node::Var(format!("%{}", n)));
    }
    match name {
        "*1" => Ok(Node::TurnRef(0)),
        "*2" => Ok(Node::TurnRef(1)),
        "*3" => Ok(Node::TurnRef(2)),
        _ => Ok(Node::Var(name.to_string())),
    }
}

fn analyze_ns_symbol(ns: &str, name: &str) -> Result<Node, LispError> {
    match ns {
        "ctx" | "data" => Ok(Node::Data(name.to_string())),
        "tool" => Err(LispError::invalid_form(format!(
            "tool/{} must be called: (tool/{} {{...}})",
            name, name
        ))),
        "memory" => Err(LispError::invalid_form(format!(
            "memory/{} must be called with arguments",
            name
        ))),
        other => Err(LispError::invalid_form(format!(
            "unknown namespace {}/{}",
            other, name
        ))),
    }
}

// ============================================================================
// Short anonymous functions
// ============================================================================

fn max_placeholder(forms: &[Form]) -> usize {
    let mut max = 0;
    for form in forms {
        match form {
            Form::Symbol(s) => {
                if let Some(n) = placeholder_index(s) {
                    max = max.max(n);
                }
            }
            Form::List(items) | Form::Vector(items) | Form::SetForm(items)
            | Form::MapForm(items) | Form::ShortFn(items) => {
                max = max.max(max_placeholder(items));
            }
            _ => {}
        }
    }
    max
}

fn contains_short_fn(forms: &[Form]) -> bool {
    forms.iter().any(|f| match f {
        Form::ShortFn(_) => true,
        Form::List(items) | Form::Vector(items) | Form::SetForm(items) | Form::MapForm(items) => {
            contains_short_fn(items)
        }
        _ => false,
    })
}

fn analyze_short_fn(body: &[Form], ctx: Ctx) -> Result<Node, LispError> {
    if ctx.short_fn || contains_short_fn(body) {
        return Err(LispError::invalid_form("nested #() is not supported"));
    }
    let arity = max_placeholder(body);
    let params = (1..=arity)
        .map(|n| Pattern::Var(format!("%{}", n)))
        .collect();

    let inner = Ctx {
        short_fn: true,
        recur_arity: Some(arity),
        tail: true,
    };
    // #(f %) is a call of f, not a list literal
    let body_node = analyze_list(body, inner)?;
    Ok(Node::Fn {
        name: None,
        params,
        rest: None,
        body: vec![body_node],
        docstring: None,
    })
}

// ============================================================================
// Lists: special forms, interop shims, calls
// ============================================================================

fn analyze_list(items: &[Form], ctx: Ctx) -> Result<Node, LispError> {
    let Some(head) = items.first() else {
        return Ok(Node::nil());
    };
    let args = &items[1..];

    if let Form::Symbol(name) = head {
        match name.as_str() {
            "if" => return analyze_if(args, ctx),
            "when" => return analyze_when(args, ctx),
            "cond" => return analyze_cond(args, ctx),
            "do" => return analyze_do(args, ctx),
            "and" => return Ok(Node::And(analyze_all(args, ctx.value())?)),
            "or" => return Ok(Node::Or(analyze_all(args, ctx.value())?)),
            "let" => return analyze_let(args, ctx, false),
            "loop" => return analyze_let(args, ctx, true),
            "recur" => return analyze_recur(args, ctx),
            "fn" => return analyze_fn(args, ctx, None, None),
            "def" => return analyze_def(args, ctx),
            "defn" => return analyze_defn(args, ctx),
            "if-let" => return analyze_if_let(args, ctx, false),
            "when-let" => return analyze_if_let(args, ctx, true),
            "->" => return analyze_thread(args, ctx, false),
            "->>" => return analyze_thread(args, ctx, true),
            "juxt" => {
                if args.is_empty() {
                    return Err(LispError::invalid_arity("juxt", "expected at least 1 argument"));
                }
                return Ok(Node::Juxt(analyze_all(args, ctx.value())?));
            }
            "pcalls" => return Ok(Node::Pcalls(analyze_all(args, ctx.value())?)),
            "pmap" => {
                if args.len() != 2 {
                    return Err(LispError::invalid_arity(
                        "pmap",
                        format!("expected 2 arguments, got {}", args.len()),
                    ));
                }
                return Ok(Node::Pmap {
                    f: Box::new(analyze(&args[0], ctx.value())?),
                    coll: Box::new(analyze(&args[1], ctx.value())?),
                });
            }
            "task" => {
                if args.len() < 2 {
                    return Err(LispError::invalid_arity(
                        "task",
                        "expected an id and a body",
                    ));
                }
                return Ok(Node::Task {
                    id: Box::new(analyze(&args[0], ctx.value())?),
                    body: analyze_all(&args[1..], ctx.value())?,
                });
            }
            "task-reset" => {
                if args.len() != 1 {
                    return Err(LispError::invalid_arity(
                        "task-reset",
                        format!("expected 1 argument, got {}", args.len()),
                    ));
                }
                return Ok(Node::TaskReset(Box::new(analyze(&args[0], ctx.value())?)));
            }
            "step-done" => {
                if args.len() != 2 {
                    return Err(LispError::invalid_arity(
                        "step-done",
                        format!("expected an id and a summary, got {} arguments", args.len()),
                    ));
                }
                return Ok(Node::StepDone {
                    id: Box::new(analyze(&args[0], ctx.value())?),
                    summary: Box::new(analyze(&args[1], ctx.value())?),
                });
            }
            "where" => return analyze_where(args, ctx),
            "all-of" => return analyze_combinator(CombKind::AllOf, args, ctx),
            "any-of" => return analyze_combinator(CombKind::AnyOf, args, ctx),
            "none-of" => return analyze_combinator(CombKind::NoneOf, args, ctx),
            "call" => {
                if args.is_empty() {
                    return Err(LispError::invalid_arity("call", "expected a function"));
                }
                return Ok(Node::Call {
                    target: Box::new(analyze(&args[0], ctx.value())?),
                    args: analyze_all(&args[1..], ctx.value())?,
                });
            }
            "return" => {
                if args.len() != 1 {
                    return Err(LispError::invalid_arity(
                        "return",
                        format!("expected 1 argument, got {}", args.len()),
                    ));
                }
                return Ok(Node::Return(Box::new(analyze(&args[0], ctx.value())?)));
            }
            "fail" => {
                if args.len() != 1 {
                    return Err(LispError::invalid_arity(
                        "fail",
                        format!("expected 1 argument, got {}", args.len()),
                    ));
                }
                return Ok(Node::Fail(Box::new(analyze(&args[0], ctx.value())?)));
            }
            "budget-remaining" => {
                if !args.is_empty() {
                    return Err(LispError::invalid_arity("budget-remaining", "takes no arguments"));
                }
                return Ok(Node::BudgetRemaining);
            }
            "turn-history" => {
                if !args.is_empty() {
                    return Err(LispError::invalid_arity("turn-history", "takes no arguments"));
                }
                return Ok(Node::TurnHistory);
            }
            // Java interop shims
            "java.util.Date." => {
                return Ok(Node::Call {
                    target: Box::new(Node::Var("now-millis".into())),
                    args: analyze_all(args, ctx.value())?,
                });
            }
            ".getTime" => return rewrite_interop("to-millis", args, 1, ctx),
            ".indexOf" => return rewrite_interop("index-of", args, 2, ctx),
            ".lastIndexOf" => return rewrite_interop("last-index-of", args, 2, ctx),
            other if other.starts_with('.') => {
                return Err(LispError::invalid_form(format!(
                    "unsupported interop method {}",
                    other
                )));
            }
            _ => {}
        }
    }

    if let Form::NsSymbol { ns, name } = head {
        match (ns.as_str(), name.as_str()) {
            ("System", "currentTimeMillis") => {
                return Ok(Node::Call {
                    target: Box::new(Node::Var("now-millis".into())),
                    args: analyze_all(args, ctx.value())?,
                });
            }
            ("LocalDate", "parse") => return rewrite_interop("date-parse", args, 1, ctx),
            ("tool", tool_name) => return analyze_tool_call(tool_name, args, ctx, false),
            ("ctx", tool_name) => return analyze_tool_call(tool_name, args, ctx, true),
            ("memory", "get") => {
                if args.len() != 1 {
                    return Err(LispError::invalid_arity(
                        "memory/get",
                        format!("expected 1 argument, got {}", args.len()),
                    ));
                }
                return Ok(Node::MemoryGet(Box::new(analyze(&args[0], ctx.value())?)));
            }
            ("memory", "put") => {
                if args.len() != 2 {
                    return Err(LispError::invalid_arity(
                        "memory/put",
                        format!("expected 2 arguments, got {}", args.len()),
                    ));
                }
                return Ok(Node::MemoryPut(
                    Box::new(analyze(&args[0], ctx.value())?),
                    Box::new(analyze(&args[1], ctx.value())?),
                ));
            }
            ("memory", other) => {
                return Err(LispError::invalid_form(format!(
                    "unknown memory operation memory/{}",
                    other
                )));
            }
            _ => {}
        }
    }

    // Ordinary call
    Ok(Node::Call {
        target: Box::new(analyze(head, ctx.value())?),
        args: analyze_all(args, ctx.value())?,
    })
}

fn rewrite_interop(target: &str, args: &[Form], arity: usize, ctx: Ctx) -> Result<Node, LispError> {
    if args.len() != arity {
        return Err(LispError::invalid_arity(
            target,
            format!("expected {} argument(s), got {}", arity, args.len()),
        ));
    }
    Ok(Node::Call {
        target: Box::new(Node::Var(target.to_string())),
        args: analyze_all(args, ctx.value())?,
    })
}

fn analyze_tool_call(name: &str, args: &[Form], ctx: Ctx, via_ctx: bool) -> Result<Node, LispError> {
    if name.is_empty() || name.contains('/') {
        return Err(LispError::InvalidCallToolName(format!(
            "tool name must be a single symbol, got {:?}",
            name
        )));
    }
    let args_node = match args {
        [] => Node::MapLit(Vec::new()),
        [one] => analyze(one, ctx.value())?,
        many => {
            return Err(LispError::invalid_arity(
                name,
                format!("tools take a single argument map, got {} arguments", many.len()),
            ));
        }
    };
    Ok(Node::CallTool {
        name: name.to_string(),
        args: Box::new(args_node),
        via_ctx,
    })
}

// ============================================================================
// Control flow
// ============================================================================

fn analyze_if(args: &[Form], ctx: Ctx) -> Result<Node, LispError> {
    if args.len() < 2 || args.len() > 3 {
        return Err(LispError::invalid_arity(
            "if",
            format!("expected 2 or 3 arguments, got {}", args.len()),
        ));
    }
    let cond = analyze(&args[0], ctx.value())?;
    let then = analyze(&args[1], ctx)?;
    let els = match args.get(2) {
        Some(form) => Some(Box::new(analyze(form, ctx)?)),
        None => None,
    };
    Ok(Node::If {
        cond: Box::new(cond),
        then: Box::new(then),
        els,
    })
}

fn analyze_when(args: &[Form], ctx: Ctx) -> Result<Node, LispError> {
    if args.is_empty() {
        return Err(LispError::invalid_arity("when", "expected a condition"));
    }
    let cond = analyze(&args[0], ctx.value())?;
    let then = analyze_body(&args[1..], ctx)?;
    Ok(Node::If {
        cond: Box::new(cond),
        then: Box::new(then),
        els: None,
    })
}

fn analyze_cond(args: &[Form], ctx: Ctx) -> Result<Node, LispError> {
    if args.len() % 2 != 0 {
        return Err(LispError::InvalidCondForm(
            "expected an even number of test/result forms".to_string(),
        ));
    }
    let mut node = Node::nil();
    for pair in args.chunks(2).rev() {
        let test = match &pair[0] {
            Form::Keyword(k) if k == "else" => Node::Lit(Literal::Bool(true)),
            other => analyze(other, ctx.value())?,
        };
        let result = analyze(&pair[1], ctx)?;
        node = Node::If {
            cond: Box::new(test),
            then: Box::new(result),
            els: Some(Box::new(node)),
        };
    }
    Ok(node)
}

fn analyze_do(args: &[Form], ctx: Ctx) -> Result<Node, LispError> {
    if args.is_empty() {
        return Ok(Node::nil());
    }
    let mut nodes = Vec::with_capacity(args.len());
    for (i, form) in args.iter().enumerate() {
        let c = if i + 1 == args.len() { ctx } else { ctx.value() };
        nodes.push(analyze(form, c)?);
    }
    Ok(Node::Do(nodes))
}

/// Body of `when`/`let`/`fn`: one node, wrapping multiple forms in a `do`.
fn analyze_body(forms: &[Form], ctx: Ctx) -> Result<Node, LispError> {
    match forms {
        [] => Ok(Node::nil()),
        [one] => analyze(one, ctx),
        many => analyze_do(many, ctx),
    }
}

fn analyze_let(args: &[Form], ctx: Ctx, is_loop: bool) -> Result<Node, LispError> {
    let form_name = if is_loop { "loop" } else { "let" };
    let Some(Form::Vector(binding_forms)) = args.first() else {
        return Err(LispError::invalid_form(format!(
            "{}: bindings must be a vector",
            form_name
        )));
    };
    if binding_forms.len() % 2 != 0 {
        return Err(LispError::invalid_form(format!(
            "{}: bindings need an even number of forms",
            form_name
        )));
    }

    let mut bindings = Vec::with_capacity(binding_forms.len() / 2);
    for pair in binding_forms.chunks(2) {
        let pattern = analyze_pattern(&pair[0])?;
        let value = analyze(&pair[1], ctx.value())?;
        bindings.push((pattern, value));
    }

    let body_ctx = if is_loop {
        ctx.tail_of(Some(bindings.len()))
    } else {
        ctx
    };

    let mut body = Vec::with_capacity(args.len().saturating_sub(1));
    let body_forms = &args[1..];
    for (i, form) in body_forms.iter().enumerate() {
        let c = if i + 1 == body_forms.len() {
            body_ctx
        } else {
            body_ctx.value()
        };
        body.push(analyze(form, c)?);
    }
    if body.is_empty() {
        body.push(Node::nil());
    }

    if is_loop {
        Ok(Node::Loop { bindings, body })
    } else {
        Ok(Node::Let { bindings, body })
    }
}

fn analyze_recur(args: &[Form], ctx: Ctx) -> Result<Node, LispError> {
    let Some(arity) = ctx.recur_arity else {
        return Err(LispError::invalid_form(
            "recur is only valid inside loop or fn",
        ));
    };
    if !ctx.tail {
        return Err(LispError::invalid_form(
            "recur is only valid in tail position",
        ));
    }
    if args.len() != arity {
        return Err(LispError::invalid_arity(
            "recur",
            format!(
                "recursion point takes {} binding(s), recur got {}",
                arity,
                args.len()
            ),
        ));
    }
    Ok(Node::Recur(analyze_all(args, ctx.value())?))
}

fn analyze_if_let(args: &[Form], ctx: Ctx, when_variant: bool) -> Result<Node, LispError> {
    let form_name = if when_variant { "when-let" } else { "if-let" };
    let Some(Form::Vector(binding)) = args.first() else {
        return Err(LispError::invalid_form(format!(
            "{}: expected a [sym expr] binding vector",
            form_name
        )));
    };
    if binding.len() != 2 {
        return Err(LispError::invalid_form(format!(
            "{}: expected exactly one binding",
            form_name
        )));
    }
    let Form::Symbol(name) = &binding[0] else {
        return Err(LispError::invalid_form(format!(
            "{}: binding target must be a simple symbol",
            form_name
        )));
    };

    let value = analyze(&binding[1], ctx.value())?;
    let (then, els) = if when_variant {
        (analyze_body(&args[1..], ctx)?, None)
    } else {
        if args.len() < 2 || args.len() > 3 {
            return Err(LispError::invalid_arity(
                form_name,
                "expected a then branch and an optional else branch",
            ));
        }
        let then = analyze(&args[1], ctx)?;
        let els = match args.get(2) {
            Some(form) => Some(Box::new(analyze(form, ctx)?)),
            None => None,
        };
        (then, els)
    };

    Ok(Node::Let {
        bindings: vec![(Pattern::Var(name.clone()), value)],
        body: vec![Node::If {
            cond: Box::new(Node::Var(name.clone())),
            then: Box::new(then),
            els,
        }],
    })
}

// ============================================================================
// Threading macros (desugared before analysis sees the steps)
// ============================================================================

fn analyze_thread(args: &[Form], ctx: Ctx, thread_last: bool) -> Result<Node, LispError> {
    let name = if thread_last { "->>" } else { "->" };
    let Some(first) = args.first() else {
        return Err(LispError::InvalidThreadForm(format!(
            "{}: expected an initial value",
            name
        )));
    };

    let mut acc = first.clone();
    for step in &args[1..] {
        acc = match step {
            Form::Symbol(_) | Form::Keyword(_) | Form::NsSymbol { .. } => {
                Form::List(vec![step.clone(), acc])
            }
            Form::List(items) if !items.is_empty() => {
                let mut call = Vec::with_capacity(items.len() + 1);
                if thread_last {
                    call.extend(items.iter().cloned());
                    call.push(acc);
                } else {
                    call.push(items[0].clone());
                    call.push(acc);
                    call.extend(items[1..].iter().cloned());
                }
                Form::List(call)
            }
            other => {
                return Err(LispError::InvalidThreadForm(format!(
                    "{}: cannot thread through {}",
                    name,
                    other.describe()
                )));
            }
        };
    }
    // The final desugared call sits where the threading form sat
    analyze(&acc, ctx)
}

// ============================================================================
// where / predicate combinators
// ============================================================================

fn path_seg(form: &Form) -> Result<PathSeg, LispError> {
    match form {
        Form::Keyword(k) => Ok(PathSeg::Keyword(k.clone())),
        Form::Str(s) => Ok(PathSeg::Str(s.clone())),
        other => Err(LispError::InvalidWhereForm(format!(
            "field path elements must be keywords or strings, got {}",
            other.describe()
        ))),
    }
}

fn analyze_where(args: &[Form], ctx: Ctx) -> Result<Node, LispError> {
    let (field, op_form, operand) = match args {
        [field] => (field, None, None),
        [field, op, value] => (field, Some(op), Some(value)),
        _ => {
            return Err(LispError::InvalidWhereForm(format!(
                "expected (where field) or (where field op value), got {} arguments",
                args.len()
            )));
        }
    };

    let path = match field {
        Form::Vector(items) if !items.is_empty() => {
            items.iter().map(path_seg).collect::<Result<Vec<_>, _>>()?
        }
        Form::Vector(_) => {
            return Err(LispError::InvalidWhereForm(
                "field path must not be empty".to_string(),
            ));
        }
        single => vec![path_seg(single)?],
    };

    let op = match op_form {
        None => WhereOp::Truthy,
        Some(form) => {
            let op_name = match form {
                Form::Symbol(s) => s.as_str(),
                Form::Keyword(k) => k.as_str(),
                Form::Str(s) => s.as_str(),
                other => {
                    return Err(LispError::InvalidWhereOperator(other.describe()));
                }
            };
            match op_name {
                "=" | "eq" => WhereOp::Eq,
                "not=" | "!=" | "not_eq" => WhereOp::NotEq,
                ">" | "gt" => WhereOp::Gt,
                "<" | "lt" => WhereOp::Lt,
                ">=" | "gte" => WhereOp::Gte,
                "<=" | "lte" => WhereOp::Lte,
                "includes" | "includes?" => WhereOp::Includes,
                "in" => WhereOp::In,
                "truthy" => WhereOp::Truthy,
                other => return Err(LispError::InvalidWhereOperator(other.to_string())),
            }
        }
    };

    let operand = match operand {
        Some(form) if op != WhereOp::Truthy => Some(Box::new(analyze(form, ctx.value())?)),
        Some(_) => None,
        None => None,
    };

    Ok(Node::Where { path, op, operand })
}

fn analyze_combinator(kind: CombKind, args: &[Form], ctx: Ctx) -> Result<Node, LispError> {
    if args.is_empty() {
        return Err(LispError::invalid_arity(
            kind.name(),
            "expected at least 1 predicate",
        ));
    }
    Ok(Node::Combinator {
        kind,
        preds: analyze_all(args, ctx.value())?,
    })
}

// ============================================================================
// fn / def / defn
// ============================================================================

fn split_params(forms: &[Form]) -> Result<(Vec<Pattern>, Option<Pattern>), LispError> {
    let mut params = Vec::new();
    let mut iter = forms.iter().peekable();
    while let Some(form) = iter.next() {
        if matches!(form, Form::Symbol(s) if s == "&") {
            let Some(rest_form) = iter.next() else {
                return Err(LispError::UnsupportedPattern(
                    "& must be followed by a rest pattern".to_string(),
                ));
            };
            if iter.next().is_some() {
                return Err(LispError::UnsupportedPattern(
                    "only one pattern may follow &".to_string(),
                ));
            }
            return Ok((params, Some(analyze_pattern(rest_form)?)));
        }
        params.push(analyze_pattern(form)?);
    }
    Ok((params, None))
}

fn analyze_fn(
    args: &[Form],
    ctx: Ctx,
    name: Option<String>,
    docstring: Option<String>,
) -> Result<Node, LispError> {
    let Some(Form::Vector(param_forms)) = args.first() else {
        return Err(LispError::invalid_form("fn: expected a parameter vector"));
    };
    let (params, rest) = split_params(param_forms)?;
    let recur_arity = params.len() + usize::from(rest.is_some());

    let body_ctx = Ctx {
        short_fn: ctx.short_fn,
        recur_arity: Some(recur_arity),
        tail: true,
    };
    let body_forms = &args[1..];
    let mut body = Vec::with_capacity(body_forms.len());
    for (i, form) in body_forms.iter().enumerate() {
        let c = if i + 1 == body_forms.len() {
            body_ctx
        } else {
            body_ctx.value()
        };
        body.push(analyze(form, c)?);
    }
    if body.is_empty() {
        body.push(Node::nil());
    }

    Ok(Node::Fn {
        name,
        params,
        rest: rest.map(Box::new),
        body,
        docstring,
    })
}

fn analyze_def(args: &[Form], ctx: Ctx) -> Result<Node, LispError> {
    if args.len() != 2 {
        return Err(LispError::invalid_arity(
            "def",
            format!("expected a name and a value, got {} arguments", args.len()),
        ));
    }
    let Form::Symbol(name) = &args[0] else {
        return Err(LispError::invalid_form("def: name must be a simple symbol"));
    };
    let value = analyze(&args[1], ctx.value())?;
    Ok(Node::Def {
        name: name.clone(),
        value: Box::new(value),
        docstring: None,
    })
}

fn analyze_defn(args: &[Form], ctx: Ctx) -> Result<Node, LispError> {
    if args.len() < 2 {
        return Err(LispError::invalid_arity(
            "defn",
            "expected a name, parameters, and a body",
        ));
    }
    let Form::Symbol(name) = &args[0] else {
        return Err(LispError::invalid_form("defn: name must be a simple symbol"));
    };

    // Optional docstring between name and parameter vector
    let (docstring, fn_args) = match &args[1] {
        Form::Str(doc) if args.len() > 2 => (Some(doc.clone()), &args[2..]),
        _ => (None, &args[1..]),
    };

    let fn_node = analyze_fn(fn_args, ctx, Some(name.clone()), docstring.clone())?;
    Ok(Node::Def {
        name: name.clone(),
        value: Box::new(fn_node),
        docstring,
    })
}

// ============================================================================
// Destructuring patterns
// ============================================================================

fn literal_default(form: &Form) -> Result<Literal, LispError> {
    match form {
        Form::Nil => Ok(Literal::Nil),
        Form::Bool(b) => Ok(Literal::Bool(*b)),
        Form::Int(n) => Ok(Literal::Int(*n)),
        Form::Float(f) => Ok(Literal::Float(*f)),
        Form::Str(s) => Ok(Literal::Str(s.clone())),
        Form::Keyword(k) => Ok(Literal::Keyword(k.clone())),
        other => Err(LispError::UnsupportedPattern(format!(
            ":or defaults must be literals, got {}",
            other.describe()
        ))),
    }
}

/// Binding targets may never shadow stdlib names or special forms.
fn check_binding_name(name: &str) -> Result<(), LispError> {
    if crate::builtins::lookup(name).is_some() || SPECIAL_FORMS.contains(&name) {
        return Err(LispError::CannotShadowBuiltin(name.to_string()));
    }
    Ok(())
}

pub fn analyze_pattern(form: &Form) -> Result<Pattern, LispError> {
    match form {
        Form::Symbol(name) if name != "&" => {
            check_binding_name(name)?;
            Ok(Pattern::Var(name.clone()))
        }
        Form::Vector(items) => analyze_seq_pattern(items),
        Form::MapForm(items) => analyze_map_pattern(items),
        other => Err(LispError::UnsupportedPattern(format!(
            "cannot bind to {}",
            other.describe()
        ))),
    }
}

fn analyze_seq_pattern(items: &[Form]) -> Result<Pattern, LispError> {
    // Trailing `:as alias` wraps the sequence pattern
    if items.len() >= 2 {
        if let Form::Keyword(k) = &items[items.len() - 2] {
            if k == "as" {
                let Form::Symbol(alias) = &items[items.len() - 1] else {
                    return Err(LispError::UnsupportedPattern(
                        ":as target must be a simple symbol".to_string(),
                    ));
                };
                check_binding_name(alias)?;
                let inner = analyze_seq_pattern(&items[..items.len() - 2])?;
                return Ok(Pattern::As(alias.clone(), Box::new(inner)));
            }
        }
    }

    let mut leading = Vec::new();
    let mut iter = items.iter().peekable();
    while let Some(form) = iter.next() {
        if matches!(form, Form::Symbol(s) if s == "&") {
            let Some(rest_form) = iter.next() else {
                return Err(LispError::UnsupportedPattern(
                    "& must be followed by a rest pattern".to_string(),
                ));
            };
            if iter.next().is_some() {
                return Err(LispError::UnsupportedPattern(
                    "only one pattern may follow &".to_string(),
                ));
            }
            let rest = analyze_pattern(rest_form)?;
            return Ok(Pattern::SeqRest(leading, Box::new(rest)));
        }
        leading.push(analyze_pattern(form)?);
    }
    Ok(Pattern::Seq(leading))
}

fn analyze_map_pattern(items: &[Form]) -> Result<Pattern, LispError> {
    let mut entries: Vec<(String, String)> = Vec::new();
    let mut defaults: Vec<(String, Literal)> = Vec::new();
    let mut alias: Option<String> = None;

    for pair in items.chunks(2) {
        match (&pair[0], &pair[1]) {
            (Form::Keyword(k), Form::Vector(names)) if k == "keys" => {
                for name_form in names {
                    let Form::Symbol(name) = name_form else {
                        return Err(LispError::UnsupportedPattern(
                            ":keys entries must be simple symbols".to_string(),
                        ));
                    };
                    check_binding_name(name)?;
                    entries.push((name.clone(), name.clone()));
                }
            }
            (Form::Keyword(k), Form::MapForm(default_items)) if k == "or" => {
                for dpair in default_items.chunks(2) {
                    let Form::Symbol(name) = &dpair[0] else {
                        return Err(LispError::UnsupportedPattern(
                            ":or keys must be the bound symbols".to_string(),
                        ));
                    };
                    defaults.push((name.clone(), literal_default(&dpair[1])?));
                }
            }
            (Form::Keyword(k), Form::Symbol(name)) if k == "as" => {
                check_binding_name(name)?;
                alias = Some(name.clone());
            }
            (Form::Symbol(binding), Form::Keyword(key)) => {
                check_binding_name(binding)?;
                entries.push((binding.clone(), key.clone()));
            }
            (left, right) => {
                return Err(LispError::UnsupportedPattern(format!(
                    "map pattern entry {} {} is not supported",
                    left.describe(),
                    right.describe()
                )));
            }
        }
    }

    let inner = Pattern::MapKeys { entries, defaults };
    Ok(match alias {
        Some(name) => Pattern::As(name, Box::new(inner)),
        None => inner,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader;

    fn analyze_src(src: &str) -> Result<Node, LispError> {
        analyze_program(&reader::parse(src)?)
    }

    #[test]
    fn test_literals_pass_through() {
        assert_eq!(analyze_src("42").unwrap(), Node::Lit(Literal::Int(42)));
        assert_eq!(
            analyze_src(":go").unwrap(),
            Node::Lit(Literal::Keyword("go".into()))
        );
        assert_eq!(analyze_src("()").unwrap(), Node::nil());
    }

    #[test]
    fn test_symbol_resolution() {
        assert_eq!(analyze_src("items").unwrap(), Node::Var("items".into()));
        assert_eq!(analyze_src("ctx/user").unwrap(), Node::Data("user".into()));
        assert_eq!(analyze_src("data/user").unwrap(), Node::Data("user".into()));
        assert_eq!(analyze_src("*1").unwrap(), Node::TurnRef(0));
        assert_eq!(analyze_src("*3").unwrap(), Node::TurnRef(2));
    }

    #[test]
    fn test_when_desugars_to_if() {
        let node = analyze_src("(when true 1 2)").unwrap();
        match node {
            Node::If { els: None, then, .. } => match *then {
                Node::Do(items) => assert_eq!(items.len(), 2),
                other => panic!("expected do body, got {:?}", other),
            },
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_cond_desugars_to_nested_if() {
        let node = analyze_src("(cond (< x 1) :small :else :big)").unwrap();
        match node {
            Node::If { els: Some(els), .. } => match *els {
                Node::If { cond, .. } => {
                    assert_eq!(*cond, Node::Lit(Literal::Bool(true)));
                }
                other => panic!("expected nested if, got {:?}", other),
            },
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_cond_odd_forms_rejected() {
        let err = analyze_src("(cond true)").unwrap_err();
        assert_eq!(err.reason(), "invalid_cond_form");
    }

    #[test]
    fn test_threading_first_and_last() {
        // (-> x (f 1) g) => (g (f x 1))
        let threaded = analyze_src("(-> x (f 1) g)").unwrap();
        let spelled = analyze_src("(g (f x 1))").unwrap();
        assert_eq!(threaded, spelled);

        // (->> x (f 1) (g 2)) => (g 2 (f 1 x))
        let threaded = analyze_src("(->> x (f 1) (g 2))").unwrap();
        let spelled = analyze_src("(g 2 (f 1 x))").unwrap();
        assert_eq!(threaded, spelled);
    }

    #[test]
    fn test_threading_rejects_bad_step() {
        let err = analyze_src("(-> x 42)").unwrap_err();
        assert_eq!(err.reason(), "invalid_thread_form");
    }

    #[test]
    fn test_short_fn_arity_from_placeholders() {
        let node = analyze_src("#(+ %1 %2)").unwrap();
        match node {
            Node::Fn { params, .. } => assert_eq!(params.len(), 2),
            other => panic!("expected fn, got {:?}", other),
        }

        // Bare % is %1
        let node = analyze_src("#(inc %)").unwrap();
        match node {
            Node::Fn { params, .. } => {
                assert_eq!(params, vec![Pattern::Var("%1".into())]);
            }
            other => panic!("expected fn, got {:?}", other),
        }
    }

    #[test]
    fn test_placeholder_outside_short_fn_rejected() {
        let err = analyze_src("(inc %)").unwrap_err();
        assert_eq!(err.reason(), "invalid_placeholder");
    }

    #[test]
    fn test_nested_short_fn_rejected() {
        let err = analyze_src("#(map #(inc %) %)").unwrap_err();
        assert_eq!(err.reason(), "invalid_form");
    }

    #[test]
    fn test_recur_accepted_in_loop_tail() {
        assert!(analyze_src("(loop [i 0] (if (< i 5) (recur (inc i)) i))").is_ok());
    }

    #[test]
    fn test_recur_in_do_tail_of_loop() {
        assert!(analyze_src("(loop [i 0] (if (< i 3) (do (println i) (recur (inc i))) i))").is_ok());
    }

    #[test]
    fn test_recur_outside_tail_rejected() {
        let err = analyze_src("(loop [i 0] (inc (recur i)))").unwrap_err();
        assert_eq!(err.reason(), "invalid_form");
    }

    #[test]
    fn test_recur_outside_recursion_point_rejected() {
        let err = analyze_src("(recur 1)").unwrap_err();
        assert_eq!(err.reason(), "invalid_form");
    }

    #[test]
    fn test_recur_arity_checked() {
        let err = analyze_src("(loop [i 0 j 0] (recur i))").unwrap_err();
        assert_eq!(err.reason(), "invalid_arity");
    }

    #[test]
    fn test_recur_in_fn_tail() {
        assert!(analyze_src("(fn [i] (if (< i 3) (recur (inc i)) i))").is_ok());
    }

    #[test]
    fn test_recur_in_let_body_tail() {
        assert!(
            analyze_src("(loop [i 0] (let [j (inc i)] (if (< j 3) (recur j) j)))").is_ok()
        );
    }

    #[test]
    fn test_where_normalisation() {
        let node = analyze_src("(where :status = \"active\")").unwrap();
        match node {
            Node::Where { path, op, operand } => {
                assert_eq!(path, vec![PathSeg::Keyword("status".into())]);
                assert_eq!(op, WhereOp::Eq);
                assert!(operand.is_some());
            }
            other => panic!("expected where, got {:?}", other),
        }

        let node = analyze_src("(where [:user :age] >= 21)").unwrap();
        match node {
            Node::Where { path, op, .. } => {
                assert_eq!(path.len(), 2);
                assert_eq!(op, WhereOp::Gte);
            }
            other => panic!("expected where, got {:?}", other),
        }
    }

    #[test]
    fn test_where_bad_field_and_operator() {
        assert_eq!(
            analyze_src("(where 42 = 1)").unwrap_err().reason(),
            "invalid_where_form"
        );
        assert_eq!(
            analyze_src("(where [:a 42] = 1)").unwrap_err().reason(),
            "invalid_where_form"
        );
        assert_eq!(
            analyze_src("(where :a <=> 1)").unwrap_err().reason(),
            "invalid_where_operator"
        );
    }

    #[test]
    fn test_defn_docstring_stripped_into_metadata() {
        let node = analyze_src("(defn twice \"doubles\" [x] (* x 2))").unwrap();
        match node {
            Node::Def { name, value, docstring } => {
                assert_eq!(name, "twice");
                assert_eq!(docstring.as_deref(), Some("doubles"));
                match *value {
                    Node::Fn { docstring, .. } => {
                        assert_eq!(docstring.as_deref(), Some("doubles"));
                    }
                    other => panic!("expected fn, got {:?}", other),
                }
            }
            other => panic!("expected def, got {:?}", other),
        }
    }

    #[test]
    fn test_map_pattern_shapes() {
        let pat = analyze_pattern(
            &reader::parse("{:keys [a b] :or {b 0} :as m}").unwrap()[0],
        )
        .unwrap();
        match pat {
            Pattern::As(alias, inner) => {
                assert_eq!(alias, "m");
                match *inner {
                    Pattern::MapKeys { entries, defaults } => {
                        assert_eq!(entries.len(), 2);
                        assert_eq!(defaults, vec![("b".into(), Literal::Int(0))]);
                    }
                    other => panic!("expected map pattern, got {:?}", other),
                }
            }
            other => panic!("expected :as wrapper, got {:?}", other),
        }
    }

    #[test]
    fn test_rename_pattern() {
        let pat =
            analyze_pattern(&reader::parse("{the-name :name}").unwrap()[0]).unwrap();
        match pat {
            Pattern::MapKeys { entries, .. } => {
                assert_eq!(entries, vec![("the-name".into(), "name".into())]);
            }
            other => panic!("expected map pattern, got {:?}", other),
        }
    }

    #[test]
    fn test_bindings_cannot_shadow_stdlib() {
        assert_eq!(
            analyze_src("(let [count 1] count)").unwrap_err().reason(),
            "cannot_shadow_builtin"
        );
        assert_eq!(
            analyze_src("(fn [map] map)").unwrap_err().reason(),
            "cannot_shadow_builtin"
        );
        assert_eq!(
            analyze_src("(let [{:keys [first]} m] first)")
                .unwrap_err()
                .reason(),
            "cannot_shadow_builtin"
        );
    }

    #[test]
    fn test_bad_map_pattern_key_rejected() {
        let err = analyze_pattern(&reader::parse("{x 42}").unwrap()[0]).unwrap_err();
        assert_eq!(err.reason(), "unsupported_pattern");
    }

    #[test]
    fn test_seq_rest_pattern() {
        let pat = analyze_pattern(&reader::parse("[a b & more]").unwrap()[0]).unwrap();
        match pat {
            Pattern::SeqRest(leading, rest) => {
                assert_eq!(leading.len(), 2);
                assert_eq!(*rest, Pattern::Var("more".into()));
            }
            other => panic!("expected seq-rest, got {:?}", other),
        }
    }

    #[test]
    fn test_tool_calls() {
        let node = analyze_src("(tool/search {:q \"rust\"})").unwrap();
        match node {
            Node::CallTool { name, via_ctx, .. } => {
                assert_eq!(name, "search");
                assert!(!via_ctx);
            }
            other => panic!("expected tool call, got {:?}", other),
        }

        let node = analyze_src("(ctx/fetch {:id 1})").unwrap();
        assert!(matches!(node, Node::CallTool { via_ctx: true, .. }));
    }

    #[test]
    fn test_tool_reference_without_call_rejected() {
        let err = analyze_src("tool/search").unwrap_err();
        assert_eq!(err.reason(), "invalid_form");
    }

    #[test]
    fn test_nested_tool_name_rejected() {
        let err = analyze_src("(tool/a/b {})").unwrap_err();
        assert_eq!(err.reason(), "invalid_call_tool_name");
    }

    #[test]
    fn test_interop_shims_rewrite_to_calls() {
        let node = analyze_src("(System/currentTimeMillis)").unwrap();
        match node {
            Node::Call { target, .. } => assert_eq!(*target, Node::Var("now-millis".into())),
            other => panic!("expected call, got {:?}", other),
        }

        let node = analyze_src("(.indexOf \"abc\" \"b\")").unwrap();
        match node {
            Node::Call { target, args } => {
                assert_eq!(*target, Node::Var("index-of".into()));
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected call, got {:?}", other),
        }

        let node = analyze_src("(LocalDate/parse \"2024-01-01\")").unwrap();
        match node {
            Node::Call { target, .. } => assert_eq!(*target, Node::Var("date-parse".into())),
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_if_let_desugars() {
        let node = analyze_src("(if-let [x (find-it)] x :missing)").unwrap();
        match node {
            Node::Let { bindings, body } => {
                assert_eq!(bindings.len(), 1);
                assert!(matches!(body[0], Node::If { .. }));
            }
            other => panic!("expected let, got {:?}", other),
        }
    }

    #[test]
    fn test_memory_forms() {
        assert!(matches!(
            analyze_src("(memory/get :seen)").unwrap(),
            Node::MemoryGet(_)
        ));
        assert!(matches!(
            analyze_src("(memory/put :seen 5)").unwrap(),
            Node::MemoryPut(_, _)
        ));
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let src = "(->> ctx/items (filter (where :active = true)) (pluck :id))";
        assert_eq!(analyze_src(src).unwrap(), analyze_src(src).unwrap());
    }
}
