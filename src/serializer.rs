// ABOUTME: Core AST and closures back to surface Lisp text

use crate::ast::{Literal, Node, PathSeg, Pattern};
use crate::value::{Closure, Key, Pred, Value};
use std::collections::BTreeMap;
use std::fmt::Write;

fn literal_source(lit: &Literal) -> String {
    match lit {
        Literal::Nil => "nil".to_string(),
        Literal::Bool(b) => b.to_string(),
        Literal::Int(n) => n.to_string(),
        Literal::Float(f) => {
            if f.fract() == 0.0 && f.is_finite() {
                format!("{:.1}", f)
            } else {
                f.to_string()
            }
        }
        Literal::Str(s) => format!("{}", Value::Str(s.clone())),
        Literal::Keyword(k) => format!(":{}", k),
    }
}

fn pattern_source(pattern: &Pattern) -> String {
    match pattern {
        Pattern::Var(name) => name.clone(),
        Pattern::Seq(items) => {
            let parts: Vec<String> = items.iter().map(pattern_source).collect();
            format!("[{}]", parts.join(" "))
        }
        Pattern::SeqRest(leading, rest) => {
            let mut parts: Vec<String> = leading.iter().map(pattern_source).collect();
            parts.push("&".to_string());
            parts.push(pattern_source(rest));
            format!("[{}]", parts.join(" "))
        }
        Pattern::MapKeys { entries, defaults } => map_pattern_source(entries, defaults, None),
        Pattern::As(alias, inner) => match inner.as_ref() {
            Pattern::MapKeys { entries, defaults } => {
                map_pattern_source(entries, defaults, Some(alias))
            }
            Pattern::Seq(items) => {
                let mut parts: Vec<String> = items.iter().map(pattern_source).collect();
                parts.push(":as".to_string());
                parts.push(alias.clone());
                format!("[{}]", parts.join(" "))
            }
            Pattern::SeqRest(leading, rest) => {
                let mut parts: Vec<String> = leading.iter().map(pattern_source).collect();
                parts.push("&".to_string());
                parts.push(pattern_source(rest));
                parts.push(":as".to_string());
                parts.push(alias.clone());
                format!("[{}]", parts.join(" "))
            }
            other => format!("{{:as {} {}}}", alias, pattern_source(other)),
        },
    }
}

fn map_pattern_source(
    entries: &[(String, String)],
    defaults: &[(String, Literal)],
    alias: Option<&str>,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    // Plain entries collect into :keys, renames stay individual
    let keys: Vec<&(String, String)> = entries.iter().filter(|(b, k)| b == k).collect();
    let renames: Vec<&(String, String)> = entries.iter().filter(|(b, k)| b != k).collect();

    if !keys.is_empty() {
        let names: Vec<&str> = keys.iter().map(|(b, _)| b.as_str()).collect();
        parts.push(format!(":keys [{}]", names.join(" ")));
    }
    for (binding, key) in renames {
        parts.push(format!("{} :{}", binding, key));
    }
    if !defaults.is_empty() {
        let rendered: Vec<String> = defaults
            .iter()
            .map(|(name, lit)| format!("{} {}", name, literal_source(lit)))
            .collect();
        parts.push(format!(":or {{{}}}", rendered.join(" ")));
    }
    if let Some(alias) = alias {
        parts.push(format!(":as {}", alias));
    }
    format!("{{{}}}", parts.join(" "))
}

fn bindings_source(bindings: &[(Pattern, Node)]) -> String {
    let parts: Vec<String> = bindings
        .iter()
        .map(|(p, n)| format!("{} {}", pattern_source(p), node_source(n)))
        .collect();
    format!("[{}]", parts.join(" "))
}

fn body_source(body: &[Node]) -> String {
    body.iter()
        .map(node_source)
        .collect::<Vec<_>>()
        .join(" ")
}

fn fn_source(
    params: &[Pattern],
    rest: Option<&Pattern>,
    body: &[Node],
) -> String {
    // Short fns round-trip through #() so their % placeholders re-read.
    // Any single body node analyzed from list content renders with outer
    // parens, which is exactly the #(...) interior.
    if !params.is_empty()
        && rest.is_none()
        && params
            .iter()
            .enumerate()
            .all(|(i, p)| matches!(p, Pattern::Var(name) if *name == format!("%{}", i + 1)))
    {
        if let [single] = body {
            let rendered = node_source(single);
            if rendered.starts_with('(') {
                return format!("#{}", rendered);
            }
        }
    }

    let mut parts: Vec<String> = params.iter().map(pattern_source).collect();
    if let Some(rest) = rest {
        parts.push("&".to_string());
        parts.push(pattern_source(rest));
    }
    format!("(fn [{}] {})", parts.join(" "), body_source(body))
}

/// Render one Core AST node as surface text. For every analyzable source
/// `s`, `analyze(node_source(analyze(s)))` equals `analyze(s)`.
pub fn node_source(node: &Node) -> String {
    match node {
        Node::Lit(lit) => literal_source(lit),
        Node::Var(name) => name.clone(),
        Node::Data(name) => format!("ctx/{}", name),
        Node::MemoryGet(key) => format!("(memory/get {})", node_source(key)),
        Node::MemoryPut(key, value) => {
            format!("(memory/put {} {})", node_source(key), node_source(value))
        }
        Node::TurnRef(i) => format!("*{}", i + 1),
        Node::TurnHistory => "(turn-history)".to_string(),
        Node::BudgetRemaining => "(budget-remaining)".to_string(),
        Node::Vector(items) => {
            format!(
                "[{}]",
                items.iter().map(node_source).collect::<Vec<_>>().join(" ")
            )
        }
        Node::SetLit(items) => {
            format!(
                "#{{{}}}",
                items.iter().map(node_source).collect::<Vec<_>>().join(" ")
            )
        }
        Node::MapLit(pairs) => {
            let parts: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("{} {}", node_source(k), node_source(v)))
                .collect();
            format!("{{{}}}", parts.join(" "))
        }
        Node::If { cond, then, els } => match els {
            Some(els) => format!(
                "(if {} {} {})",
                node_source(cond),
                node_source(then),
                node_source(els)
            ),
            None => format!("(if {} {})", node_source(cond), node_source(then)),
        },
        Node::Do(items) => format!("(do {})", body_source(items)),
        Node::And(items) => {
            if items.is_empty() {
                "(and)".to_string()
            } else {
                format!("(and {})", body_source(items))
            }
        }
        Node::Or(items) => {
            if items.is_empty() {
                "(or)".to_string()
            } else {
                format!("(or {})", body_source(items))
            }
        }
        Node::Let { bindings, body } => {
            format!("(let {} {})", bindings_source(bindings), body_source(body))
        }
        Node::Loop { bindings, body } => {
            format!("(loop {} {})", bindings_source(bindings), body_source(body))
        }
        Node::Recur(args) => {
            if args.is_empty() {
                "(recur)".to_string()
            } else {
                format!("(recur {})", body_source(args))
            }
        }
        Node::Fn {
            params, rest, body, ..
        } => fn_source(params, rest.as_deref(), body),
        Node::Def { name, value, docstring } => match (value.as_ref(), docstring) {
            (
                Node::Fn {
                    name: fn_name,
                    params,
                    rest,
                    body,
                    ..
                },
                doc,
            ) if fn_name.as_deref() == Some(name) => {
                let mut parts: Vec<String> = params.iter().map(pattern_source).collect();
                if let Some(rest) = rest {
                    parts.push("&".to_string());
                    parts.push(pattern_source(rest));
                }
                match doc {
                    Some(doc) => {
                        let doc_str = Value::Str(doc.clone()).to_string();
                        format!(
                            "(defn {} {} [{}] {})",
                            name,
                            doc_str,
                            parts.join(" "),
                            body_source(body)
                        )
                    }
                    None => format!(
                        "(defn {} [{}] {})",
                        name,
                        parts.join(" "),
                        body_source(body)
                    ),
                }
            }
            _ => format!("(def {} {})", name, node_source(value)),
        },
        Node::Call { target, args } => {
            let mut parts = vec![node_source(target)];
            parts.extend(args.iter().map(node_source));
            format!("({})", parts.join(" "))
        }
        Node::CallTool { name, args, via_ctx } => {
            let ns = if *via_ctx { "ctx" } else { "tool" };
            format!("({}/{} {})", ns, name, node_source(args))
        }
        Node::Task { id, body } => {
            format!("(task {} {})", node_source(id), body_source(body))
        }
        Node::StepDone { id, summary } => {
            format!("(step-done {} {})", node_source(id), node_source(summary))
        }
        Node::TaskReset(id) => format!("(task-reset {})", node_source(id)),
        Node::Pmap { f, coll } => format!("(pmap {} {})", node_source(f), node_source(coll)),
        Node::Pcalls(items) => {
            if items.is_empty() {
                "(pcalls)".to_string()
            } else {
                format!("(pcalls {})", body_source(items))
            }
        }
        Node::Juxt(items) => format!("(juxt {})", body_source(items)),
        Node::Where { path, op, operand } => {
            let field = match path.as_slice() {
                [single] => path_seg_source(single),
                many => format!(
                    "[{}]",
                    many.iter().map(path_seg_source).collect::<Vec<_>>().join(" ")
                ),
            };
            match operand {
                Some(operand) => {
                    format!("(where {} {} {})", field, op.symbol(), node_source(operand))
                }
                None if *op == crate::ast::WhereOp::Truthy => format!("(where {})", field),
                None => format!("(where {} {} nil)", field, op.symbol()),
            }
        }
        Node::Combinator { kind, preds } => {
            format!("({} {})", kind.name(), body_source(preds))
        }
        Node::Return(inner) => format!("(return {})", node_source(inner)),
        Node::Fail(inner) => format!("(fail {})", node_source(inner)),
    }
}

fn path_seg_source(seg: &PathSeg) -> String {
    match seg {
        PathSeg::Keyword(name) => format!(":{}", name),
        PathSeg::Str(name) => format!("{}", Value::Str(name.clone())),
    }
}

/// A closure as surface text, environment dropped: `(fn [x] (* x 2))`.
pub fn closure_source(closure: &Closure) -> String {
    fn_source(&closure.params, closure.rest.as_ref(), &closure.body)
}

/// A runtime value as readable source. Dates and regexes render as the
/// calls that rebuild them.
pub fn value_source(value: &Value) -> String {
    match value {
        Value::Closure(c) => closure_source(c),
        Value::Builtin(b) => b.name.to_string(),
        Value::Vector(items) => format!(
            "[{}]",
            items.iter().map(value_source).collect::<Vec<_>>().join(" ")
        ),
        Value::Set(items) => format!(
            "#{{{}}}",
            items.iter().map(value_source).collect::<Vec<_>>().join(" ")
        ),
        Value::Map(m) => {
            let parts: Vec<String> = m
                .iter()
                .map(|(k, v)| format!("{} {}", Key::to_value(k), value_source(v)))
                .collect();
            format!("{{{}}}", parts.join(" "))
        }
        Value::Date(d) => format!("(date-parse \"{}\")", d.format("%Y-%m-%d")),
        Value::Regex(r) => format!("(re-pattern {})", Value::Str(r.as_str().to_string())),
        Value::Pred(p) => pred_source(p),
        Value::Juxt(fs) => format!(
            "(juxt {})",
            fs.iter().map(value_source).collect::<Vec<_>>().join(" ")
        ),
        other => other.to_string(),
    }
}

fn pred_source(pred: &Pred) -> String {
    match pred {
        Pred::Where { path, op, operand } => {
            let field = match path.as_slice() {
                [single] => path_seg_source(single),
                many => format!(
                    "[{}]",
                    many.iter().map(path_seg_source).collect::<Vec<_>>().join(" ")
                ),
            };
            match operand {
                Some(v) => format!("(where {} {} {})", field, op.symbol(), value_source(v)),
                None => format!("(where {})", field),
            }
        }
        Pred::Comb { kind, preds } => format!(
            "({} {})",
            kind.name(),
            preds.iter().map(value_source).collect::<Vec<_>>().join(" ")
        ),
    }
}

/// Export a user namespace as one `do` block of `def` forms, so a later
/// turn can rehydrate its bindings by evaluating the text.
pub fn namespace_source(ns: &BTreeMap<String, Value>) -> String {
    let mut out = String::from("(do");
    for (name, value) in ns {
        match value {
            Value::Closure(c) if c.name.as_deref() == Some(name) => {
                let mut parts: Vec<String> = c.params.iter().map(pattern_source).collect();
                if let Some(rest) = &c.rest {
                    parts.push("&".to_string());
                    parts.push(pattern_source(rest));
                }
                let _ = write!(
                    out,
                    " (defn {} [{}] {})",
                    name,
                    parts.join(" "),
                    body_source(&c.body)
                );
            }
            other => {
                let _ = write!(out, " (def {} {})", name, value_source(other));
            }
        }
    }
    out.push(')');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze_program;
    use crate::reader::parse;

    fn analyzed(src: &str) -> Node {
        analyze_program(&parse(src).expect("parse")).expect("analyze")
    }

    fn assert_round_trip(src: &str) {
        let node = analyzed(src);
        let rendered = node_source(&node);
        let reanalyzed = analyzed(&rendered);
        assert_eq!(node, reanalyzed, "round trip failed for {:?} -> {:?}", src, rendered);
    }

    #[test]
    fn test_round_trip_literals_and_collections() {
        assert_round_trip("42");
        assert_round_trip("2.5");
        assert_round_trip("3.0");
        assert_round_trip("\"a\\nb\"");
        assert_round_trip(":go");
        assert_round_trip("[1 2 [3 4]]");
        assert_round_trip("{:a 1 \"b\" 2}");
        assert_round_trip("#{1 2 3}");
    }

    #[test]
    fn test_round_trip_control_flow() {
        assert_round_trip("(if (< x 1) :a :b)");
        assert_round_trip("(when (pos? x) (println x) x)");
        assert_round_trip("(cond (< x 1) :a (< x 2) :b :else :c)");
        assert_round_trip("(and a b (or c d))");
        assert_round_trip("(do 1 2 3)");
    }

    #[test]
    fn test_round_trip_bindings() {
        assert_round_trip("(let [x 1 y (inc x)] (+ x y))");
        assert_round_trip("(let [{:keys [a b] :or {b 0}} m] [a b])");
        assert_round_trip("(let [{nom :name :as all} m] nom)");
        assert_round_trip("(let [[a b & more :as all] v] more)");
        assert_round_trip("(loop [i 0 acc []] (if (< i 3) (recur (inc i) (conj acc i)) acc))");
    }

    #[test]
    fn test_round_trip_functions() {
        assert_round_trip("(fn [x y] (+ x y))");
        assert_round_trip("(fn [x & more] more)");
        assert_round_trip("(def k 9)");
        assert_round_trip("(defn twice [x] (* x 2))");
        assert_round_trip("(defn twice \"doubles x\" [x] (* x 2))");
        assert_round_trip("#(* % 2)");
        assert_round_trip("#(+ %1 %2)");
    }

    #[test]
    fn test_round_trip_threading_normalises() {
        // Threading desugars before serialization, so the rendered text is
        // the plain nested call and still re-analyzes identically.
        assert_round_trip("(->> ctx/items (filter (where :active = true)) (pluck :id))");
        assert_round_trip("(-> m :a :b)");
    }

    #[test]
    fn test_round_trip_effects_and_parallel() {
        assert_round_trip("(task \"k\" (tool/fetch {:id 1}))");
        assert_round_trip("(step-done \"k\" \"done\")");
        assert_round_trip("(task-reset \"k\")");
        assert_round_trip("(pmap inc [1 2 3])");
        assert_round_trip("(pcalls (fn [] 1) (fn [] 2))");
        assert_round_trip("(juxt :a :b)");
        assert_round_trip("(memory/put :n 1)");
        assert_round_trip("(memory/get :n)");
        assert_round_trip("(return 1)");
        assert_round_trip("(fail \"msg\")");
        assert_round_trip("(where [:user :age] >= 21)");
        assert_round_trip("(all-of (where :a) (where :b = 1))");
        assert_round_trip("[*1 *2 (turn-history) (budget-remaining)]");
    }

    #[test]
    fn test_closure_source_drops_env() {
        let node = analyzed("(fn [x] (* x 2))");
        match node {
            Node::Fn { params, rest, body, .. } => {
                let src = fn_source(&params, rest.as_deref(), &body);
                assert_eq!(src, "(fn [x] (* x 2))");
            }
            other => panic!("expected fn, got {:?}", other),
        }
    }

    #[test]
    fn test_namespace_export() {
        use crate::value::Value;
        let mut ns = BTreeMap::new();
        ns.insert("limit".to_string(), Value::Int(10));
        ns.insert(
            "tags".to_string(),
            Value::Vector(vec![Value::Str("a".into()), Value::Keyword("b".into())]),
        );
        let src = namespace_source(&ns);
        assert_eq!(src, "(do (def limit 10) (def tags [\"a\" :b]))");
        // The export itself re-analyzes
        assert!(analyze_program(&parse(&src).unwrap()).is_ok());
    }
}
