// ABOUTME: Data-key projection: strip unreferenced large context values

use crate::ast::Node;
use crate::config::CONTEXT_KEEP_BYTES;
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Collect every distinct `ctx/name` access in the program.
pub fn required_keys(node: &Node) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    collect(node, &mut keys);
    keys
}

fn collect(node: &Node, keys: &mut BTreeSet<String>) {
    match node {
        Node::Data(name) => {
            keys.insert(name.clone());
        }
        Node::Lit(_)
        | Node::Var(_)
        | Node::TurnRef(_)
        | Node::TurnHistory
        | Node::BudgetRemaining => {}
        Node::MemoryGet(a) | Node::TaskReset(a) | Node::Return(a) | Node::Fail(a) => {
            collect(a, keys)
        }
        Node::MemoryPut(a, b) | Node::StepDone { id: a, summary: b } => {
            collect(a, keys);
            collect(b, keys);
        }
        Node::Vector(items)
        | Node::SetLit(items)
        | Node::Do(items)
        | Node::And(items)
        | Node::Or(items)
        | Node::Recur(items)
        | Node::Pcalls(items)
        | Node::Juxt(items) => {
            for item in items {
                collect(item, keys);
            }
        }
        Node::MapLit(pairs) => {
            for (k, v) in pairs {
                collect(k, keys);
                collect(v, keys);
            }
        }
        Node::If { cond, then, els } => {
            collect(cond, keys);
            collect(then, keys);
            if let Some(els) = els {
                collect(els, keys);
            }
        }
        Node::Let { bindings, body } | Node::Loop { bindings, body } => {
            for (_, value) in bindings {
                collect(value, keys);
            }
            for item in body {
                collect(item, keys);
            }
        }
        Node::Fn { body, .. } => {
            for item in body {
                collect(item, keys);
            }
        }
        Node::Def { value, .. } => collect(value, keys),
        Node::Call { target, args } => {
            collect(target, keys);
            for arg in args {
                collect(arg, keys);
            }
        }
        Node::CallTool { args, .. } => collect(args, keys),
        Node::Task { id, body } => {
            collect(id, keys);
            for item in body {
                collect(item, keys);
            }
        }
        Node::Pmap { f, coll } => {
            collect(f, keys);
            collect(coll, keys);
        }
        Node::Where { operand, .. } => {
            if let Some(operand) = operand {
                collect(operand, keys);
            }
        }
        Node::Combinator { preds, .. } => {
            for pred in preds {
                collect(pred, keys);
            }
        }
    }
}

fn is_droppable(value: &Value) -> bool {
    match value {
        Value::Vector(_) | Value::Map(_) | Value::Set(_) => {
            value.approx_size() > CONTEXT_KEEP_BYTES
        }
        Value::Str(s) => s.len() > CONTEXT_KEEP_BYTES,
        _ => false,
    }
}

/// Remove unreferenced large values from the context before evaluation.
/// Scalars and short strings always survive, so filtering can never change
/// the outcome of a program that only reads what it names.
pub fn project(context: &mut BTreeMap<String, Value>, node: &Node) {
    let referenced = required_keys(node);
    let before = context.len();
    context.retain(|key, value| referenced.contains(key) || !is_droppable(value));
    if context.len() < before {
        log::debug!(
            "context projection dropped {} unreferenced large key(s)",
            before - context.len()
        );
    }
}
