// ABOUTME: Pre-evaluation budget on distinct user symbols and keywords

use crate::analyzer::SPECIAL_FORMS;
use crate::ast::{Literal, Node, Pattern};
use crate::builtins;
use crate::error::LispError;
use std::collections::BTreeSet;

/// One counted name. Keywords and symbols live in separate namespaces.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Counted {
    Symbol(String),
    Keyword(String),
}

fn is_core_symbol(name: &str) -> bool {
    builtins::lookup(name).is_some() || SPECIAL_FORMS.contains(&name) || name.starts_with('%')
}

fn count_pattern(pattern: &Pattern, seen: &mut BTreeSet<Counted>) {
    match pattern {
        Pattern::Var(name) => {
            if !is_core_symbol(name) {
                seen.insert(Counted::Symbol(name.clone()));
            }
        }
        Pattern::Seq(items) => {
            for item in items {
                count_pattern(item, seen);
            }
        }
        Pattern::SeqRest(items, rest) => {
            for item in items {
                count_pattern(item, seen);
            }
            count_pattern(rest, seen);
        }
        Pattern::MapKeys { entries, .. } => {
            for (binding, key) in entries {
                if !is_core_symbol(binding) {
                    seen.insert(Counted::Symbol(binding.clone()));
                }
                seen.insert(Counted::Keyword(key.clone()));
            }
        }
        Pattern::As(alias, inner) => {
            if !is_core_symbol(alias) {
                seen.insert(Counted::Symbol(alias.clone()));
            }
            count_pattern(inner, seen);
        }
    }
}

fn count_node(node: &Node, seen: &mut BTreeSet<Counted>) {
    match node {
        Node::Lit(Literal::Keyword(k)) => {
            if k != "else" {
                seen.insert(Counted::Keyword(k.clone()));
            }
        }
        Node::Lit(_) | Node::TurnRef(_) | Node::TurnHistory | Node::BudgetRemaining => {}
        Node::Var(name) => {
            if !is_core_symbol(name) {
                seen.insert(Counted::Symbol(name.clone()));
            }
        }
        Node::Data(name) => {
            seen.insert(Counted::Symbol(name.clone()));
        }
        Node::MemoryGet(k) => count_node(k, seen),
        Node::MemoryPut(k, v) => {
            count_node(k, seen);
            count_node(v, seen);
        }
        Node::Vector(items) | Node::SetLit(items) | Node::Do(items) | Node::And(items)
        | Node::Or(items) | Node::Recur(items) | Node::Pcalls(items) | Node::Juxt(items) => {
            for item in items {
                count_node(item, seen);
            }
        }
        Node::MapLit(pairs) => {
            for (k, v) in pairs {
                count_node(k, seen);
                count_node(v, seen);
            }
        }
        Node::If { cond, then, els } => {
            count_node(cond, seen);
            count_node(then, seen);
            if let Some(els) = els {
                count_node(els, seen);
            }
        }
        Node::Let { bindings, body } | Node::Loop { bindings, body } => {
            for (pattern, value) in bindings {
                count_pattern(pattern, seen);
                count_node(value, seen);
            }
            for item in body {
                count_node(item, seen);
            }
        }
        Node::Fn {
            name, params, rest, body, ..
        } => {
            if let Some(name) = name {
                if !is_core_symbol(name) {
                    seen.insert(Counted::Symbol(name.clone()));
                }
            }
            for p in params {
                count_pattern(p, seen);
            }
            if let Some(rest) = rest {
                count_pattern(rest, seen);
            }
            for item in body {
                count_node(item, seen);
            }
        }
        Node::Def { name, value, .. } => {
            seen.insert(Counted::Symbol(name.clone()));
            count_node(value, seen);
        }
        Node::Call { target, args } => {
            count_node(target, seen);
            for arg in args {
                count_node(arg, seen);
            }
        }
        Node::CallTool { name, args, .. } => {
            seen.insert(Counted::Symbol(name.clone()));
            count_node(args, seen);
        }
        Node::Task { id, body } => {
            count_node(id, seen);
            for item in body {
                count_node(item, seen);
            }
        }
        Node::StepDone { id, summary } => {
            count_node(id, seen);
            count_node(summary, seen);
        }
        Node::TaskReset(id) => count_node(id, seen),
        Node::Pmap { f, coll } => {
            count_node(f, seen);
            count_node(coll, seen);
        }
        Node::Where { path, operand, .. } => {
            for seg in path {
                seen.insert(Counted::Keyword(seg.name().to_string()));
            }
            if let Some(operand) = operand {
                count_node(operand, seen);
            }
        }
        Node::Combinator { preds, .. } => {
            for p in preds {
                count_node(p, seen);
            }
        }
        Node::Return(inner) | Node::Fail(inner) => count_node(inner, seen),
    }
}

/// Count distinct user symbols and keywords; reject programs over budget
/// before any evaluation side-effect can occur.
pub fn check_budget(node: &Node, max_symbols: usize) -> Result<usize, LispError> {
    let mut seen = BTreeSet::new();
    count_node(node, &mut seen);
    let count = seen.len();
    if count > max_symbols {
        return Err(LispError::SymbolLimitExceeded {
            count,
            limit: max_symbols,
        });
    }
    Ok(count)
}
