// ABOUTME: Lexical environments as immutable, shareable frame chains

use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug)]
struct Frame {
    bindings: BTreeMap<String, Value>,
    parent: Option<Arc<Frame>>,
}

/// A chain of immutable binding frames. `let`, `loop`, and function calls
/// push a fresh frame; nothing is ever mutated in place, so a closure's
/// captured `Env` is a true snapshot shared only for read. Cloning is an
/// `Arc` bump.
#[derive(Debug, Clone, Default)]
pub struct Env {
    head: Option<Arc<Frame>>,
}

impl Env {
    /// The empty environment with no bindings.
    pub fn new() -> Env {
        Env { head: None }
    }

    /// Looks up a symbol in this frame and parent frames.
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut frame = self.head.as_deref();
        while let Some(f) = frame {
            if let Some(value) = f.bindings.get(name) {
                return Some(value.clone());
            }
            frame = f.parent.as_deref();
        }
        None
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// A child environment with `bindings` layered over this one.
    pub fn extend(&self, bindings: BTreeMap<String, Value>) -> Env {
        Env {
            head: Some(Arc::new(Frame {
                bindings,
                parent: self.head.clone(),
            })),
        }
    }

    /// Convenience for a single binding.
    pub fn bind(&self, name: &str, value: Value) -> Env {
        let mut bindings = BTreeMap::new();
        bindings.insert(name.to_string(), value);
        self.extend(bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_and_get() {
        let env = Env::new().bind("x", Value::Int(42));
        assert_eq!(env.get("x"), Some(Value::Int(42)));
        assert_eq!(env.get("y"), None);
    }

    #[test]
    fn test_shadowing_leaves_parent_untouched() {
        let parent = Env::new().bind("x", Value::Int(1));
        let child = parent.bind("x", Value::Int(2));

        assert_eq!(child.get("x"), Some(Value::Int(2)));
        assert_eq!(parent.get("x"), Some(Value::Int(1)));
    }

    #[test]
    fn test_lookup_walks_parent_chain() {
        let env = Env::new()
            .bind("a", Value::Int(1))
            .bind("b", Value::Int(2))
            .bind("c", Value::Int(3));

        assert_eq!(env.get("a"), Some(Value::Int(1)));
        assert_eq!(env.get("b"), Some(Value::Int(2)));
        assert_eq!(env.get("c"), Some(Value::Int(3)));
    }

    #[test]
    fn test_snapshot_is_stable_after_later_extends() {
        let snapshot = Env::new().bind("x", Value::Int(10));
        let _later = snapshot.bind("x", Value::Int(99));
        assert_eq!(snapshot.get("x"), Some(Value::Int(10)));
    }
}
