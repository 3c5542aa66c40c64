// ABOUTME: Host tool registry and the dispatch contract for tool/ctx calls

use crate::error::LispError;
use crate::value::{Key, Value};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// A host callback: receives the argument map (keyword keys) and returns any
/// runtime value, or a message that surfaces as `tool_error`.
pub type ToolFn =
    Arc<dyn Fn(&BTreeMap<Key, Value>) -> Result<Value, String> + Send + Sync + 'static>;

/// A registered tool. A plain callable, a structured descriptor with an
/// optional signature and description, or `Skip` (the name is reserved but
/// disabled for this turn).
#[derive(Clone)]
pub enum ToolDef {
    Func {
        f: ToolFn,
        signature: Option<String>,
        description: Option<String>,
    },
    Skip,
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDef>,
}

impl ToolRegistry {
    pub fn new() -> ToolRegistry {
        ToolRegistry::default()
    }

    /// Register a plain callable.
    pub fn register<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&BTreeMap<Key, Value>) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.tools.insert(
            name.to_string(),
            ToolDef::Func {
                f: Arc::new(f),
                signature: None,
                description: None,
            },
        );
    }

    /// Register a structured descriptor.
    pub fn register_with<F>(&mut self, name: &str, f: F, signature: Option<&str>, description: Option<&str>)
    where
        F: Fn(&BTreeMap<Key, Value>) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.tools.insert(
            name.to_string(),
            ToolDef::Func {
                f: Arc::new(f),
                signature: signature.map(str::to_string),
                description: description.map(str::to_string),
            },
        );
    }

    /// Reserve a name without making it callable this turn.
    pub fn skip(&mut self, name: &str) {
        self.tools.insert(name.to_string(), ToolDef::Skip);
    }

    pub fn get(&self, name: &str) -> Option<&ToolDef> {
        self.tools.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Dispatch a call. Validates the descriptor signature when present,
    /// shields the evaluator from callback panics, and validates the result
    /// against the declared output type.
    pub fn dispatch(&self, name: &str, args: &BTreeMap<Key, Value>) -> Result<Value, LispError> {
        let def = self
            .tools
            .get(name)
            .ok_or_else(|| LispError::ToolNotFound(name.to_string()))?;

        let (f, signature) = match def {
            ToolDef::Skip => {
                log::warn!("tool {} invoked while disabled for this turn", name);
                return Err(LispError::ToolNotFound(name.to_string()));
            }
            ToolDef::Func { f, signature, .. } => (f.clone(), signature.clone()),
        };

        let parsed = match &signature {
            Some(src) => Some(crate::signature::Signature::parse(src).map_err(|e| {
                LispError::InvalidTool {
                    name: name.to_string(),
                    message: e.to_string(),
                }
            })?),
            None => None,
        };

        if let Some(sig) = &parsed {
            sig.validate_args(args)?;
        }

        let result = catch_unwind(AssertUnwindSafe(|| f(args))).map_err(|_| {
            log::warn!("tool {} panicked", name);
            LispError::ToolError {
                name: name.to_string(),
                message: "callback panicked".to_string(),
            }
        })?;

        let value = result.map_err(|message| {
            log::warn!("tool {} failed: {}", name, message);
            LispError::ToolError {
                name: name.to_string(),
                message,
            }
        })?;

        if let Some(sig) = &parsed {
            sig.validate_output(&value)
                .map_err(|e| LispError::InvalidToolResult {
                    name: name.to_string(),
                    message: e.to_string(),
                })?;
        }

        Ok(value)
    }
}
