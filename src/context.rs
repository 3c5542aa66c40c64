// ABOUTME: Per-run evaluation context: observability buffers, namespace, gauges

use crate::config::{Limits, CAP_CHECK_INTERVAL};
use crate::error::LispError;
use crate::tools::ToolRegistry;
use crate::value::Value;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// One entry of the tool-call log, in evaluation order.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCall {
    pub name: String,
    pub args: Value,
    pub result: Value,
}

/// Everything a single run accumulates and consults while evaluating. The
/// context is created on entry to `run`, threaded through every evaluator
/// call, and consumed into the `Step` on exit. Parallel workers receive
/// snapshot copies whose buffers are discarded.
pub struct EvalContext {
    /// `ctx/name` data supplied by the caller (possibly projected).
    pub context: BTreeMap<String, Value>,
    /// User namespace: prior memory plus this run's `def`s.
    pub user_ns: BTreeMap<String, Value>,
    /// Captured `println` lines, in order.
    pub prints: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
    /// Task journal; `None` disables idempotent replay.
    pub journal: Option<BTreeMap<String, Value>>,
    pub summaries: BTreeMap<String, String>,
    pub tools: ToolRegistry,
    pub turn_history: Arc<Vec<Value>>,
    pub budget_remaining: Option<i64>,
    pub float_precision: Option<u32>,
    pub limits: Limits,
    deadline: Option<Instant>,
    allocated: usize,
    ticks: usize,
    depth: usize,
}

impl EvalContext {
    pub fn new(limits: Limits) -> EvalContext {
        EvalContext {
            context: BTreeMap::new(),
            user_ns: BTreeMap::new(),
            prints: Vec::new(),
            tool_calls: Vec::new(),
            journal: None,
            summaries: BTreeMap::new(),
            tools: ToolRegistry::new(),
            turn_history: Arc::new(Vec::new()),
            budget_remaining: None,
            float_precision: None,
            limits,
            deadline: None,
            allocated: 0,
            ticks: 0,
            depth: 0,
        }
    }

    /// Arm the wall-clock deadline; called once on entry to the run.
    pub fn arm_deadline(&mut self) {
        self.deadline =
            Some(Instant::now() + std::time::Duration::from_millis(self.limits.timeout_ms));
    }

    /// A worker snapshot for a parallel section: shares the read-only inputs,
    /// starts with empty observability buffers, and runs under the pmap
    /// deadline. Nothing written into the snapshot merges back.
    pub fn parallel_snapshot(&self) -> EvalContext {
        let mut limits = self.limits.clone();
        limits.timeout_ms = self.limits.pmap_timeout_ms;
        let mut snapshot = EvalContext::new(limits);
        snapshot.context = self.context.clone();
        snapshot.user_ns = self.user_ns.clone();
        snapshot.journal = self.journal.clone();
        snapshot.tools = self.tools.clone();
        snapshot.turn_history = self.turn_history.clone();
        snapshot.budget_remaining = self.budget_remaining;
        snapshot.float_precision = self.float_precision;
        snapshot.arm_deadline();
        snapshot
    }

    pub fn push_print(&mut self, line: String) {
        self.allocated += line.len();
        self.prints.push(line);
    }

    /// Allocation gauge. An estimate, charged at collection-constructing
    /// sites; the point is stopping runaway growth, not exact accounting.
    pub fn charge(&mut self, bytes: usize) -> Result<(), LispError> {
        self.allocated = self.allocated.saturating_add(bytes);
        if self.allocated > self.limits.max_heap {
            log::warn!(
                "allocation gauge tripped: {} > {} bytes",
                self.allocated,
                self.limits.max_heap
            );
            return Err(LispError::MemoryExceeded {
                limit: self.limits.max_heap,
            });
        }
        Ok(())
    }

    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Cooperative cap polling, called on every evaluator step; the deadline
    /// is only consulted every `CAP_CHECK_INTERVAL` ticks.
    pub fn tick(&mut self) -> Result<(), LispError> {
        self.ticks += 1;
        if self.ticks % CAP_CHECK_INTERVAL == 0 {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    return Err(LispError::Timeout(self.limits.timeout_ms));
                }
            }
        }
        Ok(())
    }

    /// Guard against unbounded non-`recur` recursion blowing the real stack.
    /// Surfaced as `memory_exceeded`: the stack is the memory running out.
    pub fn enter_frame(&mut self) -> Result<(), LispError> {
        self.depth += 1;
        if self.depth > 512 {
            return Err(LispError::MemoryExceeded {
                limit: self.limits.max_heap,
            });
        }
        Ok(())
    }

    pub fn exit_frame(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_trips_at_limit() {
        let mut limits = Limits::default();
        limits.max_heap = 100;
        let mut ctx = EvalContext::new(limits);
        assert!(ctx.charge(60).is_ok());
        let err = ctx.charge(60).unwrap_err();
        assert_eq!(err.reason(), "memory_exceeded");
    }

    #[test]
    fn test_parallel_snapshot_is_isolated() {
        let mut ctx = EvalContext::new(Limits::default());
        ctx.push_print("parent line".into());
        ctx.user_ns.insert("x".into(), Value::Int(1));

        let mut snapshot = ctx.parallel_snapshot();
        assert!(snapshot.prints.is_empty());
        assert_eq!(snapshot.user_ns.get("x"), Some(&Value::Int(1)));

        snapshot.push_print("worker line".into());
        snapshot.user_ns.insert("y".into(), Value::Int(2));
        assert_eq!(ctx.prints.len(), 1);
        assert!(!ctx.user_ns.contains_key("y"));
    }

    #[test]
    fn test_parallel_snapshot_uses_pmap_timeout() {
        let mut limits = Limits::default();
        limits.pmap_timeout_ms = 77;
        let ctx = EvalContext::new(limits);
        assert_eq!(ctx.parallel_snapshot().limits.timeout_ms, 77);
    }

    #[test]
    fn test_frame_guard() {
        let mut ctx = EvalContext::new(Limits::default());
        for _ in 0..512 {
            ctx.enter_frame().unwrap();
        }
        assert!(ctx.enter_frame().is_err());
    }
}
