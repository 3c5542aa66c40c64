// ABOUTME: Library surface: run(source, options) -> Step

pub mod analyzer;
pub mod ast;
pub mod binder;
pub mod builtins;
pub mod config;
pub mod context;
pub mod env;
pub mod error;
pub mod eval;
pub mod parallel;
pub mod projector;
pub mod reader;
pub mod sandbox;
pub mod serializer;
pub mod signature;
pub mod step;
pub mod symbols;
pub mod tools;
pub mod value;

pub use crate::error::LispError;
pub use crate::step::{Fail, Step, Usage};
pub use crate::tools::{ToolDef, ToolRegistry};
pub use crate::value::{Key, Value};

use crate::config::{Limits, DEFAULT_MAX_HEAP, DEFAULT_MAX_SYMBOLS, DEFAULT_TIMEOUT_MS};
use crate::context::EvalContext;
use crate::eval::Flow;
use crate::signature::Signature;
use crate::value::map_contains;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Options for a single `run`. Everything is optional; the defaults give a
/// pure, tool-less evaluation under the standard caps.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Name -> value mapping accessed via `ctx/name`.
    pub context: BTreeMap<String, Value>,
    /// Prior user namespace from the previous turn.
    pub memory: BTreeMap<String, Value>,
    pub tools: ToolRegistry,
    /// Output (and context) validation signature.
    pub signature: Option<String>,
    /// Task journal; `Some` enables idempotent replay.
    pub journal: Option<BTreeMap<String, Value>>,
    /// Previous-turn returns, most recent first (`*1`..`*3`).
    pub turn_history: Vec<Value>,
    /// Round floats in the returned value and prints to this many decimals.
    pub float_precision: Option<u32>,
    /// Wall-clock cap, ms. Default 1000.
    pub timeout: Option<u64>,
    /// Allocation cap, bytes. Default 40 MB.
    pub max_heap: Option<usize>,
    /// Wall-clock cap for parallel workers. Defaults to `timeout`.
    pub pmap_timeout: Option<u64>,
    /// Distinct-symbol cap. Default 10 000.
    pub max_symbols: Option<usize>,
    /// Strip unreferenced large context keys before evaluation.
    pub filter_context: Option<bool>,
    /// Turns left in the outer loop, surfaced via `(budget-remaining)`.
    pub budget_remaining: Option<i64>,
}

struct RunOutcome {
    flow: Result<Flow, LispError>,
    user_ns: BTreeMap<String, Value>,
    prints: Vec<String>,
    tool_calls: Vec<context::ToolCall>,
    journal: Option<BTreeMap<String, Value>>,
    summaries: BTreeMap<String, String>,
    allocated: usize,
}

fn failure_step(err: &LispError, options: &RunOptions, started: Instant) -> Step {
    let mut step = Step::empty();
    step.fail = Some(Fail::from_error(err));
    step.memory = options.memory.clone();
    step.journal = options.journal.clone();
    step.signature = options.signature.clone();
    step.usage.duration_ms = started.elapsed().as_millis() as u64;
    step
}

/// Execute one program and return its Step. Never panics and never aborts
/// the process: every failure mode lands in `Step.fail`.
pub fn run(source: &str, options: RunOptions) -> Step {
    let started = Instant::now();

    let limits = Limits {
        timeout_ms: options.timeout.unwrap_or(DEFAULT_TIMEOUT_MS),
        max_heap: options.max_heap.unwrap_or(DEFAULT_MAX_HEAP),
        pmap_timeout_ms: options
            .pmap_timeout
            .or(options.timeout)
            .unwrap_or(DEFAULT_TIMEOUT_MS),
        max_symbols: options.max_symbols.unwrap_or(DEFAULT_MAX_SYMBOLS),
        loop_limit: config::DEFAULT_LOOP_LIMIT,
    };

    // A prior step that failed must not be silently re-fed as data
    for (key, value) in &options.context {
        if let Value::Map(m) = value {
            if map_contains(m, &Key::keyword("__ptc_fail__")) {
                return failure_step(&LispError::ChainedFailure(key.clone()), &options, started);
            }
        }
    }

    log::debug!("run: parsing {} bytes of source", source.len());
    let node = match reader::parse(source).and_then(|forms| analyzer::analyze_program(&forms)) {
        Ok(node) => node,
        Err(e) => return failure_step(&e, &options, started),
    };

    if let Err(e) = symbols::check_budget(&node, limits.max_symbols) {
        return failure_step(&e, &options, started);
    }

    let parsed_signature = match &options.signature {
        Some(src) => match Signature::parse(src) {
            Ok(sig) => Some(sig),
            Err(e) => return failure_step(&e, &options, started),
        },
        None => None,
    };
    if let Some(sig) = &parsed_signature {
        if !sig.params.is_empty() {
            if let Err(e) = sig.validate_context(&options.context) {
                return failure_step(&e, &options, started);
            }
        }
    }

    let mut context_map = options.context.clone();
    if options.filter_context.unwrap_or(true) {
        projector::project(&mut context_map, &node);
    }

    // Everything the worker needs moves in; the worker hands back the whole
    // accumulated context so journal commits survive even failed runs.
    let job = {
        let node = node.clone();
        let limits = limits.clone();
        let memory = options.memory.clone();
        let tools = options.tools.clone();
        let journal = options.journal.clone();
        let turn_history = options.turn_history.clone();
        let budget_remaining = options.budget_remaining;
        let float_precision = options.float_precision;
        move || {
            let mut ctx = EvalContext::new(limits);
            ctx.context = context_map;
            ctx.user_ns = memory;
            ctx.tools = tools;
            ctx.journal = journal;
            ctx.turn_history = Arc::new(turn_history);
            ctx.budget_remaining = budget_remaining;
            ctx.float_precision = float_precision;
            ctx.arm_deadline();
            let flow = eval::eval_program(&node, &mut ctx);
            let allocated = ctx.allocated();
            RunOutcome {
                flow,
                user_ns: ctx.user_ns,
                prints: ctx.prints,
                tool_calls: ctx.tool_calls,
                journal: ctx.journal,
                summaries: ctx.summaries,
                allocated,
            }
        }
    };

    let outcome = match sandbox::execute(limits.timeout_ms, job) {
        Ok(outcome) => outcome,
        Err(e) => return failure_step(&e, &options, started),
    };

    let mut step = Step::empty();
    step.prints = outcome.prints;
    step.tool_calls = outcome.tool_calls;
    step.summaries = outcome.summaries;
    step.signature = options.signature.clone();
    step.usage = Usage {
        duration_ms: started.elapsed().as_millis() as u64,
        memory_bytes: outcome.allocated,
        turns: None,
    };

    match outcome.flow {
        Ok(Flow::Value(v)) | Ok(Flow::Return(v)) => {
            let v = match options.float_precision {
                Some(p) => v.round_floats(p),
                None => v,
            };
            step.memory = outcome.user_ns;
            step.journal = outcome.journal;
            step.compute_delta(&options.memory);
            if let Some(sig) = &parsed_signature {
                if let Err(e) = sig.validate_output(&v) {
                    step.fail = Some(Fail::from_error(&e));
                    return step;
                }
            }
            step.return_value = v;
        }
        Ok(Flow::Fail(payload)) => {
            // A deliberate program outcome: defs and journal commits stand
            step.fail = Some(Fail::from_sentinel(payload));
            step.memory = outcome.user_ns;
            step.journal = outcome.journal;
            step.compute_delta(&options.memory);
        }
        Ok(Flow::Recur(_)) => {
            step.fail = Some(Fail::from_error(&LispError::invalid_form(
                "recur escaped its recursion point",
            )));
            step.memory = options.memory.clone();
            step.journal = outcome.journal;
        }
        Err(e) => {
            // Errors preserve the caller-supplied memory; committed journal
            // entries survive so a re-run can replay past the failure point
            log::debug!("run failed: {}", e);
            step.fail = Some(Fail::from_error(&e));
            step.memory = options.memory.clone();
            step.journal = outcome.journal;
        }
    }

    step
}
