// ABOUTME: pmap/pcalls parallel workers with snapshot isolation

use crate::builtins::as_seq;
use crate::context::EvalContext;
use crate::error::{Exception, LispError};
use crate::eval::apply_value;
use crate::value::Value;
use crossbeam_channel::{unbounded, RecvTimeoutError};
use std::time::{Duration, Instant};

enum WorkerOutcome {
    Value(Value),
    Return(Value),
    Fail(Value),
    Error(LispError),
}

impl From<Result<Value, Exception>> for WorkerOutcome {
    fn from(result: Result<Value, Exception>) -> WorkerOutcome {
        match result {
            Ok(v) => WorkerOutcome::Value(v),
            Err(Exception::Return(v)) => WorkerOutcome::Return(v),
            Err(Exception::Fail(v)) => WorkerOutcome::Fail(v),
            Err(Exception::Error(e)) => WorkerOutcome::Error(e),
        }
    }
}

/// Run one task per element on its own thread. Each worker evaluates against
/// a snapshot context; prints, tool calls, and namespace writes made inside
/// workers are discarded. Results come back in input order. The first error
/// observed fails the whole operation; remaining workers are abandoned.
fn run_parallel(
    ctx: &mut EvalContext,
    tasks: Vec<(Value, Vec<Value>)>,
) -> Result<Value, Exception> {
    let total = tasks.len();
    if total == 0 {
        return Ok(Value::Vector(Vec::new()));
    }

    let timeout = Duration::from_millis(ctx.limits.pmap_timeout_ms);
    let deadline = Instant::now() + timeout;
    let (tx, rx) = unbounded::<(usize, WorkerOutcome)>();

    for (idx, (f, args)) in tasks.into_iter().enumerate() {
        let tx = tx.clone();
        let mut worker_ctx = ctx.parallel_snapshot();
        std::thread::spawn(move || {
            let outcome = WorkerOutcome::from(apply_value(&f, &args, &mut worker_ctx));
            let _ = tx.send((idx, outcome));
        });
    }
    drop(tx);

    let mut results: Vec<Option<Value>> = vec![None; total];
    let mut received = 0usize;
    while received < total {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((idx, WorkerOutcome::Value(v))) => {
                results[idx] = Some(v);
                received += 1;
            }
            Ok((_, WorkerOutcome::Return(v))) => return Err(Exception::Return(v)),
            Ok((_, WorkerOutcome::Fail(v))) => return Err(Exception::Fail(v)),
            Ok((_, WorkerOutcome::Error(e))) => {
                log::warn!("parallel worker failed: {}", e);
                return Err(Exception::Error(e));
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                return Err(Exception::Error(LispError::Timeout(
                    ctx.limits.pmap_timeout_ms,
                )));
            }
        }
    }

    let out: Vec<Value> = results
        .into_iter()
        .map(|r| r.expect("all results received"))
        .collect();
    let v = Value::Vector(out);
    ctx.charge(v.approx_size())?;
    Ok(v)
}

/// `(pmap f coll)` — map each element through `f` in parallel.
pub fn pmap(ctx: &mut EvalContext, f: &Value, coll: &Value) -> Result<Value, Exception> {
    if !f.is_callable() {
        return Err(LispError::type_error("pmap", "a function", f.type_name()).into());
    }
    let items = as_seq("pmap", coll)?;
    let tasks = items
        .into_iter()
        .map(|item| (f.clone(), vec![item]))
        .collect();
    run_parallel(ctx, tasks)
}

/// `(pcalls f g ...)` — evaluate zero-arity thunks in parallel, results in
/// argument order.
pub fn pcalls(ctx: &mut EvalContext, thunks: &[Value]) -> Result<Value, Exception> {
    for thunk in thunks {
        if !thunk.is_callable() {
            return Err(
                LispError::type_error("pcalls", "zero-arity functions", thunk.type_name()).into(),
            );
        }
    }
    let tasks = thunks.iter().map(|f| (f.clone(), Vec::new())).collect();
    run_parallel(ctx, tasks)
}
