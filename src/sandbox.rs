// ABOUTME: Per-run isolation worker enforcing the wall-clock cap

use crate::error::LispError;
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::time::Duration;

/// Worker stack size. Generous, because general (non-recur) user recursion
/// runs on the real stack up to the evaluator's frame guard.
const WORKER_STACK: usize = 64 * 1024 * 1024;

/// Grace added to the hard recv deadline on top of the cooperative one, so
/// the in-evaluator deadline check almost always reports the timeout itself
/// (with full context preserved) before the hard cut fires.
const HARD_CAP_GRACE_MS: u64 = 250;

/// Run `job` on an isolated worker thread under a wall-clock cap.
///
/// The evaluator polls its own deadline cooperatively; this outer cap only
/// triggers when the worker is stuck somewhere that cannot poll (a blocking
/// tool callback). In that case the worker is abandoned — Rust threads
/// cannot be killed — and the caller gets `timeout`.
pub fn execute<T, F>(timeout_ms: u64, job: F) -> Result<T, LispError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = bounded::<T>(1);

    let spawned = std::thread::Builder::new()
        .name("steplisp-run".to_string())
        .stack_size(WORKER_STACK)
        .spawn(move || {
            let result = job();
            let _ = tx.send(result);
        });

    if spawned.is_err() {
        log::warn!("could not spawn run worker");
        return Err(LispError::Timeout(timeout_ms));
    }

    match rx.recv_timeout(Duration::from_millis(timeout_ms + HARD_CAP_GRACE_MS)) {
        Ok(result) => Ok(result),
        Err(RecvTimeoutError::Timeout) => {
            log::warn!("run exceeded the hard {} ms cap; worker abandoned", timeout_ms);
            Err(LispError::Timeout(timeout_ms))
        }
        // A dying worker (panic) also surfaces as a timeout-shaped failure
        Err(RecvTimeoutError::Disconnected) => Err(LispError::Timeout(timeout_ms)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_job_completes() {
        let result = execute(1000, || 41 + 1).unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn test_stuck_job_times_out() {
        let err = execute(50, || {
            std::thread::sleep(Duration::from_secs(5));
            0
        })
        .unwrap_err();
        assert_eq!(err.reason(), "timeout");
    }

    #[test]
    fn test_panicking_job_surfaces_as_timeout() {
        let err = execute::<i32, _>(200, || panic!("worker died")).unwrap_err();
        assert_eq!(err.reason(), "timeout");
    }
}
