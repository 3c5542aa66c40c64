// ABOUTME: Resource limits and rendering constants for a single run

/// Wall-clock cap for one `run`, milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Allocation-gauge cap for one `run`, bytes.
pub const DEFAULT_MAX_HEAP: usize = 40 * 1024 * 1024;

/// Distinct user symbol/keyword cap checked before evaluation.
pub const DEFAULT_MAX_SYMBOLS: usize = 10_000;

/// Hard iteration cap for each `loop`/`recur` recursion point.
pub const DEFAULT_LOOP_LIMIT: usize = 1000;

/// `println` lines are truncated to this many characters for feedback.
pub const PRINT_WIDTH: usize = 240;

/// Context values whose rendered size stays under this many bytes survive
/// data-key projection even when unreferenced.
pub const CONTEXT_KEEP_BYTES: usize = 512;

/// How often the evaluator polls the wall-clock deadline and heap gauge.
pub const CAP_CHECK_INTERVAL: usize = 1024;

/// Per-run resource limits, resolved from `RunOptions` with the defaults
/// above.
#[derive(Debug, Clone)]
pub struct Limits {
    pub timeout_ms: u64,
    pub max_heap: usize,
    pub pmap_timeout_ms: u64,
    pub max_symbols: usize,
    pub loop_limit: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_heap: DEFAULT_MAX_HEAP,
            pmap_timeout_ms: DEFAULT_TIMEOUT_MS,
            max_symbols: DEFAULT_MAX_SYMBOLS,
            loop_limit: DEFAULT_LOOP_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let limits = Limits::default();
        assert_eq!(limits.timeout_ms, 1000);
        assert_eq!(limits.max_symbols, 10_000);
        assert_eq!(limits.loop_limit, 1000);
        assert_eq!(limits.pmap_timeout_ms, limits.timeout_ms);
    }
}
