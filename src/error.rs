// ABOUTME: Error taxonomy for parse, analysis, runtime, and resource failures

use thiserror::Error;

// ===== Arity constant strings (eliminates allocations in error paths) =====
pub const ARITY_ONE: &str = "1";
pub const ARITY_TWO: &str = "2";
pub const ARITY_THREE: &str = "3";
pub const ARITY_AT_LEAST_ONE: &str = "at least 1";
pub const ARITY_ONE_OR_TWO: &str = "1-2";
pub const ARITY_TWO_OR_THREE: &str = "2-3";
pub const ARITY_ONE_TO_THREE: &str = "1-3";

/// The closed error set surfaced through `Step.fail.reason`. Every variant
/// maps to exactly one reason atom via [`LispError::reason`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LispError {
    #[error("{0}")]
    Parse(String),

    #[error("{0}")]
    InvalidForm(String),

    #[error("{form}: {message}")]
    InvalidArity { form: String, message: String },

    #[error("cond: {0}")]
    InvalidCondForm(String),

    #[error("where: {0}")]
    InvalidWhereForm(String),

    #[error("where: unknown operator {0}")]
    InvalidWhereOperator(String),

    #[error("placeholder {0} is only valid inside #(...)")]
    InvalidPlaceholder(String),

    #[error("{0}")]
    InvalidCallToolName(String),

    #[error("{0}")]
    InvalidThreadForm(String),

    #[error("{0}")]
    UnsupportedPattern(String),

    #[error("program uses {count} distinct symbols, exceeding the limit of {limit}")]
    SymbolLimitExceeded { count: usize, limit: usize },

    #[error("Undefined symbol: {0}")]
    UnboundVar(String),

    /// Builtin called with an argument count outside its declared arity set.
    #[error("{function}: expected {expected} argument{}, got {actual}", if *.expected == "1" { "" } else { "s" })]
    ArityError {
        function: String,
        expected: String, // "2", "1-3", "at least 1"
        actual: usize,
    },

    /// User-defined function called with surplus arguments and no `& rest`.
    #[error("{function}: takes {expected} argument{}, got {actual}", if *.expected == 1 { "" } else { "s" })]
    ArityMismatch {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error("{function}: expected {expected}, got {actual}")]
    TypeMismatch {
        function: String,
        expected: String,
        actual: String,
    },

    #[error("cannot redefine built-in name {0}")]
    CannotShadowBuiltin(String),

    #[error("loop/recur exceeded the iteration limit of {0}")]
    LoopLimitExceeded(usize),

    #[error("tool {0} is not available")]
    ToolNotFound(String),

    #[error("tool {name}: {message}")]
    ToolError { name: String, message: String },

    #[error("tool {name}: {message}")]
    InvalidTool { name: String, message: String },

    #[error("tool {name} returned an invalid result: {message}")]
    InvalidToolResult { name: String, message: String },

    #[error("{path}: {message}")]
    Validation { path: String, message: String },

    #[error("evaluation exceeded the {0} ms time limit")]
    Timeout(u64),

    #[error("evaluation exceeded the {limit} byte memory limit")]
    MemoryExceeded { limit: usize },

    #[error("context key {0} carries a failed prior step")]
    ChainedFailure(String),
}

impl LispError {
    /// Create a type mismatch error with full context
    pub fn type_error(function: &str, expected: &str, actual: impl Into<String>) -> Self {
        LispError::TypeMismatch {
            function: function.to_string(),
            expected: expected.to_string(),
            actual: actual.into(),
        }
    }

    /// Create an arity error with expected and actual counts
    pub fn arity_error(function: &str, expected: impl Into<String>, actual: usize) -> Self {
        LispError::ArityError {
            function: function.to_string(),
            expected: expected.into(),
            actual,
        }
    }

    pub fn invalid_form(message: impl Into<String>) -> Self {
        LispError::InvalidForm(message.into())
    }

    pub fn invalid_arity(form: &str, message: impl Into<String>) -> Self {
        LispError::InvalidArity {
            form: form.to_string(),
            message: message.into(),
        }
    }

    /// The reason atom this error surfaces as in `Step.fail.reason`.
    pub fn reason(&self) -> &'static str {
        match self {
            LispError::Parse(_) => "parse_error",
            LispError::InvalidForm(_) => "invalid_form",
            LispError::InvalidArity { .. } => "invalid_arity",
            LispError::InvalidCondForm(_) => "invalid_cond_form",
            LispError::InvalidWhereForm(_) => "invalid_where_form",
            LispError::InvalidWhereOperator(_) => "invalid_where_operator",
            LispError::InvalidPlaceholder(_) => "invalid_placeholder",
            LispError::InvalidCallToolName(_) => "invalid_call_tool_name",
            LispError::InvalidThreadForm(_) => "invalid_thread_form",
            LispError::UnsupportedPattern(_) => "unsupported_pattern",
            LispError::SymbolLimitExceeded { .. } => "symbol_limit_exceeded",
            LispError::UnboundVar(_) => "unbound_var",
            LispError::ArityError { .. } => "arity_error",
            LispError::ArityMismatch { .. } => "arity_mismatch",
            LispError::TypeMismatch { .. } => "type_error",
            LispError::CannotShadowBuiltin(_) => "cannot_shadow_builtin",
            LispError::LoopLimitExceeded(_) => "loop_limit_exceeded",
            LispError::ToolNotFound(_) => "tool_not_found",
            LispError::ToolError { .. } => "tool_error",
            LispError::InvalidTool { .. } => "invalid_tool",
            LispError::InvalidToolResult { .. } => "invalid_tool_result",
            LispError::Validation { .. } => "validation_error",
            LispError::Timeout(_) => "timeout",
            LispError::MemoryExceeded { .. } => "memory_exceeded",
            LispError::ChainedFailure(_) => "chained_failure",
        }
    }
}

/// What interrupts straight-line evaluation: a real error, or one of the
/// value-level sentinels (`return`/`fail`) short-circuiting outward. Using
/// the error channel for sentinels lets every builtin and evaluator step
/// propagate them with `?`; the run loop unwraps them at the top.
#[derive(Debug, Clone)]
pub enum Exception {
    Error(LispError),
    Return(crate::value::Value),
    Fail(crate::value::Value),
}

impl From<LispError> for Exception {
    fn from(e: LispError) -> Exception {
        Exception::Error(e)
    }
}
