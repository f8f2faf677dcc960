//! Engine Error Types
//!
//! One enum per pipeline stage (parse, analysis, evaluation) plus an
//! umbrella [`EngineError`] that facade operations return. The first error
//! aborts the current call; the parser alone recovers between top-level
//! items so it can report the earliest failure with a position.

use thiserror::Error;

/// Errors produced while lexing or parsing rule text, or while decoding
/// the compiled rule format.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Syntax error with source position (1-based line and column)
    #[error("parse error at {line}:{column}: {message}")]
    Syntax {
        line: u32,
        column: u32,
        message: String,
    },

    /// Compiled rule stream is not valid (bad magic, truncation, bad tag)
    #[error("invalid compiled rule data: {0}")]
    Compiled(String),
}

impl ParseError {
    pub(crate) fn syntax(line: u32, column: u32, message: impl Into<String>) -> Self {
        ParseError::Syntax {
            line,
            column,
            message: message.into(),
        }
    }
}

/// Errors from safety, range-restriction, and stratification analysis
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    /// A variable in the head, a negated atom, a comparison, or a builtin
    /// does not occur in any positive body atom
    #[error("unsafe variable '{variable}' in rule for '{rule_head}': it must appear in a positive body atom")]
    UnsafeVariable { rule_head: String, variable: String },

    /// Head variable not bound by any positive body atom
    #[error("rule for '{rule_head}' is not range-restricted: head variable '{variable}' is unbound")]
    NotRangeRestricted { rule_head: String, variable: String },

    /// Negation over a predicate in the same stratum (recursion through negation)
    #[error("program is not stratifiable: '{rule_head}' negates '{negated}' inside the same recursive component")]
    Unstratifiable { rule_head: String, negated: String },

    /// Wildcard used in a rule head
    #[error("rule for '{rule_head}' uses a wildcard in its head")]
    WildcardInHead { rule_head: String },
}

/// Errors raised during fixed-point evaluation
#[derive(Error, Debug)]
pub enum EvalError {
    /// A relation provider reported a fault
    #[error("provider error on '{predicate}': {message}")]
    Provider { predicate: String, message: String },

    /// A `match` pattern failed to compile
    #[error("invalid regex pattern '{pattern}': {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Evaluation was cancelled through a [`crate::CancelHandle`]
    #[error("evaluation cancelled")]
    Cancelled,

    /// The per-stratum iteration safety ceiling was exceeded
    #[error("stratum {stratum} did not stabilize within {cap} iterations")]
    IterationCapExceeded { stratum: usize, cap: usize },

    /// A join needed a full scan of a provider that cannot enumerate
    #[error("provider for '{predicate}' does not support enumeration")]
    ScanUnsupported { predicate: String },

    /// Per-predicate fact-id space (48 bits) exhausted
    #[error("fact id space exhausted for predicate '{predicate}'")]
    FactIdOverflow { predicate: String },
}

/// Umbrella error for all facade operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    /// Predicate registered or referenced with conflicting arity
    #[error("arity mismatch for '{predicate}': expected {expected}, got {got}")]
    ArityMismatch {
        predicate: String,
        expected: usize,
        got: usize,
    },

    /// Arity above [`crate::value::MAX_ARITY`]
    #[error("predicate '{predicate}' declared with arity {arity}, maximum is {max}")]
    ArityTooLarge {
        predicate: String,
        arity: usize,
        max: usize,
    },

    /// Lookup of a predicate that was never registered
    #[error("unknown predicate: '{0}'")]
    UnknownPredicate(String),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::syntax(3, 14, "unterminated string");
        assert_eq!(err.to_string(), "parse error at 3:14: unterminated string");
    }

    #[test]
    fn test_engine_error_from_analysis() {
        let err: EngineError = AnalysisError::Unstratifiable {
            rule_head: "p".to_string(),
            negated: "p".to_string(),
        }
        .into();
        assert!(err.to_string().contains("not stratifiable"));
    }
}
