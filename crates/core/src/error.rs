//! Error types for casetree
//!
//! Two families of errors live here:
//! - [`EngineError`]: configuration errors. These are programming mistakes in
//!   the specification itself (undefined variables, cycles, mutating a tree
//!   that is already executing) and are always fatal for the leaf or build
//!   step that hits them.
//! - [`CaseError`]: what a hook, test body or variable computation returns.
//!   Carries assertion failures, skip signals and configuration errors that
//!   surfaced while a leaf was running.
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use thiserror::Error;

/// Result type alias for tree-building and dispatch operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Result type alias for hooks, test bodies and variable computations
pub type CaseResult<T = ()> = std::result::Result<T, CaseError>;

/// Configuration errors
///
/// Every variant indicates a mistake in the specification code rather than a
/// runtime data condition. They are surfaced at the earliest point possible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The tree was mutated after execution started
    #[error("cannot {operation} at '{path}': the spec tree is already finalized")]
    TreeFinalized {
        /// The attempted mutation (e.g. "define variable 'x'")
        operation: String,
        /// Context path where the mutation was attempted
        path: String,
    },

    /// A node id was used with a tree that never handed it out
    #[error("node #{node} does not belong to spec tree '{tree}' ({len} nodes)")]
    UnknownNode {
        /// Raw index of the rejected node id
        node: usize,
        /// Root name of the tree the id was used with
        tree: String,
        /// Number of nodes in that tree
        len: usize,
    },

    /// No context from the leaf up to the root defines the variable
    #[error("undefined variable '{name}' in context '{path}'")]
    UndefinedVariable {
        /// Requested variable name
        name: String,
        /// Full context path of the requesting leaf
        path: String,
    },

    /// A variable was requested while it was being computed
    #[error("circular variable reference: {}", cycle.join(" -> "))]
    CircularVariable {
        /// The resolution chain, first and last entries are the same name
        cycle: Vec<String>,
    },

    /// The typed accessor asked for a different type than the stored one
    #[error("variable '{name}' holds {actual}, not {expected}")]
    VariableTypeMismatch {
        /// Variable name
        name: String,
        /// Type requested at the call site
        expected: &'static str,
        /// Type the variable was computed as
        actual: &'static str,
    },

    /// Contract dispatch received a runner it cannot drive
    #[error("{type_name} is an unknown test runner type")]
    UnknownTarget {
        /// Type name of the rejected target
        type_name: &'static str,
    },

    /// Configuration value could not be parsed or validated
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Create an invalid-configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        EngineError::InvalidConfig(message.into())
    }
}

/// Outcome signal of a hook, test body or variable computation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaseError {
    /// Assertion failure raised by the body itself
    #[error("{0}")]
    Failed(String),

    /// The body asked to skip the rest of the leaf
    #[error("skipped: {0}")]
    Skipped(String),

    /// A configuration error surfaced while the leaf was running
    #[error(transparent)]
    Config(#[from] EngineError),
}

impl CaseError {
    /// Create an assertion failure
    pub fn failed(message: impl Into<String>) -> Self {
        CaseError::Failed(message.into())
    }

    /// Create a skip signal
    pub fn skip(reason: impl Into<String>) -> Self {
        CaseError::Skipped(reason.into())
    }

    /// Check if this is a skip signal rather than a failure
    pub fn is_skip(&self) -> bool {
        matches!(self, CaseError::Skipped(_))
    }

    /// Check if this wraps a configuration error
    pub fn is_config(&self) -> bool {
        matches!(self, CaseError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_undefined_variable() {
        let err = EngineError::UndefinedVariable {
            name: "y".to_string(),
            path: "root/when other".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("undefined variable 'y'"));
        assert!(msg.contains("root/when other"));
    }

    #[test]
    fn test_error_display_unknown_node() {
        let err = EngineError::UnknownNode {
            node: 12,
            tree: "stack".to_string(),
            len: 3,
        };
        assert_eq!(
            err.to_string(),
            "node #12 does not belong to spec tree 'stack' (3 nodes)"
        );
    }

    #[test]
    fn test_error_display_cycle() {
        let err = EngineError::CircularVariable {
            cycle: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert_eq!(err.to_string(), "circular variable reference: a -> b -> a");
    }

    #[test]
    fn test_error_display_type_mismatch() {
        let err = EngineError::VariableTypeMismatch {
            name: "x".to_string(),
            expected: "u8",
            actual: "i32",
        };
        let msg = err.to_string();
        assert!(msg.contains("'x'"));
        assert!(msg.contains("i32"));
        assert!(msg.contains("u8"));
    }

    #[test]
    fn test_error_display_unknown_target() {
        let err = EngineError::UnknownTarget { type_name: "u32" };
        assert_eq!(err.to_string(), "u32 is an unknown test runner type");
    }

    #[test]
    fn test_case_error_from_engine_error() {
        let err: CaseError = EngineError::invalid_config("bad seed").into();
        assert!(err.is_config());
        assert!(!err.is_skip());
        assert!(err.to_string().contains("bad seed"));
    }

    #[test]
    fn test_case_error_constructors() {
        assert_eq!(CaseError::failed("boom"), CaseError::Failed("boom".to_string()));
        assert!(CaseError::skip("later").is_skip());
        assert_eq!(CaseError::skip("later").to_string(), "skipped: later");
    }
}
