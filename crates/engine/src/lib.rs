//! Execution engine for casetree
//!
//! This crate turns a declared specification tree into isolated leaf runs:
//! - Tree: arena of context nodes with variables, hooks and test bodies
//! - Variables: per-leaf memoized store with cycle detection
//! - Hooks: setup/teardown/around composition from root to leaf
//! - Case: the per-leaf runtime handed to every hook and body
//! - Execution: leaf state machine and the tree walker ([`Executor`])
//! - Spec: the builder DSL (describe / when / then, let bindings, hooks)
//! - Contract: reusable suites dispatched over a closed set of targets
//! - Harness: in-process host runner used when no external runner exists
//!
//! A tree is built single-threaded and finalized before the first leaf
//! runs. After that it is shared read-only; every leaf gets its own
//! variable store and cleanup stack.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod case;
pub mod config;
pub mod contract;
pub mod execution;
pub mod harness;
pub mod hooks;
pub mod report;
pub mod spec;
pub mod tree;
pub mod variables;

pub use case::{Case, CaseMode};
pub use config::{ExecutionOrder, SpecConfig, CONFIG_FILE_NAME};
pub use contract::{
    display_name, run_contracts, run_contracts_or_panic, run_open_contracts,
    run_open_contracts_or_panic, Contract, OpenContract, Target,
};
pub use execution::{execute_leaf, Executor};
pub use harness::{Harness, HarnessBench, MIN_PARALLEL_THREADS};
pub use hooks::{Hook, HookChain, HookKind, HookRef, HookSet, Next};
pub use report::SuiteReport;
pub use spec::{Context, Spec};
pub use tree::{ContextNode, Entry, ExecutionMode, LeafId, NodeId, SpecTree, VariableDef};
pub use variables::{Binding, VariableStore};
