//! Per-leaf runtime
//!
//! A [`Case`] is created for exactly one execution of one leaf and dropped
//! at its end. It owns the leaf's private [`VariableStore`], the LIFO cleanup
//! stack shared by level teardowns, variable cleanups and deferred actions,
//! and every failure recorded along the way.
//!
//! Hooks, test bodies and variable computations all receive `&mut Case`.
//! Variables are read through [`Case::get`] or [`Case::with`], which resolve
//! the nearest definition on first use and hand back the memoized value on
//! every later use.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use casetree_core::{
    CaseError, CaseResult, EngineError, Failure, FailureKind, LeafReport, LeafState, LeafStatus,
    TagSet, TestHandle,
};

use crate::hooks::HookFn;
use crate::tree::{LeafId, SpecTree};
use crate::variables::{Binding, Cleanup, VariableStore};

/// How the leaf is being driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseMode {
    /// Regular test run
    #[default]
    Test,
    /// One iteration of a benchmark loop
    Benchmark,
}

/// Run `f`, turning a panic into an assertion failure
pub(crate) fn guarded<R>(f: impl FnOnce() -> CaseResult<R>) -> CaseResult<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(CaseError::failed(format!(
            "panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

enum Deferred {
    Teardown(HookFn),
    Once(Cleanup),
}

/// Runtime state of one leaf execution
pub struct Case {
    tree: Arc<SpecTree>,
    leaf: LeafId,
    path: String,
    name: String,
    tags: TagSet,
    mode: CaseMode,
    state: LeafState,
    store: VariableStore,
    cleanups: Vec<Deferred>,
    failures: Vec<Failure>,
    skip_reason: Option<String>,
    logs: Vec<String>,
}

impl Case {
    /// Prepare a pending execution of `leaf`
    pub fn new(tree: Arc<SpecTree>, leaf: LeafId, mode: CaseMode) -> Self {
        let path = tree.leaf_path(leaf);
        let name = tree.test(leaf).name().to_string();
        let tags = tree.effective_tags(leaf.node);
        Case {
            tree,
            leaf,
            path,
            name,
            tags,
            mode,
            state: LeafState::Pending,
            store: VariableStore::new(),
            cleanups: Vec::new(),
            failures: Vec::new(),
            skip_reason: None,
            logs: Vec::new(),
        }
    }

    /// Full path of the leaf
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Name of the leaf's test body
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The leaf being executed
    pub fn leaf(&self) -> LeafId {
        self.leaf
    }

    /// Tags inherited by the leaf
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Current lifecycle state
    pub fn state(&self) -> LeafState {
        self.state
    }

    /// Check if this execution is one benchmark iteration
    pub fn is_benchmark(&self) -> bool {
        self.mode == CaseMode::Benchmark
    }

    /// Check if any failure was recorded so far
    pub fn has_failed(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Failures recorded so far
    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    /// Number of variables computed so far in this execution
    pub fn computed_variables(&self) -> usize {
        self.store.computed()
    }

    /// Check if `name` resolves from this leaf, without computing it
    pub fn is_defined(&self, name: &str) -> bool {
        self.store.contains(name) || self.tree.find_variable(self.leaf.node, name).is_some()
    }

    /// Get a clone of the value of variable `name`
    ///
    /// Computes the variable on first use. Cloning an `Arc` hands back the
    /// same allocation on every call.
    ///
    /// # Errors
    ///
    /// - [`EngineError::UndefinedVariable`] if no context up to the root
    ///   defines `name`
    /// - [`EngineError::CircularVariable`] if `name` is requested while being
    ///   computed
    /// - [`EngineError::VariableTypeMismatch`] if the value is not a `T`
    /// - whatever the compute function returned
    pub fn get<T: Any + Clone>(&mut self, name: &str) -> CaseResult<T> {
        self.with(name, |value: &mut T| value.clone())
    }

    /// Run `f` against the memoized value of variable `name`
    ///
    /// Mutations made through `f` are visible to every later access in the
    /// same leaf and to nothing else.
    pub fn with<T: Any, R>(&mut self, name: &str, f: impl FnOnce(&mut T) -> R) -> CaseResult<R> {
        self.resolve(name)?;
        match self.store.get_mut::<T>(name)? {
            Some(value) => Ok(f(value)),
            None => Err(self.undefined(name).into()),
        }
    }

    /// Override variable `name` for the rest of this leaf
    ///
    /// The compute function is never called afterwards. Cleanups of a value
    /// computed earlier still run at leaf end.
    pub fn set<T: Any>(&mut self, name: impl Into<String>, value: T) {
        self.store.set(name, value);
    }

    /// Register a cleanup to run when the leaf ends
    ///
    /// Cleanups run last-in first-out, interleaved with level teardowns and
    /// variable cleanups in registration order.
    pub fn defer(&mut self, cleanup: impl FnOnce(&mut Case) -> CaseResult + 'static) {
        self.cleanups.push(Deferred::Once(Box::new(cleanup)));
    }

    /// Record an assertion failure and keep going
    pub fn error(&mut self, message: impl Into<String>) {
        self.record(FailureKind::Assertion, message.into());
    }

    /// Attach a log line to the leaf
    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(leaf = %self.path, "{}", message);
        self.logs.push(message);
    }

    fn undefined(&self, name: &str) -> EngineError {
        EngineError::UndefinedVariable {
            name: name.to_string(),
            path: self.path.clone(),
        }
    }

    fn resolve(&mut self, name: &str) -> CaseResult {
        if self.store.contains(name) {
            return Ok(());
        }
        self.store.begin(name)?;

        let compute = match self.tree.find_variable(self.leaf.node, name) {
            Some(def) => Arc::clone(&def.compute),
            None => {
                self.store.abort(name);
                return Err(self.undefined(name).into());
            }
        };

        tracing::debug!(leaf = %self.path, variable = name, "computing variable");
        match guarded(|| compute(self)) {
            Ok(Binding {
                value,
                type_name,
                cleanup,
            }) => {
                self.store.complete(name, value, type_name);
                if let Some(cleanup) = cleanup {
                    self.cleanups.push(Deferred::Once(cleanup));
                }
                Ok(())
            }
            Err(err) => {
                self.store.abort(name);
                Err(err)
            }
        }
    }

    fn record(&mut self, kind: FailureKind, message: String) {
        self.failures.push(Failure::new(self.state, kind, message));
    }

    pub(crate) fn transition(&mut self, next: LeafState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal leaf transition {} -> {}",
            self.state,
            next
        );
        tracing::trace!(leaf = %self.path, from = %self.state, to = %next, "transition");
        self.state = next;
    }

    pub(crate) fn schedule_teardown(&mut self, teardown: HookFn) {
        self.cleanups.push(Deferred::Teardown(teardown));
    }

    /// Record `result` on the case and hand it back unchanged
    pub(crate) fn settle(&mut self, result: CaseResult) -> CaseResult {
        if let Err(err) = &result {
            self.absorb(Err(err.clone()));
        }
        result
    }

    /// Skip reason set so far, if any
    pub(crate) fn skip_requested(&self) -> Option<String> {
        self.skip_reason.clone()
    }

    /// Fold the outcome of a hook, body or cleanup into the record
    pub(crate) fn absorb(&mut self, result: CaseResult) {
        match result {
            Ok(()) => {}
            Err(CaseError::Failed(message)) => self.record(FailureKind::Assertion, message),
            Err(CaseError::Skipped(reason)) => {
                self.skip_reason.get_or_insert(reason);
            }
            Err(CaseError::Config(err)) => {
                tracing::error!(leaf = %self.path, error = %err, "configuration error");
                self.record(FailureKind::Configuration, err.to_string());
            }
        }
    }

    /// Unwind the cleanup stack
    ///
    /// A failing entry is recorded and never stops the remaining ones.
    /// Entries pushed while unwinding run too.
    pub(crate) fn run_cleanups(&mut self) {
        while let Some(deferred) = self.cleanups.pop() {
            let result = match deferred {
                Deferred::Teardown(teardown) => guarded(|| teardown(self)),
                Deferred::Once(cleanup) => guarded(|| cleanup(self)),
            };
            match result {
                Ok(()) => {}
                Err(CaseError::Failed(message)) => {
                    tracing::warn!(leaf = %self.path, error = %message, "teardown failed");
                    self.record(FailureKind::Teardown, message);
                }
                Err(CaseError::Skipped(reason)) => {
                    self.skip_reason.get_or_insert(reason);
                }
                Err(CaseError::Config(err)) => {
                    tracing::error!(leaf = %self.path, error = %err, "configuration error");
                    self.record(FailureKind::Configuration, err.to_string());
                }
            }
        }
    }

    /// Settle the terminal state and build the report
    pub(crate) fn finish(mut self, duration: Duration) -> LeafReport {
        let terminal = if !self.failures.is_empty() {
            LeafState::Failed
        } else if self.skip_reason.is_some() {
            LeafState::Skipped
        } else {
            LeafState::Done
        };
        self.transition(terminal);
        let status = match terminal {
            LeafState::Done => LeafStatus::Passed,
            LeafState::Skipped => LeafStatus::Skipped,
            _ => LeafStatus::Failed,
        };

        LeafReport {
            path: self.path,
            tags: self.tags.to_vec(),
            status,
            failures: self.failures,
            skip_reason: self.skip_reason,
            logs: self.logs,
            duration,
        }
    }
}

impl TestHandle for Case {
    fn name(&self) -> &str {
        &self.path
    }

    fn fail(&mut self, message: &str) {
        self.error(message);
    }

    /// Mark the leaf skipped; setups after the current hook and the body
    /// no longer run
    fn skip(&mut self, reason: &str) {
        self.skip_reason.get_or_insert_with(|| reason.to_string());
    }

    fn failed(&self) -> bool {
        self.has_failed()
    }

    fn skipped(&self) -> bool {
        self.skip_reason.is_some()
    }

    fn log(&mut self, message: &str) {
        Case::log(self, message);
    }
}

impl fmt::Debug for Case {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Case")
            .field("path", &self.path)
            .field("state", &self.state)
            .field("store", &self.store)
            .field("cleanups", &self.cleanups.len())
            .field("failures", &self.failures)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{TestFn, VariableDef};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn single_leaf(tree: &mut SpecTree) -> LeafId {
        let root = tree.root();
        let body: TestFn = Arc::new(|_case: &mut Case| Ok(()));
        tree.add_test(root, "leaf", body).unwrap()
    }

    fn running(tree: SpecTree, leaf: LeafId) -> Case {
        let mut case = Case::new(Arc::new(tree), leaf, CaseMode::Test);
        case.transition(LeafState::SetupRunning);
        case
    }

    #[test]
    fn test_guarded_catches_panic() {
        let result: CaseResult = guarded(|| panic!("boom"));
        assert_eq!(result, Err(CaseError::failed("panicked: boom")));

        let formatted: CaseResult = guarded(|| panic!("value was {}", 3));
        assert_eq!(formatted, Err(CaseError::failed("panicked: value was 3")));
    }

    #[test]
    fn test_memoized_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut tree = SpecTree::new("");
        let root = tree.root();
        let counter = Arc::clone(&calls);
        tree.define_variable(
            root,
            "n",
            VariableDef::from_value_fn(move |_| Ok(counter.fetch_add(1, Ordering::SeqCst) + 10)),
        )
        .unwrap();
        let leaf = single_leaf(&mut tree);

        let mut case = running(tree, leaf);
        assert_eq!(case.get::<usize>("n").unwrap(), 10);
        assert_eq!(case.get::<usize>("n").unwrap(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(case.computed_variables(), 1);
    }

    #[test]
    fn test_dependent_variables() {
        let mut tree = SpecTree::new("");
        let root = tree.root();
        tree.define_variable(root, "x", VariableDef::from_value_fn(|_| Ok(2i32)))
            .unwrap();
        tree.define_variable(
            root,
            "y",
            VariableDef::from_value_fn(|case| Ok(case.get::<i32>("x")? + 1)),
        )
        .unwrap();
        let leaf = single_leaf(&mut tree);

        let mut case = running(tree, leaf);
        assert_eq!(case.get::<i32>("y").unwrap(), 3);
        assert_eq!(case.computed_variables(), 2);
    }

    #[test]
    fn test_undefined_variable_names_leaf_path() {
        let mut tree = SpecTree::new("stack");
        let leaf = single_leaf(&mut tree);
        let mut case = running(tree, leaf);

        let err = case.get::<i32>("missing").unwrap_err();
        assert_eq!(
            err,
            CaseError::Config(EngineError::UndefinedVariable {
                name: "missing".to_string(),
                path: "stack/leaf".to_string(),
            })
        );
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut tree = SpecTree::new("");
        let root = tree.root();
        tree.define_variable(root, "a", VariableDef::from_value_fn(|case| case.get::<i32>("b")))
            .unwrap();
        tree.define_variable(root, "b", VariableDef::from_value_fn(|case| case.get::<i32>("a")))
            .unwrap();
        let leaf = single_leaf(&mut tree);
        let mut case = running(tree, leaf);

        let err = case.get::<i32>("a").unwrap_err();
        assert_eq!(
            err.to_string(),
            "circular variable reference: a -> b -> a"
        );
        assert!(!case.store.contains("a"));
        assert!(case.store.in_progress().is_empty());
    }

    #[test]
    fn test_type_mismatch_is_config_error() {
        let mut tree = SpecTree::new("");
        let root = tree.root();
        tree.define_variable(root, "x", VariableDef::from_value_fn(|_| Ok(1u8)))
            .unwrap();
        let leaf = single_leaf(&mut tree);
        let mut case = running(tree, leaf);

        let err = case.get::<String>("x").unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("u8"));
    }

    #[test]
    fn test_set_overrides_without_compute() {
        let mut tree = SpecTree::new("");
        let root = tree.root();
        tree.define_variable(
            root,
            "x",
            VariableDef::from_value_fn(|_| -> CaseResult<i32> { panic!("must not run") }),
        )
        .unwrap();
        let leaf = single_leaf(&mut tree);
        let mut case = running(tree, leaf);

        case.set("x", 7i32);
        assert_eq!(case.get::<i32>("x").unwrap(), 7);
        assert_eq!(case.computed_variables(), 0);
    }

    #[test]
    fn test_with_mutates_in_place() {
        let mut tree = SpecTree::new("");
        let root = tree.root();
        tree.define_variable(root, "list", VariableDef::from_value_fn(|_| Ok(Vec::<i32>::new())))
            .unwrap();
        let leaf = single_leaf(&mut tree);
        let mut case = running(tree, leaf);

        case.with("list", |v: &mut Vec<i32>| v.push(1)).unwrap();
        case.with("list", |v: &mut Vec<i32>| v.push(2)).unwrap();
        assert_eq!(case.get::<Vec<i32>>("list").unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_cleanups_run_lifo_and_keep_going() {
        let mut tree = SpecTree::new("");
        let leaf = single_leaf(&mut tree);
        let mut case = running(tree, leaf);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            case.defer(move |_| {
                order.lock().push(i);
                if i == 1 {
                    Err(CaseError::failed("cleanup 1"))
                } else {
                    Ok(())
                }
            });
        }
        case.transition(LeafState::TeardownRunning);
        case.run_cleanups();

        assert_eq!(*order.lock(), vec![2, 1, 0]);
        assert_eq!(case.failures().len(), 1);
        assert_eq!(case.failures()[0].kind, FailureKind::Teardown);
    }

    #[test]
    fn test_finish_statuses() {
        let mut tree = SpecTree::new("");
        let leaf = single_leaf(&mut tree);
        let tree = Arc::new(tree);

        let mut passed = Case::new(Arc::clone(&tree), leaf, CaseMode::Test);
        passed.transition(LeafState::SetupRunning);
        passed.transition(LeafState::TeardownRunning);
        assert_eq!(passed.finish(Duration::ZERO).status, LeafStatus::Passed);

        let mut skipped = Case::new(Arc::clone(&tree), leaf, CaseMode::Test);
        skipped.transition(LeafState::SetupRunning);
        skipped.absorb(Err(CaseError::skip("later")));
        skipped.transition(LeafState::TeardownRunning);
        let report = skipped.finish(Duration::ZERO);
        assert_eq!(report.status, LeafStatus::Skipped);
        assert_eq!(report.skip_reason.as_deref(), Some("later"));

        let mut failed = Case::new(tree, leaf, CaseMode::Test);
        failed.transition(LeafState::SetupRunning);
        failed.absorb(Err(CaseError::skip("later")));
        failed.error("soft");
        failed.transition(LeafState::TeardownRunning);
        assert_eq!(failed.finish(Duration::ZERO).status, LeafStatus::Failed);
    }
}
