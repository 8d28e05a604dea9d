//! Builder DSL
//!
//! A [`Spec`] owns the tree being built plus the run configuration. Nested
//! contexts are declared through [`Context`], a cursor on one node of the
//! tree. Every nesting method creates the child, runs the builder callback
//! against it right away, and returns to the parent:
//!
//! ```ignore
//! let mut spec = Spec::new("stack");
//! spec.root()
//!     .let_value("items", Vec::<i32>::new())
//!     .when("empty", |s| {
//!         s.then("has no top", |case| {
//!             let items: Vec<i32> = case.get("items")?;
//!             assert!(items.last().is_none());
//!             Ok(())
//!         });
//!     });
//! let report = spec.finish(&mut harness);
//! ```
//!
//! Declaring anything on a spec that already ran is a mistake in the spec
//! code, so the DSL panics with [`EngineError::TreeFinalized`] instead of
//! returning a result.

use std::any::Any;

use casetree_core::{
    BenchHandle, CaseResult, EngineError, EngineResult, SubtestRunner, TagSet, TestHandle,
};

use crate::case::Case;
use crate::config::SpecConfig;
use crate::execution::Executor;
use crate::hooks::{Hook, Next};
use crate::report::SuiteReport;
use crate::tree::{ExecutionMode, NodeId, SpecTree, VariableDef};
use crate::variables::Binding;

#[track_caller]
pub(crate) fn fatal(err: EngineError) -> ! {
    tracing::error!(error = %err, "invalid spec");
    panic!("{}", err)
}

/// A specification under construction, plus its run configuration
#[derive(Debug, Clone)]
pub struct Spec {
    tree: SpecTree,
    config: SpecConfig,
}

impl Spec {
    /// Start a spec whose root context is `name`
    pub fn new(name: impl Into<String>) -> Self {
        Spec {
            tree: SpecTree::new(name),
            config: SpecConfig::default(),
        }
    }

    /// Start a spec configured from `casetree.toml` and the environment
    pub fn from_env(name: impl Into<String>) -> EngineResult<Self> {
        Ok(Spec::new(name).with_config(SpecConfig::load()?))
    }

    /// Replace the run configuration
    pub fn with_config(mut self, config: SpecConfig) -> Self {
        self.config = config;
        self
    }

    /// Run `f` against the root context and return the spec
    pub fn build(mut self, f: impl FnOnce(&mut Context<'_>)) -> Self {
        f(&mut self.root());
        self
    }

    /// Cursor on the root context
    pub fn root(&mut self) -> Context<'_> {
        let node = self.tree.root();
        Context::new(&mut self.tree, node)
    }

    /// The tree built so far
    pub fn tree(&self) -> &SpecTree {
        &self.tree
    }

    /// Run configuration
    pub fn config(&self) -> &SpecConfig {
        &self.config
    }

    fn executor(&mut self) -> Executor {
        self.tree.finalize();
        Executor::new(self.tree.clone(), &self.config)
    }

    /// Finalize the tree and run every leaf as a sub-test of `host`
    pub fn finish(&mut self, host: &mut dyn SubtestRunner) -> SuiteReport {
        self.executor().run(host)
    }

    /// Finalize the tree and run every leaf as a sub-benchmark of `bench`
    pub fn finish_bench(&mut self, bench: &mut dyn BenchHandle) -> SuiteReport {
        self.executor().run_bench(bench)
    }

    /// Finalize the tree and run every leaf against one plain test handle
    pub fn finish_flat(&mut self, handle: &mut dyn TestHandle) -> SuiteReport {
        self.executor().run_flat(handle)
    }
}

/// Cursor on one context node while the tree is being built
pub struct Context<'s> {
    tree: &'s mut SpecTree,
    node: NodeId,
}

impl<'s> Context<'s> {
    /// Cursor on `node` of `tree`
    ///
    /// # Panics
    ///
    /// Panics if `node` is not a node of `tree`.
    #[track_caller]
    pub fn new(tree: &'s mut SpecTree, node: NodeId) -> Self {
        if let Err(err) = tree.check_node(node) {
            fatal(err);
        }
        Context { tree, node }
    }

    /// Node this cursor points at
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Full path of this context
    pub fn path(&self) -> String {
        self.tree.path(self.node)
    }

    /// The tree being built
    pub fn tree(&self) -> &SpecTree {
        self.tree
    }

    fn child(&mut self, name: String, tags: TagSet, f: impl FnOnce(&mut Context<'_>)) -> &mut Self {
        let node = self
            .tree
            .add_child(self.node, name, tags)
            .unwrap_or_else(|e| fatal(e));
        f(&mut Context::new(&mut *self.tree, node));
        self
    }

    /// Declare a nested context
    pub fn describe(&mut self, name: impl Into<String>, f: impl FnOnce(&mut Context<'_>)) -> &mut Self {
        self.child(name.into(), TagSet::new(), f)
    }

    /// Declare a nested context
    pub fn context(&mut self, name: impl Into<String>, f: impl FnOnce(&mut Context<'_>)) -> &mut Self {
        self.child(name.into(), TagSet::new(), f)
    }

    /// Declare a nested context carrying group tags
    pub fn context_with_tags<I, S>(
        &mut self,
        name: impl Into<String>,
        tags: I,
        f: impl FnOnce(&mut Context<'_>),
    ) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.child(name.into(), tags.into_iter().collect(), f)
    }

    /// Declare a nested context named `when <desc>`
    pub fn when(&mut self, desc: impl AsRef<str>, f: impl FnOnce(&mut Context<'_>)) -> &mut Self {
        self.child(format!("when {}", desc.as_ref()), TagSet::new(), f)
    }

    /// Declare a nested context named `and <desc>`
    pub fn and(&mut self, desc: impl AsRef<str>, f: impl FnOnce(&mut Context<'_>)) -> &mut Self {
        self.child(format!("and {}", desc.as_ref()), TagSet::new(), f)
    }

    /// Attach a leaf test body
    ///
    /// An empty name is replaced by `#<n>`.
    pub fn test(
        &mut self,
        name: impl Into<String>,
        body: impl Fn(&mut Case) -> CaseResult + Send + Sync + 'static,
    ) -> &mut Self {
        self.tree
            .add_test(self.node, name, std::sync::Arc::new(body))
            .unwrap_or_else(|e| fatal(e));
        self
    }

    /// Attach a leaf test body
    pub fn then(
        &mut self,
        name: impl Into<String>,
        body: impl Fn(&mut Case) -> CaseResult + Send + Sync + 'static,
    ) -> &mut Self {
        self.test(name, body)
    }

    /// Attach a leaf test body
    pub fn it(
        &mut self,
        name: impl Into<String>,
        body: impl Fn(&mut Case) -> CaseResult + Send + Sync + 'static,
    ) -> &mut Self {
        self.test(name, body)
    }

    fn define(&mut self, name: String, def: VariableDef) -> &mut Self {
        self.tree
            .define_variable(self.node, name, def)
            .unwrap_or_else(|e| fatal(e));
        self
    }

    /// Define a lazily computed variable
    ///
    /// `compute` runs at most once per leaf, on first use.
    pub fn let_var<T, F>(&mut self, name: impl Into<String>, compute: F) -> &mut Self
    where
        T: Any,
        F: Fn(&mut Case) -> CaseResult<T> + Send + Sync + 'static,
    {
        self.define(name.into(), VariableDef::from_value_fn(compute))
    }

    /// Define a constant variable, cloned into every leaf that uses it
    pub fn let_value<T>(&mut self, name: impl Into<String>, value: T) -> &mut Self
    where
        T: Any + Clone + Send + Sync,
    {
        self.define(
            name.into(),
            VariableDef::from_value_fn(move |_| Ok(value.clone())),
        )
    }

    /// Define a variable whose computation also returns its cleanup
    pub fn let_with_cleanup<T, C, F>(&mut self, name: impl Into<String>, compute: F) -> &mut Self
    where
        T: Any,
        C: FnOnce(&mut Case) -> CaseResult + 'static,
        F: Fn(&mut Case) -> CaseResult<(T, C)> + Send + Sync + 'static,
    {
        self.define(
            name.into(),
            VariableDef::new(move |case| {
                let (value, cleanup) = compute(case)?;
                Ok(Binding::new(value).with_cleanup(cleanup))
            }),
        )
    }

    fn hook(&mut self, hook: Hook) -> &mut Self {
        self.tree
            .add_hook(self.node, hook)
            .unwrap_or_else(|e| fatal(e));
        self
    }

    /// Add a setup hook
    pub fn before(&mut self, f: impl Fn(&mut Case) -> CaseResult + Send + Sync + 'static) -> &mut Self {
        self.hook(Hook::setup(f))
    }

    /// Add a teardown hook
    pub fn after(&mut self, f: impl Fn(&mut Case) -> CaseResult + Send + Sync + 'static) -> &mut Self {
        self.hook(Hook::teardown(f))
    }

    /// Add an around hook
    ///
    /// `f` must call [`Next::run`] for the inner levels and the body to run;
    /// returning without calling it skips the leaf.
    pub fn around(
        &mut self,
        f: impl Fn(&mut Case, &mut Next<'_>) -> CaseResult + Send + Sync + 'static,
    ) -> &mut Self {
        self.hook(Hook::around(f))
    }

    /// Add a group tag to this context
    pub fn tag(&mut self, tag: impl Into<String>) -> &mut Self {
        let tags: TagSet = std::iter::once(tag.into()).collect();
        self.tree
            .add_tags(self.node, &tags)
            .unwrap_or_else(|e| fatal(e));
        self
    }

    fn mode(&mut self, mode: ExecutionMode) -> &mut Self {
        self.tree
            .set_mode(self.node, mode)
            .unwrap_or_else(|e| fatal(e));
        self
    }

    /// Run the entries of this context as parallel sub-tests
    pub fn parallel(&mut self) -> &mut Self {
        self.mode(ExecutionMode::Parallel)
    }

    /// Run the entries of this context one after another
    pub fn sequential(&mut self) -> &mut Self {
        self.mode(ExecutionMode::Sequential)
    }

    /// Leave this context out of benchmark runs
    pub fn skip_benchmark(&mut self) -> &mut Self {
        self.tree
            .set_skip_benchmark(self.node)
            .unwrap_or_else(|e| fatal(e));
        self
    }
}

impl std::fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("node", &self.node)
            .field("path", &self.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Entry;

    #[test]
    fn test_vocabulary_names() {
        let mut spec = Spec::new("stack");
        spec.root()
            .describe("push", |s| {
                s.when("empty", |s| {
                    s.and("locked", |s| {
                        s.then("fails", |_| Ok(()));
                    });
                });
            })
            .context("pop", |s| {
                s.it("", |_| Ok(()));
            });

        let tree = spec.tree();
        let paths: Vec<String> = tree.leaves().into_iter().map(|l| tree.leaf_path(l)).collect();
        assert_eq!(
            paths,
            vec!["stack/push/when empty/and locked/fails", "stack/pop/#1"]
        );
    }

    #[test]
    fn test_flags_and_tags() {
        let mut spec = Spec::new("");
        spec.root().context_with_tags("db", ["db"], |s| {
            s.tag("slow").parallel().skip_benchmark();
            s.test("t", |_| Ok(()));
        });

        let tree = spec.tree();
        let Entry::Group(db) = tree.node(tree.root()).entries()[0] else {
            panic!("expected a group");
        };
        assert_eq!(tree.effective_tags(db).to_vec(), vec!["db", "slow"]);
        assert_eq!(
            tree.effective_mode(db, ExecutionMode::Sequential),
            ExecutionMode::Parallel
        );
        assert!(tree.skips_benchmark(db));
    }

    #[test]
    fn test_redefining_at_same_node_replaces() {
        let mut spec = Spec::new("");
        spec.root().let_value("x", 1i32).let_value("x", 2i32);
        assert!(spec.tree().node(spec.tree().root()).defines("x"));
        assert_eq!(spec.tree().node(spec.tree().root()).variables.len(), 1);
    }

    #[test]
    #[should_panic(expected = "does not belong to spec tree 'small'")]
    fn test_context_on_foreign_node_panics() {
        let mut large = SpecTree::new("large");
        let root = large.root();
        let a = large.add_child(root, "a", Default::default()).unwrap();
        let b = large.add_child(a, "b", Default::default()).unwrap();

        let mut small = SpecTree::new("small");
        let _ = Context::new(&mut small, b);
    }

    #[test]
    #[should_panic(expected = "already finalized")]
    fn test_declaring_after_finalize_panics() {
        let mut spec = Spec::new("late");
        let _ = spec.executor();
        spec.root().test("too late", |_| Ok(()));
    }
}
