//! Hook sets and their per-leaf composition
//!
//! Every node owns a [`HookSet`]: ordered setups, teardowns and arounds.
//! For a leaf, [`HookChain`] composes the sets of every node from the root
//! down to the leaf's node:
//!
//! - setups run outer to inner, each node's in declaration order
//! - once all setups of a level succeeded, that level's teardowns are pushed
//!   on the leaf's cleanup stack, so they run inner to outer and in reverse
//!   declaration order within a level
//! - arounds of a level wrap everything below that level, first declared
//!   outermost; an around that returns without calling its continuation
//!   ends the leaf as skipped
//!
//! A failing setup stops the descent: deeper setups, the body and the
//! teardowns of the failing level never run.

use std::fmt;
use std::sync::Arc;

use casetree_core::{CaseError, CaseResult, LeafState};

use crate::case::{guarded, Case};
use crate::tree::{NodeChain, NodeId, SpecTree, TestFn};

/// Setup or teardown function
pub type HookFn = Arc<dyn Fn(&mut Case) -> CaseResult + Send + Sync>;

/// Around function: receives the continuation for the remaining levels
pub type AroundFn = Arc<dyn Fn(&mut Case, &mut Next<'_>) -> CaseResult + Send + Sync>;

/// Hook category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Runs before the body, outer to inner
    Setup,
    /// Runs after the body, inner to outer
    Teardown,
    /// Wraps the inner levels and the body
    Around,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookKind::Setup => write!(f, "setup"),
            HookKind::Teardown => write!(f, "teardown"),
            HookKind::Around => write!(f, "around"),
        }
    }
}

/// A hook ready to be attached to a node
#[derive(Clone)]
pub enum Hook {
    /// Setup hook
    Setup(HookFn),
    /// Teardown hook
    Teardown(HookFn),
    /// Around hook
    Around(AroundFn),
}

impl Hook {
    /// Create a setup hook
    pub fn setup(f: impl Fn(&mut Case) -> CaseResult + Send + Sync + 'static) -> Self {
        Hook::Setup(Arc::new(f))
    }

    /// Create a teardown hook
    pub fn teardown(f: impl Fn(&mut Case) -> CaseResult + Send + Sync + 'static) -> Self {
        Hook::Teardown(Arc::new(f))
    }

    /// Create an around hook
    pub fn around(
        f: impl Fn(&mut Case, &mut Next<'_>) -> CaseResult + Send + Sync + 'static,
    ) -> Self {
        Hook::Around(Arc::new(f))
    }

    /// Hook category
    pub fn kind(&self) -> HookKind {
        match self {
            Hook::Setup(_) => HookKind::Setup,
            Hook::Teardown(_) => HookKind::Teardown,
            Hook::Around(_) => HookKind::Around,
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hook::{}", self.kind())
    }
}

/// Hooks declared on one node
#[derive(Clone, Default)]
pub struct HookSet {
    setups: Vec<HookFn>,
    teardowns: Vec<HookFn>,
    arounds: Vec<AroundFn>,
}

impl HookSet {
    /// Append a hook, keeping declaration order per kind
    pub fn push(&mut self, hook: Hook) {
        match hook {
            Hook::Setup(f) => self.setups.push(f),
            Hook::Teardown(f) => self.teardowns.push(f),
            Hook::Around(f) => self.arounds.push(f),
        }
    }

    /// Setups in declaration order
    pub fn setups(&self) -> &[HookFn] {
        &self.setups
    }

    /// Teardowns in declaration order
    pub fn teardowns(&self) -> &[HookFn] {
        &self.teardowns
    }

    /// Arounds in declaration order
    pub fn arounds(&self) -> &[AroundFn] {
        &self.arounds
    }

    /// Number of hooks of one kind
    pub fn count(&self, kind: HookKind) -> usize {
        match kind {
            HookKind::Setup => self.setups.len(),
            HookKind::Teardown => self.teardowns.len(),
            HookKind::Around => self.arounds.len(),
        }
    }

    /// Check if no hook is declared
    pub fn is_empty(&self) -> bool {
        self.setups.is_empty() && self.teardowns.is_empty() && self.arounds.is_empty()
    }
}

impl fmt::Debug for HookSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSet")
            .field("setups", &self.setups.len())
            .field("teardowns", &self.teardowns.len())
            .field("arounds", &self.arounds.len())
            .finish()
    }
}

/// Continuation handed to an around hook
pub struct Next<'n> {
    inner: &'n mut dyn FnMut(&mut Case) -> CaseResult,
    called: bool,
    outcome: Option<CaseError>,
}

impl<'n> Next<'n> {
    fn new(inner: &'n mut dyn FnMut(&mut Case) -> CaseResult) -> Self {
        Next {
            inner,
            called: false,
            outcome: None,
        }
    }

    /// Run the wrapped levels and the body
    ///
    /// Failures inside are already recorded on the case when this returns,
    /// so dropping the result does not hide them. Calling it more than once
    /// is a no-op returning `Ok(())`.
    pub fn run(&mut self, case: &mut Case) -> CaseResult {
        if self.called {
            return Ok(());
        }
        self.called = true;
        let result = (self.inner)(case);
        self.outcome = result.clone().err();
        result
    }

    /// Check if the continuation was invoked
    pub fn called(&self) -> bool {
        self.called
    }
}

/// Position of one hook in a composed chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookRef {
    /// Node declaring the hook
    pub node: NodeId,
    /// Declaration index among the node's hooks of the same kind
    pub index: usize,
}

/// Hooks of every level from the root to one node
#[derive(Debug, Clone)]
pub struct HookChain {
    levels: NodeChain,
}

impl HookChain {
    /// Compose the chain for a leaf held by `node`
    pub fn for_node(tree: &SpecTree, node: NodeId) -> Self {
        HookChain {
            levels: tree.chain(node),
        }
    }

    /// Number of levels, root included
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Effective setup order
    pub fn setup_order(&self, tree: &SpecTree) -> Vec<HookRef> {
        self.levels
            .iter()
            .flat_map(|&node| {
                (0..tree.node(node).hooks.count(HookKind::Setup)).map(move |index| HookRef { node, index })
            })
            .collect()
    }

    /// Effective teardown order when every setup succeeds
    pub fn teardown_order(&self, tree: &SpecTree) -> Vec<HookRef> {
        self.levels
            .iter()
            .rev()
            .flat_map(|&node| {
                (0..tree.node(node).hooks.count(HookKind::Teardown))
                    .rev()
                    .map(move |index| HookRef { node, index })
            })
            .collect()
    }

    /// Run setups, arounds and the body
    ///
    /// Every failure or skip is recorded on the case where it happens. The
    /// returned error only tells the outer levels to stop. Teardowns are only
    /// scheduled on the case's cleanup stack; the caller unwinds them.
    pub(crate) fn run(&self, tree: &SpecTree, case: &mut Case, body: &TestFn) -> CaseResult {
        self.enter(tree, 0, case, body)
    }

    fn enter(&self, tree: &SpecTree, level: usize, case: &mut Case, body: &TestFn) -> CaseResult {
        let Some(&node) = self.levels.get(level) else {
            halt_if_skipped(case)?;
            case.transition(LeafState::BodyRunning);
            let result = guarded(|| body(case));
            return case.settle(result);
        };

        let hooks = &tree.node(node).hooks;
        for (index, setup) in hooks.setups().iter().enumerate() {
            tracing::trace!(leaf = case.path(), level, index, "setup");
            let result = guarded(|| setup(case));
            case.settle(result)?;
            halt_if_skipped(case)?;
        }
        for teardown in hooks.teardowns() {
            case.schedule_teardown(Arc::clone(teardown));
        }
        self.wrap(tree, level, 0, case, body)
    }

    fn wrap(
        &self,
        tree: &SpecTree,
        level: usize,
        index: usize,
        case: &mut Case,
        body: &TestFn,
    ) -> CaseResult {
        let node = self.levels[level];
        let Some(around) = tree.node(node).hooks.arounds().get(index) else {
            return self.enter(tree, level + 1, case, body);
        };

        tracing::trace!(leaf = case.path(), level, index, "around");
        let mut inner = |case: &mut Case| self.wrap(tree, level, index + 1, case, body);
        let mut next = Next::new(&mut inner);
        let result = guarded(|| around(case, &mut next));
        match result {
            Ok(()) if !next.called() => case.settle(Err(CaseError::skip(format!(
                "around hook in '{}' did not continue",
                tree.path(node)
            )))),
            // the inner outcome is already recorded even if the around dropped it
            Ok(()) => next.outcome.map_or(Ok(()), Err),
            Err(err) if next.outcome.as_ref() == Some(&err) => Err(err),
            Err(err) => case.settle(Err(err)),
        }
    }
}

/// Stop the chain once a skip was requested through the case's handle
fn halt_if_skipped(case: &Case) -> CaseResult {
    match case.skip_requested() {
        Some(reason) => Err(CaseError::skip(reason)),
        None => Ok(()),
    }
}
