//! Context tree arena
//!
//! The specification tree is stored as a flat arena of [`ContextNode`]s.
//! Children and parents are referenced by [`NodeId`] index, so building the
//! tree through nested builder callbacks never creates ownership cycles.
//!
//! ## Lifecycle
//!
//! 1. **Building**: nodes, variables, hooks and tests are added through the
//!    mutation methods. Every mutation returns an [`EngineResult`].
//! 2. **Finalized**: [`SpecTree::finalize`] flips the tree to read-only. Any
//!    later mutation fails with [`EngineError::TreeFinalized`]. A finalized
//!    tree is shared behind an `Arc` by every concurrently running leaf.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use casetree_core::{join_path, CaseResult, EngineError, EngineResult, TagSet};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::case::Case;
use crate::hooks::{Hook, HookSet};
use crate::variables::Binding;

/// Ancestor chains are short; keep them inline
pub type NodeChain = SmallVec<[NodeId; 8]>;

/// Compute function of a variable definition
pub type VariableFn = Arc<dyn Fn(&mut Case) -> CaseResult<Binding> + Send + Sync>;

/// Leaf test body
pub type TestFn = Arc<dyn Fn(&mut Case) -> CaseResult + Send + Sync>;

/// Index of a node in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Raw arena index
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// A leaf: one test body attached to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeafId {
    /// Node holding the test body
    pub node: NodeId,
    /// Position of the body among the node's tests
    pub index: usize,
}

/// Execution mode of a subtree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Entries run one after another
    #[default]
    Sequential,
    /// Entries are handed to the host as parallel sub-tests
    Parallel,
}

/// One declared item of a node, in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// A nested context
    Group(NodeId),
    /// A test body, by index into the node's tests
    Test(usize),
}

/// A variable definition at one node
#[derive(Clone)]
pub struct VariableDef {
    pub(crate) compute: VariableFn,
}

impl VariableDef {
    /// Wrap a compute function returning a full binding
    pub fn new(compute: impl Fn(&mut Case) -> CaseResult<Binding> + Send + Sync + 'static) -> Self {
        VariableDef {
            compute: Arc::new(compute),
        }
    }

    /// Wrap a compute function returning a plain value
    pub fn from_value_fn<T, F>(compute: F) -> Self
    where
        T: Any,
        F: Fn(&mut Case) -> CaseResult<T> + Send + Sync + 'static,
    {
        VariableDef::new(move |case| compute(case).map(Binding::new))
    }
}

impl fmt::Debug for VariableDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VariableDef")
    }
}

/// A named test body
#[derive(Clone)]
pub struct TestCase {
    pub(crate) name: String,
    pub(crate) body: TestFn,
}

impl TestCase {
    /// Test name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase").field("name", &self.name).finish()
    }
}

/// A node of the specification tree
#[derive(Debug, Clone, Default)]
pub struct ContextNode {
    pub(crate) name: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) entries: Vec<Entry>,
    pub(crate) tests: Vec<TestCase>,
    pub(crate) tags: TagSet,
    pub(crate) variables: FxHashMap<String, VariableDef>,
    pub(crate) hooks: HookSet,
    pub(crate) mode: Option<ExecutionMode>,
    pub(crate) skip_benchmark: bool,
}

impl ContextNode {
    fn new(name: String, parent: Option<NodeId>) -> Self {
        ContextNode {
            name,
            parent,
            ..Default::default()
        }
    }

    /// Node name, empty for an anonymous root
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent node, `None` for the root
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Declared entries in declaration order
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Test bodies attached directly to this node
    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }

    /// Tags declared on this node only
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Hooks declared on this node only
    pub fn hooks(&self) -> &HookSet {
        &self.hooks
    }

    /// Check if this node defines the variable locally
    pub fn defines(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }
}

/// Arena of context nodes plus build-time state
#[derive(Debug, Clone)]
pub struct SpecTree {
    nodes: Vec<ContextNode>,
    finalized: bool,
    anonymous: usize,
}

impl Default for SpecTree {
    fn default() -> Self {
        Self::new("")
    }
}

impl SpecTree {
    /// Create a tree holding only a root node
    pub fn new(root_name: impl Into<String>) -> Self {
        SpecTree {
            nodes: vec![ContextNode::new(root_name.into(), None)],
            finalized: false,
            anonymous: 0,
        }
    }

    /// The root node
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Borrow a node, if `id` is in range for this tree
    pub fn get(&self, id: NodeId) -> Option<&ContextNode> {
        self.nodes.get(id.0)
    }

    /// Check that `id` can be used with this tree
    ///
    /// Ids are plain arena indices, so an id from another tree is only
    /// caught when it is out of range here.
    pub fn check_node(&self, id: NodeId) -> EngineResult<()> {
        if id.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(self.unknown_node(id))
        }
    }

    fn unknown_node(&self, id: NodeId) -> EngineError {
        EngineError::UnknownNode {
            node: id.0,
            tree: self.nodes[0].name.clone(),
            len: self.nodes.len(),
        }
    }

    /// Borrow a node
    ///
    /// # Panics
    ///
    /// Panics with [`EngineError::UnknownNode`] if `id` came from another
    /// tree and is out of range here.
    pub fn node(&self, id: NodeId) -> &ContextNode {
        match self.nodes.get(id.0) {
            Some(node) => node,
            None => panic!("{}", self.unknown_node(id)),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut ContextNode {
        if id.0 >= self.nodes.len() {
            panic!("{}", self.unknown_node(id));
        }
        &mut self.nodes[id.0]
    }

    /// Borrow a test body
    pub fn test(&self, leaf: LeafId) -> &TestCase {
        &self.node(leaf.node).tests[leaf.index]
    }

    /// Number of nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A tree always holds at least its root
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Check if the tree is read-only
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Make the tree read-only
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    fn ensure_building(&self, node: NodeId, operation: impl FnOnce() -> String) -> EngineResult<()> {
        self.check_node(node)?;
        if self.finalized {
            Err(EngineError::TreeFinalized {
                operation: operation(),
                path: self.path(node),
            })
        } else {
            Ok(())
        }
    }

    fn name_or_anonymous(&mut self, name: String) -> String {
        if name.trim().is_empty() {
            self.anonymous += 1;
            format!("#{}", self.anonymous)
        } else {
            name
        }
    }

    /// Add a child context under `parent`
    ///
    /// Empty names are replaced by `#<n>` from the tree's anonymous counter.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        tags: TagSet,
    ) -> EngineResult<NodeId> {
        let name = name.into();
        self.ensure_building(parent, || format!("add context '{}'", name))?;
        let name = self.name_or_anonymous(name);
        let id = NodeId(self.nodes.len());
        let mut node = ContextNode::new(name, Some(parent));
        node.tags = tags;
        self.nodes.push(node);
        self.node_mut(parent).entries.push(Entry::Group(id));
        Ok(id)
    }

    /// Define or replace a variable at `node`
    ///
    /// Redefining a name at the same node replaces the earlier definition.
    /// Defining it at a descendant shadows this one for that subtree only.
    pub fn define_variable(
        &mut self,
        node: NodeId,
        name: impl Into<String>,
        def: VariableDef,
    ) -> EngineResult<()> {
        let name = name.into();
        self.ensure_building(node, || format!("define variable '{}'", name))?;
        self.node_mut(node).variables.insert(name, def);
        Ok(())
    }

    /// Append a hook to `node`
    pub fn add_hook(&mut self, node: NodeId, hook: Hook) -> EngineResult<()> {
        self.ensure_building(node, || format!("add {} hook", hook.kind()))?;
        self.node_mut(node).hooks.push(hook);
        Ok(())
    }

    /// Attach a test body to `node`
    pub fn add_test(
        &mut self,
        node: NodeId,
        name: impl Into<String>,
        body: TestFn,
    ) -> EngineResult<LeafId> {
        let name = name.into();
        self.ensure_building(node, || format!("add test '{}'", name))?;
        let name = self.name_or_anonymous(name);
        let target = self.node_mut(node);
        let index = target.tests.len();
        target.tests.push(TestCase { name, body });
        target.entries.push(Entry::Test(index));
        Ok(LeafId { node, index })
    }

    /// Add group tags to `node`
    pub fn add_tags(&mut self, node: NodeId, tags: &TagSet) -> EngineResult<()> {
        self.ensure_building(node, || "add tags".to_string())?;
        self.node_mut(node).tags.extend_from(tags);
        Ok(())
    }

    /// Set the execution mode for the subtree rooted at `node`
    pub fn set_mode(&mut self, node: NodeId, mode: ExecutionMode) -> EngineResult<()> {
        self.ensure_building(node, || "change execution mode".to_string())?;
        self.node_mut(node).mode = Some(mode);
        Ok(())
    }

    /// Skip the subtree rooted at `node` when running as a benchmark
    pub fn set_skip_benchmark(&mut self, node: NodeId) -> EngineResult<()> {
        self.ensure_building(node, || "skip benchmark".to_string())?;
        self.node_mut(node).skip_benchmark = true;
        Ok(())
    }

    /// Ancestor chain from the root down to `node`, both included
    pub fn chain(&self, node: NodeId) -> NodeChain {
        let mut chain = NodeChain::new();
        let mut current = Some(node);
        while let Some(id) = current {
            chain.push(id);
            current = self.node(id).parent;
        }
        chain.reverse();
        chain
    }

    /// Full context path of `node`
    pub fn path(&self, node: NodeId) -> String {
        let chain = self.chain(node);
        join_path(chain.iter().map(|id| self.node(*id).name.as_str()))
    }

    /// Full path of a leaf: its node's path plus the test name
    pub fn leaf_path(&self, leaf: LeafId) -> String {
        let chain = self.chain(leaf.node);
        join_path(
            chain
                .iter()
                .map(|id| self.node(*id).name.as_str())
                .chain(std::iter::once(self.test(leaf).name.as_str())),
        )
    }

    /// Find the nearest definition of `name`, walking from `node` to the root
    pub fn find_variable(&self, node: NodeId, name: &str) -> Option<&VariableDef> {
        let mut current = Some(node);
        while let Some(id) = current {
            let n = self.node(id);
            if let Some(def) = n.variables.get(name) {
                return Some(def);
            }
            current = n.parent;
        }
        None
    }

    /// Union of the tags of `node` and all its ancestors
    pub fn effective_tags(&self, node: NodeId) -> TagSet {
        let mut tags = TagSet::new();
        for id in self.chain(node) {
            tags.extend_from(&self.node(id).tags);
        }
        tags
    }

    /// Execution mode of `node`: the nearest explicit declaration wins
    pub fn effective_mode(&self, node: NodeId, default: ExecutionMode) -> ExecutionMode {
        let mut current = Some(node);
        while let Some(id) = current {
            let n = self.node(id);
            if let Some(mode) = n.mode {
                return mode;
            }
            current = n.parent;
        }
        default
    }

    /// Check if `node` or any ancestor opted out of benchmarks
    pub fn skips_benchmark(&self, node: NodeId) -> bool {
        self.chain(node).iter().any(|id| self.node(*id).skip_benchmark)
    }

    /// Every leaf in declaration order (depth first)
    pub fn leaves(&self) -> Vec<LeafId> {
        self.leaves_under(self.root())
    }

    /// Every leaf in the subtree rooted at `node`, in declaration order
    pub fn leaves_under(&self, node: NodeId) -> Vec<LeafId> {
        let mut leaves = Vec::new();
        self.collect_leaves(node, &mut leaves);
        leaves
    }

    fn collect_leaves(&self, node: NodeId, out: &mut Vec<LeafId>) {
        for entry in &self.node(node).entries {
            match *entry {
                Entry::Group(child) => self.collect_leaves(child, out),
                Entry::Test(index) => out.push(LeafId { node, index }),
            }
        }
    }
}
