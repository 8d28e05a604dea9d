//! Execution engine
//!
//! [`execute_leaf`] drives one isolated run of one leaf:
//!
//! 1. a fresh [`Case`] (fresh variable store, empty cleanup stack)
//! 2. setups, arounds and the body through the leaf's [`HookChain`]
//! 3. the cleanup stack, unwound whatever happened in step 2
//!
//! [`Executor`] walks a finalized tree and maps it onto a host runner: every
//! context becomes a named sub-test, every leaf a named sub-test running
//! [`execute_leaf`]. Leaves share nothing but the read-only tree, so the host
//! may run parallel contexts on any number of threads.

use std::sync::Arc;
use std::time::Instant;

use casetree_core::{
    BenchHandle, LeafReport, LeafState, LeafStatus, ParallelJob, SubtestRunner, TagDecision,
    TestHandle,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rustc_hash::FxHashMap;

use crate::case::{Case, CaseMode};
use crate::config::{ExecutionOrder, SpecConfig};
use crate::hooks::HookChain;
use crate::report::{ReportSink, SuiteReport};
use crate::tree::{Entry, ExecutionMode, LeafId, NodeId, SpecTree};

/// Run one leaf in isolation and report its outcome
pub fn execute_leaf(tree: &Arc<SpecTree>, leaf: LeafId, mode: CaseMode) -> LeafReport {
    let started = Instant::now();
    let mut case = Case::new(Arc::clone(tree), leaf, mode);
    tracing::debug!(leaf = %case.path(), "leaf started");

    case.transition(LeafState::SetupRunning);
    let chain = HookChain::for_node(tree, leaf.node);
    let body = Arc::clone(&tree.test(leaf).body);
    // failures and skips are recorded on the case as they happen
    let _ = chain.run(tree, &mut case, &body);

    case.transition(LeafState::TeardownRunning);
    case.run_cleanups();

    let report = case.finish(started.elapsed());
    tracing::debug!(
        leaf = %report.path,
        status = %report.status,
        failures = report.failures.len(),
        "leaf finished"
    );
    report
}

/// Forward a leaf report to the host handle that owns the leaf
fn publish<H: TestHandle + ?Sized>(report: &LeafReport, handle: &mut H) {
    for line in &report.logs {
        handle.log(line);
    }
    for failure in &report.failures {
        handle.fail(&failure.to_string());
    }
    if report.failures.is_empty() {
        if let Some(reason) = &report.skip_reason {
            handle.skip(reason);
        }
    }
}

fn filtered_report(path: String, tags: Vec<String>, reason: String) -> LeafReport {
    LeafReport {
        path,
        tags,
        status: LeafStatus::Skipped,
        failures: Vec::new(),
        skip_reason: Some(reason),
        logs: Vec::new(),
        duration: Default::default(),
    }
}

/// Drives every leaf of a finalized tree through a host runner
#[derive(Debug)]
pub struct Executor {
    tree: Arc<SpecTree>,
    config: SpecConfig,
    seed: u64,
    declaration: FxHashMap<LeafId, usize>,
    sink: ReportSink,
}

impl Executor {
    /// Finalize `tree` and prepare to run it
    pub fn new(mut tree: SpecTree, config: &SpecConfig) -> Self {
        tree.finalize();
        Self::from_shared(Arc::new(tree), config)
    }

    /// Run an already shared tree
    ///
    /// The tree must be finalized; nothing can mutate it behind an `Arc`.
    pub fn from_shared(tree: Arc<SpecTree>, config: &SpecConfig) -> Self {
        debug_assert!(tree.is_finalized(), "executing a tree that is still building");
        let declaration = tree
            .leaves()
            .into_iter()
            .enumerate()
            .map(|(index, leaf)| (leaf, index))
            .collect();
        Executor {
            seed: config.effective_seed(),
            config: config.clone(),
            tree,
            declaration,
            sink: ReportSink::default(),
        }
    }

    /// The tree being executed
    pub fn tree(&self) -> &Arc<SpecTree> {
        &self.tree
    }

    /// Seed used for random ordering
    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn root_name(&self) -> &str {
        self.tree.node(self.tree.root()).name()
    }

    fn default_mode(&self) -> ExecutionMode {
        if self.config.parallel {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Sequential
        }
    }

    /// Entries of `node` in execution order
    fn ordered_entries(&self, node: NodeId) -> Vec<Entry> {
        let mut entries = self.tree.node(node).entries().to_vec();
        if self.config.ordering == ExecutionOrder::Random {
            let salt = (node.index() as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
            let mut rng = StdRng::seed_from_u64(self.seed ^ salt);
            entries.shuffle(&mut rng);
        }
        entries
    }

    fn entry_name(&self, node: NodeId, entry: Entry) -> String {
        match entry {
            Entry::Group(child) => self.tree.node(child).name().to_string(),
            Entry::Test(index) => self.tree.node(node).tests()[index].name().to_string(),
        }
    }

    fn record(&self, leaf: LeafId, report: LeafReport) {
        let index = self.declaration.get(&leaf).copied().unwrap_or(usize::MAX);
        self.sink.push(index, report);
    }

    /// Run one leaf, honoring the tag filter
    pub fn run_leaf(&self, leaf: LeafId, mode: CaseMode) -> LeafReport {
        let tags = self.tree.effective_tags(leaf.node);
        match self.config.tag_filter().decide(&tags) {
            TagDecision::Run => execute_leaf(&self.tree, leaf, mode),
            decision => {
                let path = self.tree.leaf_path(leaf);
                let reason = decision.reason().unwrap_or_default();
                tracing::warn!(leaf = %path, reason = %reason, "leaf filtered out");
                filtered_report(path, tags.to_vec(), reason)
            }
        }
    }

    /// Run the whole tree under a sub-test runner
    ///
    /// Every context and leaf becomes a named sub-test of `host`, named by
    /// declaration. Contexts in parallel mode hand their entries to
    /// [`SubtestRunner::run_parallel`].
    pub fn run(&self, host: &mut dyn SubtestRunner) -> SuiteReport {
        self.run_node(self.tree.root(), host);
        self.sink.drain(self.root_name())
    }

    fn run_node(&self, node: NodeId, host: &mut dyn SubtestRunner) {
        let entries = self.ordered_entries(node);
        match self.tree.effective_mode(node, self.default_mode()) {
            ExecutionMode::Parallel => {
                let jobs = entries
                    .into_iter()
                    .map(|entry| {
                        ParallelJob::new(
                            self.entry_name(node, entry),
                            move |handle: &mut dyn SubtestRunner| {
                                self.run_entry(node, entry, handle)
                            },
                        )
                    })
                    .collect();
                host.run_parallel(jobs);
            }
            ExecutionMode::Sequential => {
                for entry in entries {
                    let name = self.entry_name(node, entry);
                    host.run_subtest(&name, &mut |handle: &mut dyn SubtestRunner| {
                        self.run_entry(node, entry, handle)
                    });
                }
            }
        }
    }

    fn run_entry(&self, node: NodeId, entry: Entry, handle: &mut dyn SubtestRunner) {
        match entry {
            Entry::Group(child) => self.run_node(child, handle),
            Entry::Test(index) => {
                let leaf = LeafId { node, index };
                let report = self.run_leaf(leaf, CaseMode::Test);
                publish(&report, handle);
                self.record(leaf, report);
            }
        }
    }

    /// Run the whole tree as nested sub-benchmarks
    ///
    /// Each benchmark iteration is one full leaf execution with its own
    /// variable store. The report keeps the first failing iteration of each
    /// leaf, or the last one when all passed.
    pub fn run_bench(&self, bench: &mut dyn BenchHandle) -> SuiteReport {
        self.bench_node(self.tree.root(), bench);
        self.sink.drain(self.root_name())
    }

    fn bench_node(&self, node: NodeId, bench: &mut dyn BenchHandle) {
        for entry in self.ordered_entries(node) {
            let name = self.entry_name(node, entry);
            bench.run_sub_bench(&name, &mut |sub: &mut dyn BenchHandle| match entry {
                Entry::Group(child) if self.tree.skips_benchmark(child) => {
                    self.skip_bench(self.tree.leaves_under(child), sub)
                }
                Entry::Group(child) => self.bench_node(child, sub),
                Entry::Test(index) => self.bench_leaf(LeafId { node, index }, sub),
            });
        }
    }

    fn skip_bench(&self, leaves: Vec<LeafId>, bench: &mut dyn BenchHandle) {
        let reason = "benchmark skipped".to_string();
        for leaf in leaves {
            let tags = self.tree.effective_tags(leaf.node).to_vec();
            let report = filtered_report(self.tree.leaf_path(leaf), tags, reason.clone());
            self.record(leaf, report);
        }
        bench.skip(&reason);
    }

    fn bench_leaf(&self, leaf: LeafId, bench: &mut dyn BenchHandle) {
        if self.tree.skips_benchmark(leaf.node) {
            self.skip_bench(vec![leaf], bench);
            return;
        }
        let tags = self.tree.effective_tags(leaf.node);
        if !self.config.tag_filter().decide(&tags).should_run() {
            let report = self.run_leaf(leaf, CaseMode::Benchmark);
            publish(&report, bench);
            self.record(leaf, report);
            return;
        }

        let mut kept: Option<LeafReport> = None;
        bench.iter(&mut || {
            let report = execute_leaf(&self.tree, leaf, CaseMode::Benchmark);
            if kept.as_ref().map_or(true, |k| !k.failed()) {
                kept = Some(report);
            }
        });
        if let Some(report) = kept {
            publish(&report, bench);
            self.record(leaf, report);
        }
    }

    /// Run every leaf one after another against a single test handle
    ///
    /// Used when the host cannot create sub-tests. Messages are prefixed with
    /// the leaf path, and a skipped leaf is only logged so it does not skip
    /// the handle's whole test.
    pub fn run_flat(&self, handle: &mut dyn TestHandle) -> SuiteReport {
        self.flat_node(self.tree.root(), handle);
        self.sink.drain(self.root_name())
    }

    fn flat_node(&self, node: NodeId, handle: &mut dyn TestHandle) {
        for entry in self.ordered_entries(node) {
            match entry {
                Entry::Group(child) => self.flat_node(child, handle),
                Entry::Test(index) => {
                    let leaf = LeafId { node, index };
                    let report = self.run_leaf(leaf, CaseMode::Test);
                    for line in &report.logs {
                        handle.log(&format!("{}: {}", report.path, line));
                    }
                    for failure in &report.failures {
                        handle.fail(&format!("{}: {}", report.path, failure));
                    }
                    if report.failures.is_empty() {
                        if let Some(reason) = &report.skip_reason {
                            handle.log(&format!("{}: skipped: {}", report.path, reason));
                        }
                    }
                    self.record(leaf, report);
                }
            }
        }
    }
}
