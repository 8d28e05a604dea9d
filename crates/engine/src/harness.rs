//! In-process reference host
//!
//! [`Harness`] and [`HarnessBench`] implement the host runner traits without
//! any external test framework. Each records a tree of outcomes that callers
//! can inspect after a run:
//!
//! - sub-test names are `parent/child`, sanitized, with `#01`, `#02`, ...
//!   appended to repeated names within one parent
//! - a panic inside a sub-test body is caught and recorded as a failure of
//!   that sub-test
//! - a parent is failed when any descendant failed
//! - parallel jobs run on scoped threads in batches of at most
//!   [`Harness::thread_limit`] jobs, and are recorded in job order

use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use std::thread;

use casetree_core::{join_path, sanitize, BenchHandle, ParallelJob, SubtestRunner, TestHandle};
use rustc_hash::FxHashMap;

use crate::case::panic_message;
use crate::config::SpecConfig;

/// Sub-test names seen so far under one parent
#[derive(Debug, Default)]
struct NameCounter(FxHashMap<String, usize>);

impl NameCounter {
    fn unique(&mut self, parent: &str, name: &str) -> String {
        let base = match sanitize(name) {
            s if s.is_empty() => "#00".to_string(),
            s => s,
        };
        let seen = self.0.entry(base.clone()).or_insert(0);
        let segment = if *seen == 0 {
            base
        } else {
            format!("{}#{:02}", base, seen)
        };
        *seen += 1;
        join_path([parent, segment.as_str()])
    }
}

/// Lower bound of the default parallel thread limit
pub const MIN_PARALLEL_THREADS: usize = 8;

/// Outcome tree of a test run
#[derive(Debug, Default)]
pub struct Harness {
    name: String,
    failures: Vec<String>,
    skip_reason: Option<String>,
    logs: Vec<String>,
    children: Vec<Harness>,
    names: NameCounter,
    max_threads: Option<usize>,
}

fn run_guarded<H, F>(handle: &mut H, body: F)
where
    H: TestHandle,
    F: FnOnce(&mut H),
{
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| body(handle))) {
        let message = format!("panicked: {}", panic_message(payload.as_ref()));
        handle.fail(&message);
    }
}

impl Harness {
    /// Create a top-level test named `name`
    pub fn new(name: impl Into<String>) -> Self {
        Harness {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Cap the number of threads one parallel group may use at once
    ///
    /// Sub-tests inherit the limit. Parallel jobs that wait on each other
    /// need a limit at least as large as the group.
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = Some(max_threads.max(1));
        self
    }

    /// Threads one parallel group may use at once
    ///
    /// Defaults to the available parallelism, but never less than
    /// [`MIN_PARALLEL_THREADS`].
    pub fn thread_limit(&self) -> usize {
        self.max_threads.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .max(MIN_PARALLEL_THREADS)
        })
    }

    fn child(&mut self, name: &str) -> Harness {
        Harness {
            name: self.names.unique(&self.name, name),
            max_threads: self.max_threads,
            ..Default::default()
        }
    }

    /// Failure messages recorded directly on this test
    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    /// Skip reason, if the test was skipped
    pub fn skip_reason(&self) -> Option<&str> {
        self.skip_reason.as_deref()
    }

    /// Log lines recorded on this test
    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    /// Direct sub-tests, in the order they finished being scheduled
    pub fn children(&self) -> &[Harness] {
        &self.children
    }

    /// Full names of the direct sub-tests
    pub fn subtest_names(&self) -> Vec<&str> {
        self.children.iter().map(|c| c.name.as_str()).collect()
    }

    /// Full names of every test in this tree, depth first
    pub fn all_names(&self) -> Vec<&str> {
        let mut names = vec![self.name.as_str()];
        for child in &self.children {
            names.extend(child.all_names());
        }
        names
    }

    /// Find a test of this tree by full name
    pub fn find(&self, name: &str) -> Option<&Harness> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }
}

impl TestHandle for Harness {
    fn name(&self) -> &str {
        &self.name
    }

    fn fail(&mut self, message: &str) {
        tracing::debug!(test = %self.name, failure = message, "test failed");
        self.failures.push(message.to_string());
    }

    fn skip(&mut self, reason: &str) {
        self.skip_reason.get_or_insert_with(|| reason.to_string());
    }

    fn failed(&self) -> bool {
        !self.failures.is_empty() || self.children.iter().any(Harness::failed)
    }

    fn skipped(&self) -> bool {
        self.skip_reason.is_some()
    }

    fn log(&mut self, message: &str) {
        self.logs.push(message.to_string());
    }
}

impl SubtestRunner for Harness {
    fn run_subtest(&mut self, name: &str, body: &mut dyn FnMut(&mut dyn SubtestRunner)) -> bool {
        let mut child = self.child(name);
        run_guarded(&mut child, |c: &mut Harness| body(c));
        let ok = !child.failed();
        self.children.push(child);
        ok
    }

    fn run_parallel(&mut self, jobs: Vec<ParallelJob<'_>>) -> Vec<bool> {
        let limit = self.thread_limit();
        let mut prepared: Vec<(Harness, ParallelJob<'_>)> = jobs
            .into_iter()
            .map(|job| (self.child(&job.name), job))
            .collect();

        let mut results = Vec::with_capacity(prepared.len());
        while !prepared.is_empty() {
            let batch: Vec<_> = prepared.drain(..limit.min(prepared.len())).collect();
            tracing::trace!(test = %self.name, jobs = batch.len(), "parallel batch");
            let finished = run_batch(batch);
            results.extend(finished.iter().map(|c| !c.failed()));
            self.children.extend(finished);
        }
        results
    }
}

/// Run every job of a batch on its own scoped thread
fn run_batch(batch: Vec<(Harness, ParallelJob<'_>)>) -> Vec<Harness> {
    thread::scope(|scope| {
        let running: Vec<_> = batch
            .into_iter()
            .map(|(mut child, job)| {
                let name = child.name.clone();
                let handle = scope.spawn(move || {
                    let body = job.body;
                    run_guarded(&mut child, |c: &mut Harness| body(c));
                    child
                });
                (name, handle)
            })
            .collect();
        running
            .into_iter()
            .map(|(name, handle)| {
                handle.join().unwrap_or_else(|_| {
                    let mut lost = Harness::new(name);
                    lost.fail("sub-test thread panicked");
                    lost
                })
            })
            .collect()
    })
}

/// Outcome tree of a benchmark run with a fixed iteration count
#[derive(Debug, Default)]
pub struct HarnessBench {
    name: String,
    iterations: u64,
    failures: Vec<String>,
    skip_reason: Option<String>,
    logs: Vec<String>,
    children: Vec<HarnessBench>,
    measurements: Vec<(u64, Duration)>,
    names: NameCounter,
}

impl HarnessBench {
    /// Create a top-level benchmark running every loop `iterations` times
    pub fn new(name: impl Into<String>, iterations: u64) -> Self {
        HarnessBench {
            name: name.into(),
            iterations,
            ..Default::default()
        }
    }

    /// Create a top-level benchmark using the configured iteration count
    pub fn from_config(name: impl Into<String>, config: &SpecConfig) -> Self {
        Self::new(name, config.bench_iterations)
    }

    /// Failure messages recorded directly on this benchmark
    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    /// Skip reason, if the benchmark was skipped
    pub fn skip_reason(&self) -> Option<&str> {
        self.skip_reason.as_deref()
    }

    /// Direct sub-benchmarks
    pub fn children(&self) -> &[HarnessBench] {
        &self.children
    }

    /// Full names of the direct sub-benchmarks
    pub fn subtest_names(&self) -> Vec<&str> {
        self.children.iter().map(|c| c.name.as_str()).collect()
    }

    /// Find a benchmark of this tree by full name
    pub fn find(&self, name: &str) -> Option<&HarnessBench> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// Total loop iterations run directly on this benchmark
    pub fn loops(&self) -> u64 {
        self.measurements.iter().map(|(n, _)| n).sum()
    }

    /// Mean time per iteration, `None` before any loop ran
    pub fn ns_per_op(&self) -> Option<f64> {
        let loops = self.loops();
        if loops == 0 {
            return None;
        }
        let total: Duration = self.measurements.iter().map(|(_, d)| *d).sum();
        Some(total.as_nanos() as f64 / loops as f64)
    }
}

impl TestHandle for HarnessBench {
    fn name(&self) -> &str {
        &self.name
    }

    fn fail(&mut self, message: &str) {
        tracing::debug!(bench = %self.name, failure = message, "benchmark failed");
        self.failures.push(message.to_string());
    }

    fn skip(&mut self, reason: &str) {
        self.skip_reason.get_or_insert_with(|| reason.to_string());
    }

    fn failed(&self) -> bool {
        !self.failures.is_empty() || self.children.iter().any(HarnessBench::failed)
    }

    fn skipped(&self) -> bool {
        self.skip_reason.is_some()
    }

    fn log(&mut self, message: &str) {
        self.logs.push(message.to_string());
    }
}

impl BenchHandle for HarnessBench {
    fn iterations(&self) -> u64 {
        self.iterations
    }

    fn run_loop(&mut self, n: u64, body: &mut dyn FnMut()) {
        let started = Instant::now();
        for _ in 0..n {
            body();
        }
        self.measurements.push((n, started.elapsed()));
    }

    fn run_sub_bench(&mut self, name: &str, body: &mut dyn FnMut(&mut dyn BenchHandle)) -> bool {
        let mut child = HarnessBench::new(self.names.unique(&self.name, name), self.iterations);
        run_guarded(&mut child, |c: &mut HarnessBench| body(c));
        let ok = !child.failed();
        self.children.push(child);
        ok
    }
}
