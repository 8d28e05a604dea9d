//! Host runner traits
//!
//! The engine never schedules or reports tests by itself. Everything it needs
//! from the surrounding test system is expressed by three traits:
//!
//! - [`TestHandle`]: mark the current test as failed or skipped
//! - [`SubtestRunner`]: run a named, isolated sub-test
//! - [`BenchHandle`]: run a benchmark loop N times
//!
//! Implementations are free to run sub-tests on other threads; see
//! [`SubtestRunner::run_parallel`].

/// Capability to report the outcome of the current test
pub trait TestHandle {
    /// Name of the current test as known to the host
    fn name(&self) -> &str;

    /// Mark the current test as failed
    ///
    /// May be called several times; every message is kept.
    fn fail(&mut self, message: &str);

    /// Mark the current test as skipped
    fn skip(&mut self, reason: &str);

    /// Check if the current test has failed
    fn failed(&self) -> bool;

    /// Check if the current test was skipped
    fn skipped(&self) -> bool;

    /// Attach a log line to the current test
    fn log(&mut self, message: &str) {
        tracing::info!(test = self.name(), "{}", message);
    }

    /// Mark the calling frame as a helper
    ///
    /// Only used for stack-trace attribution, never changes behavior.
    fn helper(&self) {}
}

/// A sub-test scheduled for parallel execution
///
/// The body receives the handle of the sub-test the host created for it.
pub struct ParallelJob<'a> {
    /// Sub-test name
    pub name: String,
    /// Sub-test body
    pub body: Box<dyn FnOnce(&mut dyn SubtestRunner) + Send + 'a>,
}

impl<'a> ParallelJob<'a> {
    /// Create a job
    pub fn new(
        name: impl Into<String>,
        body: impl FnOnce(&mut dyn SubtestRunner) + Send + 'a,
    ) -> Self {
        ParallelJob {
            name: name.into(),
            body: Box::new(body),
        }
    }
}

impl std::fmt::Debug for ParallelJob<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelJob").field("name", &self.name).finish()
    }
}

/// Capability to run named sub-tests
pub trait SubtestRunner: TestHandle {
    /// Run `body` as an isolated sub-test identified by `name`
    ///
    /// Failures reported through the handle passed to `body` must be
    /// attributed to that sub-test. Returns `true` if the sub-test did not fail.
    fn run_subtest(&mut self, name: &str, body: &mut dyn FnMut(&mut dyn SubtestRunner)) -> bool;

    /// Run independent sub-tests, possibly concurrently
    ///
    /// Returns one success flag per job, in job order. The default runs the
    /// jobs one after another.
    fn run_parallel(&mut self, jobs: Vec<ParallelJob<'_>>) -> Vec<bool> {
        jobs.into_iter()
            .map(|job| {
                let mut body = Some(job.body);
                self.run_subtest(&job.name, &mut |handle| {
                    if let Some(body) = body.take() {
                        body(handle);
                    }
                })
            })
            .collect()
    }
}

/// Capability to drive a benchmark
pub trait BenchHandle: TestHandle {
    /// Number of iterations the host asks for
    fn iterations(&self) -> u64;

    /// Run `body` exactly `n` times for timing purposes
    fn run_loop(&mut self, n: u64, body: &mut dyn FnMut());

    /// Run a named sub-benchmark
    ///
    /// Returns `true` if the sub-benchmark did not fail.
    fn run_sub_bench(&mut self, name: &str, body: &mut dyn FnMut(&mut dyn BenchHandle)) -> bool;

    /// Run `body` the number of times the host asks for
    fn iter(&mut self, body: &mut dyn FnMut()) {
        let n = self.iterations();
        self.run_loop(n, body);
    }
}
