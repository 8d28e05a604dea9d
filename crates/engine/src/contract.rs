//! Contract dispatch
//!
//! A contract is a reusable, named behavior suite. It comes in two forms:
//!
//! - [`Contract`] populates a context with nested specs
//! - [`OpenContract`] exposes a plain test body and a benchmark body
//!
//! Either form runs against any [`Target`]. The set of targets is closed: a
//! context being built, a running leaf, a plain test handle, a benchmark
//! handle, or a sub-test runner. Host values are mapped onto it by
//! [`Target::detect`]; anything else is a configuration error.

use std::any::{type_name, Any};
use std::sync::Arc;

use casetree_core::{
    BenchHandle, EngineError, EngineResult, SubtestName, SubtestRunner, TestHandle,
};

use crate::case::Case;
use crate::harness::{Harness, HarnessBench};
use crate::spec::{fatal, Context, Spec};

/// A suite that populates a context with nested specs
pub trait Contract: Send + Sync {
    /// Declare the suite's contexts, variables, hooks and tests
    fn spec(&self, s: &mut Context<'_>);

    /// Self-reported name, used verbatim (sanitized) when present
    fn name(&self) -> Option<String> {
        None
    }

    /// Structural name, used when [`Contract::name`] is `None`
    fn type_name(&self) -> &'static str {
        type_name::<Self>()
    }
}

/// A suite exposing direct test and benchmark bodies
pub trait OpenContract: Send + Sync {
    /// Run the suite's assertions against a test handle
    fn test(&self, t: &mut dyn TestHandle);

    /// Run the suite's benchmark against a benchmark handle
    fn benchmark(&self, b: &mut dyn BenchHandle);

    /// Self-reported name, used verbatim (sanitized) when present
    fn name(&self) -> Option<String> {
        None
    }

    /// Structural name, used when [`OpenContract::name`] is `None`
    fn type_name(&self) -> &'static str {
        type_name::<Self>()
    }
}

/// Sub-test name of a contract
///
/// The self-reported name wins; otherwise the structural name without its
/// module path. Path separators are always stripped.
pub fn display_name(name: Option<String>, type_name: &str) -> SubtestName {
    match name {
        Some(name) => SubtestName::new(name),
        None => SubtestName::from_type_name(type_name),
    }
}

/// Where a contract runs
pub enum Target<'a, 's> {
    /// A context being built: the contract becomes a named child group
    Spec(&'a mut Context<'s>),
    /// A running leaf: the contract runs inline and reports into the leaf
    Case(&'a mut Case),
    /// A plain test handle: the contract runs inline
    Test(&'a mut dyn TestHandle),
    /// A benchmark handle: the contract becomes a named sub-benchmark
    Bench(&'a mut dyn BenchHandle),
    /// A sub-test runner: the contract becomes a named sub-test
    Runner(&'a mut dyn SubtestRunner),
}

impl<'a, 's> Target<'a, 's> {
    /// Map a concrete host value onto a target
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownTarget`] for any type other than
    /// [`Harness`], [`HarnessBench`] and [`Case`].
    pub fn detect<T: Any>(host: &'a mut T) -> EngineResult<Self> {
        let unknown = || EngineError::UnknownTarget {
            type_name: type_name::<T>(),
        };
        let any: &'a mut dyn Any = host;
        if any.is::<Harness>() {
            return any
                .downcast_mut::<Harness>()
                .map(|h| Target::Runner(h))
                .ok_or_else(unknown);
        }
        if any.is::<HarnessBench>() {
            return any
                .downcast_mut::<HarnessBench>()
                .map(|b| Target::Bench(b))
                .ok_or_else(unknown);
        }
        if any.is::<Case>() {
            return any
                .downcast_mut::<Case>()
                .map(Target::Case)
                .ok_or_else(unknown);
        }
        let err = unknown();
        tracing::error!(error = %err, "contract dispatch failed");
        Err(err)
    }

    /// Variant name, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Target::Spec(_) => "spec",
            Target::Case(_) => "case",
            Target::Test(_) => "test",
            Target::Bench(_) => "bench",
            Target::Runner(_) => "runner",
        }
    }

    /// Run a spec-populating contract against this target
    pub fn run_contract(&mut self, contract: &dyn Contract) {
        let name = display_name(contract.name(), contract.type_name());
        tracing::debug!(contract = %name, target = self.kind(), "running contract");
        let populate = |spec: &mut Spec| contract.spec(&mut spec.root());

        match self {
            Target::Spec(ctx) => {
                ctx.context_with_tags(name.as_str(), [name.as_str()], |s| contract.spec(s));
            }
            Target::Case(case) => {
                let mut spec = Spec::new(name.as_str());
                populate(&mut spec);
                spec.finish_flat(&mut **case);
            }
            Target::Test(handle) => {
                let mut spec = Spec::new(name.as_str());
                populate(&mut spec);
                spec.finish_flat(&mut **handle);
            }
            Target::Bench(bench) => {
                bench.run_sub_bench(name.as_str(), &mut |sub: &mut dyn BenchHandle| {
                    let mut spec = Spec::new(name.as_str());
                    populate(&mut spec);
                    spec.finish_bench(sub);
                });
            }
            Target::Runner(runner) => {
                runner.run_subtest(name.as_str(), &mut |sub: &mut dyn SubtestRunner| {
                    let mut spec = Spec::new(name.as_str());
                    populate(&mut spec);
                    spec.finish(sub);
                });
            }
        }
    }

    /// Run a test/benchmark contract against this target
    pub fn run_open_contract(&mut self, contract: &Arc<dyn OpenContract>) {
        let name = display_name(contract.name(), contract.type_name());
        tracing::debug!(contract = %name, target = self.kind(), "running open contract");

        match self {
            Target::Spec(ctx) => {
                let contract = Arc::clone(contract);
                ctx.test(name.as_str(), move |case| {
                    contract.test(case);
                    Ok(())
                });
            }
            Target::Case(case) => contract.test(&mut **case),
            Target::Test(handle) => contract.test(&mut **handle),
            Target::Bench(bench) => {
                bench.run_sub_bench(name.as_str(), &mut |sub: &mut dyn BenchHandle| {
                    contract.benchmark(sub)
                });
            }
            Target::Runner(runner) => {
                runner.run_subtest(name.as_str(), &mut |sub: &mut dyn SubtestRunner| {
                    contract.test(&mut AsTestHandle(sub))
                });
            }
        }
    }
}

/// Exposes a sub-test runner through the plain test handle interface
struct AsTestHandle<'h>(&'h mut dyn SubtestRunner);

impl TestHandle for AsTestHandle<'_> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn fail(&mut self, message: &str) {
        self.0.fail(message)
    }

    fn skip(&mut self, reason: &str) {
        self.0.skip(reason)
    }

    fn failed(&self) -> bool {
        self.0.failed()
    }

    fn skipped(&self) -> bool {
        self.0.skipped()
    }

    fn log(&mut self, message: &str) {
        self.0.log(message)
    }

    fn helper(&self) {
        self.0.helper()
    }
}

/// Run spec-populating contracts against a host value
///
/// # Errors
///
/// Returns [`EngineError::UnknownTarget`] if `host` is not a known target
/// type. Nothing runs in that case. Unlike the declaration methods of
/// [`Context`], this does not panic; use [`run_contracts_or_panic`] for that.
pub fn run_contracts<T: Any>(host: &mut T, contracts: &[&dyn Contract]) -> EngineResult<()> {
    let mut target = Target::detect(host)?;
    for contract in contracts {
        target.run_contract(*contract);
    }
    Ok(())
}

/// Run test/benchmark contracts against a host value
///
/// # Errors
///
/// Returns [`EngineError::UnknownTarget`] if `host` is not a known target
/// type. Nothing runs in that case. See [`run_open_contracts_or_panic`] for
/// the panicking form.
pub fn run_open_contracts<T: Any>(
    host: &mut T,
    contracts: &[Arc<dyn OpenContract>],
) -> EngineResult<()> {
    let mut target = Target::detect(host)?;
    for contract in contracts {
        target.run_open_contract(contract);
    }
    Ok(())
}

/// Run spec-populating contracts, panicking on an unknown target
///
/// # Panics
///
/// Panics with the [`EngineError::UnknownTarget`] message, like any other
/// mistake in a declared suite.
#[track_caller]
pub fn run_contracts_or_panic<T: Any>(host: &mut T, contracts: &[&dyn Contract]) {
    if let Err(err) = run_contracts(host, contracts) {
        fatal(err);
    }
}

/// Run test/benchmark contracts, panicking on an unknown target
///
/// # Panics
///
/// Panics with the [`EngineError::UnknownTarget`] message.
#[track_caller]
pub fn run_open_contracts_or_panic<T: Any>(host: &mut T, contracts: &[Arc<dyn OpenContract>]) {
    if let Err(err) = run_open_contracts(host, contracts) {
        fatal(err);
    }
}

impl Context<'_> {
    /// Declare one child group per contract
    pub fn contracts(&mut self, contracts: &[&dyn Contract]) -> &mut Self {
        let mut target = Target::Spec(self);
        for contract in contracts {
            target.run_contract(*contract);
        }
        self
    }

    /// Declare one test per open contract
    pub fn open_contracts(&mut self, contracts: &[Arc<dyn OpenContract>]) -> &mut Self {
        let mut target = Target::Spec(self);
        for contract in contracts {
            target.run_open_contract(contract);
        }
        self
    }
}
