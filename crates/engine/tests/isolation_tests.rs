//! Isolation Tests
//!
//! Every leaf gets its own variable store and cleanup stack and shares only
//! the read-only tree. These tests run leaves concurrently and repeatedly to
//! check that nothing leaks between executions.

mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use casetree_core::{LeafStatus, TestHandle};
use casetree_engine::{execute_leaf, Case, CaseMode, Harness, Spec, SpecConfig};
use common::init_tracing;
use parking_lot::Mutex;

// ============================================================================
// Parallel Siblings
// ============================================================================

/// Test: siblings of a parallel context run at the same time on distinct
/// threads, each with a private store
#[test]
fn test_parallel_siblings_run_concurrently() {
    init_tracing();
    const LEAVES: usize = 4;

    let barrier = Arc::new(Barrier::new(LEAVES));
    let threads = Arc::new(Mutex::new(HashSet::new()));
    let mut spec = Spec::new("pool");
    spec.root()
        .parallel()
        .let_var("slot", |case| Ok(case.path().to_string()));
    for i in 0..LEAVES {
        let barrier = Arc::clone(&barrier);
        let threads = Arc::clone(&threads);
        spec.root().test(format!("worker {}", i), move |case| {
            let expected = case.path().to_string();
            case.with("slot", |slot: &mut String| slot.push('!'))?;
            // Every worker must arrive before any may continue.
            barrier.wait();
            threads.lock().insert(thread::current().id());
            assert_eq!(case.get::<String>("slot")?, format!("{}!", expected));
            Ok(())
        });
    }

    let mut host = Harness::new("pool");
    let report = spec.finish(&mut host);

    assert_eq!(report.passed(), LEAVES, "{:?}", report.leaves);
    assert_eq!(threads.lock().len(), LEAVES);
    assert_eq!(
        report.paths(),
        vec!["pool/worker 0", "pool/worker 1", "pool/worker 2", "pool/worker 3"]
    );
    assert!(!host.failed());
}

/// Test: parallel mode is inherited by nested contexts
#[test]
fn test_parallel_mode_inherited() {
    init_tracing();
    let barrier = Arc::new(Barrier::new(2));
    let mut spec = Spec::new("");
    spec.root().parallel().describe("nested", |s| {
        for name in ["left", "right"] {
            let barrier = Arc::clone(&barrier);
            s.test(name, move |_| {
                barrier.wait();
                Ok(())
            });
        }
    });

    let mut host = Harness::new("");
    let report = spec.finish(&mut host);
    assert_eq!(report.passed(), 2);
}

/// Test: a sequential context under a parallel one runs in order
#[test]
fn test_sequential_overrides_parallel() {
    init_tracing();
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut spec = Spec::new("");
    spec.root().parallel().describe("ordered", |s| {
        s.sequential();
        for i in 0..5 {
            let order = Arc::clone(&order);
            s.test(format!("step {}", i), move |_| {
                order.lock().push(i);
                Ok(())
            });
        }
    });

    let mut host = Harness::new("");
    spec.finish(&mut host);
    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
}

/// Test: a failing parallel sibling does not affect the others
#[test]
fn test_parallel_failure_isolated() {
    init_tracing();
    let mut spec = Spec::new("");
    spec.root()
        .parallel()
        .test("fails", |case| {
            case.error("broken");
            Ok(())
        })
        .test("passes", |_| Ok(()))
        .test("panics", |_| panic!("worker crashed"));

    let mut host = Harness::new("");
    let report = spec.finish(&mut host);
    assert_eq!(report.leaf("fails").unwrap().status, LeafStatus::Failed);
    assert_eq!(report.leaf("passes").unwrap().status, LeafStatus::Passed);
    assert_eq!(report.leaf("panics").unwrap().status, LeafStatus::Failed);
    assert!(!host.find("passes").unwrap().failed());
}

// ============================================================================
// Repeated Runs
// ============================================================================

/// Test: running the same spec twice recomputes every variable
#[test]
fn test_rerun_recomputes_values() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut spec = Spec::new("");
    spec.root()
        .let_var("id", move |_| Ok(counter.fetch_add(1, Ordering::SeqCst)))
        .test("reads", |case| {
            case.get::<usize>("id")?;
            Ok(())
        });

    let first = spec.finish(&mut Harness::new(""));
    let second = spec.finish(&mut Harness::new(""));
    assert!(first.is_success());
    assert!(second.is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Test: declaring anything once the spec has run is rejected
#[test]
#[should_panic(expected = "already finalized")]
fn test_declaring_after_finish_panics() {
    let mut spec = Spec::new("done");
    spec.root().test("first", |_| Ok(()));
    spec.finish(&mut Harness::new("done"));
    spec.root().let_value("late", 1u8);
}

// ============================================================================
// Shared Tree
// ============================================================================

/// Test: the same leaf can execute on many threads against one shared tree
#[test]
fn test_concurrent_execute_leaf() {
    init_tracing();
    const THREADS: usize = 8;
    const ROUNDS: usize = 25;

    let computed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&computed);
    let mut spec = Spec::new("shared");
    spec.root()
        .let_var("state", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::<usize>::new())
        })
        .test("mutates", |case: &mut Case| {
            case.with("state", |v: &mut Vec<usize>| v.push(1))?;
            let len = case.with("state", |v: &mut Vec<usize>| v.len())?;
            assert_eq!(len, 1, "state leaked between executions");
            Ok(())
        });

    let mut tree = spec.tree().clone();
    tree.finalize();
    let leaf = tree.leaves()[0];
    let tree = Arc::new(tree);

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                (0..ROUNDS)
                    .map(|_| execute_leaf(&tree, leaf, CaseMode::Test))
                    .filter(|r| r.passed())
                    .count()
            })
        })
        .collect();

    let passed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(passed, THREADS * ROUNDS);
    assert_eq!(computed.load(Ordering::SeqCst), THREADS * ROUNDS);
}

/// Test: a parallel default from configuration applies to the whole tree
#[test]
fn test_parallel_from_config() {
    init_tracing();
    let barrier = Arc::new(Barrier::new(3));
    let config = SpecConfig {
        parallel: true,
        ..SpecConfig::default()
    };
    let mut spec = Spec::new("").with_config(config);
    for i in 0..3 {
        let barrier = Arc::clone(&barrier);
        spec.root().test(format!("t{}", i), move |_| {
            barrier.wait();
            Ok(())
        });
    }

    let report = spec.finish(&mut Harness::new(""));
    assert_eq!(report.passed(), 3);
}
