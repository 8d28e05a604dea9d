//! Facade Tests
//!
//! Exercises the re-exported API end to end through the `casetree` crate,
//! the way a downstream test suite would use it.

use std::sync::Arc;

use casetree::{CaseError, Harness, LeafStatus, Spec, TestHandle};
use parking_lot::Mutex;

// ============================================================================
// Stack example
// ============================================================================

fn stack_spec(log: Arc<Mutex<Vec<String>>>) -> Spec {
    let mut spec = Spec::new("stack");
    let teardown_log = Arc::clone(&log);
    spec.root()
        .let_value("items", Vec::<i32>::new())
        .after(move |_| {
            teardown_log.lock().push("reset".to_string());
            Ok(())
        })
        .when("one item was pushed", |s| {
            s.before(|case| case.with("items", |v: &mut Vec<i32>| v.push(1)));
            s.then("it has a top", |case| {
                let items: Vec<i32> = case.get("items")?;
                assert_eq!(items.last(), Some(&1));
                Ok(())
            });
            s.and("it was popped", |s| {
                s.before(|case| case.with("items", |v: &mut Vec<i32>| v.pop()).map(|_| ()));
                s.then("it is empty again", |case| {
                    let items: Vec<i32> = case.get("items")?;
                    assert!(items.is_empty());
                    Ok(())
                });
            });
        })
        .then("it starts empty", |case| {
            let items: Vec<i32> = case.get("items")?;
            assert!(items.is_empty());
            Ok(())
        })
        .it("is not ready yet", |_| Err(CaseError::skip("pending")));
    spec
}

/// Test: the quick-start spec runs every leaf in isolation
#[test]
fn test_stack_spec() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut spec = stack_spec(Arc::clone(&log));
    let mut host = Harness::new("stack");
    let report = spec.finish(&mut host);

    assert_eq!(
        report.paths(),
        vec![
            "stack/when one item was pushed/it has a top",
            "stack/when one item was pushed/and it was popped/it is empty again",
            "stack/it starts empty",
            "stack/is not ready yet",
        ]
    );
    assert_eq!(report.passed(), 3);
    assert_eq!(report.skipped(), 1);
    assert!(report.is_success());
    assert_eq!(
        report.leaf("stack/is not ready yet").unwrap().status,
        LeafStatus::Skipped
    );
    assert_eq!(log.lock().len(), 4);
    assert!(!host.failed());
}
