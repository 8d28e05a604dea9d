//! Shared test utilities for the engine integration suites.
//!
//! Import via `mod common;` from any test file.

#![allow(dead_code)]

use std::sync::Arc;

use casetree_core::CaseResult;
use casetree_engine::Case;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

// ============================================================================
// Initialization
// ============================================================================

static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
});

/// Install a test-writer subscriber once per test binary.
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

// ============================================================================
// Event recording
// ============================================================================

/// Ordered log of hook/body events shared across closures.
pub type Events = Arc<Mutex<Vec<String>>>;

pub fn events() -> Events {
    Arc::default()
}

/// A hook or body that appends `entry` to `log`.
pub fn record(log: &Events, entry: &str) -> impl Fn(&mut Case) -> CaseResult + Send + Sync + 'static {
    let log = Arc::clone(log);
    let entry = entry.to_string();
    move |_case: &mut Case| {
        log.lock().push(entry.clone());
        Ok(())
    }
}

/// Snapshot of the recorded events.
pub fn snapshot(log: &Events) -> Vec<String> {
    log.lock().clone()
}
