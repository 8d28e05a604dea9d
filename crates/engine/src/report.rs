//! Suite reports
//!
//! Leaves may finish on several threads at once. Each one pushes its
//! [`LeafReport`] into a shared [`ReportSink`] tagged with its declaration
//! index; the sink is drained into a [`SuiteReport`] in declaration order once
//! the run is over.

use std::sync::Arc;

use casetree_core::{LeafReport, LeafStatus};
use parking_lot::Mutex;
use serde::Serialize;

/// Outcome of one full run of a spec tree
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SuiteReport {
    /// Root name of the tree
    pub name: String,
    /// One report per leaf, in declaration order
    pub leaves: Vec<LeafReport>,
}

impl SuiteReport {
    fn count(&self, status: LeafStatus) -> usize {
        self.leaves.iter().filter(|l| l.status == status).count()
    }

    /// Number of leaves that passed
    pub fn passed(&self) -> usize {
        self.count(LeafStatus::Passed)
    }

    /// Number of leaves that failed
    pub fn failed(&self) -> usize {
        self.count(LeafStatus::Failed)
    }

    /// Number of skipped leaves
    pub fn skipped(&self) -> usize {
        self.count(LeafStatus::Skipped)
    }

    /// True when no leaf failed
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Look up a leaf by its full path
    pub fn leaf(&self, path: &str) -> Option<&LeafReport> {
        self.leaves.iter().find(|l| l.path == path)
    }

    /// Paths of every leaf, in declaration order
    pub fn paths(&self) -> Vec<&str> {
        self.leaves.iter().map(|l| l.path.as_str()).collect()
    }

    /// Serialize the report as pretty-printed JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Thread-safe collector of leaf reports
#[derive(Debug, Clone, Default)]
pub(crate) struct ReportSink {
    entries: Arc<Mutex<Vec<(usize, LeafReport)>>>,
}

impl ReportSink {
    pub(crate) fn push(&self, index: usize, report: LeafReport) {
        self.entries.lock().push((index, report));
    }

    /// Drain everything collected so far into a report
    pub(crate) fn drain(&self, name: &str) -> SuiteReport {
        let mut entries = std::mem::take(&mut *self.entries.lock());
        entries.sort_by_key(|(index, _)| *index);
        SuiteReport {
            name: name.to_string(),
            leaves: entries.into_iter().map(|(_, report)| report).collect(),
        }
    }
}
