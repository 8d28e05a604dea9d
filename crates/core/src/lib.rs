//! Core types and traits for casetree
//!
//! This crate defines the foundational types used throughout the system:
//! - Error: configuration errors and case outcome signals
//! - Leaf lifecycle: LeafState, LeafStatus, Failure, LeafReport
//! - Names: path-safe sub-test names and contract display names
//! - Tags: group tags and include/exclude filters
//! - Traits: the host runner capabilities (TestHandle, SubtestRunner, BenchHandle)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod leaf_types;
pub mod names;
pub mod tags;
pub mod traits;

// Re-export commonly used types and traits
pub use error::{CaseError, CaseResult, EngineError, EngineResult};
pub use leaf_types::{Failure, FailureKind, LeafReport, LeafState, LeafStatus};
pub use names::{join_path, sanitize, symbolic_name, SubtestName, PATH_SEPARATOR};
pub use tags::{TagDecision, TagFilter, TagSet};
pub use traits::{BenchHandle, ParallelJob, SubtestRunner, TestHandle};
