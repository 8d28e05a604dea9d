//! casetree - hierarchical test specifications with memoized fixtures
//!
//! Build a tree of nested contexts, attach lazily computed variables and
//! setup/teardown/around hooks at any level, and run every leaf in
//! isolation: each leaf gets fresh variable values, inherits the hooks of
//! all its ancestors, and unwinds its teardowns in reverse order.
//!
//! # Quick Start
//!
//! ```ignore
//! use casetree::{Harness, Spec};
//!
//! let mut spec = Spec::new("stack");
//! spec.root()
//!     .let_value("items", Vec::<i32>::new())
//!     .when("one item was pushed", |s| {
//!         s.before(|case| case.with("items", |v: &mut Vec<i32>| v.push(1)));
//!         s.then("it has a top", |case| {
//!             let items: Vec<i32> = case.get("items")?;
//!             assert_eq!(items.last(), Some(&1));
//!             Ok(())
//!         });
//!     });
//!
//! let mut host = Harness::new("stack");
//! let report = spec.finish(&mut host);
//! assert!(report.is_success());
//! ```
//!
//! # Architecture
//!
//! - `casetree-core`: errors, leaf lifecycle types, tags, names and the host
//!   runner traits
//! - `casetree-engine`: the tree, variable store, hook composition, leaf
//!   execution, builder DSL, contracts and the in-process [`Harness`]

pub use casetree_core::*;
pub use casetree_engine::*;
