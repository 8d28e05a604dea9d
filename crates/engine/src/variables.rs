//! Per-leaf variable store
//!
//! A [`VariableStore`] is created fresh for every leaf execution and dropped
//! with it. It maps variable names to type-erased values and tracks which
//! names are being computed right now, so a name requested while it is still
//! being computed is reported as a cycle instead of recursing forever.
//!
//! The store never checks value types on insert. Callers read through a
//! typed accessor that performs a checked downcast and reports
//! [`EngineError::VariableTypeMismatch`] on mismatch.

use std::any::{type_name, Any};
use std::fmt;

use casetree_core::{CaseResult, EngineError, EngineResult};
use rustc_hash::FxHashMap;

use crate::case::Case;

/// Cleanup action attached to a computed variable
pub type Cleanup = Box<dyn FnOnce(&mut Case) -> CaseResult>;

/// Result of a variable computation: the value plus an optional cleanup
pub struct Binding {
    pub(crate) value: Box<dyn Any>,
    pub(crate) type_name: &'static str,
    pub(crate) cleanup: Option<Cleanup>,
}

impl Binding {
    /// Bind a value with no cleanup
    pub fn new<T: Any>(value: T) -> Self {
        Binding {
            value: Box::new(value),
            type_name: type_name::<T>(),
            cleanup: None,
        }
    }

    /// Attach a cleanup, run when the leaf ends
    pub fn with_cleanup(mut self, cleanup: impl FnOnce(&mut Case) -> CaseResult + 'static) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    /// Type name of the bound value
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("type_name", &self.type_name)
            .field("cleanup", &self.cleanup.is_some())
            .finish()
    }
}

struct Slot {
    value: Box<dyn Any>,
    type_name: &'static str,
}

/// Memoized variable values of one leaf execution
#[derive(Default)]
pub struct VariableStore {
    slots: FxHashMap<String, Slot>,
    in_progress: Vec<String>,
    computed: usize,
}

impl VariableStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a value is cached for `name`
    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Number of cached values
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of compute functions that completed in this store
    pub fn computed(&self) -> usize {
        self.computed
    }

    /// Names currently being computed, outermost first
    pub fn in_progress(&self) -> &[String] {
        &self.in_progress
    }

    /// Mark `name` as being computed
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CircularVariable`] if `name` is already being
    /// computed. The cycle starts at the first request of `name`.
    pub fn begin(&mut self, name: &str) -> EngineResult<()> {
        if let Some(start) = self.in_progress.iter().position(|n| n == name) {
            let mut cycle: Vec<String> = self.in_progress[start..].to_vec();
            cycle.push(name.to_string());
            return Err(EngineError::CircularVariable { cycle });
        }
        self.in_progress.push(name.to_string());
        Ok(())
    }

    /// Abandon the computation of `name` and of anything it started
    pub fn abort(&mut self, name: &str) {
        if let Some(pos) = self.in_progress.iter().rposition(|n| n == name) {
            self.in_progress.truncate(pos);
        }
    }

    /// Cache the computed value of `name` and clear its in-progress mark
    pub fn complete(&mut self, name: &str, binding_value: Box<dyn Any>, type_name: &'static str) {
        self.abort(name);
        self.computed += 1;
        self.slots.insert(
            name.to_string(),
            Slot {
                value: binding_value,
                type_name,
            },
        );
    }

    /// Replace the value of `name` without running any compute function
    pub fn set<T: Any>(&mut self, name: impl Into<String>, value: T) {
        self.slots.insert(
            name.into(),
            Slot {
                value: Box::new(value),
                type_name: type_name::<T>(),
            },
        );
    }

    /// Borrow the cached value of `name` as `T`
    ///
    /// Returns `Ok(None)` when nothing is cached yet.
    pub fn get<T: Any>(&self, name: &str) -> EngineResult<Option<&T>> {
        match self.slots.get(name) {
            None => Ok(None),
            Some(slot) => slot
                .value
                .downcast_ref::<T>()
                .map(Some)
                .ok_or_else(|| mismatch::<T>(name, slot.type_name)),
        }
    }

    /// Mutably borrow the cached value of `name` as `T`
    pub fn get_mut<T: Any>(&mut self, name: &str) -> EngineResult<Option<&mut T>> {
        match self.slots.get_mut(name) {
            None => Ok(None),
            Some(slot) => {
                let actual = slot.type_name;
                slot.value
                    .downcast_mut::<T>()
                    .map(Some)
                    .ok_or_else(|| mismatch::<T>(name, actual))
            }
        }
    }

    /// Drop every cached value
    pub fn clear(&mut self) {
        self.slots.clear();
        self.in_progress.clear();
    }
}

fn mismatch<T: Any>(name: &str, actual: &'static str) -> EngineError {
    EngineError::VariableTypeMismatch {
        name: name.to_string(),
        expected: type_name::<T>(),
        actual,
    }
}

impl fmt::Debug for VariableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.slots.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("VariableStore")
            .field("cached", &names)
            .field("in_progress", &self.in_progress)
            .finish()
    }
}
