//! Group tags and tag filters
//!
//! Context nodes carry a set of group tags. A leaf's effective tags are the
//! union of the tags of every ancestor, and a [`TagFilter`] decides whether
//! that leaf runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Ordered, de-duplicated set of group tags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSet(BTreeSet<String>);

impl TagSet {
    /// Create an empty tag set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tag, ignoring blank input
    pub fn insert(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        let tag = tag.trim();
        if !tag.is_empty() {
            self.0.insert(tag.to_string());
        }
    }

    /// Add every tag of another set
    pub fn extend_from(&mut self, other: &TagSet) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Check membership
    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate tags in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Collect into a sorted vector
    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = TagSet::new();
        for tag in iter {
            set.insert(tag);
        }
        set
    }
}

/// Why a leaf was or wasn't selected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagDecision {
    /// The leaf runs
    Run,
    /// The leaf carries an excluded tag
    Excluded(String),
    /// An include list is set and the leaf carries none of its tags
    NotIncluded,
}

impl TagDecision {
    /// Check if the leaf runs
    pub fn should_run(&self) -> bool {
        matches!(self, TagDecision::Run)
    }

    /// Human-readable skip reason, `None` when the leaf runs
    pub fn reason(&self) -> Option<String> {
        match self {
            TagDecision::Run => None,
            TagDecision::Excluded(tag) => Some(format!("excluded by tag '{}'", tag)),
            TagDecision::NotIncluded => Some("not selected by the tag include list".to_string()),
        }
    }
}

/// Include/exclude filter over leaf tags
///
/// Exclusion wins over inclusion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    include: TagSet,
    exclude: TagSet,
}

impl TagFilter {
    /// Create a filter from include and exclude lists
    pub fn new<I, E, S, T>(include: I, exclude: E) -> Self
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        TagFilter {
            include: include.into_iter().collect(),
            exclude: exclude.into_iter().collect(),
        }
    }

    /// A filter that selects every leaf
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Decide whether a leaf with the given tags runs
    pub fn decide(&self, tags: &TagSet) -> TagDecision {
        if let Some(tag) = tags.iter().find(|t| self.exclude.contains(t)) {
            return TagDecision::Excluded(tag.to_string());
        }
        if !self.include.is_empty() && !tags.iter().any(|t| self.include.contains(t)) {
            return TagDecision::NotIncluded;
        }
        TagDecision::Run
    }
}
