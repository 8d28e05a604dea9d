//! Sub-test naming
//!
//! Every context and leaf is identified towards the host runner by a name.
//! Hosts usually treat `/` as the separator between nested sub-test names,
//! so any name derived from user data has to be made path-safe first.
//!
//! ## Display names for contracts
//!
//! A contract reports its own name when it has one. Otherwise the name is
//! derived from the contract's type: the module path is dropped and only
//! the type (with its generic arguments) remains.
//!
//! | Input | Display name |
//! |-------|--------------|
//! | `my_crate::contracts::StackContract` | `StackContract` |
//! | `my_crate::Wrapper<alloc::vec::Vec<u8>>` | `Wrapper<Vec<u8>>` |
//! | `"read/write"` (self-reported) | `readwrite` |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between segments of a context path
pub const PATH_SEPARATOR: char = '/';

/// A path-safe sub-test name
///
/// Construction always sanitizes: `/` and `\` are stripped and surrounding
/// whitespace is trimmed. The result can be passed to any host runner as a
/// single segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubtestName(String);

impl SubtestName {
    /// Create a sanitized name
    pub fn new(name: impl AsRef<str>) -> Self {
        SubtestName(sanitize(name.as_ref()))
    }

    /// Derive a display name from a type name
    pub fn from_type_name(type_name: &str) -> Self {
        SubtestName::new(symbolic_name(type_name))
    }

    /// Get the name as a string slice
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if the sanitized name is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume and return the inner string
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for SubtestName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubtestName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SubtestName {
    fn from(value: &str) -> Self {
        SubtestName::new(value)
    }
}

impl From<String> for SubtestName {
    fn from(value: String) -> Self {
        SubtestName::new(value)
    }
}

/// Strip path-unsafe characters from a name
pub fn sanitize(name: &str) -> String {
    name.chars()
        .filter(|c| !is_path_unsafe(*c))
        .collect::<String>()
        .trim()
        .to_string()
}

#[inline]
fn is_path_unsafe(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Shorten a fully qualified type name to its symbolic form
///
/// Every `::`-separated path prefix is dropped, including the prefixes
/// of generic arguments.
pub fn symbolic_name(type_name: &str) -> String {
    let mut out = String::with_capacity(type_name.len());
    let mut segment = String::new();
    let mut chars = type_name.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                segment.clear();
            }
            '<' | '>' | ',' | '(' | ')' | '[' | ']' | '&' | ';' | ' ' => {
                out.push_str(&segment);
                segment.clear();
                out.push(c);
            }
            _ => segment.push(c),
        }
    }
    out.push_str(&segment);
    out
}

/// Join context segments into a full path, skipping empty segments
pub fn join_path<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    let mut path = String::new();
    for segment in segments.into_iter().filter(|s| !s.is_empty()) {
        if !path.is_empty() {
            path.push(PATH_SEPARATOR);
        }
        path.push_str(segment);
    }
    path
}

// ============================================================================
// Tests
// ============================================================================
