//! Label ↔ user-name mapping, rebuilt on every retrain.

use crate::types::{UNKNOWN_LABEL, UNKNOWN_NAME};

/// Bijection between positive integer labels and user names.
///
/// Users are sorted lexicographically and numbered from 1; label 0 is
/// permanently "Unknown".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelIndex {
    /// `names[0]` is always [`UNKNOWN_NAME`].
    names: Vec<String>,
}

impl Default for LabelIndex {
    fn default() -> Self {
        Self {
            names: vec![UNKNOWN_NAME.to_string()],
        }
    }
}

impl LabelIndex {
    pub fn from_users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut users: Vec<String> = users.into_iter().map(Into::into).collect();
        users.sort();
        users.dedup();

        let mut names = Vec::with_capacity(users.len() + 1);
        names.push(UNKNOWN_NAME.to_string());
        names.extend(users);
        Self { names }
    }

    /// Label and name for a predicted label; 0 and out-of-range labels
    /// resolve to `(0, "Unknown")`.
    pub fn resolve(&self, label: u32) -> (u32, &str) {
        match self.names.get(label as usize) {
            Some(name) if label != UNKNOWN_LABEL => (label, name.as_str()),
            _ => (UNKNOWN_LABEL, UNKNOWN_NAME),
        }
    }

    pub fn name_of(&self, label: u32) -> &str {
        self.resolve(label).1
    }

    /// All names indexed by label, starting with "Unknown".
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Enrolled users in label order.
    pub fn users(&self) -> &[String] {
        &self.names[1..]
    }

    /// Number of enrolled users (excludes "Unknown").
    pub fn len(&self) -> usize {
        self.names.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
