//! Notifications emitted by a data source.

use crate::error::CoreError;

/// Index diff against the previously emitted state.
///
/// Deletions refer to indexes before the change, insertions and
/// modifications to indexes after it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Change {
    /// Removed indexes.
    pub deletions: Vec<usize>,
    /// Added indexes.
    pub insertions: Vec<usize>,
    /// Changed indexes.
    pub modifications: Vec<usize>,
}

impl Change {
    /// A change that only inserts.
    pub fn insertions(indexes: Vec<usize>) -> Self {
        Self {
            insertions: indexes,
            ..Self::default()
        }
    }

    /// A change that only deletes.
    pub fn deletions(indexes: Vec<usize>) -> Self {
        Self {
            deletions: indexes,
            ..Self::default()
        }
    }

    /// A change that only modifies.
    pub fn modifications(indexes: Vec<usize>) -> Self {
        Self {
            modifications: indexes,
            ..Self::default()
        }
    }

    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.insertions.is_empty() && self.modifications.is_empty()
    }
}

/// One notification on a data source's channel.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionChange {
    /// The first page is loaded.
    Initial,
    /// The window changed.
    Update(Change),
    /// A load or subscription failed. Entities already loaded stay.
    Error(CoreError),
}
