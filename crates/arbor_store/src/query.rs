//! Key-ordered range queries.

/// Which end of the range a limit keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// Keep the first `n` children in key order.
    First(usize),
    /// Keep the last `n` children in key order.
    Last(usize),
}

/// A range query over the children of a path, ordered by key.
///
/// Bounds are inclusive. Keys compare as plain strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    /// Lowest key returned.
    pub start_at: Option<String>,
    /// Highest key returned.
    pub end_at: Option<String>,
    /// Result-count limit.
    pub limit: Option<Limit>,
}

impl Query {
    /// A query matching every child.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the inclusive lower bound.
    #[must_use]
    pub fn starting_at(mut self, key: impl Into<String>) -> Self {
        self.start_at = Some(key.into());
        self
    }

    /// Sets the inclusive upper bound.
    #[must_use]
    pub fn ending_at(mut self, key: impl Into<String>) -> Self {
        self.end_at = Some(key.into());
        self
    }

    /// Keeps the first `n` matching children.
    #[must_use]
    pub fn limit_to_first(mut self, n: usize) -> Self {
        self.limit = Some(Limit::First(n));
        self
    }

    /// Keeps the last `n` matching children.
    #[must_use]
    pub fn limit_to_last(mut self, n: usize) -> Self {
        self.limit = Some(Limit::Last(n));
        self
    }

    /// Returns true if the query does not restrict anything.
    pub fn is_unbounded(&self) -> bool {
        self == &Self::default()
    }

    /// Returns true if `key` lies within the bounds. Limits are ignored.
    pub fn in_range(&self, key: &str) -> bool {
        self.start_at.as_deref().map_or(true, |start| key >= start)
            && self.end_at.as_deref().map_or(true, |end| key <= end)
    }

    /// Applies the query to children already sorted by key.
    pub fn apply<'a, T>(&self, children: impl IntoIterator<Item = (&'a String, T)>) -> Vec<(&'a String, T)> {
        let mut matched: Vec<(&String, T)> = children
            .into_iter()
            .filter(|(key, _)| self.in_range(key))
            .collect();
        match self.limit {
            Some(Limit::First(n)) => matched.truncate(n),
            Some(Limit::Last(n)) => {
                let skip = matched.len().saturating_sub(n);
                matched.drain(..skip);
            }
            None => {}
        }
        matched
    }
}
