//! Data source configuration.

use crate::entity::{Entity, Model};
use arbor_value::encode_field;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// What to order a data source's items by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKey {
    /// The record key. Push ids sort by creation time.
    Key,
    /// The stored form of a plain field.
    Field(&'static str),
}

/// One ordering criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDescriptor {
    /// What to compare.
    pub key: SortKey,
    /// Smallest first when true.
    pub ascending: bool,
}

impl SortDescriptor {
    /// Orders by record key.
    pub const fn key(ascending: bool) -> Self {
        Self {
            key: SortKey::Key,
            ascending,
        }
    }

    /// Orders by a plain field.
    pub const fn field(name: &'static str, ascending: bool) -> Self {
        Self {
            key: SortKey::Field(name),
            ascending,
        }
    }

    fn compare<M: Model>(&self, a: &Entity<M>, b: &Entity<M>) -> Ordering {
        let ordering = match &self.key {
            SortKey::Key => a.id().cmp(b.id()),
            SortKey::Field(name) => {
                let stored = |e: &Entity<M>| e.field_value(name).and_then(|v| encode_field(name, &v));
                match (stored(a), stored(b)) {
                    (Some(x), Some(y)) => x.cmp_sort(&y),
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            }
        };
        if self.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    }
}

/// Compares two entities under a list of criteria: the first that tells
/// them apart decides.
pub fn compare<M: Model>(sort: &[SortDescriptor], a: &Entity<M>, b: &Entity<M>) -> Ordering {
    sort.iter()
        .map(|descriptor| descriptor.compare(a, b))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Predicate deciding which entities a data source admits.
pub type Filter<M> = Arc<dyn Fn(&Entity<M>) -> bool + Send + Sync>;

/// Options for opening a [`crate::DataSource`].
pub struct DataSourceOptions<M: Model> {
    /// Page size. Defaults to the configured page size.
    pub limit: Option<usize>,
    /// Ordering criteria. Defaults to newest key first.
    pub sort: Vec<SortDescriptor>,
    /// Entities rejected by the filter are never admitted.
    pub filter: Option<Filter<M>>,
    /// Page resolution deadline. Defaults to the configured fetch timeout.
    pub timeout: Option<Duration>,
}

impl<M: Model> DataSourceOptions<M> {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page size.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Replaces the ordering criteria.
    #[must_use]
    pub fn sort(mut self, sort: Vec<SortDescriptor>) -> Self {
        self.sort = sort;
        self
    }

    /// Orders by key, oldest first.
    #[must_use]
    pub fn ascending(self) -> Self {
        self.sort(vec![SortDescriptor::key(true)])
    }

    /// Sets the admission filter.
    #[must_use]
    pub fn filter(mut self, filter: impl Fn(&Entity<M>) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Sets the page resolution deadline.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn admits(&self, entity: &Entity<M>) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(entity))
    }
}

impl<M: Model> Default for DataSourceOptions<M> {
    fn default() -> Self {
        Self {
            limit: None,
            sort: vec![SortDescriptor::key(false)],
            filter: None,
            timeout: None,
        }
    }
}

impl<M: Model> Clone for DataSourceOptions<M> {
    fn clone(&self) -> Self {
        Self {
            limit: self.limit,
            sort: self.sort.clone(),
            filter: self.filter.clone(),
            timeout: self.timeout,
        }
    }
}

impl<M: Model> fmt::Debug for DataSourceOptions<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceOptions")
            .field("limit", &self.limit)
            .field("sort", &self.sort)
            .field("filter", &self.filter.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}
