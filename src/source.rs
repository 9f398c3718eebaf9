//! [`DataSource`](crate::traits::DataSource) helpers and implementations.
#[cfg(feature = "sea-orm")]
pub mod sql;

use std::collections::HashMap;

use crate::types::tag_set;
use crate::types::TagName;
use crate::types::TagSet;

#[cfg(feature = "sea-orm")]
pub use sql::SeaOrmSource;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryTables {
    pub read:    TagSet,
    pub written: TagSet,
}

/// Explicit mapping of query texts into the tags they read and write.
///
/// Queries are matched verbatim. An unknown query reads and writes nothing, which makes it cacheable for as long as
/// its entry lives.
#[derive(Debug, Clone, Default)]
pub struct QueryCatalog {
    queries: HashMap<String, QueryTables>,
}

impl QueryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reads<I, S>(mut self, query: impl Into<String>, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TagName>,
    {
        self.queries.entry(query.into()).or_default().read.extend(tag_set(tags));
        self
    }

    pub fn writes<I, S>(mut self, query: impl Into<String>, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TagName>,
    {
        self.queries.entry(query.into()).or_default().written.extend(tag_set(tags));
        self
    }

    pub fn tables(&self, query: &str) -> Option<&QueryTables> {
        self.queries.get(query)
    }

    pub fn tables_read(&self, query: &str) -> TagSet {
        self.tables(query).map(|t| t.read.clone()).unwrap_or_default()
    }

    pub fn tables_written(&self, query: &str) -> TagSet {
        self.tables(query).map(|t| t.written.clone()).unwrap_or_default()
    }
}
