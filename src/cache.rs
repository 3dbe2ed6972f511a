//! The cache protocol and the default in-memory implementation.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::data::{DynKey, DynValue};
use crate::source::SourceName;

/// The cache key: a source name paired with a type-erased identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourceIdentity {
    source: SourceName,
    key: DynKey,
}

impl SourceIdentity {
    pub fn new(source: SourceName, key: DynKey) -> Self {
        SourceIdentity { source, key }
    }

    pub fn source(&self) -> &SourceName {
        &self.source
    }

    pub fn key(&self) -> &DynKey {
        &self.key
    }
}

/// A keyed store of fetched values with persistent-snapshot semantics: `get`
/// reads, `put` and `put_all` build a successor cache and leave the original
/// untouched. Successor snapshots are what let every round record exactly
/// the cache it observed.
pub trait DataCache: Debug + Send + Sync {
    fn get(&self, id: &SourceIdentity) -> Option<DynValue>;

    fn put(&self, id: SourceIdentity, value: DynValue) -> Arc<dyn DataCache>;

    /// Bulk insert. Implementations can usually do better than repeated
    /// single `put`s.
    fn put_all(&self, entries: Vec<(SourceIdentity, DynValue)>) -> Arc<dyn DataCache>;
}

/// The default cache: an unordered in-memory map, cloned on update.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCache {
    entries: HashMap<SourceIdentity, DynValue>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DataCache for InMemoryCache {
    fn get(&self, id: &SourceIdentity) -> Option<DynValue> {
        self.entries.get(id).cloned()
    }

    fn put(&self, id: SourceIdentity, value: DynValue) -> Arc<dyn DataCache> {
        let mut next = self.clone();
        next.entries.insert(id, value);
        Arc::new(next)
    }

    fn put_all(&self, entries: Vec<(SourceIdentity, DynValue)>) -> Arc<dyn DataCache> {
        let mut next = self.clone();
        next.entries.extend(entries);
        Arc::new(next)
    }
}

/// An empty in-memory cache, ready to hand to [`run`](crate::run()).
pub fn empty_cache() -> Arc<dyn DataCache> {
    Arc::new(InMemoryCache::new())
}
