//! Data sources: the user-supplied recipe for batched lookups.

use std::collections::HashMap;
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{self, BoxFuture};
use futures::FutureExt;

use crate::cache::SourceIdentity;
use crate::data::{DynKey, DynValue};
use crate::error::{BoxError, FetchError};

/// A stable name identifying a data source. Two source instances with the
/// same name are treated as the same source for batching and caching.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourceName(Arc<str>);

impl SourceName {
    pub fn new(name: impl AsRef<str>) -> Self {
        SourceName(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SourceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceName {
    fn from(name: &str) -> Self {
        SourceName::new(name)
    }
}

impl From<String> for SourceName {
    fn from(name: String) -> Self {
        SourceName::new(name)
    }
}

/// A named, batched lookup capability: `ids -> map<id, value>`.
///
/// `fetch` always receives a non-empty list of distinct ids; the engine
/// deduplicates and drops already-cached ids before dispatching. The returned
/// map may omit ids the source could not resolve, and the engine treats any
/// omission as fatal for the run. Fetches are expected to be idempotent and
/// must not touch the cache themselves.
///
/// The engine may fetch from different sources concurrently, but never
/// issues two overlapping calls to the same source within one round.
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    type Id: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Value: Clone + Debug + Send + Sync + 'static;

    fn name(&self) -> SourceName;

    /// The cache key for an id. The default pairs the source name with the
    /// id itself; override it to key on a projection of the id instead.
    fn identity(&self, id: &Self::Id) -> SourceIdentity {
        SourceIdentity::new(self.name(), DynKey::new(id.clone()))
    }

    async fn fetch(
        &self,
        ids: Vec<Self::Id>,
    ) -> Result<HashMap<Self::Id, Self::Value>, BoxError>;
}

/// Object-safe view of a source, used where requests from different sources
/// must mix: the batch combiner and the round interpreter. Ids cross this
/// boundary as `DynKey`s and come back paired with `DynValue`s in request
/// order; ids the source could not resolve are simply absent from the result.
pub(crate) trait ErasedSource: Send + Sync {
    fn name(&self) -> SourceName;

    fn identity_of(&self, id: &DynKey) -> SourceIdentity;

    fn fetch_erased(
        &self,
        ids: Vec<DynKey>,
    ) -> BoxFuture<'static, Result<Vec<(DynKey, DynValue)>, FetchError>>;
}

pub(crate) struct SourceHandle<S>(pub(crate) Arc<S>);

impl<S: DataSource> ErasedSource for SourceHandle<S> {
    fn name(&self) -> SourceName {
        self.0.name()
    }

    fn identity_of(&self, id: &DynKey) -> SourceIdentity {
        match id.downcast_ref::<S::Id>() {
            Some(typed) => self.0.identity(typed),
            None => SourceIdentity::new(self.name(), id.clone()),
        }
    }

    fn fetch_erased(
        &self,
        ids: Vec<DynKey>,
    ) -> BoxFuture<'static, Result<Vec<(DynKey, DynValue)>, FetchError>> {
        let name = self.name();

        let mut typed: Vec<S::Id> = Vec::with_capacity(ids.len());
        for id in &ids {
            match id.downcast_ref::<S::Id>() {
                Some(id) => typed.push(id.clone()),
                None => return future::ready(Err(FetchError::TypeMismatch { name })).boxed(),
            }
        }

        let source = Arc::clone(&self.0);
        async move {
            let mut resolved = source
                .fetch(typed.clone())
                .await
                .map_err(|cause| FetchError::Source { name, cause })?;

            Ok(ids
                .into_iter()
                .zip(typed)
                .filter_map(|(id, typed_id)| {
                    resolved
                        .remove(&typed_id)
                        .map(|value| (id, DynValue::new(value)))
                })
                .collect())
        }
        .boxed()
    }
}
