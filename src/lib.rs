//! Batched, deduplicating, cache-coordinated data fetching.
//!
//! Callers describe a computation over remote lookups as a [`Plan`] and hand
//! it to [`run`]. The engine resolves it round by round: identical requests
//! are deduplicated, independent requests against one source are merged into
//! a single batched call, independent sources are consulted in parallel, and
//! everything fetched lands in an immutable cache so it is never fetched
//! twice. [`run_env`] and [`run_fetch`] additionally return the [`Env`],
//! whose round log records the timing and shape of every fetch.

mod cache;
mod combine;
mod data;
mod env;
mod error;
mod plan;
mod run;
mod source;

#[cfg(test)]
mod test;

pub use cache::{empty_cache, DataCache, InMemoryCache, SourceIdentity};
pub use data::{DynKey, DynValue};
pub use env::{Env, Round, RoundKind};
pub use error::{BoxError, FetchError};
pub use plan::{collect, error, join, many, map2, one, pure, traverse, Plan};
pub use run::{run, run_env, run_fetch};
pub use source::{DataSource, SourceName};
