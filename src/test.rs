#![cfg(test)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::executor;

use crate::cache::{empty_cache, DataCache, InMemoryCache, SourceIdentity};
use crate::combine::combine;
use crate::data::{DynKey, DynValue};
use crate::env::Env;
use crate::error::BoxError;
use crate::plan::{self, QueryBatch};
use crate::run;
use crate::source::{DataSource, ErasedSource, SourceHandle, SourceName};

/// Test source: resolves any id to its decimal rendering.
struct Numbers {
    name: &'static str,
    calls: AtomicUsize,
}

impl Numbers {
    fn source(name: &'static str) -> Arc<Self> {
        Arc::new(Numbers {
            name,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for Numbers {
    type Id = u32;
    type Value = String;

    fn name(&self) -> SourceName {
        self.name.into()
    }

    async fn fetch(&self, ids: Vec<u32>) -> Result<HashMap<u32, String>, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ids.into_iter().map(|id| (id, id.to_string())).collect())
    }
}

fn erased(source: &Arc<Numbers>) -> Arc<dyn ErasedSource> {
    Arc::new(SourceHandle(Arc::clone(source)))
}

fn batch(source: &Arc<dyn ErasedSource>, ids: &[u32]) -> QueryBatch {
    QueryBatch {
        source: Arc::clone(source),
        ids: ids.iter().copied().map(DynKey::new).collect(),
    }
}

fn batch_ids(batches: &[QueryBatch]) -> Vec<(String, Vec<u32>)> {
    batches
        .iter()
        .map(|batch| {
            let ids = batch
                .ids
                .iter()
                .map(|id| *id.downcast_ref::<u32>().unwrap())
                .collect();
            (batch.source.name().as_str().to_owned(), ids)
        })
        .collect()
}

fn identity(name: &str, id: u32) -> SourceIdentity {
    SourceIdentity::new(name.into(), DynKey::new(id))
}

fn cached_env(name: &str, entries: &[(u32, &str)]) -> Env {
    let cache = empty_cache().put_all(
        entries
            .iter()
            .map(|(id, value)| (identity(name, *id), DynValue::new(value.to_string())))
            .collect(),
    );
    Env::new(cache)
}

#[test]
fn dyn_keys_compare_like_their_originals() {
    assert_eq!(DynKey::new(1_u32), DynKey::new(1_u32));
    assert_ne!(DynKey::new(1_u32), DynKey::new(2_u32));
    // Same bits, different type: still distinct keys.
    assert_ne!(DynKey::new(1_u32), DynKey::new(1_u64));

    let mut map = HashMap::new();
    map.insert(DynKey::new(10_u32), "ten");
    assert_eq!(map.get(&DynKey::new(10_u32)), Some(&"ten"));
    assert_eq!(map.get(&DynKey::new(10_u64)), None);
}

#[test]
fn combine_merges_per_source_and_deduplicates() {
    let numbers = erased(&Numbers::source("numbers"));
    let words = erased(&Numbers::source("words"));

    let combined = combine(vec![
        batch(&numbers, &[1, 2]),
        batch(&words, &[7]),
        batch(&numbers, &[2, 3, 1]),
    ]);

    assert_eq!(
        batch_ids(&combined),
        vec![
            ("numbers".to_owned(), vec![1, 2, 3]),
            ("words".to_owned(), vec![7]),
        ],
    );
}

#[test]
fn combine_dedups_within_a_single_batch() {
    let numbers = erased(&Numbers::source("numbers"));
    let combined = combine(vec![batch(&numbers, &[5, 5, 6, 5])]);
    assert_eq!(
        batch_ids(&combined),
        vec![("numbers".to_owned(), vec![5, 6])],
    );
}

#[test]
fn cache_updates_produce_successors() {
    let original = InMemoryCache::new();
    let id = identity("numbers", 1);

    let updated = original.put(id.clone(), DynValue::new("1".to_string()));
    assert!(original.get(&id).is_none());
    assert_eq!(
        updated.get(&id).and_then(|value| value.downcast::<String>()),
        Some("1".to_string()),
    );
}

#[test]
fn cache_put_all_inserts_every_entry() {
    let cache = empty_cache().put_all(vec![
        (identity("numbers", 1), DynValue::new("1".to_string())),
        (identity("numbers", 2), DynValue::new("2".to_string())),
    ]);
    assert!(cache.get(&identity("numbers", 1)).is_some());
    assert!(cache.get(&identity("numbers", 2)).is_some());
    assert!(cache.get(&identity("numbers", 3)).is_none());
}

#[test]
fn simplify_inlines_a_cached_single_fetch() {
    let source = Numbers::source("numbers");
    let env = cached_env("numbers", &[(1, "1")]);

    let simplified = plan::one(&source, 1).simplify(&env);
    assert!(simplified.requests().is_empty());

    let value = executor::block_on(run::run(simplified, Arc::clone(env.cache()))).unwrap();
    assert_eq!(value, "1");
    assert_eq!(source.calls(), 0);
}

#[test]
fn simplify_lets_a_known_value_unblock_its_continuation() {
    let source = Numbers::source("numbers");
    let next = Arc::clone(&source);
    let plan = plan::one(&source, 1).flat_map(move |_| plan::one(&next, 2));

    // Before simplification only the head of the sequence is demanded.
    assert_eq!(
        batch_ids(&plan.requests()),
        vec![("numbers".to_owned(), vec![1])],
    );

    let env = cached_env("numbers", &[(1, "1")]);
    let simplified = plan.simplify(&env);
    assert_eq!(
        batch_ids(&simplified.requests()),
        vec![("numbers".to_owned(), vec![2])],
    );
}

#[test]
fn simplify_leaves_a_partially_cached_many_fetch_whole() {
    let source = Numbers::source("numbers");
    let env = cached_env("numbers", &[(1, "1")]);

    let simplified = plan::many(&source, vec![1, 2]).simplify(&env);
    assert_eq!(
        batch_ids(&simplified.requests()),
        vec![("numbers".to_owned(), vec![1, 2])],
    );
}

#[test]
fn simplify_inlines_a_fully_cached_many_fetch() {
    let source = Numbers::source("numbers");
    let env = cached_env("numbers", &[(1, "1"), (2, "2")]);

    let simplified = plan::many(&source, vec![1, 2, 1]).simplify(&env);
    assert!(simplified.requests().is_empty());

    let values = executor::block_on(run::run(simplified, Arc::clone(env.cache()))).unwrap();
    assert_eq!(values, vec!["1", "2", "1"]);
    assert_eq!(source.calls(), 0);
}
