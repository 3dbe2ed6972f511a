//! These tests ensure every failure aborts the run with the right error and
//! leaves the diagnostic environment in the documented state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use batchfetch::{
    empty_cache, error, join, many, one, pure, run, run_fetch, BoxError, DataSource, DynKey,
    FetchError, RoundKind, SourceIdentity, SourceName,
};
use futures::executor;

struct Table {
    name: &'static str,
    rows: HashMap<u32, &'static str>,
    calls: AtomicUsize,
}

impl Table {
    fn new(name: &'static str, rows: &[(u32, &'static str)]) -> Arc<Self> {
        Arc::new(Table {
            name,
            rows: rows.iter().copied().collect(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for Table {
    type Id = u32;
    type Value = String;

    fn name(&self) -> SourceName {
        self.name.into()
    }

    async fn fetch(&self, ids: Vec<u32>) -> Result<HashMap<u32, String>, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ids
            .into_iter()
            .filter_map(|id| self.rows.get(&id).map(|value| (id, value.to_string())))
            .collect())
    }
}

fn users() -> Arc<Table> {
    Table::new("users", &[(1, "a"), (2, "b")])
}

fn identity(name: &str, id: u32) -> SourceIdentity {
    SourceIdentity::new(name.into(), DynKey::new(id))
}

#[test]
fn missing_identity_fails_a_single_fetch() {
    let users = users();
    let result = executor::block_on(run(one(&users, 99), empty_cache()));

    match result {
        Err(FetchError::MissingIdentity { identity, env }) => {
            assert_eq!(identity.source().as_str(), "users");
            assert_eq!(identity.key().downcast_ref::<u32>(), Some(&99));

            // The attempted round is logged, the cache untouched.
            assert_eq!(env.rounds().len(), 1);
            assert!(!env.rounds()[0].cached());
            assert!(matches!(env.rounds()[0].kind(), RoundKind::Single { .. }));
            assert!(env.cache().get(&identity).is_none());
        }
        other => panic!("expected MissingIdentity, got {:?}", other),
    }
    assert_eq!(users.calls(), 1);
}

#[test]
fn missing_identity_fails_a_concurrent_round() {
    let users = users();
    let result = executor::block_on(run(join(one(&users, 1), one(&users, 99)), empty_cache()));

    match result {
        Err(FetchError::MissingIdentity { identity: missing, env }) => {
            assert_eq!(missing.key().downcast_ref::<u32>(), Some(&99));
            assert_eq!(env.rounds().len(), 1);
            assert!(matches!(
                env.rounds()[0].kind(),
                RoundKind::Concurrent { .. }
            ));
            // Nothing from the failed round was folded into the cache, not
            // even the ids the source did resolve.
            assert!(env.cache().get(&identity("users", 1)).is_none());
        }
        other => panic!("expected MissingIdentity, got {:?}", other),
    }
}

#[test]
fn missing_identity_fails_a_many_fetch() {
    let users = users();
    let result = executor::block_on(run(many(&users, vec![1, 99]), empty_cache()));

    match result {
        Err(FetchError::MissingIdentity { identity: missing, env }) => {
            assert_eq!(missing.key().downcast_ref::<u32>(), Some(&99));
            assert_eq!(env.rounds().len(), 1);
            assert!(env.cache().get(&identity("users", 1)).is_none());
        }
        other => panic!("expected MissingIdentity, got {:?}", other),
    }
}

#[test]
fn user_errors_surface_unchanged() {
    let result = executor::block_on(run(error::<u32, _>("boom"), empty_cache()));
    match result {
        Err(FetchError::User(err)) => assert_eq!(err.to_string(), "boom"),
        other => panic!("expected User, got {:?}", other),
    }
}

#[test]
fn user_errors_abort_after_earlier_rounds() {
    let users = users();
    let plan = one(&users, 1).flat_map(|_| error::<u32, _>("later"));

    let result = executor::block_on(run_fetch(plan, empty_cache()));
    match result {
        Err(FetchError::User(err)) => assert_eq!(err.to_string(), "later"),
        other => panic!("expected User, got {:?}", other),
    }
    assert_eq!(users.calls(), 1);
}

struct Flaky;

#[async_trait]
impl DataSource for Flaky {
    type Id = u32;
    type Value = u32;

    fn name(&self) -> SourceName {
        "flaky".into()
    }

    async fn fetch(&self, _ids: Vec<u32>) -> Result<HashMap<u32, u32>, BoxError> {
        Err("db down".into())
    }
}

#[test]
fn source_errors_propagate() {
    let flaky = Arc::new(Flaky);
    let result = executor::block_on(run(one(&flaky, 1), empty_cache()));

    match result {
        Err(FetchError::Source { name, cause }) => {
            assert_eq!(name.as_str(), "flaky");
            assert_eq!(cause.to_string(), "db down");
        }
        other => panic!("expected Source, got {:?}", other),
    }
}

#[test]
fn pure_plans_never_touch_a_source() {
    let value = executor::block_on(run(pure(41).map(|n| n + 1), empty_cache())).unwrap();
    assert_eq!(value, 42);
}
