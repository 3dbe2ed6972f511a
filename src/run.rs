//! The round interpreter: walks a plan, consulting the cache, dispatching
//! batched source calls, and logging one round per act of fetching.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use indexmap::{IndexMap, IndexSet};
use tracing::{debug, trace};

use crate::cache::{DataCache, SourceIdentity};
use crate::data::{DynKey, DynValue};
use crate::env::{Env, Round, RoundKind};
use crate::error::FetchError;
use crate::plan::{Decode, DecodeMany, Node, Plan, QueryBatch};
use crate::source::{ErasedSource, SourceName};

/// Run a plan to completion against a starting cache, yielding its value.
pub async fn run<A: Send + 'static>(
    plan: Plan<A>,
    cache: Arc<dyn DataCache>,
) -> Result<A, FetchError> {
    let (_, value) = run_fetch(plan, cache).await?;
    Ok(value)
}

/// Run a plan, yielding the final environment (cache plus round log).
pub async fn run_env<A: Send + 'static>(
    plan: Plan<A>,
    cache: Arc<dyn DataCache>,
) -> Result<Env, FetchError> {
    let (env, _) = run_fetch(plan, cache).await?;
    Ok(env)
}

/// Run a plan, yielding both the final environment and the value.
pub async fn run_fetch<A: Send + 'static>(
    plan: Plan<A>,
    cache: Arc<dyn DataCache>,
) -> Result<(Env, A), FetchError> {
    interpret(plan, Env::new(cache)).await
}

pub(crate) type RunResult<A> = Result<(Env, A), FetchError>;

pub(crate) fn interpret<A: Send + 'static>(
    plan: Plan<A>,
    env: Env,
) -> BoxFuture<'static, RunResult<A>> {
    async move {
        match plan.node {
            Node::Pure(value) | Node::Inlined(value) => Ok((env, value)),
            Node::Error(err) => Err(err),
            Node::One { source, id, decode } => run_one(source, id, decode, env).await,
            Node::Many { source, ids, decode } => run_many(source, ids, decode, env).await,
            Node::Concurrent { batches, yield_env } => {
                run_concurrent(batches, yield_env, env).await
            }
            Node::Seq(step) => step.run(env).await,
            Node::Join(step) => step.run(env).await,
        }
    }
    .boxed()
}

async fn run_one<A>(
    source: Arc<dyn ErasedSource>,
    id: DynKey,
    decode: Decode<A>,
    env: Env,
) -> RunResult<A> {
    let identity = source.identity_of(&id);
    let start = Instant::now();

    if let Some(value) = env.cache().get(&identity) {
        trace!(source = %source.name(), id = ?id, "single fetch served from cache");
        let round = Round::new(
            Arc::clone(env.cache()),
            RoundKind::Single {
                source: source.name(),
                id,
            },
            start,
            Instant::now(),
            true,
        );
        let decoded = decode(value).ok_or_else(|| FetchError::TypeMismatch {
            name: source.name(),
        })?;
        let next = env.next(Arc::clone(env.cache()), round, vec![identity]);
        return Ok((next, decoded));
    }

    debug!(source = %source.name(), id = ?id, "dispatching single fetch");
    let response = source.fetch_erased(vec![id.clone()]).await?;
    let round = Round::new(
        Arc::clone(env.cache()),
        RoundKind::Single {
            source: source.name(),
            id: id.clone(),
        },
        start,
        Instant::now(),
        false,
    );

    match response.into_iter().find(|(key, _)| *key == id) {
        Some((_, value)) => {
            let cache = env.cache().put(identity.clone(), value.clone());
            let decoded = decode(value).ok_or_else(|| FetchError::TypeMismatch {
                name: source.name(),
            })?;
            Ok((env.next(cache, round, vec![identity]), decoded))
        }
        None => {
            let failed = env.next(Arc::clone(env.cache()), round, Vec::new());
            Err(FetchError::MissingIdentity {
                identity,
                env: Box::new(failed),
            })
        }
    }
}

async fn run_many<A>(
    source: Arc<dyn ErasedSource>,
    ids: Vec<DynKey>,
    decode: DecodeMany<A>,
    env: Env,
) -> RunResult<A> {
    let start = Instant::now();

    let unique: Vec<DynKey> = ids.iter().cloned().collect::<IndexSet<_>>().into_iter().collect();

    let mut resolved: HashMap<DynKey, DynValue> = HashMap::new();
    for id in &unique {
        if let Some(value) = env.cache().get(&source.identity_of(id)) {
            resolved.insert(id.clone(), value);
        }
    }
    let misses: Vec<DynKey> = unique
        .iter()
        .filter(|id| !resolved.contains_key(*id))
        .cloned()
        .collect();

    let (round, cache) = if misses.is_empty() {
        trace!(source = %source.name(), count = unique.len(), "many fetch served from cache");
        let round = Round::new(
            Arc::clone(env.cache()),
            RoundKind::Many {
                source: source.name(),
                ids: unique.clone(),
            },
            start,
            Instant::now(),
            true,
        );
        (round, Arc::clone(env.cache()))
    } else {
        debug!(source = %source.name(), count = misses.len(), "dispatching many fetch");
        let response = source.fetch_erased(misses.clone()).await?;
        let end = Instant::now();
        let round = Round::new(
            Arc::clone(env.cache()),
            RoundKind::Many {
                source: source.name(),
                ids: unique.clone(),
            },
            start,
            end,
            unique.len() == misses.len(),
        );

        let answered: HashMap<DynKey, DynValue> = response.into_iter().collect();
        if let Some(absent) = misses.iter().find(|id| !answered.contains_key(*id)) {
            let identity = source.identity_of(absent);
            let failed = env.next(Arc::clone(env.cache()), round, Vec::new());
            return Err(FetchError::MissingIdentity {
                identity,
                env: Box::new(failed),
            });
        }

        let entries: Vec<(SourceIdentity, DynValue)> = answered
            .iter()
            .map(|(id, value)| (source.identity_of(id), value.clone()))
            .collect();
        let cache = env.cache().put_all(entries);
        resolved.extend(answered);
        (round, cache)
    };

    let values: Option<Vec<DynValue>> =
        ids.iter().map(|id| resolved.get(id).cloned()).collect();
    let decoded = values
        .and_then(|values| decode(values))
        .ok_or_else(|| FetchError::TypeMismatch {
            name: source.name(),
        })?;
    let identities = unique.iter().map(|id| source.identity_of(id)).collect();
    Ok((env.next(cache, round, identities), decoded))
}

async fn run_concurrent<A>(
    batches: Vec<QueryBatch>,
    yield_env: fn(Env) -> A,
    env: Env,
) -> RunResult<A> {
    // Per-batch misses; a batch the cache fully covers costs nothing.
    let mut pending: Vec<QueryBatch> = Vec::new();
    for batch in batches {
        let misses: Vec<DynKey> = batch
            .ids
            .iter()
            .filter(|id| env.cache().get(&batch.source.identity_of(id)).is_none())
            .cloned()
            .collect();
        if misses.is_empty() {
            trace!(source = %batch.source.name(), "batch fully cached, dropped from round");
        } else {
            pending.push(QueryBatch {
                source: batch.source,
                ids: misses,
            });
        }
    }

    if pending.is_empty() {
        let value = yield_env(env.clone());
        return Ok((env, value));
    }

    let start = Instant::now();
    for batch in &pending {
        debug!(source = %batch.source.name(), count = batch.ids.len(), "dispatching batch");
    }
    let calls = pending
        .iter()
        .map(|batch| batch.source.fetch_erased(batch.ids.clone()));
    let responses = try_join_all(calls).await?;
    let end = Instant::now();

    let queries: IndexMap<SourceName, Vec<DynKey>> = pending
        .iter()
        .map(|batch| (batch.source.name(), batch.ids.clone()))
        .collect();
    let round = Round::new(
        Arc::clone(env.cache()),
        RoundKind::Concurrent { queries },
        start,
        end,
        false,
    );

    // Every dispatched id must be answered before anything is folded in;
    // otherwise the attempted round is logged and the run fails with the
    // cache untouched.
    let mut entries: Vec<(SourceIdentity, DynValue)> = Vec::new();
    let mut identities: Vec<SourceIdentity> = Vec::new();
    for (batch, response) in pending.iter().zip(responses) {
        let answered: HashMap<DynKey, DynValue> = response.into_iter().collect();
        if let Some(absent) = batch.ids.iter().find(|id| !answered.contains_key(*id)) {
            let identity = batch.source.identity_of(absent);
            let failed = env.next(Arc::clone(env.cache()), round.clone(), Vec::new());
            return Err(FetchError::MissingIdentity {
                identity,
                env: Box::new(failed),
            });
        }
        for id in &batch.ids {
            if let Some(value) = answered.get(id) {
                let identity = batch.source.identity_of(id);
                entries.push((identity.clone(), value.clone()));
                identities.push(identity);
            }
        }
    }

    // Responses are folded in dispatch order; distinct sources cover
    // disjoint identities, so the order is not observable in results.
    let cache = env.cache().put_all(entries);
    let next = env.next(cache, round, identities);
    let value = yield_env(next.clone());
    Ok((next, value))
}
