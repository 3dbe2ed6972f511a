//! The plan algebra: composable, pure descriptions of fetch computations.
//!
//! A plan is a tagged tree. Leaves either carry a finished value (`Pure`,
//! `Inlined`), fail the run (`Error`), or demand identities from sources
//! (`One`, `Many`, `Concurrent`). Sequencing and joining are inner nodes
//! holding the rest of the computation behind typed continuations. The
//! round interpreter behind [`run`](crate::run()) walks the tree; the
//! `requests` and `simplify` passes here are the analyses it leans on to
//! batch and to skip work the cache already holds.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::combine::combine;
use crate::data::{DynKey, DynValue};
use crate::env::Env;
use crate::error::{BoxError, FetchError};
use crate::run::{interpret, RunResult};
use crate::source::{DataSource, ErasedSource, SourceHandle};

pub(crate) type Decode<A> = Arc<dyn Fn(DynValue) -> Option<A> + Send + Sync>;
pub(crate) type DecodeMany<A> = Arc<dyn Fn(Vec<DynValue>) -> Option<A> + Send + Sync>;

/// An outstanding request against one source: the unit the batch combiner
/// and concurrent rounds work in.
#[derive(Clone)]
pub(crate) struct QueryBatch {
    pub(crate) source: Arc<dyn ErasedSource>,
    pub(crate) ids: Vec<DynKey>,
}

/// A composable, pure description of a fetch computation yielding an `A`.
///
/// Plans are built with [`pure`], [`one`], [`many`] and [`error`], combined
/// with [`Plan::map`], [`Plan::flat_map`], [`join`], [`collect`],
/// [`traverse`] and [`map2`], and consumed by [`run`](crate::run()).
pub struct Plan<A> {
    pub(crate) node: Node<A>,
}

pub(crate) enum Node<A> {
    Pure(A),
    /// A value recovered from cache during simplification. Executes like
    /// `Pure`, but the extractor knows its continuation is unblocked.
    Inlined(A),
    Error(FetchError),
    One {
        source: Arc<dyn ErasedSource>,
        id: DynKey,
        decode: Decode<A>,
    },
    Many {
        source: Arc<dyn ErasedSource>,
        ids: Vec<DynKey>,
        decode: DecodeMany<A>,
    },
    /// One batch per source, dispatched in a single round; yields the
    /// environment after the round. Built only by the join interpreter, so
    /// `yield_env` is always the identity.
    Concurrent {
        batches: Vec<QueryBatch>,
        yield_env: fn(Env) -> A,
    },
    Seq(Box<dyn SeqStep<A>>),
    Join(Box<dyn JoinStep<A>>),
}

/// Lift a value into a plan with no fetches.
pub fn pure<A>(value: A) -> Plan<A> {
    Plan {
        node: Node::Pure(value),
    }
}

/// A plan that fails the run with `err`, surfaced unchanged.
pub fn error<A, E>(err: E) -> Plan<A>
where
    E: Into<BoxError>,
{
    Plan {
        node: Node::Error(FetchError::User(err.into())),
    }
}

/// Fetch one identity from a source.
pub fn one<S: DataSource>(source: &Arc<S>, id: S::Id) -> Plan<S::Value> {
    Plan {
        node: Node::One {
            source: Arc::new(SourceHandle(Arc::clone(source))),
            id: DynKey::new(id),
            decode: Arc::new(|value: DynValue| value.downcast::<S::Value>()),
        },
    }
}

/// Fetch a list of identities from one source, yielding values in input
/// order. Duplicate ids are tolerated and yield duplicated values; the
/// source itself only ever sees distinct ids.
pub fn many<S: DataSource>(source: &Arc<S>, ids: Vec<S::Id>) -> Plan<Vec<S::Value>> {
    Plan {
        node: Node::Many {
            source: Arc::new(SourceHandle(Arc::clone(source))),
            ids: ids.into_iter().map(DynKey::new).collect(),
            decode: Arc::new(|values: Vec<DynValue>| {
                values
                    .iter()
                    .map(|value| value.downcast::<S::Value>())
                    .collect()
            }),
        },
    }
}

/// Pair two plans, batching their independent fetches into shared rounds.
/// This is the sole source of concurrency in the algebra.
pub fn join<A, B>(left: Plan<A>, right: Plan<B>) -> Plan<(A, B)>
where
    A: Send + 'static,
    B: Send + 'static,
{
    Plan {
        node: Node::Join(Box::new(JoinNode { left, right })),
    }
}

/// Resolve a list of plans together; a list of independent fetches collapses
/// into a single concurrent round.
pub fn collect<A: Send + 'static>(plans: Vec<Plan<A>>) -> Plan<Vec<A>> {
    plans.into_iter().fold(pure(Vec::new()), |acc, plan| {
        join(acc, plan).map(|(mut values, value)| {
            values.push(value);
            values
        })
    })
}

/// [`collect`] over `f` applied to each item.
pub fn traverse<T, A, F>(items: Vec<T>, f: F) -> Plan<Vec<A>>
where
    A: Send + 'static,
    F: FnMut(T) -> Plan<A>,
{
    collect(items.into_iter().map(f).collect())
}

/// Combine two independent plans with `f`.
pub fn map2<A, B, C, F>(f: F, left: Plan<A>, right: Plan<B>) -> Plan<C>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
    F: FnOnce(A, B) -> C + Send + 'static,
{
    join(left, right).map(move |(a, b)| f(a, b))
}

impl<A: Send + 'static> Plan<A> {
    /// Transform the eventual value.
    pub fn map<B, F>(self, f: F) -> Plan<B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> B + Send + 'static,
    {
        self.flat_map(move |value| pure(f(value)))
    }

    /// Sequence a dependent plan after this one. The continuation is opaque
    /// until the value is known, so fetches on either side of a `flat_map`
    /// can never share a round.
    pub fn flat_map<B, F>(self, f: F) -> Plan<B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> Plan<B> + Send + 'static,
    {
        Plan {
            node: Node::Seq(Box::new(SeqNode {
                inner: self,
                cont: Box::new(f),
            })),
        }
    }

    /// Pair this plan with another; see [`join`].
    pub fn join<B: Send + 'static>(self, other: Plan<B>) -> Plan<(A, B)> {
        join(self, other)
    }

    pub(crate) fn inlined(value: A) -> Plan<A> {
        Plan {
            node: Node::Inlined(value),
        }
    }

    pub(crate) fn from_error(err: FetchError) -> Plan<A> {
        Plan {
            node: Node::Error(err),
        }
    }

    /// The first wavefront of demand: every request gating the next
    /// interpretation step. Continuations of unresolved fetches are opaque
    /// and contribute nothing yet.
    pub(crate) fn requests(&self) -> Vec<QueryBatch> {
        match &self.node {
            Node::Pure(_) | Node::Inlined(_) | Node::Error(_) => Vec::new(),
            Node::One { source, id, .. } => vec![QueryBatch {
                source: Arc::clone(source),
                ids: vec![id.clone()],
            }],
            Node::Many { source, ids, .. } => vec![QueryBatch {
                source: Arc::clone(source),
                ids: ids.clone(),
            }],
            Node::Concurrent { batches, .. } => batches.clone(),
            Node::Seq(step) => step.wavefront(),
            Node::Join(step) => step.wavefront(),
        }
    }

    /// Rewrite the plan against a cache snapshot: fully-resolvable fetch
    /// leaves become `Inlined`, everything else is left for the interpreter.
    pub(crate) fn simplify(self, env: &Env) -> Plan<A> {
        match self.node {
            Node::One { source, id, decode } => {
                match env.cache().get(&source.identity_of(&id)) {
                    Some(value) => match decode(value) {
                        Some(decoded) => Plan::inlined(decoded),
                        None => Plan::from_error(FetchError::TypeMismatch {
                            name: source.name(),
                        }),
                    },
                    None => Plan {
                        node: Node::One { source, id, decode },
                    },
                }
            }
            Node::Many { source, ids, decode } => {
                let hits: Option<Vec<DynValue>> = ids
                    .iter()
                    .map(|id| env.cache().get(&source.identity_of(id)))
                    .collect();
                match hits {
                    Some(values) => match decode(values) {
                        Some(decoded) => Plan::inlined(decoded),
                        None => Plan::from_error(FetchError::TypeMismatch {
                            name: source.name(),
                        }),
                    },
                    // A partial batch is left whole; the interpreter does its
                    // own per-id filtering once, in one place.
                    None => Plan {
                        node: Node::Many { source, ids, decode },
                    },
                }
            }
            Node::Concurrent { batches, yield_env } => {
                let remaining: Vec<QueryBatch> = batches
                    .into_iter()
                    .filter(|batch| {
                        batch
                            .ids
                            .iter()
                            .any(|id| env.cache().get(&batch.source.identity_of(id)).is_none())
                    })
                    .collect();
                if remaining.is_empty() {
                    Plan::inlined(yield_env(env.clone()))
                } else {
                    Plan {
                        node: Node::Concurrent {
                            batches: remaining,
                            yield_env,
                        },
                    }
                }
            }
            Node::Seq(step) => step.simplify(env),
            Node::Join(step) => step.simplify(env),
            node => Plan { node },
        }
    }
}

impl Plan<Env> {
    pub(crate) fn concurrent(batches: Vec<QueryBatch>) -> Plan<Env> {
        Plan {
            node: Node::Concurrent {
                batches,
                yield_env: std::convert::identity,
            },
        }
    }
}

/// A sequence node behind an existential inner type: `inner` runs first,
/// `cont` builds the rest of the plan from its value.
pub(crate) trait SeqStep<A>: Send {
    fn wavefront(&self) -> Vec<QueryBatch>;
    fn simplify(self: Box<Self>, env: &Env) -> Plan<A>;
    fn run(self: Box<Self>, env: Env) -> BoxFuture<'static, RunResult<A>>;
}

struct SeqNode<B, A> {
    inner: Plan<B>,
    cont: Box<dyn FnOnce(B) -> Plan<A> + Send>,
}

impl<B, A> SeqStep<A> for SeqNode<B, A>
where
    B: Send + 'static,
    A: Send + 'static,
{
    fn wavefront(&self) -> Vec<QueryBatch> {
        self.inner.requests()
    }

    fn simplify(self: Box<Self>, env: &Env) -> Plan<A> {
        let SeqNode { inner, cont } = *self;
        let inner = inner.simplify(env);
        match inner.node {
            // The inlined value is known, so sequencing resolves to whatever
            // the continuation demands.
            Node::Inlined(value) => cont(value).simplify(env),
            node => Plan {
                node: Node::Seq(Box::new(SeqNode {
                    inner: Plan { node },
                    cont,
                })),
            },
        }
    }

    fn run(self: Box<Self>, env: Env) -> BoxFuture<'static, RunResult<A>> {
        let SeqNode { inner, cont } = *self;
        async move {
            let (env, value) = interpret(inner, env).await?;
            interpret(cont(value), env).await
        }
        .boxed()
    }
}

/// A join node behind existential side types. Interpretation is the round
/// recursion: extract both wavefronts, combine, dispatch one concurrent
/// round, simplify both sides against the grown cache, and go again until
/// neither side demands anything.
pub(crate) trait JoinStep<A>: Send {
    fn wavefront(&self) -> Vec<QueryBatch>;
    fn simplify(self: Box<Self>, env: &Env) -> Plan<A>;
    fn run(self: Box<Self>, env: Env) -> BoxFuture<'static, RunResult<A>>;
}

struct JoinNode<X, Y> {
    left: Plan<X>,
    right: Plan<Y>,
}

impl<X, Y> JoinStep<(X, Y)> for JoinNode<X, Y>
where
    X: Send + 'static,
    Y: Send + 'static,
{
    fn wavefront(&self) -> Vec<QueryBatch> {
        let mut batches = self.left.requests();
        batches.extend(self.right.requests());
        batches
    }

    fn simplify(self: Box<Self>, env: &Env) -> Plan<(X, Y)> {
        let JoinNode { left, right } = *self;
        Plan {
            node: Node::Join(Box::new(JoinNode {
                left: left.simplify(env),
                right: right.simplify(env),
            })),
        }
    }

    fn run(self: Box<Self>, env: Env) -> BoxFuture<'static, RunResult<(X, Y)>> {
        let JoinNode { left, right } = *self;
        async move {
            let mut env = env;
            let mut left = left;
            let mut right = right;
            loop {
                let mut deps = left.requests();
                deps.extend(right.requests());

                // Both sides settled: everything left is pure or cached, so
                // sequential interpretation performs no further rounds.
                if deps.is_empty() {
                    let (env, x) = interpret(left, env).await?;
                    let (env, y) = interpret(right, env).await?;
                    return Ok((env, (x, y)));
                }

                let round: Plan<Env> = Plan::concurrent(combine(deps));
                let (next, _) = interpret(round, env).await?;
                env = next;
                left = left.simplify(&env);
                right = right.simplify(&env);
            }
        }
        .boxed()
    }
}
