//! Round bookkeeping: a chronological record of what the engine did, and the
//! environment threaded through a run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::cache::{DataCache, SourceIdentity};
use crate::data::DynKey;
use crate::source::SourceName;

/// What kind of fetch a round performed, and against what.
#[derive(Clone, Debug)]
pub enum RoundKind {
    /// One identity against one source.
    Single { source: SourceName, id: DynKey },
    /// Several identities against one source.
    Many { source: SourceName, ids: Vec<DynKey> },
    /// One batch per source, dispatched in parallel. `queries` maps each
    /// source to the ids actually fetched from it.
    Concurrent {
        queries: IndexMap<SourceName, Vec<DynKey>>,
    },
}

/// A record of one act of consulting sources. Rounds are append-only: the
/// engine writes them for the caller's benefit and never reads them back.
#[derive(Clone, Debug)]
pub struct Round {
    cache: Arc<dyn DataCache>,
    kind: RoundKind,
    start: Instant,
    end: Instant,
    cached: bool,
}

impl Round {
    pub(crate) fn new(
        cache: Arc<dyn DataCache>,
        kind: RoundKind,
        start: Instant,
        end: Instant,
        cached: bool,
    ) -> Self {
        Round {
            cache,
            kind,
            start,
            end,
            cached,
        }
    }

    /// The cache snapshot observed when the round began.
    pub fn cache(&self) -> &Arc<dyn DataCache> {
        &self.cache
    }

    pub fn kind(&self) -> &RoundKind {
        &self.kind
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn end(&self) -> Instant {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Whether this round was answered from cache alone, with no outbound
    /// call. A many-round that did dispatch reuses this flag to record that
    /// its request had no overlap with the pre-round cache.
    pub fn cached(&self) -> bool {
        self.cached
    }

    /// The source consulted, for single and many rounds.
    pub fn source(&self) -> Option<&SourceName> {
        match &self.kind {
            RoundKind::Single { source, .. } | RoundKind::Many { source, .. } => Some(source),
            RoundKind::Concurrent { .. } => None,
        }
    }
}

/// The immutable state threaded through interpretation: the current cache,
/// the chronological round log, and the identities touched by the most
/// recent round. Transitions produce successor environments; each round's
/// cache contains everything the previous round's did.
#[derive(Clone, Debug)]
pub struct Env {
    cache: Arc<dyn DataCache>,
    rounds: Vec<Round>,
    ids: Vec<SourceIdentity>,
}

impl Env {
    pub(crate) fn new(cache: Arc<dyn DataCache>) -> Self {
        Env {
            cache,
            rounds: Vec::new(),
            ids: Vec::new(),
        }
    }

    pub fn cache(&self) -> &Arc<dyn DataCache> {
        &self.cache
    }

    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    pub fn last_fetched(&self) -> &[SourceIdentity] {
        &self.ids
    }

    /// Successor environment: a (possibly) grown cache, one more round, and
    /// the identities that round touched.
    pub(crate) fn next(
        &self,
        cache: Arc<dyn DataCache>,
        round: Round,
        ids: Vec<SourceIdentity>,
    ) -> Env {
        let mut rounds = self.rounds.clone();
        rounds.push(round);
        Env { cache, rounds, ids }
    }
}
