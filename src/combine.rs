//! Merging per-source requests into deduplicated batches.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::data::DynKey;
use crate::plan::QueryBatch;
use crate::source::{ErasedSource, SourceName};

/// Collapse a request list into one batch per source name. Ids are
/// deduplicated keeping first-seen order, and sources keep the order of
/// their first appearance in the input.
pub(crate) fn combine(requests: Vec<QueryBatch>) -> Vec<QueryBatch> {
    let mut merged: IndexMap<SourceName, (Arc<dyn ErasedSource>, IndexSet<DynKey>)> =
        IndexMap::new();

    for batch in requests {
        let (_, ids) = merged
            .entry(batch.source.name())
            .or_insert_with(|| (Arc::clone(&batch.source), IndexSet::new()));
        ids.extend(batch.ids);
    }

    merged
        .into_values()
        .map(|(source, ids)| QueryBatch {
            source,
            ids: ids.into_iter().collect(),
        })
        .collect()
}
