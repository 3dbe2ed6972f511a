//! The failure channel of a run. Any error aborts the whole run; there is no
//! local recovery.

use std::error::Error as StdError;

use thiserror::Error;

use crate::cache::SourceIdentity;
use crate::env::Env;
use crate::source::SourceName;

/// Opaque error payload supplied by callers and data sources.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum FetchError {
    /// Raised through [`error`](crate::error()); the payload surfaces
    /// unchanged and can be downcast back to its concrete type.
    #[error("{0}")]
    User(BoxError),

    /// A source's response omitted a requested identity. Carries the
    /// environment at the point of failure, attempted round included; the
    /// cache is left as it was before the round.
    #[error("missing identity {identity:?}")]
    MissingIdentity {
        identity: SourceIdentity,
        env: Box<Env>,
    },

    /// The fetch itself failed; the underlying error is passed through.
    #[error("source `{name}` failed")]
    Source {
        name: SourceName,
        #[source]
        cause: BoxError,
    },

    /// Two sources share a name but disagree on id or value types, so a
    /// value could not cross the erasure boundary.
    #[error("source `{name}` saw ids or values of a foreign type")]
    TypeMismatch { name: SourceName },
}

impl FetchError {
    /// The environment captured at the point of failure, when there is one.
    pub fn env(&self) -> Option<&Env> {
        match self {
            FetchError::MissingIdentity { env, .. } => Some(env),
            _ => None,
        }
    }
}
