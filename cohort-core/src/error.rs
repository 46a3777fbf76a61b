//! Coordinator-side error types.
//!
//! Every failure is surfaced to the caller, either synchronously where it is
//! detected (argument validation, distribution checks) or when the future of a
//! failed remote computation is awaited. Nothing is retried.
use thiserror::Error;

use crate::task::{FailureKind, RemoteFailure, WorkerId};

#[derive(Error, Debug)]
pub enum Error {
    /// A computation dispatched to a worker failed there, or its result did not
    /// have the type the caller asked for.
    #[error("remote evaluation failed on worker {worker}: {failure}")]
    RemoteEvaluation {
        /// The worker on which the failure originated.
        worker: WorkerId,
        /// The underlying cause, as reported by the worker.
        failure: RemoteFailure,
    },

    /// Datasets combined positionally do not live on the same workers in the
    /// same order.
    #[error("`{first}` lives on {expected:?} but `{other}` lives on {found:?}")]
    DistributionMismatch {
        first: String,
        expected: Vec<WorkerId>,
        other: String,
        found: Vec<WorkerId>,
    },

    /// Worker-local data is not array shaped, or slices disagree on the
    /// dimensions that are not partitioned.
    #[error("shape error: {0}")]
    Shape(String),

    /// A positional dispatch was given a different number of arguments than
    /// workers.
    #[error("expected one argument per worker ({expected}), got {found}")]
    ArgumentCount { expected: usize, found: usize },

    /// A computation binds a different number of worker-local values than the
    /// primitive it was handed to supports.
    #[error("expected {expected} bound value(s), got {found}")]
    Arity { expected: usize, found: usize },

    /// An extent cannot be split without leaving some worker an empty slice.
    #[error("cannot partition an extent of {extent} over {workers} workers")]
    Partition { extent: usize, workers: usize },

    /// The primitive needs at least one worker.
    #[error("no workers given")]
    NoWorkers,

    /// A worker appears more than once where each must hold its own piece.
    #[error("worker {0} is listed more than once")]
    DuplicateWorker(WorkerId),

    /// The worker is not part of the pool.
    #[error("unknown worker {0}")]
    UnknownWorker(WorkerId),

    /// The local fold combinator failed.
    #[error("fold combinator failed: {0:#}")]
    Combine(anyhow::Error),

    /// The reply for a dispatched computation can no longer arrive, because
    /// the runtime shut down.
    #[error("worker {0} disconnected before replying")]
    Disconnected(WorkerId),

    /// Transport, broker or serialization failure.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl Error {
    /// The kind of remote failure, if this error originated on a worker.
    pub fn remote_kind(&self) -> Option<FailureKind> {
        match self {
            Self::RemoteEvaluation { failure, .. } => Some(failure.kind),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
