//! Commands, replies and the identifiers that route them.
//!
//! A coordinator addresses a worker by sending it a [`Command`] wrapped in an
//! [`Envelope`]. The worker executes commands strictly in the order they
//! arrive, and answers each one with a [`Reply`] carrying the envelope's
//! ticket, published to the queue named in
//! [`reply_to`](Envelope::reply_to).
//!
//! Every reply carries a [`SlotValue`], so a result is always typed-tagged,
//! whether it was read from a slot or produced by an
//! [`Operation`](crate::operation::Operation).
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::slot::SlotValue;

/// An opaque identifier of one worker process in the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for WorkerId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// What a worker does with the output of an evaluated operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    /// Send the output back to the coordinator.
    Return,
    /// Bind the output to the named slot and reply with `()`.
    Store(String),
    /// Drop the output and reply with `()`.
    Discard,
}

/// A unit of work for a single worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Command {
    /// Bind a value shipped from the coordinator to a slot.
    Place { name: String, value: SlotValue },
    /// Vacate a slot, freeing its value.
    Remove { name: String },
    /// Return the value of a slot as is.
    Fetch { name: String },
    /// Return the [`SlotInfo`](crate::slot::SlotInfo) of a slot.
    Describe { name: String },
    /// Run a registered operation over the values of the listed slots.
    Evaluate {
        /// The registered name of the operation.
        operation: String,
        /// The serialized operation.
        op: Bytes,
        /// Slots whose values are bound, in order, as the operation's input.
        slots: Vec<String>,
        disposition: Disposition,
    },
}

impl Command {
    /// A short label for tracing.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Place { .. } => "place",
            Self::Remove { .. } => "remove",
            Self::Fetch { .. } => "fetch",
            Self::Describe { .. } => "describe",
            Self::Evaluate { .. } => "evaluate",
        }
    }
}

/// A [`Command`] addressed for delivery.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    /// Identifies the dispatch this command belongs to. Unique per
    /// coordinator.
    pub ticket: u64,
    /// The queue on which the coordinator awaits the reply.
    pub reply_to: String,
    pub command: Command,
}

/// A worker's answer to an [`Envelope`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Reply {
    pub ticket: u64,
    pub worker: WorkerId,
    pub outcome: Outcome,
}

/// The terminal state of a dispatched command.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Outcome {
    Completed(SlotValue),
    Failed(RemoteFailure),
}

/// The broad category of a [`RemoteFailure`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// A referenced slot does not exist on the worker.
    UndefinedSlot,
    /// A value does not have the type it was consumed as.
    TypeMismatch,
    /// The worker binary has no operation registered under the given name.
    UnknownOperation,
    /// The operation itself returned an error.
    Operation,
    /// The operation panicked.
    Panic,
    /// An input or output could not be encoded or decoded.
    Codec,
}

/// A failure raised while a worker executed a command.
///
/// Errors cross process boundaries as data, so only their category and
/// rendered message survive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl RemoteFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn undefined_slot(name: &str) -> Self {
        Self::new(
            FailureKind::UndefinedSlot,
            format!("slot `{name}` is not defined"),
        )
    }

    pub fn type_mismatch(subject: &str, expected: &str, found: &str) -> Self {
        Self::new(
            FailureKind::TypeMismatch,
            format!("{subject} holds `{found}`, expected `{expected}`"),
        )
    }

    pub fn codec(err: anyhow::Error) -> Self {
        Self::new(FailureKind::Codec, format!("{err:#}"))
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}
