//! Operation error types.
//!
//! Errors raised on a worker are never retried. They are reported back to the
//! coordinator, which surfaces them when the result of the failed computation
//! is awaited.
//!
//! ## Example
//!
//! ```
//! use cohort::{RemoteExecute, operation::{Operation, OperationError, Result}};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, RemoteExecute)]
//! struct Reciprocal;
//!
//! impl Operation for Reciprocal {
//!     type Input = f64;
//!     type Output = f64;
//!
//!     fn execute(&self, input: Self::Input) -> Result<Self::Output> {
//!         if input == 0.0 {
//!             return Err(OperationError::msg("division by zero"));
//!         }
//!         Ok(1.0 / input)
//!     }
//! }
//! ```
use thiserror::Error;

use crate::task::{FailureKind, RemoteFailure};

#[derive(Error, Debug)]
pub enum OperationError {
    /// The operation itself failed.
    #[error(transparent)]
    Failed(anyhow::Error),

    #[error("slot `{slot}` holds `{found}`, expected `{expected}`")]
    TypeMismatch {
        slot: String,
        expected: String,
        found: String,
    },

    #[error("operation panicked: {0}")]
    Panicked(String),

    #[error("codec error: {0:#}")]
    Codec(anyhow::Error),

    #[error("no operation registered as `{0}`")]
    UnknownOperation(String),
}

impl OperationError {
    /// Fail with a plain message.
    pub fn msg<M>(message: M) -> Self
    where
        M: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        Self::Failed(anyhow::Error::msg(message))
    }

    /// Fail with an arbitrary error.
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed(anyhow::Error::new(err))
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Failed(_) => FailureKind::Operation,
            Self::TypeMismatch { .. } => FailureKind::TypeMismatch,
            Self::Panicked(_) => FailureKind::Panic,
            Self::Codec(_) => FailureKind::Codec,
            Self::UnknownOperation(_) => FailureKind::UnknownOperation,
        }
    }
}

impl From<anyhow::Error> for OperationError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(err)
    }
}

impl From<OperationError> for RemoteFailure {
    fn from(err: OperationError) -> Self {
        let message = match &err {
            // Keep the whole context chain, which `Display` on the variant would drop.
            OperationError::Failed(inner) => format!("{inner:#}"),
            other => other.to_string(),
        };
        RemoteFailure::new(err.kind(), message)
    }
}

pub type Result<T> = std::result::Result<T, OperationError>;
