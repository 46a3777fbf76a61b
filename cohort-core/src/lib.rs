#![cfg_attr(docsrs, feature(doc_cfg))]

//! Distributed data placement and map/reduce over a fixed pool of workers.
//!
//! Cohort lets a coordinator keep data resident on a pool of worker processes
//! and compute on it where it lives. Values are bound to named _slots_ on
//! individual workers; computations name the slots they read, run on the
//! worker holding them, and leave their results in place or ship them back.
//!
//! # Concepts
//!
//! - **Slots.** Every worker has its own namespace of slots. A value placed
//!   with [`save_at`] stays on that worker until it is replaced or removed.
//! - **Operations.** Computations are types implementing
//!   [`Operation`](crate::operation::Operation) and deriving
//!   [`RemoteExecute`]. A [`Call`](crate::placement::Call) pairs an operation
//!   with the slots its input is bound from.
//! - **Datasets.** A [`Dataset`] names a slot holding one piece of a logical
//!   whole on each of an ordered list of workers, e.g. the row blocks of a
//!   scattered matrix.
//! - **Results.** Dispatching a computation returns a
//!   [`Pending`](crate::runtime::Pending) result right away. Commands sent to
//!   one worker execute in the order they were sent, so a read dispatched
//!   after a write observes it, even if the result of the write was never
//!   awaited.
//!
//! # Primitives
//!
//! | | |
//! |---|---|
//! | [`save_at`], [`get_from`], [`get_val_from`], [`remove_from`] | place, compute and free single values |
//! | [`scatter_array`], [`gather_array`] | split an array over workers and reassemble it |
//! | [`dmapreduce`] | compute on every piece and fold the results in worker order |
//! | [`dexec`], [`dtransform`] | mutate or transform every piece in place |
//! | [`dmap`] / [`dpmap`] | run one call per worker from per-worker arguments |
//! | [`unscatter`] | free every piece of a dataset |
//!
//! All primitives are generic over [`Cluster`](crate::runtime::Cluster),
//! implemented by [`Runtime`](crate::runtime::Runtime).
//!
//! # Example
//!
//! ```
//! use cohort::{
//!     dmapreduce, scatter_array,
//!     operation::{Operation, Result},
//!     reduce::Prefetch,
//!     runtime::{Cluster, Runtime},
//!     RemoteExecute,
//! };
//! use ndarray::{Array2, ArrayD, Axis};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, RemoteExecute)]
//! struct SumOfSquares;
//!
//! impl Operation for SumOfSquares {
//!     type Input = ArrayD<f64>;
//!     type Output = f64;
//!
//!     fn execute(&self, input: Self::Input) -> Result<Self::Output> {
//!         Ok(input.iter().map(|x| x * x).sum())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> cohort::Result<()> {
//! let runtime = Runtime::in_memory(3).await?;
//! let matrix = Array2::from_shape_fn((1000, 3), |(i, j)| (i + j) as f64);
//!
//! let rows = scatter_array(&runtime, "m", &matrix, runtime.workers(), Axis(0)).await?;
//! let total = dmapreduce(&runtime, &rows, &SumOfSquares, |a, b| Ok(a + b), Prefetch::All)
//!     .await?
//!     .unwrap_or_default();
//!
//! let local: f64 = matrix.iter().map(|x| x * x).sum();
//! assert!((total - local).abs() < 1e-8);
//! # Ok(())
//! # }
//! ```
//!
//! # Workers
//!
//! [`Runtime::in_memory`](crate::runtime::Runtime::in_memory) emulates the
//! pool inside the current process, which is convenient for tests. For a
//! pool of separate processes, run a
//! [`WorkerRuntime`](crate::runtime::WorkerRuntime) per worker against an
//! AMQP broker and point the coordinator's [`Config`](crate::config::Config)
//! at the same broker. Every worker binary must link the operations it is
//! asked to execute.

pub mod acker;
pub mod array;
pub mod common;
pub mod config;
pub mod dataset;
pub mod error;
pub mod exec;
pub mod operation;
pub mod placement;
pub mod queue;
pub mod reduce;
pub mod runtime;
pub mod serializer;
pub mod slot;
pub mod task;

#[cfg(test)]
mod test_utils;

pub use array::{gather_array, scatter_array, GatherOptions};
pub use async_trait::async_trait;
pub use cohort_derive::RemoteExecute;
pub use dataset::{unscatter, Dataset, Selection};
pub use error::{Error, Result};
pub use exec::{dexec, dmap, dpmap, dtransform};
pub use futures;
pub use ndarray;
pub use placement::{get_from, get_val_from, remove_from, save_at};
pub use reduce::dmapreduce;
pub use task::WorkerId;
pub use tracing;

#[doc(hidden)]
pub mod __private {
    pub use linkme;

    pub use crate::operation::registry::{execute, Registration, OPERATIONS};
}
