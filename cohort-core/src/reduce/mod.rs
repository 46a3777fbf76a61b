//! Distributed map/reduce over the pieces of one or more datasets.
//!
//! [`dmapreduce`] runs an operation on every worker of a selection and folds
//! the per-worker results on the coordinator, strictly left to right in
//! worker order. With a fold `f` and results `r1 .. rn`, the result is
//! `f(f(f(r1, r2), r3) .. rn)`, however the results arrive. The fold need
//! not be commutative.
//!
//! ```
//! use cohort::{
//!     array::scatter_array,
//!     operation::{Operation, Result},
//!     reduce::{dmapreduce, Prefetch},
//!     runtime::{Cluster, Runtime},
//!     RemoteExecute,
//! };
//! use ndarray::{Array1, ArrayD, Axis};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, RemoteExecute)]
//! struct Sum;
//!
//! impl Operation for Sum {
//!     type Input = ArrayD<f64>;
//!     type Output = f64;
//!
//!     fn execute(&self, input: Self::Input) -> Result<Self::Output> {
//!         Ok(input.sum())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> cohort::Result<()> {
//! let runtime = Runtime::in_memory(3).await?;
//! let array = Array1::from_iter((1..=10).map(f64::from));
//! let dataset = scatter_array(&runtime, "a", &array, runtime.workers(), Axis(0)).await?;
//!
//! let total = dmapreduce(&runtime, &dataset, &Sum, |a, b| Ok(a + b), Prefetch::All).await?;
//! assert_eq!(total, Some(55.0));
//! # Ok(())
//! # }
//! ```
use tracing::instrument;

use crate::{
    dataset::IntoSelection,
    error::{Error, Result},
    operation::Operation,
    placement::evaluate_command,
    runtime::Cluster,
    task::Disposition,
};

mod pipeline;

pub(crate) use pipeline::for_each_in_order;

/// How many per-worker results are dispatched ahead of the one being folded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Prefetch {
    /// Dispatch to every worker at once.
    #[default]
    All,
    /// Keep `n` more results in flight beyond the one being folded. With
    /// `Ahead(0)`, workers are dispatched to one at a time.
    Ahead(usize),
}

impl Prefetch {
    /// The number of results outstanding at any time, over `workers`
    /// workers.
    pub fn window(self, workers: usize) -> usize {
        match self {
            Self::All => workers,
            Self::Ahead(n) => n.saturating_add(1).min(workers),
        }
    }
}

/// Run `op` on every worker of `selection` and fold the results in worker
/// order.
///
/// Returns `None` for a selection over no workers. Datasets bound together
/// are checked to be distributed alike before anything is dispatched. The
/// first failure, remote or in `fold`, aborts the reduction.
#[instrument(skip_all, fields(operation = Op::NAME, ?prefetch), level = "debug")]
pub async fn dmapreduce<C, S, Op, F>(
    cluster: &C,
    selection: S,
    op: &Op,
    mut fold: F,
    prefetch: Prefetch,
) -> Result<Option<Op::Output>>
where
    C: Cluster + ?Sized,
    S: IntoSelection,
    Op: Operation,
    F: FnMut(Op::Output, Op::Output) -> anyhow::Result<Op::Output>,
{
    let selection = selection.into_selection()?;
    if selection.workers().is_empty() {
        return Ok(None);
    }

    let op = cluster.serializer().to_bytes(op)?;
    let mut acc = None;
    for_each_in_order(
        cluster,
        selection.workers(),
        prefetch,
        |_| {
            Ok(evaluate_command::<Op>(
                op.clone(),
                selection.names().to_vec(),
                Disposition::Return,
            ))
        },
        |_, partial| {
            acc = Some(match acc.take() {
                None => partial,
                Some(prev) => fold(prev, partial).map_err(Error::Combine)?,
            });
            Ok(())
        },
    )
    .await?;

    Ok(acc)
}
