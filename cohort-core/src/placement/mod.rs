//! Point-to-point placement of values and computations on named slots.
//!
//! These are the primitives everything else is built from. Each one
//! dispatches a single command to a single worker and hands back a
//! [`Pending`] result.
//!
//! ```
//! use cohort::{
//!     operation::{Operation, Result},
//!     placement::{get_val_from, save_at, Call},
//!     runtime::{Cluster, Runtime},
//!     RemoteExecute,
//! };
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, RemoteExecute)]
//! struct Len;
//!
//! impl Operation for Len {
//!     type Input = String;
//!     type Output = usize;
//!
//!     fn execute(&self, input: Self::Input) -> Result<Self::Output> {
//!         Ok(input.len())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> cohort::Result<()> {
//! let runtime = Runtime::in_memory(2).await?;
//! let worker = runtime.workers()[1];
//!
//! save_at(&runtime, worker, "greeting", &"hello".to_string()).await?.await?;
//! let len = get_val_from(&runtime, worker, Call::on(Len, "greeting")).await?;
//! assert_eq!(len, 5);
//! # Ok(())
//! # }
//! ```
use bytes::Bytes;
use serde::Serialize;
use tracing::instrument;

use crate::{
    error::Result,
    operation::Operation,
    runtime::{Cluster, Pending},
    serializer::{Serializable, Serializer},
    slot::{SlotInfo, SlotValue},
    task::{Command, Disposition, WorkerId},
};

/// An operation together with the slots its input is bound from.
#[derive(Debug, Clone)]
pub struct Call<Op> {
    op: Op,
    slots: Vec<String>,
}

impl<Op: Operation> Call<Op> {
    /// A call binding no slots; the operation's input is `()`.
    pub fn new(op: Op) -> Self {
        Self {
            op,
            slots: Vec::new(),
        }
    }

    /// A call binding a single slot.
    pub fn on(op: Op, slot: impl Into<String>) -> Self {
        Self::new(op).arg(slot)
    }

    /// Bind one more slot.
    pub fn arg(mut self, slot: impl Into<String>) -> Self {
        self.slots.push(slot.into());
        self
    }

    pub fn slots(&self) -> &[String] {
        &self.slots
    }

    pub(crate) fn into_command(
        self,
        serializer: Serializer,
        disposition: Disposition,
    ) -> Result<Command> {
        let op = serializer.to_bytes(&self.op)?;
        Ok(evaluate_command::<Op>(op, self.slots, disposition))
    }
}

/// An evaluation of an already serialized `Op`.
pub(crate) fn evaluate_command<Op: Operation>(
    op: Bytes,
    slots: Vec<String>,
    disposition: Disposition,
) -> Command {
    Command::Evaluate {
        operation: Op::NAME.to_string(),
        op,
        slots,
        disposition,
    }
}

pub(crate) async fn place<C: Cluster + ?Sized>(
    cluster: &C,
    worker: WorkerId,
    name: &str,
    value: SlotValue,
) -> Result<Pending<()>> {
    let receipt = cluster
        .submit(
            worker,
            Command::Place {
                name: name.to_string(),
                value,
            },
        )
        .await?;
    Ok(receipt.decode())
}

/// Ship `value` to `worker` and bind it to `name` there.
///
/// The returned result completes once the value is stored.
#[instrument(skip(cluster, value), level = "debug")]
pub async fn submit_value<C, T>(
    cluster: &C,
    worker: WorkerId,
    name: &str,
    value: &T,
) -> Result<Pending<()>>
where
    C: Cluster + ?Sized,
    T: Serialize,
{
    let value = SlotValue::encode(cluster.serializer(), value)?;
    place(cluster, worker, name, value).await
}

pub use submit_value as save_at;

/// Evaluate `call` on `worker` and bind its output to `name` there, without
/// shipping the output back.
#[instrument(skip(cluster, call), level = "debug")]
pub async fn submit_computation<C, Op>(
    cluster: &C,
    worker: WorkerId,
    name: &str,
    call: Call<Op>,
) -> Result<Pending<()>>
where
    C: Cluster + ?Sized,
    Op: Operation,
{
    let command = call.into_command(cluster.serializer(), Disposition::Store(name.to_string()))?;
    Ok(cluster.submit(worker, command).await?.decode())
}

/// Evaluate `call` on `worker` and ship its output back.
#[instrument(skip(cluster, call), level = "debug")]
pub async fn get_from<C, Op>(
    cluster: &C,
    worker: WorkerId,
    call: Call<Op>,
) -> Result<Pending<Op::Output>>
where
    C: Cluster + ?Sized,
    Op: Operation,
{
    let command = call.into_command(cluster.serializer(), Disposition::Return)?;
    Ok(cluster.submit(worker, command).await?.decode())
}

/// [`get_from`], awaiting the output.
pub async fn get_val_from<C, Op>(
    cluster: &C,
    worker: WorkerId,
    call: Call<Op>,
) -> Result<Op::Output>
where
    C: Cluster + ?Sized,
    Op: Operation,
{
    get_from(cluster, worker, call).await?.await
}

/// Ship the value bound to `name` on `worker` back as a `T`.
#[instrument(skip(cluster), level = "debug")]
pub async fn fetch<C, T>(cluster: &C, worker: WorkerId, name: &str) -> Result<Pending<T>>
where
    C: Cluster + ?Sized,
    T: Serializable,
{
    let receipt = cluster
        .submit(
            worker,
            Command::Fetch {
                name: name.to_string(),
            },
        )
        .await?;
    Ok(receipt.decode())
}

/// Query the type and shape of the value bound to `name` on `worker`.
pub async fn describe<C: Cluster + ?Sized>(
    cluster: &C,
    worker: WorkerId,
    name: &str,
) -> Result<Pending<SlotInfo>> {
    let receipt = cluster
        .submit(
            worker,
            Command::Describe {
                name: name.to_string(),
            },
        )
        .await?;
    Ok(receipt.decode())
}

/// Vacate `name` on `worker`.
///
/// Later reads of the slot fail as undefined, until something is bound to it
/// again. Removing a vacant slot is not an error.
#[instrument(skip(cluster), level = "debug")]
pub async fn remove_from<C: Cluster + ?Sized>(
    cluster: &C,
    worker: WorkerId,
    name: &str,
) -> Result<Pending<()>> {
    let receipt = cluster
        .submit(
            worker,
            Command::Remove {
                name: name.to_string(),
            },
        )
        .await?;
    Ok(receipt.decode())
}
