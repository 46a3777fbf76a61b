//! Message queue abstractions over which commands and replies travel.
//!
//! Each worker consumes a queue of its own, so the coordinator addresses a
//! worker simply by publishing to that worker's queue. Replies travel back on
//! a queue private to the coordinator.
//!
//! Two transports are provided:
//! - [`amqp`], for pools of worker processes connected through a broker.
//! - [`in_memory`], for a single process in which workers are emulated as
//!   tasks. Messages are still serialized, so values cross an in-memory queue
//!   exactly as they would cross a broker.
//!
//! [`dynamic`] selects one of them at runtime.
use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;

use crate::{acker::Acker, serializer::Serializable};

pub mod amqp;
pub mod dynamic;
pub mod in_memory;

/// A connection to a message broker.
///
/// Connections should be cheap to clone such that references need not be
/// passed around.
#[async_trait]
pub trait Connection: Clone + Send + Sync + 'static {
    type QueueHandle: QueueHandle;

    /// Close the connection.
    async fn close(&self) -> Result<()>;

    /// Declare a queue.
    ///
    /// Declaration is idempotent: it creates the queue if it does not exist,
    /// and otherwise returns a handle to the existing queue.
    async fn declare_queue(&self, name: &str) -> Result<Self::QueueHandle>;

    /// Delete the queue.
    async fn delete_queue(&self, name: &str) -> Result<()>;
}

/// A handle to a declared queue.
#[async_trait]
pub trait QueueHandle: Clone + Send + Sync + 'static {
    type Consumer: Consumer;

    /// Serialize `payload` and publish it to the queue.
    async fn publish<PayloadTarget: Serializable>(&self, payload: &PayloadTarget) -> Result<()>;

    /// Declare a consumer of the queue.
    async fn declare_consumer(&self, consumer_name: &str) -> Result<Self::Consumer>;
}

/// A consumer of a queue, which can be turned into a stream of messages.
///
/// Messages are delivered in the order they were published.
#[async_trait]
pub trait Consumer: Send + 'static {
    type Acker: Acker;
    type Stream<PayloadTarget: Serializable>: Stream<Item = (PayloadTarget, Self::Acker)>
        + Send
        + Unpin;

    /// Start consuming, deserializing every message as a `PayloadTarget`.
    async fn stream<PayloadTarget: Serializable>(self) -> Result<Self::Stream<PayloadTarget>>;
}
