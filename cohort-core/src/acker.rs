//! Acknowledgement of consumed queue messages.
//!
//! A worker acknowledges a command only once it has executed it and published
//! the reply. Transports that redeliver unacknowledged messages therefore
//! never lose a command whose worker died mid-execution, and a prefetch limit
//! of one keeps each worker's commands strictly ordered.
//!
//! Every delivery is settled one way or the other. A failed command is still
//! answered with a failure reply and acknowledged. Deliveries that cannot be
//! decoded, or whose reply cannot be published, are negatively acknowledged
//! without requeueing, so they release their share of the prefetch limit and
//! are never executed twice.
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Acker: Send + Sync + 'static {
    async fn ack(&self) -> Result<()>;

    /// Reject the message without requeueing it.
    async fn nack(&self) -> Result<()>;
}

#[async_trait]
impl<T: Acker + ?Sized> Acker for Box<T> {
    async fn ack(&self) -> Result<()> {
        (**self).ack().await
    }

    async fn nack(&self) -> Result<()> {
        (**self).nack().await
    }
}

/// For transports without acknowledgement.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAcker;

#[async_trait]
impl Acker for NoopAcker {
    async fn ack(&self) -> Result<()> {
        Ok(())
    }

    async fn nack(&self) -> Result<()> {
        Ok(())
    }
}
