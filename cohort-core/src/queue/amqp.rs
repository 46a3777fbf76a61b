//! AMQP transport, backed by [`lapin`].
//!
//! Queues are plain work queues on the default exchange, so publishing to a
//! queue's name delivers a message to that queue's consumer. Consumers use a
//! prefetch limit (`qos`) of one by default, which, combined with acking a
//! command only once it has been answered, keeps each worker from holding more
//! than the command it is executing. Deliveries that fail to decode are
//! rejected without requeueing.
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use backoff::{future::retry_notify, ExponentialBackoffBuilder};
use futures::Stream;
use lapin::options::{BasicNackOptions, QueueDeleteOptions};
use pin_project::pin_project;
use tracing::{error, instrument, warn};

use super::{Connection, Consumer, QueueHandle};
use crate::{
    acker::Acker,
    serializer::{Serializable, Serializer},
};

const CONNECT_INITIAL_INTERVAL: Duration = Duration::from_millis(250);
const CONNECT_MAX_ELAPSED: Duration = Duration::from_secs(30);

pub struct AMQPConnectionOptions<'a> {
    pub uri: &'a str,
    pub qos: Option<u16>,
    pub serializer: Serializer,
}

#[derive(Clone, Debug)]
pub struct AMQPConnection {
    channel: lapin::Channel,
    connection: Arc<lapin::Connection>,
    serializer: Serializer,
}

impl AMQPConnection {
    /// Connect to the broker at `options.uri`.
    ///
    /// The broker may not be up yet when the pool starts, so connection
    /// attempts are retried with exponential backoff for a bounded time.
    pub async fn new(options: AMQPConnectionOptions<'_>) -> Result<Self> {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(CONNECT_INITIAL_INTERVAL)
            .with_max_elapsed_time(Some(CONNECT_MAX_ELAPSED))
            .build();

        let uri = options.uri;
        let connection = retry_notify(
            backoff,
            move || async move {
                let properties = lapin::ConnectionProperties::default()
                    .with_executor(tokio_executor_trait::Tokio::current())
                    .with_reactor(tokio_reactor_trait::Tokio);
                lapin::Connection::connect(uri, properties)
                    .await
                    .map_err(backoff::Error::transient)
            },
            |err, retry_in: Duration| {
                warn!("failed to connect to AMQP broker, retrying in {retry_in:?}, error: {err}")
            },
        )
        .await?;

        let channel = connection.create_channel().await?;
        channel
            .basic_qos(options.qos.unwrap_or(1), Default::default())
            .await?;

        Ok(Self {
            channel,
            connection: Arc::new(connection),
            serializer: options.serializer,
        })
    }
}

#[async_trait]
impl Connection for AMQPConnection {
    type QueueHandle = AMQPQueueHandle;

    async fn close(&self) -> Result<()> {
        _ = self.channel.close(200, "Goodbye").await;
        _ = self.connection.close(200, "Goodbye").await;

        Ok(())
    }

    async fn declare_queue(&self, name: &str) -> Result<Self::QueueHandle> {
        self.channel
            .queue_declare(name, Default::default(), Default::default())
            .await?;

        Ok(AMQPQueueHandle {
            channel: self.channel.clone(),
            name: name.to_string(),
            serializer: self.serializer,
        })
    }

    async fn delete_queue(&self, name: &str) -> Result<()> {
        self.channel
            .queue_delete(name, QueueDeleteOptions::default())
            .await?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct AMQPQueueHandle {
    channel: lapin::Channel,
    name: String,
    serializer: Serializer,
}

#[async_trait]
impl QueueHandle for AMQPQueueHandle {
    type Consumer = AMQPConsumer;

    #[instrument(skip_all, fields(queue = %self.name), level = "trace")]
    async fn publish<PayloadTarget: Serializable>(&self, payload: &PayloadTarget) -> Result<()> {
        self.channel
            .basic_publish(
                "",
                &self.name,
                Default::default(),
                &self.serializer.to_bytes(payload)?,
                lapin::BasicProperties::default().with_delivery_mode(2),
            )
            .await?
            .await?;

        Ok(())
    }

    #[instrument(skip(self), level = "trace")]
    async fn declare_consumer(&self, consumer_name: &str) -> Result<Self::Consumer> {
        Ok(AMQPConsumer {
            channel: self.channel.clone(),
            queue_name: self.name.clone(),
            consumer_name: consumer_name.to_string(),
            serializer: self.serializer,
        })
    }
}

pub struct AMQPConsumer {
    channel: lapin::Channel,
    queue_name: String,
    consumer_name: String,
    serializer: Serializer,
}

#[pin_project]
pub struct AMQPConsumerStream<PayloadTarget> {
    #[pin]
    inner: lapin::Consumer,
    serializer: Serializer,
    _phantom: std::marker::PhantomData<fn() -> PayloadTarget>,
}

impl<PayloadTarget: Serializable> Stream for AMQPConsumerStream<PayloadTarget> {
    type Item = (PayloadTarget, AMQPAcker);

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(delivery))) => {
                    match this.serializer.from_bytes(&delivery.data) {
                        Ok(payload) => return Poll::Ready(Some((payload, AMQPAcker { delivery }))),
                        Err(err) => {
                            error!("error deserializing message, error: {err}");
                            // An unsettled delivery holds on to its prefetch credit.
                            let acker = AMQPAcker { delivery };
                            tokio::spawn(async move {
                                if let Err(err) = acker.nack().await {
                                    error!("failed to reject undecodable message, error: {err}");
                                }
                            });
                        }
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    error!("error receiving message, error: {err}");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[async_trait]
impl Consumer for AMQPConsumer {
    type Acker = AMQPAcker;
    type Stream<PayloadTarget: Serializable> = AMQPConsumerStream<PayloadTarget>;

    #[instrument(skip(self), level = "trace")]
    async fn stream<PayloadTarget: Serializable>(self) -> Result<Self::Stream<PayloadTarget>> {
        let consumer = self
            .channel
            .basic_consume(
                &self.queue_name,
                &self.consumer_name,
                Default::default(),
                Default::default(),
            )
            .await?;

        Ok(AMQPConsumerStream {
            inner: consumer,
            serializer: self.serializer,
            _phantom: std::marker::PhantomData,
        })
    }
}

#[derive(Debug)]
pub struct AMQPAcker {
    delivery: lapin::message::Delivery,
}

#[async_trait]
impl Acker for AMQPAcker {
    async fn ack(&self) -> Result<()> {
        Ok(self.delivery.ack(Default::default()).await?)
    }

    async fn nack(&self) -> Result<()> {
        let options = BasicNackOptions {
            requeue: false,
            ..Default::default()
        };
        Ok(self.delivery.nack(options).await?)
    }
}
