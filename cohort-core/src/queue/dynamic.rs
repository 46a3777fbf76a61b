//! A transport chosen at runtime from [`Config`].
//!
//! The queue traits are statically dispatched, so a transport selected from
//! configuration needs an enum over the concrete implementations.
use anyhow::Result;
use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};

use super::{
    amqp::{AMQPConnection, AMQPConnectionOptions},
    in_memory::InMemoryConnection,
    Connection, Consumer, QueueHandle,
};
use crate::{
    acker::Acker,
    config::{self, Config},
    serializer::{Serializable, Serializer},
};

#[derive(Clone)]
pub enum DynamicConnection {
    Amqp(AMQPConnection),
    InMemory(InMemoryConnection),
}

impl DynamicConnection {
    pub async fn from_config(config: &Config) -> Result<Self> {
        let serializer = Serializer::from(config);
        match config.runtime {
            config::Runtime::Amqp => {
                let uri = config
                    .amqp_uri
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("the AMQP runtime requires an AMQP URI"))?;
                Ok(Self::Amqp(
                    AMQPConnection::new(AMQPConnectionOptions {
                        uri,
                        qos: Some(1),
                        serializer,
                    })
                    .await?,
                ))
            }
            config::Runtime::InMemory => Ok(Self::InMemory(InMemoryConnection::new(serializer))),
        }
    }
}

#[async_trait]
impl Connection for DynamicConnection {
    type QueueHandle = DynamicQueueHandle;

    async fn close(&self) -> Result<()> {
        match self {
            Self::Amqp(connection) => connection.close().await,
            Self::InMemory(connection) => connection.close().await,
        }
    }

    async fn declare_queue(&self, name: &str) -> Result<Self::QueueHandle> {
        match self {
            Self::Amqp(connection) => Ok(DynamicQueueHandle::Amqp(
                connection.declare_queue(name).await?,
            )),
            Self::InMemory(connection) => Ok(DynamicQueueHandle::InMemory(
                connection.declare_queue(name).await?,
            )),
        }
    }

    async fn delete_queue(&self, name: &str) -> Result<()> {
        match self {
            Self::Amqp(connection) => connection.delete_queue(name).await,
            Self::InMemory(connection) => connection.delete_queue(name).await,
        }
    }
}

#[derive(Clone)]
pub enum DynamicQueueHandle {
    Amqp(<AMQPConnection as Connection>::QueueHandle),
    InMemory(<InMemoryConnection as Connection>::QueueHandle),
}

#[async_trait]
impl QueueHandle for DynamicQueueHandle {
    type Consumer = DynamicConsumer;

    async fn publish<PayloadTarget: Serializable>(&self, payload: &PayloadTarget) -> Result<()> {
        match self {
            Self::Amqp(handle) => handle.publish(payload).await,
            Self::InMemory(handle) => handle.publish(payload).await,
        }
    }

    async fn declare_consumer(&self, consumer_name: &str) -> Result<Self::Consumer> {
        match self {
            Self::Amqp(handle) => Ok(DynamicConsumer::Amqp(
                handle.declare_consumer(consumer_name).await?,
            )),
            Self::InMemory(handle) => Ok(DynamicConsumer::InMemory(
                handle.declare_consumer(consumer_name).await?,
            )),
        }
    }
}

pub enum DynamicConsumer {
    Amqp(<<AMQPConnection as Connection>::QueueHandle as QueueHandle>::Consumer),
    InMemory(<<InMemoryConnection as Connection>::QueueHandle as QueueHandle>::Consumer),
}

#[async_trait]
impl Consumer for DynamicConsumer {
    type Acker = Box<dyn Acker>;
    type Stream<PayloadTarget: Serializable> = BoxStream<'static, (PayloadTarget, Self::Acker)>;

    async fn stream<PayloadTarget: Serializable>(self) -> Result<Self::Stream<PayloadTarget>> {
        match self {
            Self::Amqp(consumer) => Ok(consumer
                .stream::<PayloadTarget>()
                .await?
                .map(|(payload, acker)| (payload, Box::new(acker) as Box<dyn Acker>))
                .boxed()),
            Self::InMemory(consumer) => Ok(consumer
                .stream::<PayloadTarget>()
                .await?
                .map(|(payload, acker)| (payload, Box::new(acker) as Box<dyn Acker>))
                .boxed()),
        }
    }
}
