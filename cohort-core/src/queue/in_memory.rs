//! An in-memory queue, for emulating a worker pool within one process.
//!
//! Messages are serialized on publish and deserialized on consumption, as they
//! would be over a broker. A message is delivered to exactly one consumer.
use std::{
    collections::VecDeque,
    pin::{pin, Pin},
    sync::Arc,
    task::{Context, Poll},
};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{mapref::entry::Entry, DashMap};
use futures::{
    lock::{Mutex, OwnedMutexLockFuture},
    ready, Future, Stream,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::PollSemaphore;
use tracing::error;

use super::{Connection, Consumer, QueueHandle};
use crate::{
    acker::NoopAcker,
    serializer::{Serializable, Serializer},
};

#[derive(Clone)]
pub struct InMemoryConnection {
    queues: Arc<DashMap<String, InMemoryQueueHandle>>,
    serializer: Serializer,
}

impl InMemoryConnection {
    pub fn new(serializer: Serializer) -> Self {
        Self {
            queues: Default::default(),
            serializer,
        }
    }
}

#[async_trait]
impl Connection for InMemoryConnection {
    type QueueHandle = InMemoryQueueHandle;

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn declare_queue(&self, name: &str) -> Result<Self::QueueHandle> {
        match self.queues.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let queue = InMemoryQueueHandle::new(self.serializer);
                entry.insert(queue.clone());
                Ok(queue)
            }
        }
    }

    async fn delete_queue(&self, name: &str) -> Result<()> {
        self.queues.remove(name);

        Ok(())
    }
}

type Messages = Arc<Mutex<VecDeque<Bytes>>>;

#[derive(Clone)]
pub struct InMemoryQueueHandle {
    messages: Messages,
    /// One permit per undelivered message.
    num_messages: PollSemaphore,
    serializer: Serializer,
}

impl InMemoryQueueHandle {
    pub fn new(serializer: Serializer) -> Self {
        Self {
            messages: Default::default(),
            num_messages: PollSemaphore::new(Arc::new(Semaphore::new(0))),
            serializer,
        }
    }
}

#[async_trait]
impl QueueHandle for InMemoryQueueHandle {
    type Consumer = InMemoryConsumer;

    async fn publish<PayloadTarget: Serializable>(&self, payload: &PayloadTarget) -> Result<()> {
        let bytes = self.serializer.to_bytes(payload)?;
        let mut lock = self.messages.lock().await;
        lock.push_back(bytes);
        self.num_messages.add_permits(1);

        Ok(())
    }

    async fn declare_consumer(&self, _consumer_name: &str) -> Result<Self::Consumer> {
        Ok(InMemoryConsumer {
            messages: self.messages.clone(),
            num_messages: self.num_messages.clone(),
            serializer: self.serializer,
        })
    }
}

pub struct InMemoryConsumer {
    messages: Messages,
    num_messages: PollSemaphore,
    serializer: Serializer,
}

pub struct ConsumerStream<T> {
    messages: Messages,
    num_messages: PollSemaphore,
    /// A pending lock on the queue, taken once a message is known to be
    /// available.
    lock_fut: Option<(OwnedMutexLockFuture<VecDeque<Bytes>>, OwnedSemaphorePermit)>,
    serializer: Serializer,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Serializable> Stream for ConsumerStream<T> {
    type Item = (T, NoopAcker);

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.as_mut().get_mut();

        loop {
            let (mut fut, permit) = match this.lock_fut.take() {
                Some(pending) => pending,
                None => match ready!(this.num_messages.poll_acquire(cx)) {
                    Some(permit) => (this.messages.clone().lock_owned(), permit),
                    // The semaphore is never closed.
                    None => return Poll::Pending,
                },
            };

            let mut lock = match pin!(&mut fut).poll(cx) {
                Poll::Ready(lock) => lock,
                Poll::Pending => {
                    this.lock_fut = Some((fut, permit));
                    return Poll::Pending;
                }
            };

            // The permit stood for the message we are about to take.
            permit.forget();
            let Some(bytes) = lock.pop_front() else {
                error!("message permit acquired, but the queue was empty");
                continue;
            };
            drop(lock);

            match this.serializer.from_bytes(&bytes) {
                Ok(item) => return Poll::Ready(Some((item, NoopAcker))),
                Err(err) => error!("error deserializing message, error: {err}"),
            }
        }
    }
}

#[async_trait]
impl Consumer for InMemoryConsumer {
    type Acker = NoopAcker;
    type Stream<T: Serializable> = ConsumerStream<T>;

    async fn stream<T: Serializable>(self) -> Result<Self::Stream<T>> {
        Ok(ConsumerStream {
            messages: self.messages,
            num_messages: self.num_messages,
            lock_fut: None,
            serializer: self.serializer,
            _marker: std::marker::PhantomData,
        })
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use futures::StreamExt;
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Payload {
        seq: usize,
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let connection = InMemoryConnection::new(Serializer::default());
        let queue = connection.declare_queue("q").await.unwrap();
        for seq in 0..10 {
            queue.publish(&Payload { seq }).await.unwrap();
        }

        let stream = queue
            .declare_consumer("c")
            .await
            .unwrap()
            .stream::<Payload>()
            .await
            .unwrap();
        let received = stream.take(10).map(|(p, _)| p.seq).collect::<Vec<_>>().await;
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn declaration_is_idempotent() {
        let connection = InMemoryConnection::new(Serializer::Cbor);
        let publisher = connection.declare_queue("shared").await.unwrap();
        let consumer = connection.declare_queue("shared").await.unwrap();

        let mut stream = consumer
            .declare_consumer("c")
            .await
            .unwrap()
            .stream::<Payload>()
            .await
            .unwrap();

        let handle = tokio::spawn(async move { stream.next().await.map(|(p, _)| p) });
        tokio::time::sleep(Duration::from_millis(10)).await;
        publisher.publish(&Payload { seq: 7 }).await.unwrap();

        assert_eq!(handle.await.unwrap(), Some(Payload { seq: 7 }));
    }

    #[tokio::test]
    async fn skips_undecodable_messages() {
        let connection = InMemoryConnection::new(Serializer::Cbor);
        let queue = connection.declare_queue("q").await.unwrap();
        queue.publish(&"not a payload".to_string()).await.unwrap();
        queue.publish(&Payload { seq: 1 }).await.unwrap();

        let mut stream = queue
            .declare_consumer("c")
            .await
            .unwrap()
            .stream::<Payload>()
            .await
            .unwrap();
        assert_eq!(stream.next().await.map(|(p, _)| p), Some(Payload { seq: 1 }));
    }
}
