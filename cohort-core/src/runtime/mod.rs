//! The coordinator and worker runtimes.
//!
//! A [`Runtime`] is the coordinator's handle to a fixed pool of workers. It
//! publishes [`Command`]s to per-worker queues and routes the workers'
//! [`Reply`]s back to the [`Pending`] results awaiting them. A
//! [`WorkerRuntime`] is the other end: it owns a worker's slots and executes
//! the commands addressed to it, one at a time, in arrival order.
//!
//! With the in-memory transport, [`Runtime`] emulates the whole pool itself by
//! spawning a [`WorkerRuntime`] task per worker.
//!
//! All of the distributed primitives are written against the [`Cluster`]
//! trait rather than [`Runtime`] directly.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, error, instrument, trace};

use crate::{
    common::{get_random_routing_key, worker_queue_name},
    config::{self, Config},
    error::{Error, Result},
    queue::{
        dynamic::{DynamicConnection, DynamicConsumer, DynamicQueueHandle},
        Connection, Consumer, QueueHandle,
    },
    serializer::Serializer,
    task::{Command, Envelope, Outcome, Reply, WorkerId},
};

mod pending;
mod worker;

pub use pending::{Pending, Receipt};
pub use worker::WorkerRuntime;

/// A fixed pool of workers to which commands can be dispatched.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// The format in which values are encoded for the workers.
    fn serializer(&self) -> Serializer;

    /// The workers of the pool, in canonical order.
    fn workers(&self) -> &[WorkerId];

    /// Dispatch `command` to `worker`.
    ///
    /// Returns once the command is on its way. Commands dispatched to the same
    /// worker execute in dispatch order.
    async fn submit(&self, worker: WorkerId, command: Command) -> Result<Receipt>;
}

type InFlight = Arc<DashMap<u64, oneshot::Sender<Outcome>>>;

pub struct Runtime {
    connection: DynamicConnection,
    serializer: Serializer,
    workers: Vec<WorkerId>,
    worker_queues: HashMap<WorkerId, DynamicQueueHandle>,
    reply_queue: String,
    next_ticket: AtomicU64,
    in_flight: InFlight,
    reply_router: JoinHandle<()>,
    worker_emulator: Option<Vec<JoinHandle<anyhow::Result<()>>>>,
}

impl Runtime {
    pub async fn from_config(config: &Config) -> Result<Self> {
        let connection = DynamicConnection::from_config(config).await?;
        let serializer = Serializer::from(config);
        let workers = (0..config.num_workers())
            .map(|id| u32::try_from(id).map(WorkerId))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| anyhow::anyhow!("pool of {} workers is too large", config.num_workers()))?;

        let mut worker_queues = HashMap::with_capacity(workers.len());
        for &worker in &workers {
            let queue = connection
                .declare_queue(&worker_queue_name(&config.worker_queue_prefix, worker))
                .await?;
            worker_queues.insert(worker, queue);
        }

        let reply_queue = format!(
            "{}.reply.{}",
            config.worker_queue_prefix,
            get_random_routing_key()
        );
        let replies = connection
            .declare_queue(&reply_queue)
            .await?
            .declare_consumer(&reply_queue)
            .await?
            .stream::<Reply>()
            .await?;

        let in_flight = InFlight::default();
        let reply_router = tokio::spawn(Self::route_replies(replies, in_flight.clone()));

        let worker_emulator = match config.runtime {
            config::Runtime::InMemory => Some(Self::spawn_emulator(
                &connection,
                serializer,
                &config.worker_queue_prefix,
                &workers,
            )),
            config::Runtime::Amqp => None,
        };

        debug!(workers = workers.len(), %reply_queue, "runtime started");

        Ok(Self {
            connection,
            serializer,
            workers,
            worker_queues,
            reply_queue,
            next_ticket: AtomicU64::new(0),
            in_flight,
            reply_router,
            worker_emulator,
        })
    }

    /// A runtime emulating `num_workers` workers in this process.
    pub async fn in_memory(num_workers: usize) -> Result<Self> {
        let config = Config {
            runtime: config::Runtime::InMemory,
            num_workers: Some(num_workers),
            ..Default::default()
        };
        Self::from_config(&config).await
    }

    fn spawn_emulator(
        connection: &DynamicConnection,
        serializer: Serializer,
        prefix: &str,
        workers: &[WorkerId],
    ) -> Vec<JoinHandle<anyhow::Result<()>>> {
        workers
            .iter()
            .map(|&worker| {
                let worker_runtime =
                    WorkerRuntime::new(connection.clone(), serializer, prefix, worker);
                tokio::spawn(async move { worker_runtime.main_loop().await })
            })
            .collect()
    }

    async fn route_replies(
        mut replies: <DynamicConsumer as Consumer>::Stream<Reply>,
        in_flight: InFlight,
    ) {
        while let Some((reply, acker)) = replies.next().await {
            if let Err(err) = acker.ack().await {
                error!("failed to acknowledge reply, error: {err}");
            }

            match in_flight.remove(&reply.ticket) {
                Some((_, sender)) => {
                    if sender.send(reply.outcome).is_err() {
                        trace!(ticket = reply.ticket, worker = %reply.worker, "result abandoned");
                    }
                }
                None => error!(
                    ticket = reply.ticket,
                    worker = %reply.worker,
                    "reply for unknown ticket"
                ),
            }
        }
    }

    /// Delete the reply queue and close the connection.
    pub async fn close(self) -> Result<()> {
        self.connection.delete_queue(&self.reply_queue).await?;
        self.connection.close().await?;
        Ok(())
    }
}

#[async_trait]
impl Cluster for Runtime {
    fn serializer(&self) -> Serializer {
        self.serializer
    }

    fn workers(&self) -> &[WorkerId] {
        &self.workers
    }

    #[instrument(skip(self, command), fields(command = command.label()), level = "debug")]
    async fn submit(&self, worker: WorkerId, command: Command) -> Result<Receipt> {
        let queue = self
            .worker_queues
            .get(&worker)
            .ok_or(Error::UnknownWorker(worker))?;

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.in_flight.insert(ticket, sender);

        let envelope = Envelope {
            ticket,
            reply_to: self.reply_queue.clone(),
            command,
        };
        if let Err(err) = queue.publish(&envelope).await {
            self.in_flight.remove(&ticket);
            return Err(err.into());
        }

        Ok(Receipt::new(worker, self.serializer, receiver))
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.reply_router.abort();
        if let Some(worker_emulator) = self.worker_emulator.take() {
            for handle in worker_emulator {
                handle.abort();
            }
        }
    }
}
