use std::collections::HashMap;

use anyhow::Result;
use futures::StreamExt;
use tracing::{debug_span, error, instrument, Instrument};

use crate::{
    acker::Acker,
    common::worker_queue_name,
    config::Config,
    operation::{
        registry::{self, Invocation},
        OperationError,
    },
    queue::{
        dynamic::{DynamicConnection, DynamicQueueHandle},
        Connection, Consumer, QueueHandle,
    },
    serializer::Serializer,
    slot::{SlotStore, SlotValue},
    task::{Command, Disposition, Envelope, Outcome, RemoteFailure, Reply, WorkerId},
};

/// The runtime of a single worker.
///
/// A worker consumes its own command queue and executes commands strictly one
/// at a time, so commands from one coordinator take effect in dispatch order.
pub struct WorkerRuntime {
    id: WorkerId,
    connection: DynamicConnection,
    serializer: Serializer,
    queue_name: String,
    slots: SlotStore,
}

impl WorkerRuntime {
    pub fn new(
        connection: DynamicConnection,
        serializer: Serializer,
        prefix: &str,
        id: WorkerId,
    ) -> Self {
        Self {
            id,
            connection,
            serializer,
            queue_name: worker_queue_name(prefix, id),
            slots: SlotStore::new(),
        }
    }

    /// Connect worker `id` to the transport described by `config`.
    pub async fn from_config(config: &Config, id: WorkerId) -> Result<Self> {
        let connection = DynamicConnection::from_config(config).await?;
        Ok(Self::new(
            connection,
            Serializer::from(config),
            &config.worker_queue_prefix,
            id,
        ))
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// The worker-local slots.
    pub fn slots(&self) -> &SlotStore {
        &self.slots
    }

    /// Execute commands until the command queue closes.
    pub async fn main_loop(&self) -> Result<()> {
        let mut commands = self
            .connection
            .declare_queue(&self.queue_name)
            .await?
            .declare_consumer(&format!("worker-{}", self.id))
            .await?
            .stream::<Envelope>()
            .await?;
        let mut reply_queues: HashMap<String, DynamicQueueHandle> = HashMap::new();

        while let Some((envelope, delivery)) = commands.next().await {
            let Envelope {
                ticket,
                reply_to,
                command,
            } = envelope;
            let span = debug_span!(
                "worker_execute",
                worker = %self.id,
                ticket,
                command = command.label()
            );

            let handled = async {
                let outcome = self.execute(command).await;
                if let Outcome::Failed(failure) = &outcome {
                    error!("command failed: {failure}");
                }

                let reply_queue = match reply_queues.get(&reply_to) {
                    Some(queue) => queue.clone(),
                    None => {
                        let queue = self.connection.declare_queue(&reply_to).await?;
                        reply_queues.insert(reply_to, queue.clone());
                        queue
                    }
                };
                reply_queue
                    .publish(&Reply {
                        ticket,
                        worker: self.id,
                        outcome,
                    })
                    .await?;

                Ok::<(), anyhow::Error>(())
            }
            .instrument(span.clone())
            .await;

            if let Err(err) = settle(&delivery, handled).instrument(span).await {
                error!("failed to settle command, error: {err}");
            }
        }

        Ok(())
    }

    /// Execute a single command against the local slots.
    #[instrument(skip_all, level = "trace")]
    pub async fn execute(&self, command: Command) -> Outcome {
        let result = match command {
            Command::Place { name, value } => {
                self.slots.put(name, value);
                self.unit()
            }
            Command::Remove { name } => {
                self.slots.remove(&name);
                self.unit()
            }
            Command::Fetch { name } => self.slots.get(&name),
            Command::Describe { name } => self
                .slots
                .describe(&name, self.serializer)
                .and_then(|info| {
                    SlotValue::encode(self.serializer, &info).map_err(RemoteFailure::codec)
                }),
            Command::Evaluate {
                operation,
                op,
                slots,
                disposition,
            } => self.evaluate(&operation, op, slots, disposition).await,
        };

        match result {
            Ok(value) => Outcome::Completed(value),
            Err(failure) => Outcome::Failed(failure),
        }
    }

    async fn evaluate(
        &self,
        operation: &str,
        op: bytes::Bytes,
        slots: Vec<String>,
        disposition: Disposition,
    ) -> Result<SlotValue, RemoteFailure> {
        let execute = registry::lookup(operation)
            .ok_or_else(|| OperationError::UnknownOperation(operation.to_string()))?;

        let inputs = slots
            .into_iter()
            .map(|name| {
                let value = self.slots.get(&name)?;
                Ok((name, value))
            })
            .collect::<Result<Vec<_>, RemoteFailure>>()?;

        let output = execute(Invocation {
            serializer: self.serializer,
            op,
            inputs,
        })
        .await?;

        match disposition {
            Disposition::Return => Ok(output),
            Disposition::Store(target) => {
                self.slots.put(target, output);
                self.unit()
            }
            Disposition::Discard => self.unit(),
        }
    }

    fn unit(&self) -> Result<SlotValue, RemoteFailure> {
        SlotValue::encode(self.serializer, &()).map_err(RemoteFailure::codec)
    }
}

/// Acknowledge a command once it is answered, and reject it otherwise.
///
/// Either way the delivery is settled, so it cannot hold up the commands
/// queued behind it.
async fn settle<A: Acker + ?Sized>(delivery: &A, handled: Result<()>) -> Result<()> {
    match handled {
        Ok(()) => delivery.ack().await,
        Err(err) => {
            error!("failed to process command, error: {err}");
            delivery.nack().await
        }
    }
}
