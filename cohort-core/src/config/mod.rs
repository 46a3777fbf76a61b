//! Shared runtime configuration.
//!
//! Both the coordinator and standalone worker processes read the same
//! [`Config`], since they have to agree on queue naming, serialization format
//! and transport.
//!
//! [`Config`] is a [`clap`] argument group, so a binary can flatten it into its
//! own command line and hand the result to
//! [`Runtime::from_config`](crate::runtime::Runtime::from_config) or
//! [`WorkerRuntime::from_config`](crate::runtime::WorkerRuntime::from_config).

use clap::{Args, ValueEnum};

const DEFAULT_WORKER_QUEUE_PREFIX: &str = "cohort.worker";
const DEFAULT_NUM_WORKERS: usize = 4;
const HELP_HEADING: &str = "Cohort options";

/// Represents the main configuration structure for the runtime.
#[derive(Args, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Config {
    /// Prefix of the per-worker command queues. Worker `n` consumes the queue
    /// `<prefix>.<n>`.
    #[arg(long, short = 'p', help_heading = HELP_HEADING, default_value = DEFAULT_WORKER_QUEUE_PREFIX)]
    pub worker_queue_prefix: String,

    /// Determines the serialization format to be used.
    #[arg(long, short, help_heading = HELP_HEADING, value_enum, default_value_t = Serializer::Postcard)]
    pub serializer: Serializer,

    /// Specifies the runtime environment to use.
    #[arg(long, short, help_heading = HELP_HEADING, value_enum, default_value_t = Runtime::Amqp)]
    pub runtime: Runtime,

    /// Number of workers in the pool. Workers are identified by `0..n`. With
    /// the in-memory runtime, this many workers are emulated.
    #[arg(long, short, help_heading = HELP_HEADING)]
    pub num_workers: Option<usize>,

    /// Provides the URI for the AMQP broker, if the AMQP runtime is selected.
    #[arg(long, help_heading = HELP_HEADING, env = "AMQP_URI", required_if_eq("runtime", "amqp"))]
    pub amqp_uri: Option<String>,
}

impl Config {
    /// The number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.num_workers.unwrap_or(DEFAULT_NUM_WORKERS)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_queue_prefix: DEFAULT_WORKER_QUEUE_PREFIX.to_string(),
            serializer: Default::default(),
            runtime: Default::default(),
            num_workers: Default::default(),
            amqp_uri: Default::default(),
        }
    }
}

/// Enumerates the available serialization formats.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum, Default)]
pub enum Serializer {
    #[default]
    Postcard,
    Cbor,
}

/// Enumerates the available runtime environments.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum, Default)]
pub enum Runtime {
    #[default]
    Amqp,
    InMemory,
}

#[cfg(test)]
mod test {
    use clap::Parser;

    use super::*;

    #[derive(Parser, Debug)]
    struct Cli {
        #[command(flatten)]
        options: Config,
    }

    #[test]
    fn parses_in_memory_without_broker() {
        let cli = Cli::parse_from(["cohort", "--runtime", "in-memory", "--num-workers", "3"]);
        assert_eq!(cli.options.runtime, Runtime::InMemory);
        assert_eq!(cli.options.num_workers(), 3);
        assert_eq!(cli.options.worker_queue_prefix, DEFAULT_WORKER_QUEUE_PREFIX);
    }

    #[test]
    fn amqp_requires_uri() {
        let result = Cli::try_parse_from(["cohort", "--runtime", "amqp"]);
        if std::env::var("AMQP_URI").is_err() {
            assert!(result.is_err());
        }
    }
}
