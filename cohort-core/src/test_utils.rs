//! Operations and cluster wrappers shared by the tests.
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    operation::{Mutation, Operation, OperationError},
    runtime::{Cluster, Receipt},
    serializer::Serializer,
    task::{Command, WorkerId},
    RemoteExecute,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Serialize, Deserialize, RemoteExecute)]
#[cohort(internal)]
pub struct SumOfSquares;

impl Operation for SumOfSquares {
    type Input = ArrayD<f64>;
    type Output = f64;

    fn execute(&self, input: Self::Input) -> crate::operation::Result<Self::Output> {
        Ok(input.iter().map(|x| x * x).sum())
    }
}

#[derive(Serialize, Deserialize, RemoteExecute)]
#[cohort(internal)]
pub struct Scale(pub f64);

impl Operation for Scale {
    type Input = Vec<f64>;
    type Output = Vec<f64>;

    fn execute(&self, input: Self::Input) -> crate::operation::Result<Self::Output> {
        Ok(input.into_iter().map(|x| x * self.0).collect())
    }
}

#[derive(Serialize, Deserialize, RemoteExecute)]
#[cohort(internal)]
pub struct Identity;

impl Operation for Identity {
    type Input = ArrayD<f64>;
    type Output = ArrayD<f64>;

    fn execute(&self, input: Self::Input) -> crate::operation::Result<Self::Output> {
        Ok(input)
    }
}

/// Doubles every element of an array in place.
#[derive(Serialize, Deserialize, RemoteExecute)]
#[cohort(internal)]
pub struct Double;

impl Mutation for Double {
    type Elem = ArrayD<f64>;

    fn mutate(&self, elem: &mut Self::Elem) -> crate::operation::Result<()> {
        elem.mapv_inplace(|x| x * 2.0);
        Ok(())
    }
}

#[derive(Serialize, Deserialize, RemoteExecute)]
#[cohort(internal)]
pub struct Concat;

impl Operation for Concat {
    type Input = (String, String);
    type Output = String;

    fn execute(&self, (a, b): Self::Input) -> crate::operation::Result<Self::Output> {
        Ok(a + &b)
    }
}

#[derive(Serialize, Deserialize, RemoteExecute)]
#[cohort(internal)]
pub struct Pair;

impl Operation for Pair {
    type Input = (u64, u64);
    type Output = (u64, u64);

    fn execute(&self, input: Self::Input) -> crate::operation::Result<Self::Output> {
        Ok(input)
    }
}

/// Adds two arrays element-wise.
#[derive(Serialize, Deserialize, RemoteExecute)]
#[cohort(internal)]
pub struct Add;

impl Operation for Add {
    type Input = (ArrayD<f64>, ArrayD<f64>);
    type Output = ArrayD<f64>;

    fn execute(&self, (a, b): Self::Input) -> crate::operation::Result<Self::Output> {
        if a.shape() != b.shape() {
            return Err(OperationError::msg("operands differ in shape"));
        }
        Ok(a + b)
    }
}

/// Returns its input after a delay.
#[derive(Serialize, Deserialize, RemoteExecute)]
#[cohort(internal)]
pub struct Sleep {
    millis: u64,
}

impl Sleep {
    pub fn millis(millis: u64) -> Self {
        Self { millis }
    }
}

impl Operation for Sleep {
    type Input = Vec<f64>;
    type Output = Vec<f64>;

    fn execute(&self, input: Self::Input) -> crate::operation::Result<Self::Output> {
        std::thread::sleep(Duration::from_millis(self.millis));
        Ok(input)
    }
}

/// Reads a `(delay, label)` pair, sleeps for the delay and returns the label
/// as a one element list.
#[derive(Serialize, Deserialize, RemoteExecute)]
#[cohort(internal)]
pub struct DelayedLabel;

impl Operation for DelayedLabel {
    type Input = (u64, String);
    type Output = Vec<String>;

    fn execute(&self, (millis, label): Self::Input) -> crate::operation::Result<Self::Output> {
        std::thread::sleep(Duration::from_millis(millis));
        Ok(vec![label])
    }
}

/// Returns the argument it was constructed with.
#[derive(Serialize, Deserialize, RemoteExecute)]
#[cohort(internal)]
pub struct Echo(pub u64);

impl Operation for Echo {
    type Input = ();
    type Output = u64;

    fn execute(&self, _: Self::Input) -> crate::operation::Result<Self::Output> {
        Ok(self.0)
    }
}

#[derive(Serialize, Deserialize, RemoteExecute)]
#[cohort(internal)]
pub struct Fail;

impl Operation for Fail {
    type Input = Vec<f64>;
    type Output = f64;

    fn execute(&self, _: Self::Input) -> crate::operation::Result<Self::Output> {
        Err(OperationError::msg("refusing to compute"))
    }
}

#[derive(Serialize, Deserialize, RemoteExecute)]
#[cohort(internal)]
pub struct Panic;

impl Operation for Panic {
    type Input = Vec<f64>;
    type Output = f64;

    fn execute(&self, _: Self::Input) -> crate::operation::Result<Self::Output> {
        panic!("operation panicked on purpose")
    }
}

/// Counts the commands dispatched through the wrapped cluster.
pub struct Counting<C> {
    inner: C,
    submitted: AtomicUsize,
}

impl<C> Counting<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            submitted: AtomicUsize::new(0),
        }
    }

    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<C: Cluster> Cluster for Counting<C> {
    fn serializer(&self) -> Serializer {
        self.inner.serializer()
    }

    fn workers(&self) -> &[WorkerId] {
        self.inner.workers()
    }

    async fn submit(&self, worker: WorkerId, command: Command) -> Result<Receipt> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.inner.submit(worker, command).await
    }
}
