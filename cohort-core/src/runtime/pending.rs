//! Futures for the results of dispatched commands.
use std::{
    future::Future,
    marker::PhantomData,
    pin::Pin,
    task::{ready, Context, Poll},
};

use tokio::sync::oneshot;

use crate::{
    error::{Error, Result},
    serializer::{Serializable, Serializer},
    task::{Outcome, WorkerId},
};

/// Proof that a command has been dispatched, from which the result can be
/// awaited.
///
/// Dispatch is complete once a `Receipt` exists: the command executes whether
/// or not the receipt, or the [`Pending`] made from it, is ever awaited.
#[derive(Debug)]
pub struct Receipt {
    worker: WorkerId,
    serializer: Serializer,
    reply: oneshot::Receiver<Outcome>,
}

impl Receipt {
    pub fn new(
        worker: WorkerId,
        serializer: Serializer,
        reply: oneshot::Receiver<Outcome>,
    ) -> Self {
        Self {
            worker,
            serializer,
            reply,
        }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Await the result as a `T`.
    pub fn decode<T: Serializable>(self) -> Pending<T> {
        Pending {
            worker: self.worker,
            serializer: self.serializer,
            reply: self.reply,
            _marker: PhantomData,
        }
    }
}

/// The eventual result of a computation dispatched to a worker.
///
/// Awaiting resolves to the result once the worker has produced it, or to the
/// error the worker reported. Dropping a `Pending` without awaiting it
/// abandons the result; the computation itself still runs to completion.
#[must_use = "the result of a dispatched computation is discarded unless awaited"]
#[derive(Debug)]
pub struct Pending<T> {
    worker: WorkerId,
    serializer: Serializer,
    reply: oneshot::Receiver<Outcome>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Pending<T> {
    /// The worker computing this result.
    pub fn worker(&self) -> WorkerId {
        self.worker
    }
}

impl<T: Serializable> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let worker = self.worker;
        let outcome = match ready!(Pin::new(&mut self.reply).poll(cx)) {
            Ok(outcome) => outcome,
            Err(_) => return Poll::Ready(Err(Error::Disconnected(worker))),
        };

        Poll::Ready(match outcome {
            Outcome::Completed(value) => value
                .decode(self.serializer)
                .map_err(|failure| Error::RemoteEvaluation { worker, failure }),
            Outcome::Failed(failure) => Err(Error::RemoteEvaluation { worker, failure }),
        })
    }
}
