use std::collections::VecDeque;

use tracing::trace;

use super::Prefetch;
use crate::{
    error::Result,
    runtime::{Cluster, Pending},
    serializer::Serializable,
    task::{Command, WorkerId},
};

/// Dispatch a command to every worker and consume the results in worker
/// order, keeping at most the window allowed by `prefetch` outstanding.
///
/// `consume` receives each result with the position of its worker. Results
/// arriving early are held until all results before them are consumed.
///
/// On failure, results still outstanding are awaited and discarded before
/// the error is returned.
pub(crate) async fn for_each_in_order<C, T, F, G>(
    cluster: &C,
    workers: &[WorkerId],
    prefetch: Prefetch,
    mut command_for: F,
    mut consume: G,
) -> Result<()>
where
    C: Cluster + ?Sized,
    T: Serializable,
    F: FnMut(WorkerId) -> Result<Command>,
    G: FnMut(usize, T) -> Result<()>,
{
    let window = prefetch.window(workers.len());
    let mut outstanding: VecDeque<Pending<T>> = VecDeque::with_capacity(window);
    let mut next = 0;

    let result = async {
        while next < workers.len() && outstanding.len() < window {
            let worker = workers[next];
            outstanding.push_back(cluster.submit(worker, command_for(worker)?).await?.decode());
            next += 1;
        }

        let mut index = 0;
        while let Some(pending) = outstanding.pop_front() {
            let value = pending.await?;

            if next < workers.len() {
                let worker = workers[next];
                trace!(%worker, "dispatching next in window");
                outstanding.push_back(cluster.submit(worker, command_for(worker)?).await?.decode());
                next += 1;
            }

            consume(index, value)?;
            index += 1;
        }

        Ok(())
    }
    .await;

    if result.is_err() {
        for pending in outstanding.drain(..) {
            let _ = pending.await;
        }
    }

    result
}
