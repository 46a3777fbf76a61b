//! Running computations on every worker of a dataset.
//!
//! - [`dexec`] mutates each piece of a dataset in place.
//! - [`dtransform`] computes a new piece on every worker and binds it to a
//!   slot, yielding the new [`Dataset`].
//! - [`dmap`] runs one call per worker, built from a per-worker argument, and
//!   ships the results back in worker order.
//!
//! None of these move worker-local data to the coordinator, except for the
//! results [`dmap`] is asked for.
use futures::future::try_join_all;
use tracing::instrument;

use crate::{
    dataset::{Dataset, IntoSelection},
    error::{Error, Result},
    operation::{Mutation, Operation},
    placement::{evaluate_command, get_from, Call},
    runtime::{Cluster, Pending},
    task::{Disposition, WorkerId},
};

/// Apply `mutation` to the piece of a single dataset on every one of its
/// workers, storing the result back in place.
///
/// Returns once every worker has applied it.
#[instrument(skip_all, fields(operation = M::NAME), level = "debug")]
pub async fn dexec<C, S, M>(cluster: &C, selection: S, mutation: &M) -> Result<()>
where
    C: Cluster + ?Sized,
    S: IntoSelection,
    M: Mutation,
{
    let selection = selection.into_selection()?;
    let [name] = selection.names() else {
        return Err(Error::Arity {
            expected: 1,
            found: selection.arity(),
        });
    };

    let op = cluster.serializer().to_bytes(mutation)?;
    let mut pending: Vec<Pending<()>> = Vec::with_capacity(selection.workers().len());
    for &worker in selection.workers() {
        let command = evaluate_command::<M>(
            op.clone(),
            vec![name.clone()],
            Disposition::Store(name.clone()),
        );
        pending.push(cluster.submit(worker, command).await?.decode());
    }
    try_join_all(pending).await?;

    Ok(())
}

/// Run `op` on every worker of `selection`, binding each output to `target`.
///
/// Without a target, the output replaces the first bound slot. The outputs
/// stay on the workers; the returned dataset names them.
#[instrument(skip_all, fields(operation = Op::NAME, target), level = "debug")]
pub async fn dtransform<C, S, Op>(
    cluster: &C,
    selection: S,
    op: &Op,
    target: Option<&str>,
) -> Result<Dataset>
where
    C: Cluster + ?Sized,
    S: IntoSelection,
    Op: Operation,
{
    let selection = selection.into_selection()?;
    let target = match (target, selection.names().first()) {
        (Some(target), _) => target.to_string(),
        (None, Some(first)) => first.clone(),
        (None, None) => {
            return Err(Error::Arity {
                expected: 1,
                found: 0,
            })
        }
    };

    let op = cluster.serializer().to_bytes(op)?;
    let mut pending: Vec<Pending<()>> = Vec::with_capacity(selection.workers().len());
    for &worker in selection.workers() {
        let command = evaluate_command::<Op>(
            op.clone(),
            selection.names().to_vec(),
            Disposition::Store(target.clone()),
        );
        pending.push(cluster.submit(worker, command).await?.decode());
    }
    try_join_all(pending).await?;

    Ok(Dataset::new(target, selection.workers()))
}

/// Run `f(args[i])` on `workers[i]`, for every `i`, and collect the outputs
/// in worker order.
///
/// All calls are dispatched before any output is awaited.
#[instrument(skip_all, fields(workers = workers.len()), level = "debug")]
pub async fn dmap<C, A, Op, F>(
    cluster: &C,
    args: Vec<A>,
    mut f: F,
    workers: &[WorkerId],
) -> Result<Vec<Op::Output>>
where
    C: Cluster + ?Sized,
    Op: Operation,
    F: FnMut(A) -> Call<Op>,
{
    if args.len() != workers.len() {
        return Err(Error::ArgumentCount {
            expected: workers.len(),
            found: args.len(),
        });
    }

    let mut pending = Vec::with_capacity(workers.len());
    for (arg, &worker) in args.into_iter().zip(workers) {
        pending.push(get_from(cluster, worker, f(arg)).await?);
    }

    try_join_all(pending).await
}

pub use dmap as dpmap;

#[cfg(test)]
mod test {
    use ndarray::{Array1, Array2, ArrayD, Axis};

    use super::*;
    use crate::{
        array::{gather_array, scatter_array, GatherOptions},
        dataset::Selection,
        placement::{fetch, save_at},
        runtime::Runtime,
        task::FailureKind,
        test_utils::{Add, Concat, Counting, Double, Echo, Identity, Scale},
    };

    #[tokio::test(flavor = "multi_thread")]
    async fn dexec_mutates_in_place() {
        let runtime = Runtime::in_memory(3).await.unwrap();
        let array = Array1::from_iter((0..9).map(f64::from));
        let dataset = scatter_array(&runtime, "a", &array, runtime.workers(), Axis(0))
            .await
            .unwrap();

        dexec(&runtime, &dataset, &Double).await.unwrap();

        let gathered: ArrayD<f64> = gather_array(&runtime, &dataset, GatherOptions::default())
            .await
            .unwrap();
        assert_eq!(gathered, (array * 2.0).into_dyn());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dexec_rejects_multiple_slots() {
        let cluster = Counting::new(Runtime::in_memory(2).await.unwrap());
        let a = Dataset::new("a", cluster.workers());
        let b = Dataset::new("b", cluster.workers());

        let result = dexec(&cluster, &[a, b], &Double).await;
        assert!(matches!(result, Err(Error::Arity { expected: 1, found: 2 })));
        assert_eq!(cluster.submitted(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dtransform_identity_and_new_target() {
        let runtime = Runtime::in_memory(3).await.unwrap();
        let array = Array2::from_shape_fn((7, 2), |(i, j)| (i * 2 + j) as f64);
        let dataset = scatter_array(&runtime, "a", &array, runtime.workers(), Axis(0))
            .await
            .unwrap();

        let same = dtransform(&runtime, &dataset, &Identity, None).await.unwrap();
        assert_eq!(same, dataset);
        let gathered: ArrayD<f64> = gather_array(&runtime, &dataset, GatherOptions::default())
            .await
            .unwrap();
        assert_eq!(gathered, array.clone().into_dyn());

        let doubled = dtransform(&runtime, &dataset, &Double, Some("b")).await.unwrap();
        assert_eq!(doubled.name(), "b");
        let original: ArrayD<f64> = gather_array(&runtime, &dataset, GatherOptions::default())
            .await
            .unwrap();
        let derived: ArrayD<f64> = gather_array(&runtime, &doubled, GatherOptions::default())
            .await
            .unwrap();
        assert_eq!(original, array.clone().into_dyn());
        assert_eq!(derived, (array * 2.0).into_dyn());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dtransform_binds_zipped_datasets() {
        let runtime = Runtime::in_memory(2).await.unwrap();
        let x = Array1::from_iter((0..6).map(f64::from));
        let y = Array1::from_elem(6, 10.0);
        let a = scatter_array(&runtime, "x", &x, runtime.workers(), Axis(0)).await.unwrap();
        let b = scatter_array(&runtime, "y", &y, runtime.workers(), Axis(0)).await.unwrap();

        let sum = dtransform(&runtime, &[a.clone(), b], &Add, Some("sum")).await.unwrap();
        assert_eq!(sum.name(), "sum");
        assert_eq!(sum.workers(), a.workers());

        let gathered: ArrayD<f64> = gather_array(&runtime, &sum, GatherOptions::default())
            .await
            .unwrap();
        assert_eq!(gathered, (x + y).into_dyn());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dtransform_defaults_to_first_slot() {
        let runtime = Runtime::in_memory(2).await.unwrap();
        let workers = runtime.workers().to_vec();
        for &worker in &workers {
            save_at(&runtime, worker, "v", &vec![1.0f64, 2.0]).await.unwrap().await.unwrap();
        }

        let selection = Selection::single("v", workers.clone());
        let dataset = dtransform(&runtime, selection, &Scale(3.0), None)
            .await
            .unwrap();
        assert_eq!(dataset.name(), "v");

        let value: Vec<f64> = fetch(&runtime, workers[1], "v").await.unwrap().await.unwrap();
        assert_eq!(value, vec![3.0, 6.0]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dmap_returns_results_in_worker_order() {
        let runtime = Runtime::in_memory(4).await.unwrap();
        let args = vec![4u64, 3, 2, 1];
        let results = dmap(&runtime, args, |n| Call::new(Echo(n * 10)), runtime.workers())
            .await
            .unwrap();
        assert_eq!(results, vec![40, 30, 20, 10]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dmap_binds_per_worker_slots() {
        let runtime = Runtime::in_memory(2).await.unwrap();
        let workers = runtime.workers().to_vec();
        for (&worker, word) in workers.iter().zip(["ab", "cd"]) {
            save_at(&runtime, worker, "w", &word.to_string()).await.unwrap().await.unwrap();
        }

        let results = dpmap(
            &runtime,
            vec!["w", "w"],
            |slot| Call::new(Concat).arg(slot).arg(slot),
            &workers,
        )
        .await
        .unwrap();
        assert_eq!(results, ["abab", "cdcd"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dmap_checks_argument_count() {
        let cluster = Counting::new(Runtime::in_memory(3).await.unwrap());
        let result = dmap(&cluster, vec![1u64, 2], |n| Call::new(Echo(n)), cluster.workers()).await;

        assert!(matches!(result, Err(Error::ArgumentCount { expected: 3, found: 2 })));
        assert_eq!(cluster.submitted(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dmap_surfaces_worker_failures() {
        let runtime = Runtime::in_memory(2).await.unwrap();
        let result = dmap(
            &runtime,
            vec!["missing", "missing"],
            |slot| Call::on(Scale(1.0), slot),
            runtime.workers(),
        )
        .await;
        assert_eq!(result.unwrap_err().remote_kind(), Some(FailureKind::UndefinedSlot));
    }
}
