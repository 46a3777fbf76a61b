//! Scattering arrays over workers and gathering them back.
//!
//! [`scatter_array`] cuts an array into contiguous slices along one axis, one
//! slice per worker, and stores every slice as a dynamic-dimensional
//! [`ArrayD`]. [`gather_array`] reassembles the slices of a [`Dataset`], in
//! worker order, into a single array allocated up front.
//!
//! ```
//! use cohort::{
//!     array::{gather_array, scatter_array, GatherOptions},
//!     runtime::{Cluster, Runtime},
//! };
//! use ndarray::{Array2, ArrayD, Axis};
//!
//! # #[tokio::main]
//! # async fn main() -> cohort::Result<()> {
//! let runtime = Runtime::in_memory(3).await?;
//! let array = Array2::from_shape_fn((10, 2), |(i, j)| (i * 2 + j) as f64);
//!
//! let dataset = scatter_array(&runtime, "a", &array, runtime.workers(), Axis(0)).await?;
//! let gathered: ArrayD<f64> = gather_array(&runtime, &dataset, GatherOptions::default()).await?;
//! assert_eq!(gathered, array.into_dyn());
//! # Ok(())
//! # }
//! ```
use std::{collections::HashSet, ops::Range};

use ndarray::{ArrayBase, ArrayD, Axis, Data, Dimension, IxDyn, Slice};
use tracing::{debug, instrument};

use crate::{
    dataset::{unscatter, Dataset},
    error::{Error, Result},
    placement::{describe, place},
    reduce::{for_each_in_order, Prefetch},
    runtime::Cluster,
    serializer::Serializable,
    slot::{SlotInfo, SlotValue},
    task::{Command, WorkerId},
};

/// Split `0..extent` into `parts` contiguous, non-empty ranges whose sizes
/// differ by at most one.
///
/// Part `i` (counting from one) covers `floor((i-1)*extent/parts)` up to, but
/// excluding, `floor(i*extent/parts)`.
pub fn partition(extent: usize, parts: usize) -> Result<Vec<Range<usize>>> {
    if parts == 0 {
        return Err(Error::NoWorkers);
    }
    if extent < parts {
        return Err(Error::Partition {
            extent,
            workers: parts,
        });
    }

    let bound = |i: usize| (i as u128 * extent as u128 / parts as u128) as usize;
    Ok((0..parts).map(|i| bound(i)..bound(i + 1)).collect())
}

/// Distribute `array` over `workers` along `axis`, binding each slice to
/// `name`.
///
/// Returns once every slice is stored.
#[instrument(
    skip(cluster, array, workers),
    fields(shape = ?array.shape(), workers = workers.len()),
    level = "debug"
)]
pub async fn scatter_array<C, T, S, D>(
    cluster: &C,
    name: &str,
    array: &ArrayBase<S, D>,
    workers: &[WorkerId],
    axis: Axis,
) -> Result<Dataset>
where
    C: Cluster + ?Sized,
    T: Serializable,
    S: Data<Elem = T>,
    D: Dimension,
{
    if axis.index() >= array.ndim() {
        return Err(Error::Shape(format!(
            "cannot split a {}-dimensional array along axis {}",
            array.ndim(),
            axis.index()
        )));
    }
    let mut seen = HashSet::with_capacity(workers.len());
    if let Some(&worker) = workers.iter().find(|&&worker| !seen.insert(worker)) {
        return Err(Error::DuplicateWorker(worker));
    }
    let ranges = partition(array.len_of(axis), workers.len())?;

    let serializer = cluster.serializer();
    let mut pending = Vec::with_capacity(workers.len());
    for (&worker, range) in workers.iter().zip(ranges) {
        let slice = array.slice_axis(axis, Slice::from(range)).into_dyn();
        let value = SlotValue::encode_as::<ArrayD<T>, _>(serializer, &slice)?;
        pending.push(place(cluster, worker, name, value).await?);
    }
    futures::future::try_join_all(pending).await?;

    Ok(Dataset::new(name, workers))
}

/// How [`gather_array`] collects the slices.
#[derive(Clone, Copy, Debug)]
pub struct GatherOptions {
    /// The axis the slices are concatenated along.
    pub axis: Axis,
    /// Free the slices once gathered.
    pub free: bool,
    pub prefetch: Prefetch,
}

impl Default for GatherOptions {
    fn default() -> Self {
        Self {
            axis: Axis(0),
            free: false,
            prefetch: Prefetch::default(),
        }
    }
}

fn array_shape(info: &SlotInfo, expected_tag: &str, worker: WorkerId) -> Result<Vec<usize>> {
    if info.type_tag != expected_tag {
        return Err(Error::Shape(format!(
            "worker {worker} holds `{}`, expected `{expected_tag}`",
            info.type_tag
        )));
    }
    info.shape
        .clone()
        .ok_or_else(|| Error::Shape(format!("worker {worker} does not hold an array")))
}

/// Reassemble the slices of `dataset` into one array.
///
/// Every slice must be an [`ArrayD<T>`] agreeing with the others on all
/// dimensions but `options.axis`.
#[instrument(skip(cluster, options), fields(name = dataset.name()), level = "debug")]
pub async fn gather_array<C, T>(
    cluster: &C,
    dataset: &Dataset,
    options: GatherOptions,
) -> Result<ArrayD<T>>
where
    C: Cluster + ?Sized,
    T: Serializable + Clone + Default,
{
    let workers = dataset.workers();
    let name = dataset.name();
    let Some(&first) = workers.first() else {
        return Err(Error::NoWorkers);
    };
    let expected_tag = std::any::type_name::<ArrayD<T>>();
    let axis = options.axis.index();

    let info = describe(cluster, first, name).await?.await?;
    let mut shape = array_shape(&info, expected_tag, first)?;
    if axis >= shape.len() {
        return Err(Error::Shape(format!(
            "cannot concatenate {}-dimensional slices along axis {axis}",
            shape.len()
        )));
    }

    // Per-worker extents along the axis.
    let mut extents = Vec::with_capacity(workers.len());
    for_each_in_order(
        cluster,
        workers,
        options.prefetch,
        |_| {
            Ok(Command::Describe {
                name: name.to_string(),
            })
        },
        |index, info: SlotInfo| {
            let worker = workers[index];
            let local = array_shape(&info, expected_tag, worker)?;
            let agrees = local.len() == shape.len()
                && local
                    .iter()
                    .zip(&shape)
                    .enumerate()
                    .all(|(dim, (a, b))| dim == axis || a == b);
            if !agrees {
                return Err(Error::Shape(format!(
                    "worker {worker} holds a slice of shape {local:?}, \
                     incompatible with {shape:?} along axis {axis}"
                )));
            }
            extents.push(local[axis]);
            Ok(())
        },
    )
    .await?;

    shape[axis] = extents.iter().sum();
    debug!(?shape, "allocating gathered array");
    let mut result = ArrayD::<T>::default(IxDyn(&shape));

    let mut offsets = Vec::with_capacity(extents.len() + 1);
    offsets.push(0);
    for extent in &extents {
        offsets.push(offsets[offsets.len() - 1] + extent);
    }

    for_each_in_order(
        cluster,
        workers,
        options.prefetch,
        |_| {
            Ok(Command::Fetch {
                name: name.to_string(),
            })
        },
        |index, slice: ArrayD<T>| {
            let range = offsets[index]..offsets[index + 1];
            let mut target = result.slice_axis_mut(options.axis, Slice::from(range));
            if target.shape() != slice.shape() {
                return Err(Error::Shape(format!(
                    "slice on worker {} changed shape to {:?} while gathering",
                    workers[index],
                    slice.shape()
                )));
            }
            target.assign(&slice);
            Ok(())
        },
    )
    .await?;

    if options.free {
        unscatter(cluster, dataset).await?;
    }

    Ok(result)
}

#[cfg(test)]
mod test {
    use ndarray::{Array1, Array2, Array3};

    use super::*;
    use crate::{
        placement::{fetch, save_at},
        runtime::Runtime,
        task::FailureKind,
        test_utils::Counting,
    };

    #[test]
    fn partition_covers_extent_evenly() {
        let ranges = partition(10, 3).unwrap();
        assert_eq!(ranges, vec![0..3, 3..6, 6..10]);

        for (extent, parts) in [(1, 1), (7, 7), (1000, 3), (5, 2), (97, 8)] {
            let ranges = partition(extent, parts).unwrap();
            assert_eq!(ranges.len(), parts);
            assert_eq!(ranges[0].start, 0);
            assert_eq!(ranges[parts - 1].end, extent);
            assert!(ranges.windows(2).all(|w| w[0].end == w[1].start));

            let sizes = ranges.iter().map(|r| r.len()).collect::<Vec<_>>();
            let (min, max) = (sizes.iter().min().unwrap(), sizes.iter().max().unwrap());
            assert!(*min >= 1 && max - min <= 1);
        }
    }

    #[test]
    fn partition_rejects_short_extents() {
        assert!(matches!(
            partition(2, 3),
            Err(Error::Partition { extent: 2, workers: 3 })
        ));
        assert!(matches!(partition(5, 0), Err(Error::NoWorkers)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scatter_stores_contiguous_slices() {
        let runtime = Runtime::in_memory(3).await.unwrap();
        let array = Array1::from_iter((0..10).map(f64::from));

        let dataset = scatter_array(&runtime, "a", &array, runtime.workers(), Axis(0))
            .await
            .unwrap();
        assert_eq!(dataset.workers(), runtime.workers());

        let mut lengths = Vec::new();
        for &worker in dataset.workers() {
            let slice: ArrayD<f64> = fetch(&runtime, worker, "a").await.unwrap().await.unwrap();
            lengths.push(slice.len());
        }
        assert_eq!(lengths, vec![3, 3, 4]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scatter_fails_without_dispatch_when_too_short() {
        let runtime = Runtime::in_memory(3).await.unwrap();
        let array = Array1::<f64>::zeros(2);
        let result = scatter_array(&runtime, "a", &array, runtime.workers(), Axis(0)).await;
        assert!(matches!(result, Err(Error::Partition { .. })));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scatter_rejects_repeated_workers() {
        let cluster = Counting::new(Runtime::in_memory(2).await.unwrap());
        let w0 = cluster.workers()[0];
        let array = Array1::from_iter((0..6).map(f64::from));

        let result = scatter_array(&cluster, "a", &array, &[w0, w0], Axis(0)).await;
        assert!(matches!(result, Err(Error::DuplicateWorker(worker)) if worker == w0));
        assert_eq!(cluster.submitted(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn gather_inverts_scatter_along_any_axis() {
        let runtime = Runtime::in_memory(3).await.unwrap();
        let array = Array3::from_shape_fn((4, 5, 6), |(i, j, k)| (i * 100 + j * 10 + k) as i64);

        for axis in 0..3 {
            let name = format!("a{axis}");
            let dataset = scatter_array(&runtime, &name, &array, runtime.workers(), Axis(axis))
                .await
                .unwrap();
            for prefetch in [Prefetch::All, Prefetch::Ahead(0), Prefetch::Ahead(1)] {
                let options = GatherOptions {
                    axis: Axis(axis),
                    free: false,
                    prefetch,
                };
                let gathered: ArrayD<i64> =
                    gather_array(&runtime, &dataset, options).await.unwrap();
                assert_eq!(gathered, array.clone().into_dyn());
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn gather_can_free_slices() {
        let runtime = Runtime::in_memory(2).await.unwrap();
        let array = Array2::<f64>::ones((4, 2));
        let dataset = scatter_array(&runtime, "a", &array, runtime.workers(), Axis(0))
            .await
            .unwrap();

        let options = GatherOptions {
            free: true,
            ..Default::default()
        };
        let gathered: ArrayD<f64> = gather_array(&runtime, &dataset, options).await.unwrap();
        assert_eq!(gathered.shape(), [4, 2]);

        let err = fetch::<_, ArrayD<f64>>(&runtime, dataset.workers()[0], "a")
            .await
            .unwrap()
            .await
            .unwrap_err();
        assert_eq!(err.remote_kind(), Some(FailureKind::UndefinedSlot));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn gather_rejects_incompatible_slices() {
        let runtime = Runtime::in_memory(2).await.unwrap();
        let workers = runtime.workers().to_vec();
        for (&worker, columns) in workers.iter().zip([3, 4]) {
            let slice = ArrayD::<f64>::zeros(IxDyn(&[2, columns]));
            save_at(&runtime, worker, "a", &slice).await.unwrap().await.unwrap();
        }

        let dataset = Dataset::new("a", workers);
        let result = gather_array::<_, f64>(&runtime, &dataset, GatherOptions::default()).await;
        assert!(matches!(result, Err(Error::Shape(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn gather_rejects_non_arrays() {
        let runtime = Runtime::in_memory(1).await.unwrap();
        let workers = runtime.workers().to_vec();
        save_at(&runtime, workers[0], "a", &vec![1.0f64, 2.0])
            .await
            .unwrap()
            .await
            .unwrap();

        let dataset = Dataset::new("a", workers);
        let result = gather_array::<_, f64>(&runtime, &dataset, GatherOptions::default()).await;
        assert!(matches!(result, Err(Error::Shape(_))));
    }
}
