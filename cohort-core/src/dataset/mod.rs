//! Handles to data distributed over a set of workers.
//!
//! A [`Dataset`] names a slot that holds one piece of a logical whole on each
//! of an ordered list of workers. The handle itself is plain data: it can be
//! cloned, compared and sent across tasks, and owns nothing on the workers.
//! [`unscatter`] frees the pieces explicitly.
//!
//! Primitives that run a computation on every worker of a dataset take an
//! [`IntoSelection`], which resolves one or more datasets into the slots to
//! bind and the workers to bind them on.
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    error::{Error, Result},
    placement::remove_from,
    runtime::Cluster,
    task::WorkerId,
};

/// A slot name together with the ordered workers holding a piece under it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dataset {
    name: String,
    workers: Vec<WorkerId>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, workers: impl Into<Vec<WorkerId>>) -> Self {
        Self {
            name: name.into(),
            workers: workers.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The workers holding a piece, in the order the pieces make up the whole.
    pub fn workers(&self) -> &[WorkerId] {
        &self.workers
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

/// Free every piece of `dataset`, returning once all workers have done so.
///
/// The handle stays valid as a value, but reads through it fail afterwards.
#[instrument(skip(cluster), fields(name = dataset.name()), level = "debug")]
pub async fn unscatter<C: Cluster + ?Sized>(cluster: &C, dataset: &Dataset) -> Result<()> {
    let mut pending = Vec::with_capacity(dataset.workers.len());
    for &worker in &dataset.workers {
        pending.push(remove_from(cluster, worker, &dataset.name).await?);
    }
    try_join_all(pending).await?;

    Ok(())
}

/// The slots a computation binds, and the workers it runs on.
///
/// On every worker, the slots are bound in order as the computation's input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    names: Vec<String>,
    workers: Vec<WorkerId>,
}

impl Selection {
    /// Bind the slots `names`, assumed to exist on every one of `workers`.
    pub fn new(names: Vec<String>, workers: impl Into<Vec<WorkerId>>) -> Self {
        Self {
            names,
            workers: workers.into(),
        }
    }

    /// Bind the single slot `name` on every one of `workers`.
    pub fn single(name: impl Into<String>, workers: impl Into<Vec<WorkerId>>) -> Self {
        Self::new(vec![name.into()], workers)
    }

    /// Bind the pieces of several datasets positionally.
    ///
    /// The datasets must live on exactly the same workers in the same order.
    pub fn zip(datasets: &[Dataset]) -> Result<Self> {
        let Some((first, rest)) = datasets.split_first() else {
            return Ok(Self::new(Vec::new(), Vec::new()));
        };

        if let Some(other) = rest.iter().find(|other| other.workers != first.workers) {
            return Err(Error::DistributionMismatch {
                first: first.name.clone(),
                expected: first.workers.clone(),
                other: other.name.clone(),
                found: other.workers.clone(),
            });
        }

        Ok(Self::new(
            datasets.iter().map(|d| d.name.clone()).collect(),
            first.workers.clone(),
        ))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn workers(&self) -> &[WorkerId] {
        &self.workers
    }

    /// The number of slots bound per worker.
    pub fn arity(&self) -> usize {
        self.names.len()
    }
}

/// Conversion into a [`Selection`], validating the distribution of datasets
/// bound together.
pub trait IntoSelection {
    fn into_selection(self) -> Result<Selection>;
}

impl IntoSelection for Selection {
    fn into_selection(self) -> Result<Selection> {
        Ok(self)
    }
}

impl IntoSelection for &Selection {
    fn into_selection(self) -> Result<Selection> {
        Ok(self.clone())
    }
}

impl IntoSelection for &Dataset {
    fn into_selection(self) -> Result<Selection> {
        Ok(Selection::single(self.name.clone(), self.workers.clone()))
    }
}

impl IntoSelection for &[Dataset] {
    fn into_selection(self) -> Result<Selection> {
        Selection::zip(self)
    }
}

impl<const N: usize> IntoSelection for &[Dataset; N] {
    fn into_selection(self) -> Result<Selection> {
        Selection::zip(self)
    }
}

impl IntoSelection for &Vec<Dataset> {
    fn into_selection(self) -> Result<Selection> {
        Selection::zip(self)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        placement::{fetch, save_at},
        runtime::Runtime,
        task::FailureKind,
    };

    #[test]
    fn zip_requires_identical_distribution() {
        let a = Dataset::new("a", vec![WorkerId(0), WorkerId(1)]);
        let b = Dataset::new("b", vec![WorkerId(1), WorkerId(0)]);
        let c = Dataset::new("c", vec![WorkerId(0), WorkerId(1)]);

        assert!(matches!(
            Selection::zip(&[a.clone(), b]),
            Err(Error::DistributionMismatch { .. })
        ));

        let selection = Selection::zip(&[a, c]).unwrap();
        assert_eq!(selection.names(), ["a", "c"]);
        assert_eq!(selection.workers(), [WorkerId(0), WorkerId(1)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unscatter_frees_every_piece() {
        let runtime = Runtime::in_memory(3).await.unwrap();
        let dataset = Dataset::new("d", runtime.workers());
        for &worker in dataset.workers() {
            save_at(&runtime, worker, "d", &worker.0).await.unwrap().await.unwrap();
        }

        unscatter(&runtime, &dataset).await.unwrap();

        for &worker in dataset.workers() {
            let err = fetch::<_, u32>(&runtime, worker, "d")
                .await
                .unwrap()
                .await
                .unwrap_err();
            assert_eq!(err.remote_kind(), Some(FailureKind::UndefinedSlot));
        }
    }
}
