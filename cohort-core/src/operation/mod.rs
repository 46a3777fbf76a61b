//! Remote operation traits.
//!
//! Operations are the computations a coordinator asks workers to run against
//! their worker-local data. An operation is a serializable value (its fields
//! are shipped along with it) that maps an input to an output, akin to a
//! function. Its input is not sent by the coordinator: it is bound on the
//! worker from the slots named at dispatch.
//!
//! ## [`Operation`]
//! The general form. The values of the bound slots are assembled into
//! [`Operation::Input`]:
//! - no slots bind `()`,
//! - a single slot binds its value as is,
//! - `k` slots bind a `k`-tuple of their values, in order.
//!
//! The types of the bound values are checked against `Input` before anything
//! is decoded, so a multi-slot `Input` must be exactly that tuple.
//!
//! ## [`Mutation`]
//! An in-place update of a single worker-local value. Every [`Mutation`] is an
//! [`Operation`] from its element to its element, so it can be stored back
//! under the slot it was read from.
//!
//! # Example
//!
//! ```
//! use cohort::{RemoteExecute, operation::{Operation, Result}};
//! use ndarray::ArrayD;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, RemoteExecute)]
//! struct SumOfSquares;
//!
//! impl Operation for SumOfSquares {
//!     type Input = ArrayD<f64>;
//!     type Output = f64;
//!
//!     fn execute(&self, input: Self::Input) -> Result<Self::Output> {
//!         Ok(input.iter().map(|x| x * x).sum())
//!     }
//! }
//! ```
//!
//! ### An [`Operation`] binding two slots:
//!
//! ```
//! use cohort::{RemoteExecute, operation::{Operation, Result}};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, RemoteExecute)]
//! struct Dot;
//!
//! impl Operation for Dot {
//!     type Input = (Vec<f64>, Vec<f64>);
//!     type Output = f64;
//!
//!     fn execute(&self, (a, b): Self::Input) -> Result<Self::Output> {
//!         Ok(a.iter().zip(&b).map(|(x, y)| x * y).sum())
//!     }
//! }
//! ```
use std::fmt::Debug;

use crate::serializer::Serializable;

mod error;
pub(crate) mod registry;

pub use error::*;

/// An operation that is identifiable by the runtime in a distributed
/// environment.
///
/// This will be automatically implemented by the
/// [`RemoteExecute`](crate::RemoteExecute) derive macro.
pub trait RemoteExecute {
    /// The name under which a worker finds the operation.
    const NAME: &'static str;
}

/// An operation that can be performed by a worker.
pub trait Operation: RemoteExecute + Serializable {
    /// The input type of the operation.
    type Input: Serializable + Debug;
    /// The output type of the operation.
    type Output: Serializable + Debug;

    /// Execute the operation on the given input.
    fn execute(&self, input: Self::Input) -> Result<Self::Output>;
}

/// An in-place update of a worker-local value.
pub trait Mutation: RemoteExecute + Serializable {
    type Elem: Serializable + Debug;

    fn mutate(&self, elem: &mut Self::Elem) -> Result<()>;
}

/// A [`Mutation`] maps its element to the mutated element.
impl<T> Operation for T
where
    T: Mutation,
{
    type Input = T::Elem;
    type Output = T::Elem;

    fn execute(&self, mut input: Self::Input) -> Result<Self::Output> {
        self.mutate(&mut input)?;
        Ok(input)
    }
}
