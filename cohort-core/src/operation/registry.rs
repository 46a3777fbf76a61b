//! Lookup and execution of registered operations on a worker.
//!
//! Every type deriving [`RemoteExecute`](crate::RemoteExecute) contributes a
//! [`Registration`] to [`OPERATIONS`]. A worker resolves the name carried by
//! an evaluation command against that slice, and the registration's execution
//! function takes it from there.
use std::{any::Any, collections::HashMap, panic::AssertUnwindSafe, sync::OnceLock};

use bytes::Bytes;
use futures::future::BoxFuture;
use linkme::distributed_slice;
use tracing::{debug, warn};

use super::{Operation, OperationError, Result};
use crate::{serializer::Serializer, slot::SlotValue};

/// The inputs to one execution of a registered operation.
pub struct Invocation {
    pub serializer: Serializer,
    /// The serialized operation.
    pub op: Bytes,
    /// The bound slots and their values, in binding order.
    pub inputs: Vec<(String, SlotValue)>,
}

pub type ExecuteFn = fn(Invocation) -> BoxFuture<'static, Result<SlotValue>>;

pub struct Registration {
    pub name: &'static str,
    pub execute: ExecuteFn,
}

#[distributed_slice]
pub static OPERATIONS: [Registration];

/// Find the execution function registered under `name`.
pub fn lookup(name: &str) -> Option<ExecuteFn> {
    static INDEX: OnceLock<HashMap<&'static str, ExecuteFn>> = OnceLock::new();

    INDEX
        .get_or_init(|| {
            let mut index = HashMap::with_capacity(OPERATIONS.len());
            for registration in OPERATIONS {
                if index.insert(registration.name, registration.execute).is_some() {
                    warn!(name = registration.name, "operation registered more than once");
                }
            }
            index
        })
        .get(name)
        .copied()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Check the tags of the bound values against the input type `I`.
///
/// A single bound value is consumed as is. Any other number of values is
/// consumed as the tuple of their types in binding order, so `I` must be
/// exactly that tuple. Self-describing formats aside, a mistyped value would
/// otherwise decode into garbage.
fn check_input_tags<I>(inputs: &[(String, SlotValue)]) -> Result<()> {
    let expected = std::any::type_name::<I>();
    let (slot, found) = match inputs {
        [(slot, value)] => (slot.clone(), value.type_tag.clone()),
        _ => {
            let slots = inputs.iter().map(|(slot, _)| slot.as_str()).collect::<Vec<_>>();
            let tags = inputs
                .iter()
                .map(|(_, value)| value.type_tag.as_str())
                .collect::<Vec<_>>();
            (slots.join(", "), format!("({})", tags.join(", ")))
        }
    };

    if found == expected {
        Ok(())
    } else {
        Err(OperationError::TypeMismatch {
            slot,
            expected: expected.to_string(),
            found,
        })
    }
}

/// Execute `Op` on the values bound by `invocation`.
///
/// The operation runs on the blocking thread pool, as it is arbitrary and
/// likely CPU bound user code. Panics are caught and reported as errors.
pub fn execute<Op: Operation>(invocation: Invocation) -> BoxFuture<'static, Result<SlotValue>> {
    Box::pin(async move {
        let Invocation {
            serializer,
            op,
            inputs,
        } = invocation;

        let op: Op = serializer.from_bytes(&op).map_err(OperationError::Codec)?;

        check_input_tags::<Op::Input>(&inputs)?;

        let parts = inputs
            .iter()
            .map(|(_, value)| value.bytes.clone())
            .collect::<Vec<_>>();
        let input: Op::Input = serializer
            .compose_tuple(&parts)
            .and_then(|bytes| serializer.from_bytes(&bytes))
            .map_err(OperationError::Codec)?;

        debug!(operation = Op::NAME, arity = parts.len(), "executing operation");

        let output = tokio::task::spawn_blocking(move || {
            match std::panic::catch_unwind(AssertUnwindSafe(|| op.execute(input))) {
                Ok(result) => result,
                Err(payload) => Err(OperationError::Panicked(panic_message(payload.as_ref()))),
            }
        })
        .await
        .map_err(|err| OperationError::Panicked(err.to_string()))??;

        SlotValue::encode(serializer, &output).map_err(OperationError::Codec)
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tuple_inputs_match_tags_in_binding_order() {
        let serializer = Serializer::Postcard;
        let a = SlotValue::encode(serializer, &-1i64).unwrap();
        let b = SlotValue::encode(serializer, &true).unwrap();
        let inputs = vec![("a".to_string(), a), ("b".to_string(), b)];

        assert!(check_input_tags::<(i64, bool)>(&inputs).is_ok());
        assert!(matches!(
            check_input_tags::<(bool, i64)>(&inputs),
            Err(OperationError::TypeMismatch { .. })
        ));
        assert!(matches!(
            check_input_tags::<(u64, u64)>(&inputs),
            Err(OperationError::TypeMismatch { slot, .. }) if slot == "a, b"
        ));
    }

    #[test]
    fn no_inputs_is_unit() {
        assert!(check_input_tags::<()>(&[]).is_ok());
        assert!(check_input_tags::<(u64,)>(&[]).is_err());
    }
}
