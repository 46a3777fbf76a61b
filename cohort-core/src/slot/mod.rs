//! Worker-local named storage.
//!
//! Each worker owns a [`SlotStore`], a map from slot names to
//! [`SlotValue`]s. Values are kept serialized alongside the name of their Rust
//! type, so a worker can store, return and bind values it has no static
//! knowledge of. The type tag is checked whenever a value is consumed as a
//! specific type.
//!
//! A slot holds at most one value. Binding a name that is already bound
//! replaces the previous value, and removing a name vacates the slot.
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::{
    serializer::{Serializable, Serializer},
    task::RemoteFailure,
};

/// A serialized value tagged with the name of its type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotValue {
    pub type_tag: String,
    pub bytes: Bytes,
}

impl SlotValue {
    /// Serialize `value`, tagging it with its own type.
    pub fn encode<T: Serialize>(serializer: Serializer, value: &T) -> anyhow::Result<Self> {
        Self::encode_as::<T, T>(serializer, value)
    }

    /// Serialize `value`, tagging it as a `T`.
    ///
    /// `V` must serialize exactly as `T` does, e.g. an array view standing in
    /// for the owned array.
    pub fn encode_as<T, V>(serializer: Serializer, value: &V) -> anyhow::Result<Self>
    where
        V: Serialize + ?Sized,
    {
        Ok(Self {
            type_tag: std::any::type_name::<T>().to_string(),
            bytes: serializer.to_bytes(&value)?,
        })
    }

    /// Whether this value was encoded as a `T`.
    pub fn is<T>(&self) -> bool {
        self.type_tag == std::any::type_name::<T>()
    }

    /// Decode the value as a `T`, checking its type tag first.
    pub fn decode<T: Serializable>(&self, serializer: Serializer) -> Result<T, RemoteFailure> {
        if !self.is::<T>() {
            return Err(RemoteFailure::type_mismatch(
                "value",
                std::any::type_name::<T>(),
                &self.type_tag,
            ));
        }
        serializer
            .from_bytes(&self.bytes)
            .map_err(RemoteFailure::codec)
    }
}

/// Type and shape metadata of a stored value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub type_tag: String,
    /// The full shape, if the value is a dynamic-dimensional `ndarray` array.
    pub shape: Option<Vec<usize>>,
}

/// The leading fields of `ndarray`'s serde representation of an array.
///
/// The element data that follows is left undecoded, so the shape of an array
/// can be read without knowing its element type.
#[derive(Deserialize)]
struct ArrayHeader {
    #[allow(dead_code)]
    v: u8,
    dim: Vec<usize>,
}

const ARRAY_TAG_PREFIX: &str = "ndarray::ArrayBase<";
const DYN_DIM_MARKER: &str = "IxDynImpl";

fn is_dyn_array(type_tag: &str) -> bool {
    type_tag.starts_with(ARRAY_TAG_PREFIX) && type_tag.contains(DYN_DIM_MARKER)
}

/// The slots of one worker.
#[derive(Clone, Debug, Default)]
pub struct SlotStore {
    slots: Arc<DashMap<String, SlotValue>>,
}

impl SlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` to `name`, replacing any previous binding.
    pub fn put(&self, name: impl Into<String>, value: SlotValue) {
        self.slots.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Result<SlotValue, RemoteFailure> {
        self.slots
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RemoteFailure::undefined_slot(name))
    }

    /// Vacate `name`. Returns whether the slot was bound.
    pub fn remove(&self, name: &str) -> bool {
        self.slots.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Report the type tag of a slot and, for arrays, its shape.
    pub fn describe(&self, name: &str, serializer: Serializer) -> Result<SlotInfo, RemoteFailure> {
        let value = self.get(name)?;
        let shape = if is_dyn_array(&value.type_tag) {
            let header: ArrayHeader = serializer
                .from_bytes(&value.bytes)
                .map_err(RemoteFailure::codec)?;
            Some(header.dim)
        } else {
            None
        };

        Ok(SlotInfo {
            type_tag: value.type_tag,
            shape,
        })
    }
}
