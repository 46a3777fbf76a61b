//! Serialization and deserialization of values moved between the coordinator
//! and its workers.
//!
//! Values placed on a worker are stored in their serialized form. A worker can
//! therefore hold, move and combine values without knowing their types; only
//! the operation that eventually consumes a value decodes it.
//!
//! # Examples
//!
//! ```rust
//! use cohort::serializer::Serializer;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct MyData {
//!    field: String,
//! }
//!
//! let data = MyData { field: "Hello, World!".to_string() };
//! let serialized = Serializer::Cbor.to_bytes(&data).unwrap();
//! let deserialized: MyData = Serializer::Cbor.from_bytes(&serialized).unwrap();
//! ```

use anyhow::Result;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::instrument;

use crate::config::{self, Config};

/// Represents a shorthand for common serialization and deserialization
/// behaviors.
///
/// Values travel between tasks and threads, hence the requirements for
/// `Send`, `Sync`, and `Unpin`.
pub trait Serializable: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {}
impl<T> Serializable for T where T: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {}

/// Largest tuple that [`Serializer::compose_tuple`] will assemble.
pub const MAX_TUPLE_ARITY: usize = 255;

/// Provides a unified interface for serializing and deserializing binary data.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
pub enum Serializer {
    #[default]
    Postcard,
    Cbor,
}

impl std::fmt::Display for Serializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Postcard => write!(f, "postcard"),
            Self::Cbor => write!(f, "cbor"),
        }
    }
}

impl Serializer {
    /// Serializes the given value into binary data using the specified format.
    #[instrument(skip(value), level = "trace")]
    pub fn to_bytes<T: Serialize>(&self, value: &T) -> Result<Bytes> {
        match self {
            Self::Postcard => Ok(postcard::to_allocvec(value)?.into()),
            Self::Cbor => {
                let mut result = Vec::new();
                ciborium::into_writer(value, &mut result)?;
                Ok(result.into())
            }
        }
    }

    /// Deserializes the given binary data into a value of the specified type
    /// using the specified format.
    ///
    /// Trailing data after the decoded value is ignored.
    #[instrument(skip(bytes), level = "trace")]
    pub fn from_bytes<T: for<'a> Deserialize<'a>>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Self::Postcard => Ok(postcard::from_bytes(bytes)?),
            Self::Cbor => Ok(ciborium::from_reader(bytes)?),
        }
    }

    /// Assembles the encoding of a tuple from the encodings of its elements,
    /// without decoding them.
    ///
    /// - No parts produce the encoding of `()`.
    /// - A single part is returned as is, so a lone value binds as itself
    ///   rather than as a 1-tuple.
    /// - `k` parts produce the encoding of a `k`-tuple.
    pub fn compose_tuple(&self, parts: &[Bytes]) -> Result<Bytes> {
        match parts {
            [] => self.to_bytes(&()),
            [single] => Ok(single.clone()),
            _ if parts.len() > MAX_TUPLE_ARITY => {
                anyhow::bail!(
                    "cannot bind {} values, at most {MAX_TUPLE_ARITY} are supported",
                    parts.len()
                )
            }
            _ => {
                let len = parts.iter().map(Bytes::len).sum::<usize>();
                let mut buf = BytesMut::with_capacity(len + 2);
                match self {
                    // Postcard encodes tuples as the plain concatenation of their elements.
                    Self::Postcard => {}
                    // CBOR encodes tuples as definite-length arrays (major type 4).
                    Self::Cbor => {
                        if parts.len() < 24 {
                            buf.put_u8(0x80 | parts.len() as u8);
                        } else {
                            buf.put_u8(0x98);
                            buf.put_u8(parts.len() as u8);
                        }
                    }
                }
                for part in parts {
                    buf.put_slice(part);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl From<&Config> for Serializer {
    fn from(config: &Config) -> Self {
        match config.serializer {
            config::Serializer::Postcard => Self::Postcard,
            config::Serializer::Cbor => Self::Cbor,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn composed<A: Serialize, B: Serialize, C: Serialize>(
        serializer: Serializer,
        a: &A,
        b: &B,
        c: &C,
    ) -> Bytes {
        let parts = [
            serializer.to_bytes(a).unwrap(),
            serializer.to_bytes(b).unwrap(),
            serializer.to_bytes(c).unwrap(),
        ];
        serializer.compose_tuple(&parts).unwrap()
    }

    #[test]
    fn composed_parts_decode_as_tuple() {
        for serializer in [Serializer::Postcard, Serializer::Cbor] {
            let bytes = composed(serializer, &vec![1.5f64, 2.5], &"label", &7u32);
            let decoded: (Vec<f64>, String, u32) = serializer.from_bytes(&bytes).unwrap();
            assert_eq!(decoded, (vec![1.5, 2.5], "label".to_string(), 7));
        }
    }

    #[test]
    fn single_part_binds_as_itself() {
        for serializer in [Serializer::Postcard, Serializer::Cbor] {
            let part = serializer.to_bytes(&vec![1u8, 2, 3]).unwrap();
            let bytes = serializer.compose_tuple(&[part]).unwrap();
            let decoded: Vec<u8> = serializer.from_bytes(&bytes).unwrap();
            assert_eq!(decoded, vec![1, 2, 3]);
        }
    }

    #[test]
    fn no_parts_bind_as_unit() {
        for serializer in [Serializer::Postcard, Serializer::Cbor] {
            let bytes = serializer.compose_tuple(&[]).unwrap();
            let _: () = serializer.from_bytes(&bytes).unwrap();
        }
    }

    #[test]
    fn large_cbor_tuples_use_extended_header() {
        let serializer = Serializer::Cbor;
        let parts = (0..30u8)
            .map(|i| serializer.to_bytes(&i).unwrap())
            .collect::<Vec<_>>();
        let bytes = serializer.compose_tuple(&parts).unwrap();
        let decoded: Vec<u8> = serializer.from_bytes(&bytes).unwrap();
        assert_eq!(decoded, (0..30).collect::<Vec<_>>());
    }
}
