use agentsim_kernel::KernelState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::store::{cbor_deserialize, cbor_serialize, zstd_compress, zstd_decompress, StoreError};

/// A resumable point in a run: the kernel snapshot blob plus the state each
/// agent produced for itself.
///
/// The kernel blob carries its own integrity check; agent states are opaque
/// JSON values owned by the agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(with = "blob_bytes")]
    pub kernel_blob: Vec<u8>,
    pub agent_states: BTreeMap<String, serde_json::Value>,
}

impl Checkpoint {
    pub fn new(kernel_blob: Vec<u8>, agent_states: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            kernel_blob,
            agent_states,
        }
    }

    /// Logical time recorded in the kernel blob.
    pub fn kernel_time(&self) -> Result<u64, StoreError> {
        Ok(KernelState::from_bytes(&self.kernel_blob)?.time)
    }

    /// Write to a single CBOR+zstd file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        std::fs::write(path, self.to_compressed()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_compressed(&std::fs::read(path)?)
    }

    pub(crate) fn to_compressed(&self) -> Result<Vec<u8>, StoreError> {
        zstd_compress(&cbor_serialize(self)?)
    }

    pub(crate) fn from_compressed(data: &[u8]) -> Result<Self, StoreError> {
        cbor_deserialize(&zstd_decompress(data)?)
    }
}

/// Encodes the kernel blob as a CBOR byte string instead of an array of
/// integers. Arrays are still accepted on read.
mod blob_bytes {
    use serde::de::{SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_byte_buf(BlobVisitor)
    }

    struct BlobVisitor;

    impl<'de> Visitor<'de> for BlobVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a byte string")
        }

        fn visit_bytes<E>(self, v: &[u8]) -> Result<Vec<u8>, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Vec<u8>, E> {
            Ok(v)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Vec<u8>, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(b) = seq.next_element()? {
                out.push(b);
            }
            Ok(out)
        }
    }
}
