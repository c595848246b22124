//! Kernel state capture and the persisted snapshot blob.
//!
//! The blob is a CBOR map:
//!
//! ```text
//! { magic: "agentsim.kernel", schema_version: 1, state: KernelState, sha256: "<hex>" }
//! ```
//!
//! `sha256` covers the CBOR encoding of `state`. Maps inside the state are
//! `BTreeMap`s, so the same state always encodes to the same bytes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::validate_phases;
use crate::error::KernelError;
use crate::streams::StreamManagerState;

pub const SNAPSHOT_MAGIC: &str = "agentsim.kernel";
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Everything needed to resume a kernel: time, phases, stream positions.
/// Entity state is owned by the caller and not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelState {
    pub time: u64,
    pub phases: Vec<String>,
    pub streams: StreamManagerState,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    magic: String,
    schema_version: u32,
    state: KernelState,
    sha256: String,
}

impl KernelState {
    /// Check that the state could have been exported by a kernel.
    pub fn validate(&self) -> Result<(), KernelError> {
        validate_phases(&self.phases).map_err(|e| KernelError::InvalidState(e.to_string()))?;
        self.streams.validate()
    }

    /// Encode as a self-describing snapshot blob.
    pub fn to_bytes(&self) -> Result<Vec<u8>, KernelError> {
        let envelope = SnapshotEnvelope {
            magic: SNAPSHOT_MAGIC.to_string(),
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            state: self.clone(),
            sha256: state_digest(self)?,
        };
        cbor_serialize(&envelope)
    }

    /// Decode and verify a snapshot blob. Any foreign, truncated or
    /// tampered input yields [`KernelError::InvalidState`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KernelError> {
        let mut reader = bytes;
        let envelope: SnapshotEnvelope = ciborium::from_reader(&mut reader)
            .map_err(|e| KernelError::InvalidState(format!("CBOR decode: {e}")))?;
        if !reader.is_empty() {
            return Err(KernelError::InvalidState(format!(
                "{} trailing bytes after snapshot",
                reader.len()
            )));
        }
        if envelope.magic != SNAPSHOT_MAGIC {
            return Err(KernelError::InvalidState(format!(
                "not a kernel snapshot (magic {:?})",
                envelope.magic
            )));
        }
        if envelope.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(KernelError::InvalidState(format!(
                "schema version mismatch: blob has v{}, expected v{}",
                envelope.schema_version, SNAPSHOT_SCHEMA_VERSION
            )));
        }
        let actual = state_digest(&envelope.state)?;
        if actual != envelope.sha256 {
            return Err(KernelError::InvalidState(format!(
                "integrity check failed: expected {}, got {actual}",
                envelope.sha256
            )));
        }
        envelope.state.validate()?;
        Ok(envelope.state)
    }
}

fn state_digest(state: &KernelState) -> Result<String, KernelError> {
    let bytes = cbor_serialize(state)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, KernelError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| KernelError::Encode(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Kernel;

    fn sample_kernel() -> Kernel {
        let mut k = Kernel::with_phases(42, ["sense", "act"]).unwrap();
        k.get_stream("a0").unwrap().draw_float();
        k.get_stream("a1").unwrap().draw_int(0, 100).unwrap();
        k.run(3).unwrap();
        k
    }

    #[test]
    fn blob_roundtrip() {
        let k = sample_kernel();
        let state = k.export_state();
        let blob = state.to_bytes().unwrap();
        assert_eq!(KernelState::from_bytes(&blob).unwrap(), state);
    }

    #[test]
    fn encoding_is_byte_stable() {
        let a = sample_kernel().snapshot().unwrap();
        let b = sample_kernel().snapshot().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_and_truncated_blobs_rejected() {
        let blob = sample_kernel().snapshot().unwrap();
        assert!(matches!(
            KernelState::from_bytes(&[]),
            Err(KernelError::InvalidState(_))
        ));
        assert!(matches!(
            KernelState::from_bytes(&blob[..blob.len() / 2]),
            Err(KernelError::InvalidState(_))
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut blob = sample_kernel().snapshot().unwrap();
        blob.push(0);
        assert!(KernelState::from_bytes(&blob).is_err());
    }

    #[test]
    fn every_single_byte_corruption_rejected() {
        let blob = sample_kernel().snapshot().unwrap();
        for i in 0..blob.len() {
            let mut corrupt = blob.clone();
            corrupt[i] ^= 0x55;
            assert!(
                KernelState::from_bytes(&corrupt).is_err(),
                "corruption at byte {i} went undetected"
            );
        }
    }

    #[test]
    fn foreign_cbor_rejected() {
        let mut foreign = Vec::new();
        ciborium::into_writer(&("hello", 1u32), &mut foreign).unwrap();
        assert!(matches!(
            KernelState::from_bytes(&foreign),
            Err(KernelError::InvalidState(_))
        ));
    }

    #[test]
    fn wrong_magic_and_version_rejected() {
        let state = sample_kernel().export_state();
        let sha256 = state_digest(&state).unwrap();

        let wrong_magic = SnapshotEnvelope {
            magic: "someone.else".into(),
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            state: state.clone(),
            sha256: sha256.clone(),
        };
        let err = KernelState::from_bytes(&cbor_serialize(&wrong_magic).unwrap()).unwrap_err();
        assert!(err.to_string().contains("not a kernel snapshot"));

        let wrong_version = SnapshotEnvelope {
            magic: SNAPSHOT_MAGIC.into(),
            schema_version: 2,
            state,
            sha256,
        };
        let err = KernelState::from_bytes(&cbor_serialize(&wrong_version).unwrap()).unwrap_err();
        assert!(err.to_string().contains("schema version mismatch"));
    }

    #[test]
    fn semantically_invalid_state_rejected_even_with_valid_digest() {
        let mut state = sample_kernel().export_state();
        state.phases = vec!["dup".into(), "dup".into()];
        let envelope = SnapshotEnvelope {
            magic: SNAPSHOT_MAGIC.into(),
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            sha256: state_digest(&state).unwrap(),
            state,
        };
        assert!(matches!(
            KernelState::from_bytes(&cbor_serialize(&envelope).unwrap()),
            Err(KernelError::InvalidState(_))
        ));
    }
}
