//! Persistence for simulation runs: checkpoints (kernel snapshot blob plus
//! agent states) and a file-backed, hash-chained checkpoint store.
//!
//! # Invariants
//! - Checkpoint files are written once and never modified.
//! - Every load verifies the file hash and the kernel blob before returning.
//! - Schema or hash mismatches fail closed.

mod checkpoint;
mod store;

pub use checkpoint::Checkpoint;
pub use store::{CheckpointStore, IntegrityManifest, ManifestEntry, StoreError, StoreMeta};
