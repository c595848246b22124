//! File-backed checkpoint persistence.
//!
//! Layout inside the store directory:
//! ```text
//! store.meta.json                       - metadata and schema version
//! checkpoints/
//!   000001.checkpoint.cbor.zst          - CBOR+zstd compressed checkpoints
//! integrity/
//!   manifest.json                       - hash chain manifest
//! ```

use crate::checkpoint::Checkpoint;
use agentsim_kernel::KernelError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Current schema version of the store layout.
const STORE_SCHEMA_VERSION: u32 = 1;

/// Errors from file-backed persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("kernel snapshot error: {0}")]
    Kernel(#[from] KernelError),
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("no checkpoints found")]
    NoCheckpoints,
    #[error("checkpoint {0} not found")]
    NotFound(u32),
}

/// Metadata stored in store.meta.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub schema_version: u32,
    pub checkpoint_count: u32,
}

/// A single entry in the integrity manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub sha256: String,
    pub prev_hash: Option<String>,
}

/// Integrity manifest tracking all checkpoint hashes in a chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub entries: Vec<ManifestEntry>,
}

/// Directory of numbered checkpoints with schema versioning and a hash
/// chain over every file written.
pub struct CheckpointStore {
    root: PathBuf,
    meta: StoreMeta,
    manifest: IntegrityManifest,
}

impl CheckpointStore {
    /// Open or create a checkpoint store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("checkpoints"))?;
        std::fs::create_dir_all(root.join("integrity"))?;

        let meta_path = root.join("store.meta.json");
        let manifest_path = root.join("integrity").join("manifest.json");

        let (meta, manifest) = if meta_path.exists() {
            let meta: StoreMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.schema_version != STORE_SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    file_version: meta.schema_version,
                    expected_version: STORE_SCHEMA_VERSION,
                });
            }
            let manifest: IntegrityManifest = if manifest_path.exists() {
                serde_json::from_reader(std::fs::File::open(&manifest_path)?)?
            } else {
                IntegrityManifest::default()
            };
            (meta, manifest)
        } else {
            let meta = StoreMeta {
                schema_version: STORE_SCHEMA_VERSION,
                checkpoint_count: 0,
            };
            let manifest = IntegrityManifest::default();
            serde_json::to_writer_pretty(std::fs::File::create(&meta_path)?, &meta)?;
            serde_json::to_writer_pretty(std::fs::File::create(&manifest_path)?, &manifest)?;
            (meta, manifest)
        };

        tracing::debug!(root = %root.display(), checkpoints = meta.checkpoint_count, "opened checkpoint store");
        Ok(Self {
            root,
            meta,
            manifest,
        })
    }

    /// Write a checkpoint and return its 1-based index.
    pub fn save(&mut self, checkpoint: &Checkpoint) -> Result<u32, StoreError> {
        let compressed = checkpoint.to_compressed()?;
        let index = self.meta.checkpoint_count + 1;
        let filename = checkpoint_filename(index);

        let hash = sha256_hex(&compressed);
        let prev_hash = self.manifest.entries.last().map(|e| e.sha256.clone());

        std::fs::write(self.root.join("checkpoints").join(&filename), &compressed)?;

        self.meta.checkpoint_count = index;
        self.manifest.entries.push(ManifestEntry {
            filename,
            sha256: hash,
            prev_hash,
        });

        self.save_meta()?;
        self.save_manifest()?;
        tracing::info!(index, bytes = compressed.len(), "saved checkpoint");
        Ok(index)
    }

    /// Load checkpoint `index`, verifying its hash and its kernel blob.
    pub fn load(&self, index: u32) -> Result<Checkpoint, StoreError> {
        if index == 0 || index > self.meta.checkpoint_count {
            return Err(StoreError::NotFound(index));
        }
        let filename = checkpoint_filename(index);
        let compressed = std::fs::read(self.root.join("checkpoints").join(&filename))?;
        self.verify_file_hash(&filename, &compressed)?;

        let checkpoint = Checkpoint::from_compressed(&compressed)?;
        checkpoint.kernel_time()?;
        Ok(checkpoint)
    }

    pub fn load_latest(&self) -> Result<Checkpoint, StoreError> {
        if self.meta.checkpoint_count == 0 {
            return Err(StoreError::NoCheckpoints);
        }
        self.load(self.meta.checkpoint_count)
    }

    /// Verify all integrity hashes in the manifest.
    pub fn verify_integrity(&self) -> Result<(), StoreError> {
        let mut prev_hash: Option<String> = None;
        for entry in &self.manifest.entries {
            if entry.prev_hash != prev_hash {
                return Err(StoreError::IntegrityMismatch {
                    expected: prev_hash.unwrap_or_else(|| "None".into()),
                    actual: entry
                        .prev_hash
                        .clone()
                        .unwrap_or_else(|| "None".into()),
                });
            }

            let data = std::fs::read(self.root.join("checkpoints").join(&entry.filename))?;
            let actual_hash = sha256_hex(&data);
            if actual_hash != entry.sha256 {
                return Err(StoreError::IntegrityMismatch {
                    expected: entry.sha256.clone(),
                    actual: actual_hash,
                });
            }

            prev_hash = Some(entry.sha256.clone());
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    /// Files missing from the manifest fail closed.
    fn verify_file_hash(&self, filename: &str, data: &[u8]) -> Result<(), StoreError> {
        let actual = sha256_hex(data);
        let entry = self
            .manifest
            .entries
            .iter()
            .find(|e| e.filename == filename)
            .ok_or_else(|| StoreError::IntegrityMismatch {
                expected: format!("manifest entry for {filename}"),
                actual: "none".into(),
            })?;
        if entry.sha256 != actual {
            return Err(StoreError::IntegrityMismatch {
                expected: entry.sha256.clone(),
                actual,
            });
        }
        Ok(())
    }

    fn save_meta(&self) -> Result<(), StoreError> {
        let path = self.root.join("store.meta.json");
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &self.meta)?;
        Ok(())
    }

    fn save_manifest(&self) -> Result<(), StoreError> {
        let path = self.root.join("integrity").join("manifest.json");
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &self.manifest)?;
        Ok(())
    }
}

fn checkpoint_filename(index: u32) -> String {
    format!("{:06}.checkpoint.cbor.zst", index)
}

pub(crate) fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::CborEncode(e.to_string()))?;
    Ok(buf)
}

pub(crate) fn cbor_deserialize<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(data).map_err(|e| StoreError::CborDecode(e.to_string()))
}

pub(crate) fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub(crate) fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentsim_kernel::Kernel;
    use std::collections::BTreeMap;

    fn checkpoint_at(ticks: u64) -> Checkpoint {
        let mut kernel = Kernel::new(7);
        kernel.get_stream("bot").unwrap().draw_float();
        kernel.run(ticks).unwrap();
        let mut agents = BTreeMap::new();
        agents.insert("bot".to_string(), serde_json::json!({"agent_id": "bot"}));
        Checkpoint::new(kernel.snapshot().unwrap(), agents)
    }

    #[test]
    fn store_open_creates_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(tmp.path().join("run_data")).unwrap();
        assert_eq!(store.meta().checkpoint_count, 0);
        assert_eq!(store.meta().schema_version, STORE_SCHEMA_VERSION);
        assert!(store.root().join("checkpoints").is_dir());
        assert!(store.root().join("integrity").is_dir());
    }

    #[test]
    fn save_and_reload_after_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run_data");
        let first = checkpoint_at(2);
        let second = checkpoint_at(5);
        {
            let mut store = CheckpointStore::open(&path).unwrap();
            assert_eq!(store.save(&first).unwrap(), 1);
            assert_eq!(store.save(&second).unwrap(), 2);
        }

        let store = CheckpointStore::open(&path).unwrap();
        assert_eq!(store.meta().checkpoint_count, 2);
        assert_eq!(store.load(1).unwrap(), first);
        let latest = store.load_latest().unwrap();
        assert_eq!(latest, second);
        assert_eq!(latest.kernel_time().unwrap(), 5);
        store.verify_integrity().unwrap();
    }

    #[test]
    fn empty_store_has_no_latest() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(tmp.path()).unwrap();
        assert!(matches!(store.load_latest(), Err(StoreError::NoCheckpoints)));
        assert!(matches!(store.load(1), Err(StoreError::NotFound(1))));
    }

    #[test]
    fn integrity_fail_closed_on_corruption() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run_data");
        let mut store = CheckpointStore::open(&path).unwrap();
        store.save(&checkpoint_at(1)).unwrap();

        let file = path.join("checkpoints").join("000001.checkpoint.cbor.zst");
        let mut data = std::fs::read(&file).unwrap();
        if let Some(byte) = data.last_mut() {
            *byte ^= 0xff;
        }
        std::fs::write(&file, &data).unwrap();

        let store = CheckpointStore::open(&path).unwrap();
        assert!(store.verify_integrity().is_err());
        assert!(matches!(
            store.load(1),
            Err(StoreError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn schema_mismatch_fail_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run_data");
        let _store = CheckpointStore::open(&path).unwrap();

        let meta_path = path.join("store.meta.json");
        let mut meta: StoreMeta =
            serde_json::from_reader(std::fs::File::open(&meta_path).unwrap()).unwrap();
        meta.schema_version = 999;
        serde_json::to_writer_pretty(std::fs::File::create(&meta_path).unwrap(), &meta).unwrap();

        match CheckpointStore::open(&path) {
            Err(StoreError::SchemaMismatch {
                file_version,
                expected_version,
            }) => {
                assert_eq!(file_version, 999);
                assert_eq!(expected_version, STORE_SCHEMA_VERSION);
            }
            Err(e) => panic!("expected SchemaMismatch, got: {e}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[test]
    fn broken_chain_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run_data");
        let mut store = CheckpointStore::open(&path).unwrap();
        store.save(&checkpoint_at(1)).unwrap();
        store.save(&checkpoint_at(2)).unwrap();

        let manifest_path = path.join("integrity").join("manifest.json");
        let mut manifest: IntegrityManifest =
            serde_json::from_reader(std::fs::File::open(&manifest_path).unwrap()).unwrap();
        manifest.entries[1].prev_hash = Some("0".repeat(64));
        serde_json::to_writer_pretty(std::fs::File::create(&manifest_path).unwrap(), &manifest)
            .unwrap();

        let store = CheckpointStore::open(&path).unwrap();
        assert!(matches!(
            store.verify_integrity(),
            Err(StoreError::IntegrityMismatch { .. })
        ));
    }
}
