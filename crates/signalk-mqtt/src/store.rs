//! Persistent outgoing message store.
//!
//! Every publication is written here before it is handed to the broker and
//! removed once the broker acknowledges it. Keys are assigned in arrival
//! order, so iterating keys replays messages in the order they were
//! published, also after a restart.
//!
//! The file store keeps one JSON file per record:
//!
//! ```text
//! <data-dir>/outgoing/00000000000000000001.json
//! <data-dir>/outgoing/00000000000000000002.json
//! ```
//!
//! Records are written to a temporary file and renamed into place, so a
//! crash leaves either the complete record or nothing.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const RECORD_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// A publication waiting for broker acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub topic: String,
    /// JSON-encoded message
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
}

/// Errors that can occur in the outgoing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode record: {0}")]
    Encode(serde_json::Error),

    #[error("Record {key} is corrupt: {source}")]
    Corrupt {
        key: u64,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable FIFO storage for not-yet-acknowledged publications.
pub trait OutgoingStore: Send {
    /// Store a message, returning its key. Keys increase with every call.
    fn put(&mut self, message: &OutgoingMessage) -> Result<u64, StoreError>;

    /// Load a stored message. Returns None if the key is unknown.
    fn get(&self, key: u64) -> Result<Option<OutgoingMessage>, StoreError>;

    /// Remove a message. Removing an unknown key is not an error.
    fn remove(&mut self, key: u64) -> Result<(), StoreError>;

    /// All stored keys in arrival order.
    fn keys(&self) -> Vec<u64>;

    fn len(&self) -> usize {
        self.keys().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// File Store
// ============================================================================

/// File-system backed store, survives process restarts.
#[derive(Debug)]
pub struct FileOutgoingStore {
    dir: PathBuf,
    keys: BTreeSet<u64>,
    next_key: u64,
}

impl FileOutgoingStore {
    /// Open or create a store in `dir`, recovering existing records.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut keys = BTreeSet::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some(RECORD_EXTENSION) => {
                    match path.file_stem().and_then(|s| s.to_str()).map(str::parse::<u64>) {
                        Some(Ok(key)) => {
                            keys.insert(key);
                        }
                        _ => warn!("Ignoring unexpected file {:?} in outgoing store", path),
                    }
                }
                Some(TEMP_EXTENSION) => {
                    // Interrupted write, the record was never stored
                    debug!("Removing incomplete record {:?}", path);
                    fs::remove_file(&path)?;
                }
                _ => {}
            }
        }

        let next_key = keys.iter().next_back().map(|k| k + 1).unwrap_or(1);
        if !keys.is_empty() {
            debug!("Recovered {} outgoing records from {:?}", keys.len(), dir);
        }

        Ok(Self {
            dir,
            keys,
            next_key,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: u64) -> PathBuf {
        self.dir.join(format!("{:020}.{}", key, RECORD_EXTENSION))
    }
}

impl OutgoingStore for FileOutgoingStore {
    fn put(&mut self, message: &OutgoingMessage) -> Result<u64, StoreError> {
        let key = self.next_key;
        let data = serde_json::to_vec(message).map_err(StoreError::Encode)?;

        let path = self.record_path(key);
        let tmp = path.with_extension(TEMP_EXTENSION);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        self.keys.insert(key);
        self.next_key += 1;
        Ok(key)
    }

    fn get(&self, key: u64) -> Result<Option<OutgoingMessage>, StoreError> {
        let data = match fs::read(self.record_path(key)) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| StoreError::Corrupt { key, source })
    }

    fn remove(&mut self, key: u64) -> Result<(), StoreError> {
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.keys.remove(&key);
        Ok(())
    }

    fn keys(&self) -> Vec<u64> {
        self.keys.iter().copied().collect()
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

// ============================================================================
// Memory Store
// ============================================================================

/// In-memory store, loses its content with the process.
#[derive(Debug, Default)]
pub struct MemoryOutgoingStore {
    records: BTreeMap<u64, OutgoingMessage>,
    next_key: u64,
}

impl MemoryOutgoingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutgoingStore for MemoryOutgoingStore {
    fn put(&mut self, message: &OutgoingMessage) -> Result<u64, StoreError> {
        self.next_key += 1;
        self.records.insert(self.next_key, message.clone());
        Ok(self.next_key)
    }

    fn get(&self, key: u64) -> Result<Option<OutgoingMessage>, StoreError> {
        Ok(self.records.get(&key).cloned())
    }

    fn remove(&mut self, key: u64) -> Result<(), StoreError> {
        self.records.remove(&key);
        Ok(())
    }

    fn keys(&self) -> Vec<u64> {
        self.records.keys().copied().collect()
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}
