//! Swap record persistence
//!
//! The store is the only state shared between swaps. Writes replace a
//! whole record by id; there are no cross-record transactions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use portal_core::{StoreError, SwapId};
use tokio::sync::RwLock;

use crate::state::SwapRecord;

/// Result of listing the store: readable records plus the keys that failed
#[derive(Debug, Default)]
pub struct StoreListing {
    pub records: Vec<SwapRecord>,
    pub skipped: Vec<StoreError>,
}

#[async_trait]
pub trait SwapStore: Send + Sync {
    async fn get(&self, id: &SwapId) -> Result<Option<SwapRecord>, StoreError>;

    /// Insert or replace by `record.swap_id`
    async fn put(&self, record: &SwapRecord) -> Result<(), StoreError>;

    async fn list(&self) -> Result<StoreListing, StoreError>;

    /// Persist a generated report document under `name`, returning where it went
    async fn save_report(&self, name: &str, body: &serde_json::Value) -> Result<String, StoreError>;
}

fn decode(key: &str, raw: &str) -> Result<SwapRecord, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn encode(record: &SwapRecord) -> Result<String, StoreError> {
    serde_json::to_string_pretty(record).map_err(|e| StoreError::Corrupt {
        key: record.swap_id.to_string(),
        message: e.to_string(),
    })
}

// ─── File store ─────────────────────────────────────────────────────────────

/// One pretty-printed JSON file per swap: `<data_dir>/<swap_id>.json`
#[derive(Debug)]
pub struct FileSwapStore {
    dir: PathBuf,
    /// Serializes writers within this process; readers see whole files
    write_lock: tokio::sync::Mutex<()>,
}

impl FileSwapStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(dir.display().to_string(), e))?;
        tracing::debug!(dir = %dir.display(), "Opened swap store");
        Ok(Self {
            dir,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Only well-formed ids map to a file, so a key never leaves `dir`
    fn path_for(&self, id: &SwapId) -> Result<PathBuf, StoreError> {
        if !id.is_well_formed() {
            return Err(StoreError::InvalidKey { key: id.to_string() });
        }
        Ok(self.dir.join(format!("{}.json", id.as_str())))
    }

    /// Write via a temp file and rename so a crash never leaves half a record
    async fn write_atomic(&self, path: &Path, body: &str) -> Result<(), StoreError> {
        let tmp = path.with_extension("json.tmp");
        let display = path.display().to_string();
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| StoreError::io(display.clone(), e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StoreError::io(display, e))
    }
}

#[async_trait]
impl SwapStore for FileSwapStore {
    async fn get(&self, id: &SwapId) -> Result<Option<SwapRecord>, StoreError> {
        let path = self.path_for(id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => decode(id.as_str(), &raw).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path.display().to_string(), e)),
        }
    }

    async fn put(&self, record: &SwapRecord) -> Result<(), StoreError> {
        let path = self.path_for(&record.swap_id)?;
        let body = encode(record)?;
        let _guard = self.write_lock.lock().await;
        self.write_atomic(&path, &body).await
    }

    async fn list(&self) -> Result<StoreListing, StoreError> {
        let mut listing = StoreListing::default();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StoreError::io(self.dir.display().to_string(), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(self.dir.display().to_string(), e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(key) = name.strip_suffix(".json") else {
                continue;
            };
            if !key.starts_with("swap_") {
                continue;
            }
            let record = match tokio::fs::read_to_string(entry.path()).await {
                Ok(raw) => decode(key, &raw),
                Err(e) => Err(StoreError::io(entry.path().display().to_string(), e)),
            };
            match record {
                Ok(r) => listing.records.push(r),
                Err(e) => listing.skipped.push(e),
            }
        }
        Ok(listing)
    }

    async fn save_report(&self, name: &str, body: &serde_json::Value) -> Result<String, StoreError> {
        let path = self.dir.join(name);
        let text = serde_json::to_string_pretty(body).map_err(|e| StoreError::Corrupt {
            key: name.to_string(),
            message: e.to_string(),
        })?;
        let _guard = self.write_lock.lock().await;
        self.write_atomic(&path, &text).await?;
        Ok(path.display().to_string())
    }
}

// ─── Memory store ───────────────────────────────────────────────────────────

/// In-process store holding serialized records, so tests exercise the same
/// encode/decode path as the file store.
#[derive(Debug, Default)]
pub struct MemorySwapStore {
    records: RwLock<HashMap<String, String>>,
    reports: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemorySwapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw text under `key` without validation
    pub async fn insert_raw(&self, key: &str, raw: &str) {
        self.records
            .write()
            .await
            .insert(key.to_string(), raw.to_string());
    }

    pub async fn report(&self, name: &str) -> Option<serde_json::Value> {
        self.reports.read().await.get(name).cloned()
    }
}

#[async_trait]
impl SwapStore for MemorySwapStore {
    async fn get(&self, id: &SwapId) -> Result<Option<SwapRecord>, StoreError> {
        match self.records.read().await.get(id.as_str()) {
            Some(raw) => decode(id.as_str(), raw).map(Some),
            None => Ok(None),
        }
    }

    async fn put(&self, record: &SwapRecord) -> Result<(), StoreError> {
        let body = encode(record)?;
        self.records
            .write()
            .await
            .insert(record.swap_id.to_string(), body);
        Ok(())
    }

    async fn list(&self) -> Result<StoreListing, StoreError> {
        let mut listing = StoreListing::default();
        for (key, raw) in self.records.read().await.iter() {
            match decode(key, raw) {
                Ok(r) => listing.records.push(r),
                Err(e) => listing.skipped.push(e),
            }
        }
        Ok(listing)
    }

    async fn save_report(&self, name: &str, body: &serde_json::Value) -> Result<String, StoreError> {
        self.reports
            .write()
            .await
            .insert(name.to_string(), body.clone());
        Ok(format!("memory://{}", name))
    }
}
