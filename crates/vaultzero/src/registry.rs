//! asset registry using sled
//!
//! names of stored assets with their upload time. re-adding a name replaces
//! the entry and moves it to the front.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Error, Result};

/// registry record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    pub name: String,
    /// upload time, unix millis
    pub uploaded_at: i64,
    /// monotonic insert sequence, breaks ties within a millisecond
    seq: u64,
}

impl AssetEntry {
    /// upload time as local `%Y-%m-%d %H:%M:%S`
    pub fn uploaded_local(&self) -> String {
        chrono::DateTime::from_timestamp_millis(self.uploaded_at)
            .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "?".to_string())
    }
}

pub struct Registry {
    db: sled::Db,
}

impl Registry {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        info!("opening registry at {}", path.as_ref().display());
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// in-memory registry (tests, dry runs)
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// add or replace an asset record
    pub fn add(&self, name: &str) -> Result<()> {
        let entry = AssetEntry {
            name: name.to_string(),
            uploaded_at: chrono::Utc::now().timestamp_millis(),
            seq: self.db.generate_id()?,
        };
        let value = serde_json::to_vec(&entry).map_err(|e| Error::Storage(e.to_string()))?;
        self.db.insert(name.as_bytes(), value)?;
        self.db.flush()?;
        Ok(())
    }

    /// remove an asset record. returns whether it existed
    pub fn remove(&self, name: &str) -> Result<bool> {
        let existed = self.db.remove(name.as_bytes())?.is_some();
        self.db.flush()?;
        Ok(existed)
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.db.contains_key(name.as_bytes())?)
    }

    /// all records, newest first
    pub fn entries(&self) -> Result<Vec<AssetEntry>> {
        let mut entries = self
            .db
            .iter()
            .values()
            .map(|v| {
                let bytes = v?;
                serde_json::from_slice::<AssetEntry>(&bytes)
                    .map_err(|e| Error::Storage(format!("corrupt registry entry: {}", e)))
            })
            .collect::<Result<Vec<_>>>()?;
        entries.sort_by(|a, b| (b.uploaded_at, b.seq).cmp(&(a.uploaded_at, a.seq)));
        Ok(entries)
    }

    /// asset names, newest first
    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self.entries()?.into_iter().map(|e| e.name).collect())
    }
}
