//! Tool storage and persistence.
//!
//! The [`ToolStore`] is the authoritative record of every tool. Two
//! implementations are provided: [`JsonToolStore`] keeps one JSON file per
//! tool on disk, [`MemoryToolStore`] keeps nothing beyond the process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Result, StorageError, ToolError};
use crate::tool::{ToolPatch, ToolRecord};

/// Durable, id-keyed storage of tool records.
#[async_trait]
pub trait ToolStore: Send + Sync {
    /// Insert or replace a record.
    async fn put(&self, record: ToolRecord) -> Result<()>;

    /// Fetch a record; `Ok(None)` when the id is unknown.
    async fn get(&self, id: &str) -> Result<Option<ToolRecord>>;

    /// Apply a non-empty patch, returning the updated record.
    async fn patch(&self, id: &str, patch: &ToolPatch) -> Result<ToolRecord>;

    /// Delete a record, returning whether it existed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Delete every record.
    async fn drop_all(&self) -> Result<()>;

    /// Every stored record.
    async fn list(&self) -> Result<Vec<ToolRecord>>;
}

/// File-backed store: `{root}/{id}.json`.
pub struct JsonToolStore {
    /// Root directory for tool storage.
    root: PathBuf,

    /// In-memory copy of every record on disk.
    records: RwLock<HashMap<String, ToolRecord>>,
}

impl JsonToolStore {
    /// Open (creating if needed) the store at `root`.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::CreateDirectory(format!("{}: {e}", root.display())))?;

        let records = Self::load_all(&root).await?;
        info!("Loaded {} tools from {}", records.len(), root.display());

        Ok(Self {
            root,
            records: RwLock::new(records),
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.root.join(format!("{id}.json")))
    }

    async fn load_all(root: &Path) -> Result<HashMap<String, ToolRecord>> {
        let mut records = HashMap::new();
        let mut entries = fs::read_dir(root)
            .await
            .map_err(|e| StorageError::ReadFile(format!("{}: {e}", root.display())))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::ReadFile(format!("{e}")))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match Self::load_file(&path).await {
                    Ok(record) => {
                        debug!("Loaded tool: {}", record.id);
                        records.insert(record.id.clone(), record);
                    }
                    Err(e) => {
                        warn!("Failed to load tool {}: {e}", path.display());
                    }
                }
            }
        }
        Ok(records)
    }

    async fn load_file(path: &Path) -> Result<ToolRecord> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| StorageError::ReadFile(format!("{}: {e}", path.display())))?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn save_file(&self, record: &ToolRecord) -> Result<()> {
        let path = self.record_path(&record.id)?;
        let content = serde_json::to_string_pretty(record)?;

        // Write atomically
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &content)
            .await
            .map_err(|e| StorageError::WriteFile(format!("{}: {e}", temp_path.display())))?;
        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| StorageError::WriteFile(format!("{}: {e}", path.display())))?;

        debug!("Saved tool: {}", record.id);
        Ok(())
    }

    async fn remove_file(&self, id: &str) -> Result<()> {
        let path = self.record_path(id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFile(format!("{}: {e}", path.display())).into()),
        }
    }
}

#[async_trait]
impl ToolStore for JsonToolStore {
    async fn put(&self, record: ToolRecord) -> Result<()> {
        record.validate()?;
        let mut records = self.records.write().await;
        self.save_file(&record).await?;
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ToolRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn patch(&self, id: &str, patch: &ToolPatch) -> Result<ToolRecord> {
        let mut records = self.records.write().await;
        let current = records
            .get(id)
            .ok_or_else(|| ToolError::NotFound(id.to_string()))?;
        let updated = patch.apply(current)?;
        self.save_file(&updated).await?;
        records.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut records = self.records.write().await;
        if !records.contains_key(id) {
            return Ok(false);
        }
        // The map only forgets a record once its file is gone.
        self.remove_file(id).await?;
        records.remove(id);
        info!("Deleted tool: {id}");
        Ok(true)
    }

    async fn drop_all(&self) -> Result<()> {
        let mut records = self.records.write().await;
        let ids: Vec<String> = records.keys().cloned().collect();
        for id in &ids {
            self.remove_file(id).await?;
            records.remove(id);
        }
        info!("Dropped {} tools", ids.len());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ToolRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}

/// Process-local store.
#[derive(Default)]
pub struct MemoryToolStore {
    records: RwLock<HashMap<String, ToolRecord>>,
}

impl MemoryToolStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ToolStore for MemoryToolStore {
    async fn put(&self, record: ToolRecord) -> Result<()> {
        record.validate()?;
        self.records.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ToolRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn patch(&self, id: &str, patch: &ToolPatch) -> Result<ToolRecord> {
        let mut records = self.records.write().await;
        let current = records
            .get(id)
            .ok_or_else(|| ToolError::NotFound(id.to_string()))?;
        let updated = patch.apply(current)?;
        records.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.records.write().await.remove(id).is_some())
    }

    async fn drop_all(&self) -> Result<()> {
        self.records.write().await.clear();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ToolRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}

/// Ids become file names; only allow characters that cannot escape a directory.
pub(crate) fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ToolError::InvalidDefinition(format!("invalid tool id: {id:?}")))
    }
}
