//! One logical tool repository over the store and the semantic cache.
//!
//! The [`ToolRepository`] is the only writer of either backing store, and
//! orders its writes so that an interruption can leave an unindexed record
//! behind but never an index entry without a record:
//!
//! - `add`: store, then index.
//! - `update`: store, then reindex only when the description changed.
//! - `remove`: unindex, then store.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{CacheMatch, SemanticIndex};
use crate::error::Result;
use crate::storage::ToolStore;
use crate::tool::{ToolPatch, ToolRecord};

/// What [`ToolRepository::reconcile`] repaired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Stored records that had no index entry and were indexed.
    pub reindexed: Vec<String>,

    /// Index entries that had no stored record and were dropped.
    pub pruned: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.reindexed.is_empty() && self.pruned.is_empty()
    }
}

/// Write-through adapter over a [`ToolStore`] and a [`SemanticIndex`].
#[derive(Clone)]
pub struct ToolRepository {
    store: Arc<dyn ToolStore>,
    index: Arc<dyn SemanticIndex>,
}

impl ToolRepository {
    /// Create a repository over the given stores.
    pub fn new(store: Arc<dyn ToolStore>, index: Arc<dyn SemanticIndex>) -> Self {
        Self { store, index }
    }

    /// Persist a new record and index its description.
    pub async fn add(&self, record: ToolRecord) -> Result<()> {
        let id = record.id.clone();
        let description = record.description.clone();

        self.store.put(record).await?;
        self.index.index(&id, &description).await?;

        info!(tool_id = %id, "added tool");
        Ok(())
    }

    /// Patch a record; the index follows only a description change.
    pub async fn update(&self, id: &str, patch: &ToolPatch) -> Result<ToolRecord> {
        let updated = self.store.patch(id, patch).await?;
        if patch.description.is_some() {
            self.index.reindex(id, &updated.description).await?;
            debug!(tool_id = %id, "reindexed description");
        }
        info!(tool_id = %id, "updated tool");
        Ok(updated)
    }

    /// Remove a record from both stores, returning whether either had it.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let unindexed = self.index.remove(id).await?;
        let deleted = self.store.delete(id).await?;
        if unindexed || deleted {
            info!(tool_id = %id, "removed tool");
        }
        Ok(unindexed || deleted)
    }

    /// Nearest indexed tool for `description`.
    ///
    /// Only the id is returned; resolve it with [`ToolRepository::get`].
    pub async fn query(&self, description: &str) -> Result<Option<CacheMatch>> {
        self.index.find_nearest(description).await
    }

    /// Fetch a stored record.
    pub async fn get(&self, id: &str) -> Result<Option<ToolRecord>> {
        self.store.get(id).await
    }

    /// Every stored record.
    pub async fn list(&self) -> Result<Vec<ToolRecord>> {
        self.store.list().await
    }

    /// Drop an index entry whose record is missing.
    pub async fn forget(&self, id: &str) -> Result<()> {
        if self.index.remove(id).await? {
            warn!(tool_id = %id, "dropped index entry with no stored record");
        }
        Ok(())
    }

    /// Empty both stores.
    pub async fn clear(&self) -> Result<()> {
        self.index.clear().await?;
        self.store.drop_all().await?;
        info!("cleared tool repository");
        Ok(())
    }

    /// Restore the one-to-one correspondence between records and index entries.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let records = self.store.list().await?;
        let indexed: HashSet<String> = self.index.ids().await?.into_iter().collect();
        let stored: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();

        let mut report = ReconcileReport::default();
        for id in &indexed {
            if !stored.contains(id.as_str()) {
                self.index.remove(id).await?;
                report.pruned.push(id.clone());
            }
        }
        for record in &records {
            if !indexed.contains(&record.id) {
                self.index.index(&record.id, &record.description).await?;
                report.reindexed.push(record.id.clone());
            }
        }
        report.pruned.sort();
        report.reindexed.sort();

        if !report.is_clean() {
            warn!(
                reindexed = report.reindexed.len(),
                pruned = report.pruned.len(),
                "reconciled tool repository"
            );
        }
        Ok(report)
    }
}
