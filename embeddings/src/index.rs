//! Similarity index for fast embedding lookups.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::similarity::{SimilarityResult, find_top_k, normalize};

/// An entry in the similarity index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Unique identifier.
    pub id: String,

    /// The embedding vector (normalized).
    pub embedding: Embedding,
}

/// A similarity index for vector lookups.
///
/// Stores one normalized embedding per id and answers nearest-neighbour
/// queries by cosine similarity. An empty index answers every query with
/// no match.
#[derive(Debug)]
pub struct SimilarityIndex {
    entries: HashMap<String, IndexEntry>,
    dimension: usize,
}

impl SimilarityIndex {
    /// Create a new similarity index.
    pub fn new(dimension: usize) -> Self {
        Self {
            entries: HashMap::new(),
            dimension,
        }
    }

    /// Expected embedding dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Add an embedding to the index, replacing any previous entry for `id`.
    pub fn add(&mut self, id: impl Into<String>, mut embedding: Embedding) -> Result<()> {
        let id = id.into();
        self.check_dimension(&embedding)?;
        normalize(&mut embedding);

        self.entries.insert(
            id.clone(),
            IndexEntry {
                id: id.clone(),
                embedding,
            },
        );
        debug!("Added embedding to index: {id}");

        Ok(())
    }

    /// Remove an embedding from the index.
    pub fn remove(&mut self, id: &str) -> Option<IndexEntry> {
        self.entries.remove(id)
    }

    /// Check if an ID exists in the index.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Get the number of entries in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get all IDs in the index.
    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Search for the `k` most similar embeddings.
    pub fn search(&self, query: &Embedding, k: usize) -> Result<Vec<SimilarityResult>> {
        self.check_dimension(query)?;

        let mut query = query.clone();
        normalize(&mut query);

        find_top_k(
            &query,
            self.entries.values().map(|e| (e.id.as_str(), &e.embedding)),
            k,
        )
    }

    /// Search for the single most similar embedding.
    pub fn nearest(&self, query: &Embedding) -> Result<Option<SimilarityResult>> {
        if self.entries.is_empty() {
            return Ok(None);
        }
        Ok(self.search(query, 1)?.into_iter().next())
    }

    /// Clear the index.
    pub fn clear(&mut self) {
        self.entries.clear();
        info!("Cleared similarity index");
    }

    /// Serialize the index to JSON.
    pub fn to_json(&self) -> Result<String> {
        let mut entries: Vec<&IndexEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(serde_json::to_string(&entries)?)
    }

    /// Load index from JSON.
    pub fn from_json(json: &str, dimension: usize) -> Result<Self> {
        let entries: Vec<IndexEntry> = serde_json::from_str(json)?;

        let mut index = Self::new(dimension);
        for entry in entries {
            index.check_dimension(&entry.embedding)?;
            index.entries.insert(entry.id.clone(), entry);
        }

        info!("Loaded {} entries into similarity index", index.len());
        Ok(index)
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_index_add_and_contains() {
        let mut index = SimilarityIndex::new(3);
        index.add("item1", vec![1.0, 0.0, 0.0]).unwrap();

        assert!(index.contains("item1"));
        assert!(!index.contains("item2"));
    }

    #[test]
    fn test_index_search() {
        let mut index = SimilarityIndex::new(3);
        index.add("a", vec![1.0, 0.0, 0.0]).unwrap();
        index.add("b", vec![0.0, 1.0, 0.0]).unwrap();
        index.add("c", vec![0.7, 0.7, 0.0]).unwrap();

        let results = index.search(&vec![1.0, 0.0, 0.0], 2).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[1].id, "c");
    }

    #[test]
    fn test_empty_index_has_no_nearest() {
        let index = SimilarityIndex::new(3);
        assert!(index.nearest(&vec![1.0, 0.0, 0.0]).unwrap().is_none());
    }

    #[test]
    fn test_replacing_an_entry() {
        let mut index = SimilarityIndex::new(2);
        index.add("a", vec![1.0, 0.0]).unwrap();
        index.add("a", vec![0.0, 1.0]).unwrap();

        assert_eq!(index.len(), 1);
        let hit = index.nearest(&vec![0.0, 1.0]).unwrap().unwrap();
        assert_eq!(hit.id, "a");
        assert!(hit.distance() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = SimilarityIndex::new(3);
        assert!(index.add("bad", vec![1.0, 0.0]).is_err());
    }

    #[test]
    fn test_json_reload() {
        let mut index = SimilarityIndex::new(2);
        index.add("a", vec![3.0, 4.0]).unwrap();
        let json = index.to_json().unwrap();

        let reloaded = SimilarityIndex::from_json(&json, 2).unwrap();
        assert_eq!(reloaded.ids(), vec!["a".to_string()]);
        assert!(SimilarityIndex::from_json(&json, 3).is_err());
    }
}
