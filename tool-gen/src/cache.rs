//! Semantic tool cache.
//!
//! Maps tool ids to the embedding of their description and answers
//! nearest-description queries. No tool source or metadata is kept here.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use toolsmith_embeddings::{
    CachedProvider, Embedding, EmbeddingCache, EmbeddingProvider, EmbeddingRequest,
    HashingProvider, OpenAIProvider, SimilarityIndex,
};
use tracing::{debug, info};

use crate::config::{CacheConfig, EmbeddingKind};
use crate::error::{Result, StorageError};

/// The single best candidate for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMatch {
    pub id: String,

    /// Cosine distance between query and candidate, in `[0, 2]`.
    pub distance: f32,
}

/// Similarity index over tool descriptions.
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    /// Index `description` under `id`, replacing any previous entry.
    async fn index(&self, id: &str, description: &str) -> Result<()>;

    /// The closest indexed description, or `None` when nothing qualifies.
    async fn find_nearest(&self, description: &str) -> Result<Option<CacheMatch>>;

    /// Drop the entry for `id`, returning whether it existed.
    async fn remove(&self, id: &str) -> Result<bool>;

    /// Replace the description indexed under `id`.
    async fn reindex(&self, id: &str, description: &str) -> Result<()>;

    /// Drop every entry.
    async fn clear(&self) -> Result<()>;

    /// Ids of every indexed entry.
    async fn ids(&self) -> Result<Vec<String>>;
}

/// [`SemanticIndex`] backed by an embedding provider and an in-memory
/// [`SimilarityIndex`], optionally persisted as JSON.
pub struct SemanticToolCache {
    provider: Arc<dyn EmbeddingProvider>,
    index: RwLock<SimilarityIndex>,
    index_path: Option<PathBuf>,
    max_distance: Option<f32>,
}

impl SemanticToolCache {
    /// Create an empty, in-memory cache.
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        let dimension = provider.dimension();
        Self {
            provider,
            index: RwLock::new(SimilarityIndex::new(dimension)),
            index_path: None,
            max_distance: None,
        }
    }

    /// Create a cache persisted at `path`, loading existing entries.
    pub async fn open(
        provider: Arc<dyn EmbeddingProvider>,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dimension = provider.dimension();

        let index = match fs::read_to_string(&path).await {
            Ok(json) => SimilarityIndex::from_json(&json, dimension)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SimilarityIndex::new(dimension),
            Err(e) => {
                return Err(StorageError::ReadFile(format!("{}: {e}", path.display())).into());
            }
        };

        Ok(Self {
            provider,
            index: RwLock::new(index),
            index_path: Some(path),
            max_distance: None,
        })
    }

    /// Build the cache described by `config`.
    pub async fn from_config(config: &CacheConfig) -> Result<Self> {
        let memo = EmbeddingCache::new(config.memo_entries);
        let provider: Arc<dyn EmbeddingProvider> = match config.embedding {
            EmbeddingKind::Hashing => Arc::new(CachedProvider::new(
                HashingProvider::new(config.dimension),
                memo,
            )),
            EmbeddingKind::OpenAI => {
                let mut provider = OpenAIProvider::from_env();
                if let Some(model) = &config.model {
                    provider = provider.with_model(model);
                }
                Arc::new(CachedProvider::new(provider, memo))
            }
        };

        let cache = match &config.index_path {
            Some(path) => Self::open(provider, path).await?,
            None => Self::new(provider),
        };
        Ok(cache.with_max_distance(config.max_distance))
    }

    /// Ignore candidates further than `max_distance`.
    pub fn with_max_distance(mut self, max_distance: Option<f32>) -> Self {
        self.max_distance = max_distance;
        self
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let response = self.provider.embed(EmbeddingRequest::new(text)).await?;
        Ok(response.embedding)
    }

    async fn persist(&self, index: &SimilarityIndex) -> Result<()> {
        let Some(path) = &self.index_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::CreateDirectory(format!("{}: {e}", parent.display())))?;
        }
        let json = index.to_json()?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json)
            .await
            .map_err(|e| StorageError::WriteFile(format!("{}: {e}", temp_path.display())))?;
        fs::rename(&temp_path, path)
            .await
            .map_err(|e| StorageError::WriteFile(format!("{}: {e}", path.display())))?;
        Ok(())
    }
}

#[async_trait]
impl SemanticIndex for SemanticToolCache {
    async fn index(&self, id: &str, description: &str) -> Result<()> {
        let embedding = self.embed(description).await?;
        let mut index = self.index.write().await;
        index.add(id, embedding)?;
        self.persist(&index).await?;
        debug!(tool_id = %id, "indexed description");
        Ok(())
    }

    async fn find_nearest(&self, description: &str) -> Result<Option<CacheMatch>> {
        let query = self.embed(description).await?;
        let index = self.index.read().await;
        let Some(best) = index.nearest(&query)? else {
            return Ok(None);
        };

        let candidate = CacheMatch {
            distance: best.distance(),
            id: best.id,
        };
        if self.max_distance.is_some_and(|max| candidate.distance > max) {
            debug!(
                tool_id = %candidate.id,
                distance = candidate.distance,
                "nearest candidate beyond max distance"
            );
            return Ok(None);
        }
        Ok(Some(candidate))
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let mut index = self.index.write().await;
        let removed = index.remove(id).is_some();
        if removed {
            self.persist(&index).await?;
        }
        Ok(removed)
    }

    async fn reindex(&self, id: &str, description: &str) -> Result<()> {
        self.index(id, description).await
    }

    async fn clear(&self) -> Result<()> {
        let mut index = self.index.write().await;
        index.clear();
        self.persist(&index).await?;
        info!("Cleared semantic tool cache");
        Ok(())
    }

    async fn ids(&self) -> Result<Vec<String>> {
        Ok(self.index.read().await.ids())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn cache() -> SemanticToolCache {
        SemanticToolCache::new(Arc::new(HashingProvider::new(256)))
    }

    #[tokio::test]
    async fn test_empty_cache_has_no_match() {
        assert_eq!(cache().find_nearest("anything").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_identical_description_is_distance_zero() {
        let cache = cache();
        cache
            .index("fact", "Compute the factorial of an integer n")
            .await
            .unwrap();
        cache
            .index("weather", "Fetch the current weather for a city")
            .await
            .unwrap();

        let found = cache
            .find_nearest("Compute the factorial of an integer n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "fact");
        assert!(found.distance < 1e-4);
    }

    #[tokio::test]
    async fn test_max_distance_filters_far_candidates() {
        let cache = cache().with_max_distance(Some(0.1));
        cache.index("fact", "factorial of n").await.unwrap();
        assert_eq!(
            cache.find_nearest("weather in Paris tomorrow").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_reindex_and_remove() {
        let cache = cache();
        cache.index("a", "sort a list of numbers").await.unwrap();
        cache.reindex("a", "reverse a string").await.unwrap();

        let found = cache.find_nearest("reverse a string").await.unwrap().unwrap();
        assert_eq!(found.id, "a");
        assert!(found.distance < 1e-4);
        assert_eq!(cache.ids().await.unwrap(), vec!["a".to_string()]);

        assert!(cache.remove("a").await.unwrap());
        assert!(!cache.remove("a").await.unwrap());
        assert_eq!(cache.find_nearest("reverse a string").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.json");
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashingProvider::new(64));

        {
            let cache = SemanticToolCache::open(provider.clone(), &path).await.unwrap();
            cache.index("fact", "factorial of n").await.unwrap();
        }

        let reopened = SemanticToolCache::open(provider, &path).await.unwrap();
        assert_eq!(reopened.ids().await.unwrap(), vec!["fact".to_string()]);
    }
}
