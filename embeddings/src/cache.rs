//! Memoisation of computed embeddings.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use crate::Embedding;
use crate::error::Result;
use crate::provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};

#[derive(Debug, Clone)]
struct CacheEntry {
    embedding: Embedding,
    inserted: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    sequence: u64,
}

/// Bounded in-memory cache of embeddings keyed by model and text.
///
/// When full, the oldest insertion is evicted.
#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    state: Arc<RwLock<CacheState>>,
    max_entries: usize,
}

impl EmbeddingCache {
    /// Create a new cache holding at most `max_entries` embeddings.
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(CacheState::default())),
            max_entries: max_entries.max(1),
        }
    }

    fn hash_key(text: &str, model: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Get an embedding from the cache.
    pub async fn get(&self, text: &str, model: &str) -> Option<Embedding> {
        let key = Self::hash_key(text, model);
        let state = self.state.read().await;
        state.entries.get(&key).map(|e| e.embedding.clone())
    }

    /// Put an embedding in the cache.
    pub async fn put(&self, text: &str, model: &str, embedding: Embedding) {
        let key = Self::hash_key(text, model);
        let mut state = self.state.write().await;

        if state.entries.len() >= self.max_entries && !state.entries.contains_key(&key) {
            if let Some(oldest_key) = state
                .entries
                .iter()
                .min_by_key(|(_, v)| v.inserted)
                .map(|(k, _)| k.clone())
            {
                state.entries.remove(&oldest_key);
            }
        }

        state.sequence += 1;
        let inserted = state.sequence;
        state.entries.insert(
            key,
            CacheEntry {
                embedding,
                inserted,
            },
        );
    }

    /// Number of cached embeddings.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    /// Clear the entire cache.
    pub async fn clear(&self) {
        self.state.write().await.entries.clear();
    }
}

/// A provider wrapper that serves repeated texts from an [`EmbeddingCache`].
pub struct CachedProvider<P> {
    provider: P,
    cache: EmbeddingCache,
}

impl<P> CachedProvider<P>
where
    P: EmbeddingProvider,
{
    /// Create a new cached provider.
    pub fn new(provider: P, cache: EmbeddingCache) -> Self {
        Self { provider, cache }
    }

    /// Get the underlying cache.
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }
}

#[async_trait]
impl<P> EmbeddingProvider for CachedProvider<P>
where
    P: EmbeddingProvider,
{
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn default_model(&self) -> &str {
        self.provider.default_model()
    }

    fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string());

        if let Some(embedding) = self.cache.get(&request.text, &model).await {
            debug!("Cache hit for embedding");
            return Ok(EmbeddingResponse {
                embedding,
                model,
                tokens_used: None,
            });
        }

        let text = request.text.clone();
        let response = self.provider.embed(request).await?;
        self.cache
            .put(&text, &model, response.embedding.clone())
            .await;

        Ok(response)
    }

    fn is_available(&self) -> bool {
        self.provider.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::HashingProvider;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_cache_put_get() {
        let cache = EmbeddingCache::new(100);
        let embedding = vec![1.0, 2.0, 3.0];

        cache.put("hello", "model-1", embedding.clone()).await;

        assert_eq!(cache.get("hello", "model-1").await, Some(embedding));
        assert_eq!(cache.get("hello", "model-2").await, None);
    }

    #[tokio::test]
    async fn test_cache_eviction_drops_oldest() {
        let cache = EmbeddingCache::new(2);

        cache.put("a", "model", vec![1.0]).await;
        cache.put("b", "model", vec![2.0]).await;
        cache.put("c", "model", vec![3.0]).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("a", "model").await, None);
        assert_eq!(cache.get("c", "model").await, Some(vec![3.0]));
    }

    struct CountingProvider {
        inner: HashingProvider,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        fn default_model(&self) -> &str {
            "counting"
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(request).await
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_cached_provider_embeds_once() {
        let provider = CachedProvider::new(
            CountingProvider {
                inner: HashingProvider::new(16),
                calls: AtomicUsize::new(0),
            },
            EmbeddingCache::new(10),
        );

        let first = provider.embed(EmbeddingRequest::new("same text")).await.unwrap();
        let second = provider.embed(EmbeddingRequest::new("same text")).await.unwrap();

        assert_eq!(first.embedding, second.embedding);
        assert_eq!(provider.provider.calls.load(Ordering::SeqCst), 1);
    }
}
