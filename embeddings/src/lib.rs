//! # Embeddings
//!
//! Dense text embeddings and nearest-neighbour search backing the semantic
//! tool cache.
//!
//! ## Features
//!
//! - **Embedding Generation**: Convert text to dense vectors, either through an
//!   HTTP embeddings API or with a deterministic offline hashing model
//! - **Similarity Search**: Find the stored vector closest to a query
//! - **Memoisation**: Avoid re-embedding text that was embedded recently
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EmbeddingProvider ──► Embedding ──► SimilarityIndex           │
//! │       │                                   │                     │
//! │       ▼                                   ▼                     │
//! │  OpenAI/Hashing ◄── CachedProvider    to_json/from_json        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod error;
pub mod index;
pub mod provider;
pub mod similarity;

pub use cache::{CachedProvider, EmbeddingCache};
pub use error::{EmbeddingError, Result};
pub use index::{IndexEntry, SimilarityIndex};
pub use provider::{
    EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, HashingProvider, OpenAIProvider,
};
pub use similarity::{SimilarityResult, cosine_distance, cosine_similarity};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Dimension of the offline hashing embedder unless configured otherwise.
pub const DEFAULT_DIMENSION: usize = 512;
