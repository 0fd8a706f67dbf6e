//! Configuration for the synthesis pipeline.
//!
//! Every component receives its section at construction; nothing is read
//! from the process environment until a backend is actually built.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ToolError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsmithConfig {
    /// Generative backend.
    pub backend: BackendConfig,

    /// Durable tool store.
    pub store: StoreConfig,

    /// Semantic tool cache.
    pub cache: CacheConfig,

    /// Execution sandbox.
    pub sandbox: SandboxConfig,

    /// Pipeline behaviour.
    pub pipeline: PipelineConfig,

    /// HTTP server.
    pub server: ServerConfig,
}

impl ToolsmithConfig {
    /// Load a configuration from a TOML file.
    ///
    /// Missing sections and fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ToolError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ToolError::Config(e.to_string()))
    }

    /// Place every on-disk artifact under `root`.
    pub fn with_data_dir(mut self, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        self.store.root = root.join("tools");
        self.cache.index_path = Some(root.join("index.json"));
        self.sandbox.work_dir = root.join("work");
        self
    }

    /// Set the backend configuration.
    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    /// Set the cache configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Set the sandbox configuration.
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Set the pipeline configuration.
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_default().join("toolsmith")
}

/// Which generative provider answers completions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendProvider {
    /// Anthropic messages API.
    #[default]
    Anthropic,
    /// OpenAI chat completions API.
    #[serde(rename = "openai")]
    OpenAI,
}

/// Configuration for the generative backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub provider: BackendProvider,

    /// Model name; the provider default when unset.
    pub model: Option<String>,

    /// API key; read from the provider's environment variable when unset.
    pub api_key: Option<String>,

    /// Override for the provider endpoint.
    pub base_url: Option<String>,

    pub max_output_tokens: u32,

    pub temperature: f32,

    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: BackendProvider::default(),
            model: None,
            api_key: None,
            base_url: None,
            max_output_tokens: 4096,
            temperature: 0.0,
            request_timeout_secs: 120,
        }
    }
}

/// Configuration for the JSON tool store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one JSON file per tool.
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_data_dir().join("tools"),
        }
    }
}

/// Which embedding model backs the semantic cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingKind {
    /// Offline feature hashing.
    #[default]
    Hashing,
    /// OpenAI embeddings API.
    #[serde(rename = "openai")]
    OpenAI,
}

/// Configuration for the semantic tool cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Where the `id -> embedding` index is persisted; in memory only when unset.
    pub index_path: Option<PathBuf>,

    pub embedding: EmbeddingKind,

    /// Vector size for the hashing embedder.
    pub dimension: usize,

    /// Model name for the OpenAI embedder.
    pub model: Option<String>,

    /// Candidates further than this cosine distance are not returned.
    pub max_distance: Option<f32>,

    /// Capacity of the per-text embedding memo.
    pub memo_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            index_path: Some(default_data_dir().join("index.json")),
            embedding: EmbeddingKind::default(),
            dimension: toolsmith_embeddings::DEFAULT_DIMENSION,
            model: None,
            max_distance: None,
            memo_entries: 1024,
        }
    }
}

/// Configuration for the execution sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Directory tool sources are materialized into and run from.
    pub work_dir: PathBuf,

    /// Extension of the materialized source file.
    pub source_extension: String,

    /// Shell that interprets invocation commands.
    pub shell: String,

    /// Command prefix that installs packages; package names are appended.
    pub installer: Vec<String>,

    pub timeout_secs: u64,

    pub install_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            work_dir: default_data_dir().join("work"),
            source_extension: "py".to_string(),
            shell: "sh".to_string(),
            installer: vec!["uv".to_string(), "pip".to_string(), "install".to_string()],
            timeout_secs: 60,
            install_timeout_secs: 300,
        }
    }
}

impl SandboxConfig {
    /// Create a sandbox configuration rooted at `work_dir`.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Self::default()
        }
    }

    /// Set the materialized source extension.
    pub fn with_source_extension(mut self, extension: impl Into<String>) -> Self {
        self.source_extension = extension.into();
        self
    }

    /// Set the installer command prefix.
    pub fn with_installer(mut self, installer: Vec<String>) -> Self {
        self.installer = installer;
        self
    }

    /// Set the execution timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Configuration for the pipeline itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory where raw generations are kept for auditing.
    pub audit_dir: Option<PathBuf>,
}

/// Configuration for the HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}
