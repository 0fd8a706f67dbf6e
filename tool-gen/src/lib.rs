//! # Tool Synthesis and Reuse
//!
//! This crate turns natural-language task descriptions into small programs
//! ("tools"), keeps them for reuse, and runs them.
//!
//! - **Canonicalize**: restate the task as a problem summary
//! - **Reuse**: find the closest stored tool and have the backend verify it
//! - **Synthesize**: generate, wrap and persist a new tool on a miss
//! - **Execute**: bind arguments for this task and run the tool in a child process
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       SynthesisPipeline                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ToolAgents ──► GenerativeBackend       Sandbox ──► child process │
//! │      │                                     ▲                     │
//! │      ▼                                     │                     │
//! │  ToolRepository ──► ToolStore        ExecutionRequest            │
//! │        └──────────► SemanticIndex                                │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod agents;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod literal;
pub mod lock;
pub mod marker;
pub mod pipeline;
pub mod repository;
pub mod sandbox;
pub mod storage;
pub mod tool;

pub use agents::{AgentRole, GeneratedTool, ToolAgents};
pub use backend::{
    AnthropicBackend, CompletionRequest, GenerativeBackend, OpenAIBackend, build_backend,
};
pub use cache::{CacheMatch, SemanticIndex, SemanticToolCache};
pub use config::{
    BackendConfig, BackendProvider, CacheConfig, EmbeddingKind, PipelineConfig, SandboxConfig,
    ServerConfig, StoreConfig, ToolsmithConfig,
};
pub use error::{LiteralError, Result, StorageError, ToolError};
pub use literal::{decode_or_raw, parse_literal};
pub use lock::{KeyedLocks, fingerprint};
pub use marker::{Marker, parse_marked_blocks};
pub use pipeline::{OutcomeStatus, PipelineError, PipelineState, SynthesisPipeline, ToolOutcome};
pub use repository::{ReconcileReport, ToolRepository};
pub use sandbox::{ExecutionOutput, ExecutionRequest, Sandbox};
pub use storage::{JsonToolStore, MemoryToolStore, ToolStore};
pub use tool::{ResolvedTool, ToolPatch, ToolRecord};
