//! The synthesis pipeline.
//!
//! ```text
//! Received -> Summarized -> CacheHit-Verified ----------------------> Invoked -> Completed
//!                        \-> CacheMiss -> Synthesized -> Persisted -/
//! ```
//!
//! Any failure moves to `Failed`, carrying the state it happened in.
//! Cache hits take no lock. A miss takes the lock for the summary's
//! fingerprint and looks again before synthesizing, so concurrent requests
//! for the same summary synthesize once.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agents::ToolAgents;
use crate::backend::build_backend;
use crate::cache::SemanticToolCache;
use crate::config::ToolsmithConfig;
use crate::error::{Result, ToolError};
use crate::lock::{KeyedLocks, fingerprint};
use crate::repository::ToolRepository;
use crate::sandbox::{ExecutionRequest, Sandbox};
use crate::storage::JsonToolStore;
use crate::tool::{ResolvedTool, ToolRecord};

/// States of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    Received,
    Summarized,
    CacheHitVerified,
    CacheMiss,
    Synthesized,
    Persisted,
    Invoked,
    Completed,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "Received",
            Self::Summarized => "Summarized",
            Self::CacheHitVerified => "CacheHit-Verified",
            Self::CacheMiss => "CacheMiss",
            Self::Synthesized => "Synthesized",
            Self::Persisted => "Persisted",
            Self::Invoked => "Invoked",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// A failed run: the state the failing step started from, and the cause.
#[derive(Debug, Error)]
#[error("{state}: {source}")]
pub struct PipelineError {
    pub state: PipelineState,
    #[source]
    pub source: ToolError,
}

impl PipelineError {
    fn at(state: PipelineState) -> impl FnOnce(ToolError) -> Self {
        move |source| {
            warn!(%state, error = %source, "pipeline failed");
            Self { state, source }
        }
    }
}

/// Status of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutcomeStatus {
    Success,
    Error,
}

/// The structured result every run resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub status: OutcomeStatus,
    pub result: Value,
    pub tool_id: Option<String>,
    pub command: Option<String>,
}

impl ToolOutcome {
    fn error(message: String, resolved: Option<&ResolvedTool>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            result: Value::String(message),
            tool_id: resolved.map(|r| r.record.id.clone()),
            command: resolved.map(|r| r.command.clone()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Result of one cache lookup.
enum Lookup {
    Hit(ToolRecord),
    /// The nearest candidate failed verification.
    Rejected(String),
    Miss,
}

/// Turns task descriptions into executed tools, reusing them where possible.
pub struct SynthesisPipeline {
    agents: ToolAgents,
    repository: ToolRepository,
    sandbox: Sandbox,
    synthesis_locks: KeyedLocks,
}

impl SynthesisPipeline {
    pub fn new(agents: ToolAgents, repository: ToolRepository, sandbox: Sandbox) -> Self {
        Self {
            agents,
            repository,
            sandbox,
            synthesis_locks: KeyedLocks::new(),
        }
    }

    /// Assemble the pipeline described by `config` and reconcile its stores.
    pub async fn from_config(config: &ToolsmithConfig) -> Result<Self> {
        let backend = build_backend(&config.backend)?;
        let agents = ToolAgents::new(backend)
            .with_sampling(config.backend.max_output_tokens, config.backend.temperature)
            .with_audit_dir(config.pipeline.audit_dir.clone());

        let store = JsonToolStore::new(&config.store.root).await?;
        let cache = SemanticToolCache::from_config(&config.cache).await?;
        let repository = ToolRepository::new(Arc::new(store), Arc::new(cache));
        repository.reconcile().await?;

        Ok(Self::new(
            agents,
            repository,
            Sandbox::new(config.sandbox.clone()),
        ))
    }

    pub fn repository(&self) -> &ToolRepository {
        &self.repository
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Resolve `task` to a tool and an invocation command, without running it.
    pub async fn resolve(&self, task: &str) -> std::result::Result<ResolvedTool, PipelineError> {
        enter(PipelineState::Received);
        let summary = self
            .agents
            .summarize(task)
            .await
            .map_err(PipelineError::at(PipelineState::Received))?;
        enter(PipelineState::Summarized);

        let (record, reused, state) = match self
            .lookup(task, &summary, None)
            .await
            .map_err(PipelineError::at(PipelineState::Summarized))?
        {
            Lookup::Hit(record) => (record, true, PipelineState::CacheHitVerified),
            Lookup::Rejected(id) => self.resolve_miss(task, &summary, Some(&id)).await?,
            Lookup::Miss => self.resolve_miss(task, &summary, None).await?,
        };
        enter(state);

        let file_name = self.sandbox.source_file_name(&record.id);
        let command = self
            .agents
            .invoke(task, &summary, &record, &file_name)
            .await
            .map_err(PipelineError::at(state))?;
        enter(PipelineState::Invoked);

        Ok(ResolvedTool {
            record,
            command,
            reused,
        })
    }

    /// Resolve and run `task`; every failure becomes an `ERROR` outcome.
    pub async fn synthesize_or_reuse(&self, task: &str) -> ToolOutcome {
        match self.resolve(task).await {
            Ok(resolved) => self.execute(&resolved).await,
            Err(e) => {
                enter(PipelineState::Failed);
                ToolOutcome::error(e.to_string(), None)
            }
        }
    }

    /// Run a resolved tool.
    pub async fn execute(&self, resolved: &ResolvedTool) -> ToolOutcome {
        let request = ExecutionRequest::from_record(&resolved.record, &resolved.command);
        match self.sandbox.execute(&request).await {
            Ok(output) => {
                enter(PipelineState::Completed);
                let (status, result) = match output.error {
                    Some(error) => (OutcomeStatus::Error, error),
                    None => (
                        OutcomeStatus::Success,
                        output.output.unwrap_or(Value::Null),
                    ),
                };
                ToolOutcome {
                    status,
                    result,
                    tool_id: Some(resolved.record.id.clone()),
                    command: Some(resolved.command.clone()),
                }
            }
            Err(e) => {
                warn!(
                    state = %PipelineState::Invoked,
                    tool_id = %resolved.record.id,
                    error = %e,
                    "execution failed"
                );
                enter(PipelineState::Failed);
                ToolOutcome::error(e.to_string(), Some(resolved))
            }
        }
    }

    /// Nearest candidate, if it exists in the store and passes verification.
    ///
    /// A candidate whose id is `rejected` was already turned down for this
    /// request and is not put to the backend again.
    async fn lookup(&self, task: &str, summary: &str, rejected: Option<&str>) -> Result<Lookup> {
        let Some(candidate) = self.repository.query(summary).await? else {
            info!("cache miss: index is empty");
            return Ok(Lookup::Miss);
        };
        if rejected == Some(candidate.id.as_str()) {
            debug!(tool_id = %candidate.id, "nearest candidate already rejected");
            return Ok(Lookup::Rejected(candidate.id));
        }

        let Some(record) = self.repository.get(&candidate.id).await? else {
            warn!("{}", ToolError::StoreInconsistency(candidate.id.clone()));
            self.repository.forget(&candidate.id).await?;
            return Ok(Lookup::Miss);
        };

        if self.agents.verify(task, summary, &record).await? {
            info!(tool_id = %record.id, distance = candidate.distance, "cache hit");
            Ok(Lookup::Hit(record))
        } else {
            info!(tool_id = %record.id, distance = candidate.distance, "cache candidate rejected");
            Ok(Lookup::Rejected(record.id))
        }
    }

    /// Synthesize under the fingerprint lock, unless a concurrent run got there first.
    async fn resolve_miss(
        &self,
        task: &str,
        summary: &str,
        rejected: Option<&str>,
    ) -> std::result::Result<(ToolRecord, bool, PipelineState), PipelineError> {
        let _guard = self.synthesis_locks.lock(&fingerprint(summary)).await;

        if let Lookup::Hit(record) = self
            .lookup(task, summary, rejected)
            .await
            .map_err(PipelineError::at(PipelineState::Summarized))?
        {
            debug!(tool_id = %record.id, "tool synthesized by a concurrent request");
            return Ok((record, true, PipelineState::CacheHitVerified));
        }
        enter(PipelineState::CacheMiss);

        let record = self
            .synthesize(summary)
            .await
            .map_err(PipelineError::at(PipelineState::CacheMiss))?;
        enter(PipelineState::Synthesized);

        self.repository
            .add(record.clone())
            .await
            .map_err(PipelineError::at(PipelineState::Synthesized))?;
        info!(tool_id = %record.id, "synthesized new tool");

        Ok((record, false, PipelineState::Persisted))
    }

    async fn synthesize(&self, summary: &str) -> Result<ToolRecord> {
        let id = Uuid::new_v4().to_string();
        let generated = self.agents.generate(summary, &id).await?;
        let implementation = self.agents.format(&generated, &id).await?;

        let record = ToolRecord::with_id(id, summary, implementation)
            .with_arguments(generated.arguments, generated.argument_types)
            .with_env_variables(generated.env_variables)
            .with_dependencies(generated.dependencies);
        record
            .validate()
            .map_err(|e| ToolError::GenerationFailed(e.to_string()))?;
        Ok(record)
    }
}

fn enter(state: PipelineState) {
    debug!(%state, "pipeline state");
}
