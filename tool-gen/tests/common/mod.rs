//! Shared fixtures for the pipeline integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use toolsmith_embeddings::HashingProvider;
use toolsmith_tool_gen::{
    AgentRole, CompletionRequest, GenerativeBackend, Marker, MemoryToolStore, Result, Sandbox,
    SandboxConfig, SemanticToolCache, SynthesisPipeline, ToolAgents, ToolRepository,
};

/// A shell implementation of factorial taking `--n=<int>`.
pub const FACTORIAL_SCRIPT: &str = r#"n=0
for arg in "$@"; do
  case "$arg" in
    --n=*) n="${arg#--n=}" ;;
  esac
done
result=1
i=2
while [ "$i" -le "$n" ]; do
  result=$((result * i))
  i=$((i + 1))
done
echo "$result""#;

/// Backend that answers every role from a script and counts calls per role.
pub struct ScriptedBackend {
    implementation: String,
    arguments: String,
    argument_types: String,
    env_variables: String,
    dependencies: String,
    command_args: String,
    generate_delay: Duration,
    matches: AtomicBool,
    calls: Mutex<HashMap<AgentRole, usize>>,
}

impl ScriptedBackend {
    /// Factorial tool: one `n: int` argument, no dependencies or env.
    pub fn factorial() -> Self {
        Self {
            implementation: FACTORIAL_SCRIPT.to_string(),
            arguments: "n".to_string(),
            argument_types: "int".to_string(),
            env_variables: "NONE".to_string(),
            dependencies: "NONE".to_string(),
            command_args: "--n=5".to_string(),
            generate_delay: Duration::ZERO,
            matches: AtomicBool::new(true),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_env_variables(mut self, env_variables: &str) -> Self {
        self.env_variables = env_variables.to_string();
        self
    }

    pub fn with_generate_delay(mut self, delay: Duration) -> Self {
        self.generate_delay = delay;
        self
    }

    pub fn with_implementation(mut self, implementation: &str) -> Self {
        self.implementation = implementation.to_string();
        self
    }

    /// Answer for the match role.
    pub fn set_matches(&self, matches: bool) {
        self.matches.store(matches, Ordering::SeqCst);
    }

    pub fn calls(&self, role: AgentRole) -> usize {
        self.calls.lock().unwrap().get(&role).copied().unwrap_or(0)
    }

    fn reply(&self, role: AgentRole, prompt: &str) -> String {
        match role {
            // Every distinct task is its own problem.
            AgentRole::Summarize => {
                let task = prompt.strip_prefix("Task:\n").unwrap_or(prompt);
                Marker::Summary.wrap(task)
            }
            AgentRole::Generate => [
                Marker::Implementation.wrap(&self.implementation),
                Marker::Dependencies.wrap(&self.dependencies),
                Marker::Arguments.wrap(&self.arguments),
                Marker::ArgumentTypes.wrap(&self.argument_types),
                Marker::EnvVariables.wrap(&self.env_variables),
            ]
            .join("\n"),
            AgentRole::Format => {
                let function = prompt
                    .strip_prefix("Function:\n")
                    .and_then(|rest| rest.split("\n\nArguments:").next())
                    .unwrap_or_default();
                Marker::Implementation.wrap(&format!("```sh\n{function}\n```"))
            }
            AgentRole::Match => {
                let answer = if self.matches.load(Ordering::SeqCst) {
                    "TRUE"
                } else {
                    "FALSE"
                };
                format!("# START_MATCH {answer} # END_MATCH")
            }
            AgentRole::Invoke => {
                let file = prompt
                    .lines()
                    .find_map(|line| line.strip_prefix("Script file: "))
                    .unwrap_or_default();
                Marker::Implementation.wrap(&format!("sh {file} {}", self.command_args))
            }
        }
    }
}

#[async_trait]
impl GenerativeBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let role = AgentRole::from_system_prompt(&request.system).unwrap();
        *self.calls.lock().unwrap().entry(role).or_default() += 1;
        if role == AgentRole::Generate && !self.generate_delay.is_zero() {
            tokio::time::sleep(self.generate_delay).await;
        }
        Ok(self.reply(role, &request.prompt))
    }
}

/// Test pipeline handles.
pub struct Harness {
    pub backend: Arc<ScriptedBackend>,
    pub store: Arc<MemoryToolStore>,
    pub cache: Arc<SemanticToolCache>,
    pub pipeline: Arc<SynthesisPipeline>,
}

/// Assemble a pipeline over in-memory stores, running `sh` tools in `work_dir`.
pub fn harness(backend: ScriptedBackend, work_dir: &Path) -> Harness {
    let backend = Arc::new(backend);
    let store = Arc::new(MemoryToolStore::new());
    let cache = Arc::new(SemanticToolCache::new(Arc::new(HashingProvider::new(256))));
    let repository = ToolRepository::new(store.clone(), cache.clone());
    let sandbox = Sandbox::new(
        SandboxConfig::new(work_dir)
            .with_source_extension("sh")
            .with_installer(vec!["true".to_string()])
            .with_timeout_secs(10),
    );
    let pipeline = SynthesisPipeline::new(ToolAgents::new(backend.clone()), repository, sandbox);

    Harness {
        backend,
        store,
        cache,
        pipeline: Arc::new(pipeline),
    }
}
