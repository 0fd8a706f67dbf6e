//! The generative roles of the pipeline.
//!
//! Each role is one completion call with a fixed system prompt. Replies are
//! read through [`parse_marked_blocks`], so every prompt tells the backend
//! which sentinels to wrap its answer in.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::{CompletionRequest, GenerativeBackend};
use crate::error::{Result, ToolError};
use crate::marker::{Marker, parse_marked_blocks};
use crate::tool::{ToolRecord, join_list, parse_list};

/// A generative role and its fixed system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    Summarize,
    Generate,
    Format,
    Match,
    Invoke,
}

impl AgentRole {
    pub fn name(self) -> &'static str {
        match self {
            Self::Summarize => "summarize",
            Self::Generate => "generate",
            Self::Format => "format",
            Self::Match => "match",
            Self::Invoke => "invoke",
        }
    }

    /// The system prompt sent with every call in this role.
    pub fn system_prompt(self) -> &'static str {
        match self {
            Self::Summarize => SUMMARIZE_PROMPT,
            Self::Generate => GENERATE_PROMPT,
            Self::Format => FORMAT_PROMPT,
            Self::Match => MATCH_PROMPT,
            Self::Invoke => INVOKE_PROMPT,
        }
    }

    /// Identify the role a system prompt belongs to.
    pub fn from_system_prompt(system: &str) -> Option<Self> {
        [
            Self::Summarize,
            Self::Generate,
            Self::Format,
            Self::Match,
            Self::Invoke,
        ]
        .into_iter()
        .find(|role| role.system_prompt() == system)
    }
}

const SUMMARIZE_PROMPT: &str = "\
You restate programming tasks as a short, general problem description.
Drop the concrete input values of the task and keep only the capability that is needed,
so that different instances of the same problem produce the same description.
Answer with the description between `# START_SUMMARY` and `# END_SUMMARY`.";

const GENERATE_PROMPT: &str = "\
You write one self-contained Python function that solves the described problem.
The function must print nothing; it returns its result.
Secrets and configuration must be read from environment variables, never hard coded.
Answer with these blocks:
# START_IMPLEMENTATION
<the function and its imports>
# END_IMPLEMENTATION
# START_DEPENDENCIES
<comma separated pip packages, or NONE>
# END_DEPENDENCIES
# START_ARGUMENTS
<comma separated argument names, in order, or NONE>
# END_ARGUMENTS
# START_ARGUMENT_TYPES
<comma separated primitive type of each argument, or NONE>
# END_ARGUMENT_TYPES
# START_ENV_VARIABLES
<comma separated environment variable names the code reads, or NONE>
# END_ENV_VARIABLES";

const FORMAT_PROMPT: &str = "\
You turn a Python function into a runnable script without changing what the function does.
Add a main entry point that parses every argument as `--name=value`, converts it to its type,
calls the function and prints the repr() of the return value to standard output.
Answer with the complete script between `# START_IMPLEMENTATION` and `# END_IMPLEMENTATION`.";

const MATCH_PROMPT: &str = "\
You decide whether an existing tool can solve a task exactly as stated.
Consider the tool's description and implementation, not just the topic.
Answer `# START_MATCH TRUE # END_MATCH` or `# START_MATCH FALSE # END_MATCH`.";

const INVOKE_PROMPT: &str = "\
You write the single shell command that runs an existing script for a task.
Use the script file name you are given and pass each argument as `--name=value`
with the value the task calls for.
Never mention environment variables in the command, neither their names nor their values.
Answer with the command between `# START_IMPLEMENTATION` and `# END_IMPLEMENTATION`.";

/// Raw output of the generate role, before formatting.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedTool {
    pub implementation: String,
    pub dependencies: Vec<String>,
    pub arguments: Vec<String>,
    pub argument_types: Vec<String>,
    pub env_variables: Vec<String>,
}

/// The five generative roles, sharing one backend.
#[derive(Clone)]
pub struct ToolAgents {
    backend: Arc<dyn GenerativeBackend>,
    max_output_tokens: u32,
    temperature: f32,
    audit_dir: Option<PathBuf>,
}

impl ToolAgents {
    pub fn new(backend: Arc<dyn GenerativeBackend>) -> Self {
        Self {
            backend,
            max_output_tokens: 4096,
            temperature: 0.0,
            audit_dir: None,
        }
    }

    /// Set the sampling parameters used for every role.
    pub fn with_sampling(mut self, max_output_tokens: u32, temperature: f32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self.temperature = temperature;
        self
    }

    /// Keep raw generate/format/invoke replies under `dir`.
    pub fn with_audit_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.audit_dir = dir;
        self
    }

    async fn call(&self, role: AgentRole, prompt: String) -> Result<String> {
        debug!(role = role.name(), backend = self.backend.name(), "generative call");
        let request = CompletionRequest::new(role.system_prompt(), prompt)
            .with_max_output_tokens(self.max_output_tokens)
            .with_temperature(self.temperature);
        self.backend
            .complete(&request)
            .await
            .map_err(|e| ToolError::GenerationFailed(format!("{} call failed: {e}", role.name())))
    }

    async fn audit(&self, prefix: &str, id: &str, contents: &str) {
        let Some(dir) = &self.audit_dir else {
            return;
        };
        let path = dir.join(format!("{prefix}_{id}.txt"));
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!("failed to create audit directory {}: {e}", dir.display());
            return;
        }
        if let Err(e) = tokio::fs::write(&path, contents).await {
            warn!("failed to write audit file {}: {e}", path.display());
        }
    }

    /// Canonicalize a task into its problem summary.
    pub async fn summarize(&self, task: &str) -> Result<String> {
        let reply = self
            .call(AgentRole::Summarize, format!("Task:\n{task}"))
            .await?;
        let summary = parse_marked_blocks(Marker::Summary, &reply);
        if summary.is_empty() {
            return Err(ToolError::GenerationFailed(
                "reply has no SUMMARY block".to_string(),
            ));
        }
        Ok(summary)
    }

    /// Generate an implementation and its metadata for `summary`.
    ///
    /// `id` only names the audit file.
    pub async fn generate(&self, summary: &str, id: &str) -> Result<GeneratedTool> {
        let reply = self
            .call(AgentRole::Generate, format!("Problem:\n{summary}"))
            .await?;
        self.audit("generate", id, &reply).await;

        let implementation = parse_marked_blocks(Marker::Implementation, &reply);
        if implementation.is_empty() {
            return Err(ToolError::GenerationFailed(
                "reply has no IMPLEMENTATION block".to_string(),
            ));
        }

        let generated = GeneratedTool {
            implementation,
            dependencies: parse_list(&parse_marked_blocks(Marker::Dependencies, &reply)),
            arguments: parse_list(&parse_marked_blocks(Marker::Arguments, &reply)),
            argument_types: parse_list(&parse_marked_blocks(Marker::ArgumentTypes, &reply)),
            env_variables: parse_list(&parse_marked_blocks(Marker::EnvVariables, &reply)),
        };
        if generated.arguments.len() != generated.argument_types.len() {
            return Err(ToolError::GenerationFailed(format!(
                "{} arguments but {} argument types",
                generated.arguments.len(),
                generated.argument_types.len()
            )));
        }
        Ok(generated)
    }

    /// Wrap a generated function with a `--name=value` command-line entry point.
    pub async fn format(&self, generated: &GeneratedTool, id: &str) -> Result<String> {
        let prompt = format!(
            "Function:\n{}\n\nArguments: {}\nArgument types: {}",
            generated.implementation,
            join_list(&generated.arguments),
            join_list(&generated.argument_types),
        );
        let reply = self.call(AgentRole::Format, prompt).await?;
        self.audit("formatted", id, &reply).await;

        let script = parse_marked_blocks(Marker::Implementation, &reply);
        if script.is_empty() {
            return Err(ToolError::GenerationFailed(
                "format reply has no IMPLEMENTATION block".to_string(),
            ));
        }
        Ok(script)
    }

    /// Ask whether `record` satisfies `task` as stated.
    pub async fn verify(&self, task: &str, summary: &str, record: &ToolRecord) -> Result<bool> {
        let prompt = format!(
            "Task:\n{task}\n\nProblem summary:\n{summary}\n\nTool description:\n{}\n\nTool implementation:\n{}",
            record.description, record.implementation
        );
        let reply = self.call(AgentRole::Match, prompt).await?;
        let answer = parse_marked_blocks(Marker::Match, &reply);
        if answer.is_empty() {
            warn!(tool_id = %record.id, "match reply has no MATCH block; treating as no match");
        }
        Ok(answer.eq_ignore_ascii_case("TRUE"))
    }

    /// Produce the shell command that runs `record` for `task`.
    ///
    /// `file_name` is the name the sandbox materializes the source under.
    pub async fn invoke(
        &self,
        task: &str,
        summary: &str,
        record: &ToolRecord,
        file_name: &str,
    ) -> Result<String> {
        let prompt = format!(
            "Task:\n{task}\n\nProblem summary:\n{summary}\n\nScript file: {file_name}\nArguments: {}\nArgument types: {}\n\nScript:\n{}",
            join_list(&record.arguments),
            join_list(&record.argument_types),
            record.implementation
        );
        let reply = self.call(AgentRole::Invoke, prompt).await?;
        self.audit("invocation", &record.id, &reply).await;

        let command = parse_marked_blocks(Marker::Implementation, &reply);
        if command.is_empty() {
            return Err(ToolError::GenerationFailed(
                "invoke reply has no IMPLEMENTATION block".to_string(),
            ));
        }
        check_invocation(&command, &record.id, &record.env_variables)?;
        Ok(command)
    }
}

/// Reject commands that do not name the tool or that leak environment variables.
pub fn check_invocation(command: &str, tool_id: &str, env_variables: &[String]) -> Result<()> {
    if !command.contains(tool_id) {
        return Err(ToolError::GenerationFailed(format!(
            "invocation does not reference tool {tool_id}"
        )));
    }
    for name in env_variables {
        let leaks_name = command.contains(&format!("${name}"))
            || command.contains(&format!("${{{name}}}"))
            || command.contains(&format!("{name}="));
        let leaks_value = std::env::var(name)
            .ok()
            .is_some_and(|value| exposes_value(command, &value));
        if leaks_name || leaks_value {
            return Err(ToolError::GenerationFailed(format!(
                "invocation exposes environment variable {name}"
            )));
        }
    }
    Ok(())
}

/// Values shorter than this are too common to tell apart from arguments.
const MIN_SECRET_LEN: usize = 8;

/// Whether `value` appears in `command` as a whole shell word or as the
/// right-hand side of a `name=value` word.
fn exposes_value(command: &str, value: &str) -> bool {
    if value.len() < MIN_SECRET_LEN {
        return false;
    }
    command.split_whitespace().map(unquote).any(|word| {
        word == value
            || word
                .split_once('=')
                .is_some_and(|(_, rhs)| unquote(rhs) == value)
    })
}

fn unquote(word: &str) -> &str {
    word.trim_matches(['"', '\''])
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct FixedBackend {
        reply: String,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl FixedBackend {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl GenerativeBackend for FixedBackend {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn test_roles_roundtrip_system_prompt() {
        for role in [
            AgentRole::Summarize,
            AgentRole::Generate,
            AgentRole::Format,
            AgentRole::Match,
            AgentRole::Invoke,
        ] {
            assert_eq!(AgentRole::from_system_prompt(role.system_prompt()), Some(role));
        }
    }

    #[tokio::test]
    async fn test_generate_parses_metadata() {
        let reply = [
            Marker::Implementation.wrap("import requests\ndef fetch(url):\n    return 1"),
            Marker::Dependencies.wrap("requests"),
            Marker::Arguments.wrap("url"),
            Marker::ArgumentTypes.wrap("str"),
            Marker::EnvVariables.wrap("API_KEY, REGION"),
        ]
        .join("\n");
        let backend = FixedBackend::new(&reply);
        let agents = ToolAgents::new(backend.clone()).with_sampling(512, 0.2);

        let generated = agents.generate("Fetch a URL", "id-1").await.unwrap();

        assert_eq!(generated.dependencies, vec!["requests"]);
        assert_eq!(generated.arguments, vec!["url"]);
        assert_eq!(generated.argument_types, vec!["str"]);
        assert_eq!(generated.env_variables, vec!["API_KEY", "REGION"]);

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].system, AgentRole::Generate.system_prompt());
        assert_eq!(seen[0].max_output_tokens, 512);
    }

    #[tokio::test]
    async fn test_generate_without_implementation_fails() {
        let agents = ToolAgents::new(FixedBackend::new("sorry, I cannot"));
        assert!(matches!(
            agents.generate("x", "id").await,
            Err(ToolError::GenerationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_generate_rejects_mismatched_argument_types() {
        let reply = [
            Marker::Implementation.wrap("def f(a, b): return a"),
            Marker::Arguments.wrap("a, b"),
            Marker::ArgumentTypes.wrap("int"),
        ]
        .join("\n");
        let agents = ToolAgents::new(FixedBackend::new(&reply));
        assert!(agents.generate("x", "id").await.is_err());
    }

    #[tokio::test]
    async fn test_verify_reads_match_block() {
        let record = ToolRecord::new("desc", "code");
        let yes = ToolAgents::new(FixedBackend::new("# START_MATCH TRUE # END_MATCH"));
        let no = ToolAgents::new(FixedBackend::new("# START_MATCH FALSE # END_MATCH"));
        let silent = ToolAgents::new(FixedBackend::new("maybe"));

        assert!(yes.verify("t", "s", &record).await.unwrap());
        assert!(!no.verify("t", "s", &record).await.unwrap());
        assert!(!silent.verify("t", "s", &record).await.unwrap());
    }

    #[tokio::test]
    async fn test_audit_files_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let reply = Marker::Implementation.wrap("def f(): return 1");
        let agents = ToolAgents::new(FixedBackend::new(&reply))
            .with_audit_dir(Some(dir.path().join("audit")));

        let generated = agents.generate("x", "abc").await.unwrap();
        agents.format(&generated, "abc").await.unwrap();

        assert!(dir.path().join("audit/generate_abc.txt").exists());
        assert!(dir.path().join("audit/formatted_abc.txt").exists());
    }

    #[test]
    fn test_check_invocation() {
        let env = vec!["TOOLSMITH_TEST_UNSET_TOKEN".to_string()];
        assert!(check_invocation("python abc.py --n=5", "abc", &env).is_ok());
        assert!(check_invocation("python other.py --n=5", "abc", &env).is_err());
        assert!(
            check_invocation(
                "TOOLSMITH_TEST_UNSET_TOKEN=x python abc.py",
                "abc",
                &env
            )
            .is_err()
        );
        assert!(
            check_invocation(
                "python abc.py --key=${TOOLSMITH_TEST_UNSET_TOKEN}",
                "abc",
                &env
            )
            .is_err()
        );
        assert!(
            check_invocation("python abc.py --key=$TOOLSMITH_TEST_UNSET_TOKEN", "abc", &env)
                .is_err()
        );
    }

    #[test]
    fn test_short_values_do_not_count_as_leaks() {
        assert!(!exposes_value("python abc.py --n=5", "5"));
        assert!(!exposes_value("python abc.py --region=us", "us"));
    }

    #[test]
    fn test_value_leak_needs_a_whole_word() {
        let secret = "sk-live-0123456789";
        assert!(exposes_value(&format!("python abc.py --key={secret}"), secret));
        assert!(exposes_value(&format!("python abc.py --key \"{secret}\""), secret));
        assert!(exposes_value(&format!("python abc.py '{secret}'"), secret));
        assert!(!exposes_value(
            &format!("python abc.py --text={secret}-suffix"),
            secret
        ));
    }

    #[test]
    fn test_check_invocation_reads_current_value() {
        // HOME is set in any test environment; passing it verbatim leaks it.
        let Ok(home) = std::env::var("HOME") else {
            return;
        };
        if home.len() < MIN_SECRET_LEN {
            return;
        }
        let env = vec!["HOME".to_string()];
        assert!(check_invocation(&format!("python abc.py --dir={home}"), "abc", &env).is_err());
        assert!(check_invocation("python abc.py --n=5", "abc", &env).is_ok());
    }
}
