//! Drives the HTTP API over a real socket.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tempfile::TempDir;
use toolsmith_embeddings::HashingProvider;
use toolsmith_tool_gen::{
    AgentRole, CompletionRequest, GenerativeBackend, Marker, MemoryToolStore, Result, Sandbox,
    SandboxConfig, SemanticToolCache, SynthesisPipeline, ToolAgents, ToolRepository,
};

/// Answers every role for a tool that doubles `--x=<int>`.
struct DoublerBackend;

#[async_trait]
impl GenerativeBackend for DoublerBackend {
    fn name(&self) -> &str {
        "doubler"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let role = AgentRole::from_system_prompt(&request.system).unwrap();
        let reply = match role {
            AgentRole::Summarize => Marker::Summary.wrap("Double an integer x"),
            AgentRole::Generate => [
                Marker::Implementation.wrap("echo $(( ${1#--x=} * 2 ))"),
                Marker::Dependencies.wrap("NONE"),
                Marker::Arguments.wrap("x"),
                Marker::ArgumentTypes.wrap("int"),
                Marker::EnvVariables.wrap("NONE"),
            ]
            .join("\n"),
            AgentRole::Format => Marker::Implementation.wrap("echo $(( ${1#--x=} * 2 ))"),
            AgentRole::Match => "# START_MATCH TRUE # END_MATCH".to_string(),
            AgentRole::Invoke => {
                let file = request
                    .prompt
                    .lines()
                    .find_map(|line| line.strip_prefix("Script file: "))
                    .unwrap_or_default();
                Marker::Implementation.wrap(&format!("sh {file} --x=21"))
            }
        };
        Ok(reply)
    }
}

async fn spawn_server(dir: &TempDir) -> SocketAddr {
    let repository = ToolRepository::new(
        Arc::new(MemoryToolStore::new()),
        Arc::new(SemanticToolCache::new(Arc::new(HashingProvider::new(64)))),
    );
    let sandbox = Sandbox::new(
        SandboxConfig::new(dir.path())
            .with_source_extension("sh")
            .with_timeout_secs(10),
    );
    let pipeline =
        SynthesisPipeline::new(ToolAgents::new(Arc::new(DoublerBackend)), repository, sandbox);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = toolsmith_app_server::router(Arc::new(pipeline));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_gen_tool_without_task_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let addr = spawn_server(&dir).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/api/genTool"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "error": "Missing task in request body" }));
}

#[tokio::test]
async fn test_gen_tool_returns_record_with_command() {
    let dir = TempDir::new().unwrap();
    let addr = spawn_server(&dir).await;

    let body: Value = reqwest::Client::new()
        .post(format!("http://{addr}/api/genTool"))
        .json(&json!({ "task": "double 21" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let id = body["id"].as_str().unwrap();
    assert_eq!(body["command"], json!(format!("sh {id}.sh --x=21")));
    assert_eq!(body["arguments"], json!(["x"]));
    assert_eq!(body["env_variables"], json!([]));
    assert_eq!(body["dependencies"], json!([]));
    assert_eq!(body["description"], "Double an integer x");
}

#[tokio::test]
async fn test_run_executes_tool() {
    let dir = TempDir::new().unwrap();
    let addr = spawn_server(&dir).await;

    let body: Value = reqwest::Client::new()
        .post(format!("http://{addr}/api/run"))
        .json(&json!({ "task": "double 21" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "SUCCESS");
    assert_eq!(body["result"], 42);
}

#[tokio::test]
async fn test_tool_maintenance_endpoints() {
    let dir = TempDir::new().unwrap();
    let addr = spawn_server(&dir).await;
    let client = reqwest::Client::new();

    let created: Value = client
        .post(format!("http://{addr}/api/genTool"))
        .json(&json!({ "task": "double 21" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    let tool_url = format!("http://{addr}/api/tools/{id}");

    let fetched: Value = client.get(&tool_url).send().await.unwrap().json().await.unwrap();
    assert_eq!(fetched["id"], json!(id));
    assert!(fetched.get("command").is_none());

    let patched: Value = client
        .patch(&tool_url)
        .json(&json!({ "dependencies": ["numpy"] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(patched["dependencies"], json!(["numpy"]));
    assert_eq!(patched["description"], "Double an integer x");

    let empty_patch = client.patch(&tool_url).json(&json!({})).send().await.unwrap();
    assert_eq!(empty_patch.status(), reqwest::StatusCode::BAD_REQUEST);

    let health: Value = client
        .get(format!("http://{addr}/api/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["tools"], 1);

    let deleted = client.delete(&tool_url).send().await.unwrap();
    assert_eq!(deleted.status(), reqwest::StatusCode::OK);

    let missing = client.get(&tool_url).send().await.unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    let again = client.delete(&tool_url).send().await.unwrap();
    assert_eq!(again.status(), reqwest::StatusCode::NOT_FOUND);
}
