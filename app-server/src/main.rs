use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use toolsmith_tool_gen::{SynthesisPipeline, ToolsmithConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "toolsmith",
    version,
    about = "Synthesize, reuse and run small tools from task descriptions"
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// Drop every stored tool before serving.
        #[arg(long)]
        clear_db: bool,
    },
    /// Resolve and execute one task, printing the outcome as JSON.
    Run { task: String },
    /// Resolve one task to a tool and command without executing it.
    Resolve { task: String },
    /// Drop every stored tool.
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout stays machine readable.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ToolsmithConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ToolsmithConfig::default(),
    };
    let pipeline = Arc::new(
        SynthesisPipeline::from_config(&config)
            .await
            .context("building pipeline")?,
    );

    match cli.command {
        Command::Serve {
            host,
            port,
            clear_db,
        } => {
            if clear_db {
                pipeline.repository().clear().await?;
            }
            let host = host.unwrap_or(config.server.host);
            let port = port.unwrap_or(config.server.port);
            let listener = TcpListener::bind((host.as_str(), port))
                .await
                .with_context(|| format!("binding {host}:{port}"))?;
            toolsmith_app_server::serve(listener, pipeline).await
        }
        Command::Run { task } => {
            let outcome = pipeline.synthesize_or_reuse(&task).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.is_success() {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Resolve { task } => {
            let resolved = pipeline.resolve(&task).await?;
            println!("{}", serde_json::to_string_pretty(&resolved)?);
            Ok(())
        }
        Command::Clear => {
            pipeline.repository().clear().await?;
            info!("cleared all tools");
            Ok(())
        }
    }
}
