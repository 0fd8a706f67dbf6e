//! HTTP boundary of the toolsmith pipeline.
//!
//! | Method   | Path               | Body            | Response                          |
//! |----------|--------------------|-----------------|-----------------------------------|
//! | `POST`   | `/api/genTool`     | `{"task": ...}` | tool record plus `command`        |
//! | `POST`   | `/api/run`         | `{"task": ...}` | `{status, result, tool_id, command}` |
//! | `GET`    | `/api/tools/{id}`  |                 | tool record                       |
//! | `PATCH`  | `/api/tools/{id}`  | partial record  | updated tool record               |
//! | `DELETE` | `/api/tools/{id}`  |                 | `{"deleted": id}`                 |
//! | `GET`    | `/api/health`      |                 | `{status, version, tools}`        |

pub mod handler;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use toolsmith_tool_gen::SynthesisPipeline;
use tracing::info;

pub use handler::AppState;

/// Build the router over `pipeline`.
pub fn router(pipeline: Arc<SynthesisPipeline>) -> Router {
    Router::new()
        .route("/api/genTool", post(handler::gen_tool))
        .route("/api/run", post(handler::run))
        .route(
            "/api/tools/{id}",
            get(handler::get_tool)
                .patch(handler::update_tool)
                .delete(handler::delete_tool),
        )
        .route("/api/health", get(handler::health))
        .with_state(AppState::new(pipeline))
}

/// Serve `pipeline` on `listener` until ctrl-c.
pub async fn serve(listener: TcpListener, pipeline: Arc<SynthesisPipeline>) -> anyhow::Result<()> {
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
