//! HTTP front end for the scan engine.
//!
//! ## Environment Variables
//! - `PORT` - port to listen on (default: `3000`)
//! - `SCAN_*`, `FFMPEG_THREADS` - pipeline tuning, see `ScanConfig::from_env`
//! - `RUST_LOG` - log filter (default: `info`)

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    routing::{get, post},
};
use serde_json::Value;
use std::sync::Arc;

use scan_engine::{AnalyzeResponse, PipelineError, ScanConfig, ScanEngine, logging};

const MAX_REQUEST_BODY: usize = 1024 * 1024; // 1 MB of job JSON is plenty

#[derive(Clone)]
struct AppState {
    engine: Arc<ScanEngine>,
}

async fn health() -> &'static str {
    "ok"
}

/// POST /analyze - always answers with the status envelope
async fn analyze(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<AnalyzeResponse>) {
    let request: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("Invalid JSON: {}", e));
        }
    };

    // Run on its own task so a panic inside the pipeline still gets an envelope
    let engine = state.engine.clone();
    let outcome = tokio::spawn(async move { engine.analyze(&request).await }).await;

    match outcome {
        Ok(Ok(results)) => (StatusCode::OK, Json(AnalyzeResponse::Success { results })),
        Ok(Err(e @ PipelineError::Validation(_))) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Ok(Err(e)) => {
            log::error!("[http] Analyze failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            log::error!("[http] Analyze task panicked: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
        }
    }
}

fn error_response(status: StatusCode, message: String) -> (StatusCode, Json<AnalyzeResponse>) {
    (status, Json(AnalyzeResponse::Error { message }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();

    let config = ScanConfig::from_env();
    log::info!(
        "[http] Base dir {:?}, classifier {:?}, {} concurrent video(s)",
        config.base_dir,
        config.classifier,
        config.video_concurrency
    );
    tokio::fs::create_dir_all(&config.base_dir).await?;

    // Model download and weight loading block
    let engine = tokio::task::spawn_blocking(move || ScanEngine::from_config(config))
        .await?
        .map_err(|e| format!("failed to build scan engine: {}", e))?;

    let state = AppState {
        engine: Arc::new(engine),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY))
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("[http] Listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
