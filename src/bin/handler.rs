//! One-shot entrypoint: read a request, print the response envelope.
//!
//! Usage: `handler [request.json]`. Reads stdin when no path is given.
//! The response is always a JSON envelope on stdout; logs go to stderr.
//!
//! ## Environment Variables
//! - `SCAN_*`, `FFMPEG_THREADS` - pipeline tuning, see `ScanConfig::from_env`
//! - `RUST_LOG` - log filter (default: `info`)

use serde_json::Value;
use std::io::Read;
use std::sync::Arc;

use scan_engine::{AnalyzeResponse, ScanConfig, ScanEngine, logging};

fn read_request() -> Result<Value, String> {
    let raw = match std::env::args().nth(1) {
        Some(path) => std::fs::read_to_string(&path).map_err(|e| format!("Failed to read {}: {}", path, e))?,
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .map_err(|e| format!("Failed to read stdin: {}", e))?;
            raw
        }
    };
    serde_json::from_str(&raw).map_err(|e| format!("Invalid JSON: {}", e))
}

async fn run() -> AnalyzeResponse {
    let request = match read_request() {
        Ok(request) => request,
        Err(message) => return AnalyzeResponse::Error { message },
    };

    let config = ScanConfig::from_env();
    if let Err(e) = tokio::fs::create_dir_all(&config.base_dir).await {
        return AnalyzeResponse::Error {
            message: format!("Failed to create {}: {}", config.base_dir.display(), e),
        };
    }

    let built = tokio::task::spawn_blocking(move || ScanEngine::from_config(config))
        .await
        .map_err(anyhow::Error::from)
        .and_then(|built| built);
    let engine = match built {
        Ok(engine) => engine,
        Err(e) => {
            return AnalyzeResponse::Error {
                message: format!("Failed to initialize: {}", e),
            };
        }
    };

    Arc::new(engine).handle_isolated(request).await
}

#[tokio::main]
async fn main() {
    logging::init();

    let response = run().await;
    if let AnalyzeResponse::Error { message } = &response {
        log::error!("[handler] {}", message);
    }

    match serde_json::to_string(&response) {
        Ok(body) => println!("{}", body),
        Err(e) => {
            println!(r#"{{"status":"error","message":"Failed to encode response"}}"#);
            log::error!("[handler] Failed to encode response: {}", e);
            std::process::exit(1);
        }
    }
}
