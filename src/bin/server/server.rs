//! HTTP server for leaf diagnosis.

use crate::config::ServerConfig;
use crate::diagnose::{DiagnosisResponse, ServeError, sanitize_filename};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use leafdx::pipeline::DiagnosisPipeline;
use leafdx::report::ReportRenderer;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Application state shared across handlers
struct AppState {
    pipeline: Arc<DiagnosisPipeline>,
    renderer: ReportRenderer,
    config: ServerConfig,
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    model_loaded: bool,
}

/// Query of the report download endpoint
#[derive(Debug, Deserialize)]
struct ReportQuery {
    #[serde(alias = "disease")]
    label: Option<String>,
    confidence: Option<String>,
    image: Option<String>,
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServeError::MissingFile
            | ServeError::EmptyFilename
            | ServeError::UnsupportedType(_)
            | ServeError::Upload(_) => StatusCode::BAD_REQUEST,
            ServeError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ServeError::MissingField(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServeError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServeError::Pipeline(e) if e.stage() == Some(leafdx::core::ProcessingStage::Report) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServeError::Pipeline(_) | ServeError::Join(_) | ServeError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(DiagnosisResponse::error(self.to_string()))).into_response()
    }
}

/// Run the HTTP server
pub async fn run_server(
    config: ServerConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Initializing diagnosis pipeline...");
    let pipeline = Arc::new(DiagnosisPipeline::from_config(&config.pipeline)?);
    if pipeline.model_available() {
        info!("Diagnosis pipeline initialized successfully");
    } else {
        warn!("Diagnosis pipeline running without a model; predictions return 503");
    }

    tokio::fs::create_dir_all(&config.upload_dir).await?;
    if let Some(dir) = &config.report_dir {
        tokio::fs::create_dir_all(dir).await?;
    }

    if let Some(max_age) = config.retention {
        let dirs: Vec<PathBuf> = std::iter::once(config.upload_dir.clone())
            .chain(config.report_dir.clone())
            .collect();
        info!(max_age_secs = max_age.as_secs(), "Pruning stored uploads and reports");
        tokio::spawn(prune_periodically(dirs, max_age));
    }

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let state = Arc::new(AppState {
        pipeline,
        renderer: ReportRenderer::new(),
        config,
    });
    let app = router(state);

    info!("Server listening on http://{}", addr);
    info!("Endpoints:");
    info!("  GET  /health           - Health check");
    info!("  POST /predict          - Diagnose an uploaded leaf image");
    info!("  POST /api/v1/predict   - Diagnose (versioned API)");
    info!("  GET  /download_report  - PDF report");
    info!("  GET  /api/v1/report    - PDF report (versioned API)");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Multipart framing needs some room on top of the file itself.
    let body_limit = state.config.max_upload_bytes + 64 * 1024;

    Router::new()
        .route("/health", get(health_handler))
        .route("/predict", post(predict_handler))
        .route("/api/v1/predict", post(predict_handler))
        .route("/download_report", get(report_handler))
        .route("/api/v1/report", get(report_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model_loaded: state.pipeline.model_available(),
    })
}

/// Diagnosis endpoint, multipart field `file`
async fn predict_handler(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<DiagnosisResponse>, ServeError> {
    let request_id = uuid::Uuid::new_v4().to_string();
    let start = Instant::now();

    if !state.pipeline.model_available() {
        warn!(request_id = %request_id, "Prediction refused, model unavailable");
        return Err(ServeError::ModelUnavailable(
            "the classifier model is not loaded".to_string(),
        ));
    }

    let (filename, bytes) = read_upload(&state.config, multipart).await.inspect_err(|e| {
        warn!(request_id = %request_id, error = %e, "Rejected upload");
    })?;
    info!(
        request_id = %request_id,
        filename = %filename,
        size = bytes.len(),
        "Processing prediction request"
    );

    let stored_name = format!("{}_{}", uuid::Uuid::new_v4().simple(), sanitize_filename(&filename));
    tokio::fs::write(state.config.upload_dir.join(&stored_name), &bytes).await?;

    let pipeline = Arc::clone(&state.pipeline);
    let diagnose_start = Instant::now();
    let diagnosis = tokio::task::spawn_blocking(move || pipeline.diagnose_bytes(&bytes))
        .await
        .map_err(|e| ServeError::Join(e.to_string()))?
        .inspect_err(|e| {
            error!(request_id = %request_id, error = %e, "Diagnosis failed");
        })?;
    let processing_ms = diagnose_start.elapsed().as_secs_f64() * 1000.0;

    info!(
        request_id = %request_id,
        label = %diagnosis.prediction.label,
        confidence = diagnosis.prediction.confidence,
        diagnosed = diagnosis.verdict.is_diagnosed(),
        diagnose_ms = processing_ms,
        total_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Diagnosis completed"
    );

    Ok(Json(DiagnosisResponse::from_diagnosis(
        &diagnosis,
        Some(stored_name),
        processing_ms,
    )))
}

/// Reads the `file` field, enforcing name, extension and size rules.
async fn read_upload(
    config: &ServerConfig,
    mut multipart: Multipart,
) -> Result<(String, Vec<u8>), ServeError> {
    let too_large = || ServeError::TooLarge(config.max_upload_megabytes());

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            too_large()
        } else {
            ServeError::Upload(e.body_text())
        }
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(ServeError::EmptyFilename);
        }
        if !config.is_allowed(&filename) {
            return Err(ServeError::UnsupportedType(config.allowed_extensions.join(", ")));
        }

        let bytes = field.bytes().await.map_err(|e| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                too_large()
            } else {
                ServeError::Upload(e.body_text())
            }
        })?;
        if bytes.len() > config.max_upload_bytes {
            return Err(too_large());
        }

        return Ok((filename, bytes.to_vec()));
    }

    Err(ServeError::MissingFile)
}

/// Report download endpoint
async fn report_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ServeError> {
    let label = query
        .label
        .filter(|l| !l.trim().is_empty())
        .ok_or(ServeError::MissingField("label"))?;
    let confidence: f32 = query
        .confidence
        .as_deref()
        .and_then(|c| c.trim().trim_end_matches('%').parse().ok())
        .ok_or(ServeError::MissingField("confidence"))?;

    // Only a bare file name inside the upload directory is accepted.
    let image: Option<PathBuf> = query
        .image
        .as_deref()
        .map(sanitize_filename)
        .map(|name| state.config.upload_dir.join(name));

    let record = state.pipeline.rebuild_report_record(&label, confidence, image);
    info!(label = %label, confidence, "Rendering report");

    let worker_state = Arc::clone(&state);
    let bytes = tokio::task::spawn_blocking(move || match &worker_state.config.report_dir {
        Some(dir) => worker_state
            .renderer
            .render_to_dir(&record, dir)
            .and_then(|path| Ok(std::fs::read(path)?)),
        None => worker_state.renderer.render(&record),
    })
    .await
    .map_err(|e| ServeError::Join(e.to_string()))??;

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"plant_disease_report.pdf\"",
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Deletes expired files every `max_age / 4`, at least once a minute.
async fn prune_periodically(dirs: Vec<PathBuf>, max_age: Duration) {
    let period = (max_age / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let dirs = dirs.clone();
        let swept = tokio::task::spawn_blocking(move || {
            dirs.iter()
                .map(|dir| prune_older_than(dir, max_age))
                .collect::<Vec<_>>()
        })
        .await;
        match swept {
            Ok(results) => {
                for result in results {
                    match result {
                        Ok(0) => {}
                        Ok(removed) => info!(removed, "Pruned expired files"),
                        Err(e) => warn!(error = %e, "Pruning failed"),
                    }
                }
            }
            Err(e) => error!(error = %e, "Pruning task panicked"),
        }
    }
}

/// Removes regular files in `dir` last modified at least `max_age` ago.
/// Returns how many were removed.
fn prune_older_than(dir: &Path, max_age: Duration) -> std::io::Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let age = now
            .duration_since(metadata.modified()?)
            .unwrap_or(Duration::ZERO);
        if age >= max_age {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_older_than() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a_leaf.png"), b"png").unwrap();
        std::fs::write(dir.path().join("report-1.pdf"), b"%PDF").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        assert_eq!(prune_older_than(dir.path(), Duration::from_secs(3600)).unwrap(), 0);
        assert!(dir.path().join("a_leaf.png").is_file());

        assert_eq!(prune_older_than(dir.path(), Duration::ZERO).unwrap(), 2);
        assert!(!dir.path().join("a_leaf.png").exists());
        assert!(dir.path().join("nested").is_dir());
    }
}
