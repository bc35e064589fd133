//! Pitch-deck ingestion server: upload a deck, get back a structured,
//! provenance-tagged startup record.

mod config;
mod extract;
mod openrouter;
mod persist;
mod pipeline;
mod schema;
mod storage;
mod synthesize;
mod upload;

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Settings;
use extract::{ocr::OcrStrategy, subprocess::SubprocessStrategy, vision::VisionStrategy, ExtractionStrategy};
use openrouter::OpenRouterClient;
use persist::{RecordStore, SupabaseStore};
use pipeline::{ImportOutcome, PipelineError};
use synthesize::ModelSynthesizer;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    settings: Settings,
    http: reqwest::Client,
    openrouter: OpenRouterClient,
    store: Arc<SupabaseStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pitch_ingest=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;
    settings.ensure_dirs().await?;
    info!(
        "Settings loaded: temp_dir={:?}, attachment_dir={:?}, min_text_len={}",
        settings.temp_dir, settings.attachment_dir, settings.min_text_len
    );

    let http = reqwest::Client::new();
    let openrouter = OpenRouterClient::from_env(http.clone(), settings.remote_call_timeout)?;
    let store = Arc::new(SupabaseStore::from_env(http.clone())?);
    info!("OpenRouter client and record store initialized");

    // Multipart framing adds overhead on top of the file itself.
    let body_limit = settings.max_upload_bytes + 1024 * 1024;

    let state = AppState {
        settings,
        http,
        openrouter,
        store,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/startups/import-pitchdeck", post(import_pitch_deck))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let bind_addr =
        std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Upload a pitch deck and run the ingestion pipeline.
async fn import_pitch_deck(State(state): State<AppState>, multipart: Multipart) -> Response {
    match handle_import(state, multipart).await {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_import(
    state: AppState,
    multipart: Multipart,
) -> Result<ImportOutcome, PipelineError> {
    let (doc, startup_name) = upload::receive_upload(multipart, &state.settings).await?;

    // Detached from the request future: if the caller disconnects, cleanup
    // obligations (temp file deletion) still run to completion.
    let task = tokio::spawn(async move {
        let strategies = build_strategies(&state, &startup_name);
        let synthesizer =
            ModelSynthesizer::new(state.openrouter.clone(), state.settings.clone());
        pipeline::run(
            doc,
            startup_name,
            &strategies,
            &synthesizer,
            state.store.as_ref() as &dyn RecordStore,
            &state.settings,
        )
        .await
    });

    task.await
        .map_err(|e| PipelineError::Internal(format!("Pipeline task failed: {}", e)))?
}

/// Assemble the strategy chain in priority order. Strategies whose external
/// dependency is not configured are skipped with a warning; the chain's
/// placeholder keeps the pipeline total either way.
fn build_strategies(state: &AppState, startup_name: &str) -> Vec<Box<dyn ExtractionStrategy>> {
    let mut strategies: Vec<Box<dyn ExtractionStrategy>> = Vec::new();

    strategies.push(Box::new(VisionStrategy::new(state.openrouter.clone())));

    match OcrStrategy::from_env(
        state.http.clone(),
        state.settings.max_ocr_pages,
        state.settings.remote_call_timeout,
    ) {
        Ok(ocr) => strategies.push(Box::new(ocr)),
        Err(e) => warn!("OCR strategy unavailable: {:#}", e),
    }

    if let Some(command) = &state.settings.extractor_command {
        strategies.push(Box::new(SubprocessStrategy::new(
            command.clone(),
            startup_name.to_string(),
            state.settings.subprocess_timeout,
        )));
    } else {
        warn!("EXTRACTOR_COMMAND not set; external-process strategy disabled");
    }

    strategies
}

fn error_response(e: PipelineError) -> Response {
    let body = json!({
        "success": false,
        "message": e.to_string(),
        "error": e.code(),
    });
    (e.status(), Json(body)).into_response()
}
