//! HTTP surface
//!
//! `POST /qa` starts an evaluation run and streams its messages back as
//! NDJSON: one `{"type":"update","content":...}` envelope per line, written
//! incrementally as the pipeline produces them. `/health` and `/heartbeat`
//! are liveness probes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::StreamExt;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use blackscope_common::{encode_record, UpdateEnvelope};

use crate::config::ServerConfig;
use crate::engine::{DefaultResources, Engine};
use crate::stages::default_pipeline;

#[derive(Debug, Deserialize)]
pub struct UrlRequest {
    pub url: String,
}

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
}

/// Build the application router
pub fn router(engine: Arc<Engine>, allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/qa", post(provide_quality_assurance))
        .route("/health", get(health))
        .route("/heartbeat", get(heartbeat))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { engine })
}

/// Run the server until shutdown
pub async fn serve(addr: SocketAddr, config: ServerConfig) -> anyhow::Result<()> {
    let resources = DefaultResources::new(config.browser.clone(), config.llm.clone());
    let engine = Arc::new(Engine::new(default_pipeline(), Arc::new(resources)));
    let app = router(engine, &config.allowed_origins);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Handles a POST request to perform a quality assurance evaluation of a
/// webpage, streaming results back as NDJSON updates
async fn provide_quality_assurance(
    State(state): State<AppState>,
    Json(request): Json<UrlRequest>,
) -> Response {
    if request.url.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "url must be non-empty" })),
        )
            .into_response();
    }

    let updates = state
        .engine
        .clone()
        .run(request.url)
        .map(|message| encode_record(&UpdateEnvelope::update(message)).map(Bytes::from));

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(updates),
    )
        .into_response()
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "UP" }))
}

async fn heartbeat() -> StatusCode {
    StatusCode::OK
}
