//! HTTP routes for the sketchforge server.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, extract::State};
use serde::{Deserialize, Serialize};
use sketchforge_core::{CompileService, Config, Firmware, FirmwareEncoding};
use tower_http::cors::CorsLayer;

use crate::cache::{TtlMap, compile_cache_key};
use crate::error::ApiResult;
use crate::session::{self, SessionRegistry};

/// A compile request.
#[derive(Debug, Clone, Deserialize)]
pub struct CompileRequest {
    pub source_code: String,
    pub board: String,
    #[serde(default)]
    pub libraries: Vec<String>,
}

/// A compile response: `hex` for text firmware, `sketch` for the
/// base64-encoded binary encodings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sketch: Option<String>,
}

impl From<Firmware> for CompileResponse {
    fn from(firmware: Firmware) -> Self {
        match firmware.encoding {
            FirmwareEncoding::Hex => Self {
                hex: Some(firmware.payload),
                sketch: None,
            },
            FirmwareEncoding::Uf2 | FirmwareEncoding::Binary => Self {
                hex: None,
                sketch: Some(firmware.payload),
            },
        }
    }
}

/// Application state shared across handlers.
pub struct AppState {
    /// The wired compile service.
    pub service: Arc<CompileService>,
    /// Per-session in-flight request limits.
    pub sessions: SessionRegistry,
    /// Cache of previously compiled responses.
    pub responses: TtlMap<CompileResponse>,
}

impl AppState {
    pub fn new(service: Arc<CompileService>, config: &Config) -> Self {
        Self {
            service,
            sessions: SessionRegistry::new(
                config.server.max_requests_per_session,
                config.server.max_total_sessions,
                config.server.session_ttl(),
            ),
            responses: TtlMap::new(
                config.server.max_response_caches,
                config.server.response_cache_ttl(),
            ),
        }
    }
}

/// Create the router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/compile/cpp", post(compile_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check handler.
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Compile a sketch and return the firmware in whichever encoding the board
/// family emits.
async fn compile_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CompileRequest>,
) -> Response {
    let (session_id, issued) = session::get_or_create(&headers);

    let mut response = match compile_inner(&state, &session_id, &request).await {
        Ok(body) => Json(body).into_response(),
        Err(err) => err.into_response(),
    };

    if issued {
        if let Ok(value) = HeaderValue::from_str(&format!("session_id={session_id}; Path=/")) {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    response
}

async fn compile_inner(
    state: &AppState,
    session_id: &str,
    request: &CompileRequest,
) -> ApiResult<CompileResponse> {
    // Holds one of the session's request slots until this returns.
    let _permit = state.sessions.begin(session_id)?;

    let key = compile_cache_key(&request.source_code, &request.board, &request.libraries);
    if let Some(cached) = state.responses.get(&key) {
        return Ok(cached);
    }

    let firmware = state
        .service
        .compile(&request.source_code, &request.board, &request.libraries)
        .await?;
    let body = CompileResponse::from(firmware);
    state.responses.insert(key, body.clone());
    Ok(body)
}
