//! HTTP Endpoints
//!
//! REST API for driving the voice dialogue.

use axum::{
    body::Bytes,
    extract::{Json, State},
    http::{HeaderValue, Method, StatusCode},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use voice_chat_core::{ConversationState, Role};

use crate::state::AppState;
use crate::websocket::ws_handler;
use crate::ServerError;

const DEFAULT_ORIGIN: &str = "http://localhost:3000";

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(&state.config.server.cors_origins);

    Router::new()
        // Dialogue commands
        .route("/api/chat", post(chat))
        .route("/api/speak", post(speak))
        .route("/api/audio", post(submit_audio))
        .route("/api/recognize", post(recognize))
        .route("/api/interrupt", post(interrupt))
        // Switches
        .route("/api/recognition/start", post(start_listening))
        .route("/api/recognition/stop", post(stop_listening))
        .route("/api/speech/start", post(start_speech_output))
        .route("/api/speech/stop", post(stop_speech_output))
        // Roles
        .route("/api/roles", get(list_roles))
        .route("/api/role", post(set_role))
        // Introspection
        .route("/api/state", get(dialogue_state))
        .route("/health", get(health_check))
        // Event stream and audio input
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// Build CORS layer from configured origins; empty means localhost only
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let parsed_origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();

    if parsed_origins.is_empty() {
        tracing::info!("No usable CORS origins configured, defaulting to {}", DEFAULT_ORIGIN);
        return CorsLayer::new()
            .allow_origin(HeaderValue::from_static(DEFAULT_ORIGIN))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);
    }

    tracing::info!("CORS configured with {} origins", parsed_origins.len());
    CorsLayer::new()
        .allow_origin(parsed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Chat request
#[derive(Debug, Deserialize)]
struct ChatRequest {
    text: String,
    /// Switch to this role before answering
    #[serde(default)]
    role_id: Option<String>,
    /// Speak the reply (the default) or return it in the response
    #[serde(default = "default_speak")]
    speak: bool,
}

fn default_speak() -> bool {
    true
}

/// Spoken replies are acknowledged right away; unspoken ones are returned
async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ServerError> {
    if !request.speak {
        let reply = state.dialogue.chat(request.text, request.role_id).await?;
        return Ok((StatusCode::OK, Json(serde_json::json!(reply))));
    }

    let accepted_in = state
        .dialogue
        .submit_text(request.text, request.role_id)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "accepted": true,
            "state": accepted_in,
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct SpeakRequest {
    text: String,
    #[serde(default)]
    role_id: Option<String>,
}

/// Speak text directly; responds once synthesis is done
async fn speak(
    State(state): State<AppState>,
    Json(request): Json<SpeakRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let audio = state.dialogue.speak(request.text, request.role_id).await?;
    let audio: Vec<String> = audio.iter().map(|a| a.describe()).collect();
    Ok(Json(serde_json::json!({ "audio": audio })))
}

/// Raw PCM16LE mono audio, split into frames and fed to the VAD
async fn submit_audio(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), ServerError> {
    if body.is_empty() {
        return Err(ServerError::InvalidRequest("empty audio body".to_string()));
    }
    let frames = state.dialogue.submit_audio(&body)?;
    tracing::debug!(bytes = body.len(), frames, "Audio accepted");

    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "frames": frames }))))
}

/// Raw PCM16LE mono clip, transcribed on its own connection
async fn recognize(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ServerError> {
    if body.is_empty() {
        return Err(ServerError::InvalidRequest("empty audio body".to_string()));
    }
    let text = state.dialogue.recognize(&body).await?;
    Ok(Json(serde_json::json!({ "text": text })))
}

async fn start_listening(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ServerError> {
    state.dialogue.start_listening().await?;
    Ok(Json(serde_json::json!({ "listening": true })))
}

async fn stop_listening(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.dialogue.stop_listening().await;
    Json(serde_json::json!({ "listening": false }))
}

async fn start_speech_output(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ServerError> {
    let after = state.dialogue.set_speech_output(true).await?;
    Ok(Json(serde_json::json!({ "speech_output": true, "state": after })))
}

async fn stop_speech_output(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ServerError> {
    let after = state.dialogue.set_speech_output(false).await?;
    Ok(Json(serde_json::json!({ "speech_output": false, "state": after })))
}

async fn interrupt(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ServerError> {
    let after = state.dialogue.interrupt().await?;
    Ok(Json(serde_json::json!({
        "state": after,
        "epoch": state.dialogue.epoch(),
    })))
}

#[derive(Debug, Serialize)]
struct RoleList<'a> {
    active: String,
    roles: &'a [Role],
}

async fn list_roles(State(state): State<AppState>) -> Json<serde_json::Value> {
    let dialogue = state.dialogue();
    let list = RoleList {
        active: dialogue.role().id,
        roles: dialogue.roles().list(),
    };
    Json(serde_json::json!(list))
}

#[derive(Debug, Deserialize)]
struct SetRoleRequest {
    role_id: String,
}

async fn set_role(
    State(state): State<AppState>,
    Json(request): Json<SetRoleRequest>,
) -> Result<Json<Role>, ServerError> {
    let role = state.dialogue.set_role(request.role_id).await?;
    Ok(Json(role))
}

/// Dialogue snapshot
#[derive(Debug, Serialize)]
struct StateResponse {
    state: ConversationState,
    role_id: String,
    playback_idle: bool,
    epoch: u64,
    recognition_connected: bool,
    listening: bool,
    speech_output: bool,
}

async fn dialogue_state(State(state): State<AppState>) -> Json<StateResponse> {
    let dialogue = state.dialogue();
    Json(StateResponse {
        state: dialogue.state(),
        role_id: dialogue.role().id,
        playback_idle: dialogue.playback_idle(),
        epoch: dialogue.epoch(),
        recognition_connected: dialogue.recognition_connected(),
        listening: dialogue.listening(),
        speech_output: dialogue.speech_output(),
    })
}

/// Healthy when the dialogue runs; degraded while recognition is reconnecting
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let dialogue = state.dialogue();
    let running = dialogue.is_running();
    let recognition = dialogue.recognition_connected();

    let (status, status_code) = match (running, recognition) {
        (false, _) => ("unavailable", StatusCode::SERVICE_UNAVAILABLE),
        (true, false) => ("degraded", StatusCode::OK),
        (true, true) => ("healthy", StatusCode::OK),
    };

    (
        status_code,
        Json(serde_json::json!({
            "status": status,
            "version": env!("CARGO_PKG_VERSION"),
            "checks": {
                "dialogue": if running { "ok" } else { "stopped" },
                "recognition": if recognition { "ok" } else { "reconnecting" },
            }
        })),
    )
}
