//! Route handler functions for all API endpoints.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aftercare_agent::TurnReply;
use aftercare_core::types::{
    EscalationReason, ImageRef, Message, MessageRole, RoutingState, Session, SessionFacts,
};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request types
// =============================================================================

/// Body for POST /sessions. The body itself is optional.
#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub order_id: Option<String>,
}

/// Body for POST /sessions/{id}/turns.
#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    #[serde(default)]
    pub text: String,
    /// Image reference: a `data:` URL, an http(s) URL or a file path.
    pub image: Option<String>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub role: MessageRole,
    pub text: String,
    pub image: Option<String>,
    pub timestamp: String,
}

impl From<&Message> for MessageResponse {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            text: message.text.clone(),
            image: message.image.as_ref().map(|i| i.as_str().to_string()),
            timestamp: message.timestamp.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub routing_state: RoutingState,
    pub escalated: bool,
    pub escalation_reason: Option<EscalationReason>,
    pub failed_resolution_attempts: u32,
    #[serde(default)]
    pub turns_without_resolution: u32,
    pub facts: SessionFacts,
    pub messages: Vec<MessageResponse>,
    pub created_at: String,
    pub updated_at: String,
    pub closed_at: Option<String>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            routing_state: session.routing_state,
            escalated: session.escalated,
            escalation_reason: session.escalation_reason,
            failed_resolution_attempts: session.failed_resolution_attempts,
            turns_without_resolution: session.turns_without_resolution,
            messages: session.messages.iter().map(MessageResponse::from).collect(),
            facts: session.facts,
            created_at: session.created_at.to_rfc3339(),
            updated_at: session.updated_at.to_rfc3339(),
            closed_at: session.closed_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub routing_state: RoutingState,
    pub escalated: bool,
    pub message_count: usize,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

fn parse_session_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid session id '{}'", raw)))
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /sessions - open a session, optionally tied to an order.
pub async fn create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let request: CreateSessionRequest = if body.iter().all(|b| b.is_ascii_whitespace()) {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid request body: {}", e)))?
    };

    let session = state.controller.create_session_for_order(request.order_id)?;
    Ok((StatusCode::CREATED, Json(SessionResponse::from(session))))
}

/// GET /sessions - all sessions, most recently active first.
pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<SessionListResponse>, ApiError> {
    let sessions = state
        .controller
        .list_sessions()?
        .into_iter()
        .map(|s| SessionSummary {
            id: s.id,
            routing_state: s.routing_state,
            escalated: s.escalated,
            message_count: s.messages.len(),
            updated_at: s.updated_at.to_rfc3339(),
        })
        .collect();
    Ok(Json(SessionListResponse { sessions }))
}

/// GET /sessions/{id}
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let id = parse_session_id(&id)?;
    let session = state.controller.get_session(id)?;
    Ok(Json(SessionResponse::from(session)))
}

/// DELETE /sessions/{id} - close a session. Idempotent.
pub async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let id = parse_session_id(&id)?;
    let session = state.controller.close_session(id)?;
    Ok(Json(SessionResponse::from(session)))
}

/// POST /sessions/{id}/turns - handle one customer message.
pub async fn handle_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<TurnRequest>,
) -> Result<Json<TurnReply>, ApiError> {
    let id = parse_session_id(&id)?;
    let image = body
        .image
        .filter(|i| !i.trim().is_empty())
        .map(ImageRef);
    let reply = state.controller.handle_turn(id, &body.text, image).await?;
    Ok(Json(reply))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
