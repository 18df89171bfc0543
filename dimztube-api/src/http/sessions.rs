//! Cast session REST endpoints
//!
//! Thin HTTP mapping of the session negotiator:
//! - `POST /api/cast/sessions` - create a session
//! - `GET /api/cast/sessions/{id}` - read the session document
//! - `PATCH /api/cast/sessions/{id}` - merge a partial document
//! - `POST /api/cast/sessions/{id}/command` - write a playback command
//! - `POST /api/cast/sessions/{id}/candidates/{origin}` - append a candidate

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use dimztube_core::models::{
    CandidateOrigin, CastSession, CommandKind, IceCandidate, SdpType, SessionDescription,
    SessionId, SessionPatch,
};

use crate::http::{AppError, AppResult, AppState};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
}

/// Playback command body; the server stamps the timestamp
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandRequest {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    #[serde(default)]
    pub payload: Option<f64>,
}

pub async fn create_session(
    State(state): State<AppState>,
) -> AppResult<(StatusCode, Json<CreateSessionResponse>)> {
    let session_id = state.negotiator.create_session().await?;
    Ok((StatusCode::CREATED, Json(CreateSessionResponse { session_id })))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<CastSession>> {
    let session = state
        .negotiator
        .get_session(&SessionId::from_string(id))
        .await?;
    Ok(Json(session))
}

pub async fn update_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<SessionPatch>,
) -> AppResult<StatusCode> {
    if patch.is_empty() {
        return Err(AppError::bad_request("Patch must set at least one field"));
    }
    check_description("offer", patch.offer.as_ref(), SdpType::Offer)?;
    check_description("answer", patch.answer.as_ref(), SdpType::Answer)?;

    state
        .negotiator
        .update_session(&SessionId::from_string(id), patch)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

fn check_description(
    field: &str,
    description: Option<&SessionDescription>,
    expected: SdpType,
) -> AppResult<()> {
    let Some(description) = description else {
        return Ok(());
    };
    if description.sdp_type != expected {
        return Err(AppError::bad_request(format!(
            "{field} must have type {expected:?}"
        )));
    }
    if description.is_empty() {
        return Err(AppError::bad_request(format!("{field} sdp is empty")));
    }
    Ok(())
}

pub async fn send_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CommandRequest>,
) -> AppResult<StatusCode> {
    state
        .negotiator
        .send_command(&SessionId::from_string(id), req.kind, req.payload)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Append a candidate; `409` once the session is disconnected or failed
pub async fn append_candidate(
    State(state): State<AppState>,
    Path((id, origin)): Path<(String, String)>,
    Json(candidate): Json<IceCandidate>,
) -> AppResult<StatusCode> {
    let origin: CandidateOrigin = origin.parse()?;
    let session_id = SessionId::from_string(id);

    let appended = state
        .negotiator
        .append_ice_candidate(&session_id, origin, candidate)
        .await?;

    if appended {
        Ok(StatusCode::NO_CONTENT)
    } else {
        debug!(session_id = %session_id, origin = origin.as_str(), "Candidate rejected for closed session");
        Err(AppError::conflict("Cast session is closed"))
    }
}
