//! Session change feed over WebSocket
//!
//! `GET /api/cast/sessions/{id}/ws` pushes JSON text frames:
//! - `{"type":"session","data":{...}}` with the current document and after
//!   every change (`data` is `null` once the session is removed)
//! - `{"type":"candidate","origin":"sender","data":{...}}` for every
//!   candidate of either origin, existing ones first
//!
//! The feed is read-only; writes go through the REST endpoints.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use dimztube_core::models::{CandidateOrigin, CastSession, IceCandidate, SessionId};

use crate::http::{AppResult, AppState};

/// Signaling messages are small; cap inbound frames accordingly
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Server to client message
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedMessage {
    Session {
        data: Option<CastSession>,
    },
    Candidate {
        origin: CandidateOrigin,
        data: IceCandidate,
    },
}

impl FeedMessage {
    fn to_frame(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(text) => Some(Message::Text(text.into())),
            Err(e) => {
                warn!(error = %e, "Failed to encode feed message");
                None
            }
        }
    }
}

pub async fn session_feed(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> AppResult<impl IntoResponse> {
    let session_id = SessionId::from_string(id);

    // 404 before upgrading
    state.negotiator.get_session(&session_id).await?;

    Ok(ws
        .max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, session_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: SessionId) {
    let negotiator = &state.negotiator;
    let subscriptions = tokio::try_join!(
        negotiator.subscribe_to_session(&session_id),
        negotiator.subscribe_to_ice_candidates(&session_id, CandidateOrigin::Sender),
        negotiator.subscribe_to_ice_candidates(&session_id, CandidateOrigin::Receiver),
    );
    let (mut session_sub, mut sender_sub, mut receiver_sub) = match subscriptions {
        Ok(subs) => subs,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Failed to open session feed");
            return;
        }
    };

    info!(session_id = %session_id, "Session feed connected");
    let (mut sink, mut stream) = socket.split();

    loop {
        let message = tokio::select! {
            update = session_sub.recv() => match update {
                Some(data) => {
                    let removed = data.is_none();
                    let message = FeedMessage::Session { data };
                    if removed {
                        if let Some(frame) = message.to_frame() {
                            let _ = sink.send(frame).await;
                        }
                        break;
                    }
                    message
                }
                None => break,
            },
            Some(record) = sender_sub.recv() => FeedMessage::Candidate {
                origin: record.origin,
                data: record.candidate,
            },
            Some(record) = receiver_sub.recv() => FeedMessage::Candidate {
                origin: record.origin,
                data: record.candidate,
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!(session_id = %session_id, error = %e, "Session feed read error");
                    break;
                }
            },
        };

        let Some(frame) = message.to_frame() else {
            continue;
        };
        if let Err(e) = sink.send(frame).await {
            debug!(session_id = %session_id, error = %e, "Session feed send failed");
            break;
        }
    }

    let _ = sink.close().await;
    info!(session_id = %session_id, "Session feed closed");
}
