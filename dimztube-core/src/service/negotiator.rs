//! Session negotiator
//!
//! Typed signaling operations on top of a [`SignalingStore`]: session
//! creation, partial updates, candidate exchange and the playback command
//! channel. Store failures are logged here and handed back to the caller.

use std::sync::Arc;
use tracing::{debug, error, info};

use crate::models::{
    now_millis, CandidateOrigin, CastSession, CommandKind, IceCandidate, IceCandidateRecord,
    PlaybackCommand, SessionDescription, SessionId, SessionPatch, SessionStatus,
};
use crate::store::{SignalingStore, Subscription};
use crate::{Error, Result};

#[derive(Clone)]
pub struct SessionNegotiator {
    store: Arc<dyn SignalingStore>,
}

impl SessionNegotiator {
    pub fn new(store: Arc<dyn SignalingStore>) -> Self {
        Self { store }
    }

    /// Create a new session in `waiting` state
    pub async fn create_session(&self) -> Result<SessionId> {
        let id = self
            .store
            .create_session(CastSession::new(now_millis()))
            .await
            .inspect_err(|e| error!(error = %e, "Failed to create cast session"))?;

        info!(session_id = %id, "Cast session created");
        Ok(id)
    }

    /// Read the current session document
    pub async fn get_session(&self, id: &SessionId) -> Result<CastSession> {
        self.store
            .get_session(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("cast session {id}")))
    }

    /// Merge fields into the session, last write wins per field
    pub async fn update_session(&self, id: &SessionId, patch: SessionPatch) -> Result<CastSession> {
        if patch.is_empty() {
            return self.get_session(id).await;
        }
        if let Some(command) = &patch.command {
            command.validate()?;
        }

        self.store
            .update_session(id, patch)
            .await
            .inspect_err(|e| error!(session_id = %id, error = %e, "Failed to update cast session"))
    }

    /// Publish the sender's offer
    pub async fn publish_offer(&self, id: &SessionId, offer: SessionDescription) -> Result<()> {
        debug!(session_id = %id, "Publishing offer");
        self.update_session(id, SessionPatch::offer(offer)).await?;
        Ok(())
    }

    /// Publish the receiver's answer and move the session to `connecting`
    pub async fn publish_answer(&self, id: &SessionId, answer: SessionDescription) -> Result<()> {
        debug!(session_id = %id, "Publishing answer");
        self.update_session(
            id,
            SessionPatch::answer(answer).with_status(SessionStatus::Connecting),
        )
        .await?;
        Ok(())
    }

    /// Status-only update
    pub async fn mark_status(&self, id: &SessionId, status: SessionStatus) -> Result<()> {
        debug!(session_id = %id, status = status.as_str(), "Marking session status");
        self.update_session(id, SessionPatch::status(status)).await?;
        Ok(())
    }

    /// Watch the session document.
    ///
    /// Dispose of the subscription when the session ends; dropping it is
    /// enough.
    pub async fn subscribe_to_session(
        &self,
        id: &SessionId,
    ) -> Result<Subscription<Option<CastSession>>> {
        self.store
            .subscribe_session(id)
            .await
            .inspect_err(|e| error!(session_id = %id, error = %e, "Failed to subscribe to session"))
    }

    /// Append a candidate to `origin`'s collection.
    ///
    /// Returns `false` without writing when the session is already
    /// disconnected or failed.
    pub async fn append_ice_candidate(
        &self,
        id: &SessionId,
        origin: CandidateOrigin,
        candidate: IceCandidate,
    ) -> Result<bool> {
        let session = self.get_session(id).await?;
        if session.status.is_terminal() {
            debug!(
                session_id = %id,
                origin = origin.as_str(),
                status = session.status.as_str(),
                "Dropping candidate for terminal session"
            );
            return Ok(false);
        }

        self.store
            .append_candidate(id, origin, candidate)
            .await
            .inspect_err(|e| error!(session_id = %id, error = %e, "Failed to append ICE candidate"))?;
        Ok(true)
    }

    /// Watch `origin`'s candidates; existing ones are replayed first
    pub async fn subscribe_to_ice_candidates(
        &self,
        id: &SessionId,
        origin: CandidateOrigin,
    ) -> Result<Subscription<IceCandidateRecord>> {
        self.store
            .subscribe_candidates(id, origin)
            .await
            .inspect_err(|e| {
                error!(session_id = %id, origin = origin.as_str(), error = %e, "Failed to subscribe to candidates");
            })
    }

    /// Write a playback command into the session's `command` field
    pub async fn send_command(
        &self,
        id: &SessionId,
        kind: CommandKind,
        payload: Option<f64>,
    ) -> Result<PlaybackCommand> {
        let command = PlaybackCommand::new(kind, payload, now_millis());
        self.update_session(id, SessionPatch::command(command.clone()))
            .await?;
        debug!(session_id = %id, command = kind.as_str(), "Playback command sent");
        Ok(command)
    }
}

impl std::fmt::Debug for SessionNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionNegotiator").finish()
    }
}
