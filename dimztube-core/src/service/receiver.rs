//! Cast receiver
//!
//! Joins a session published by a sender, answers its offer, exchanges
//! candidates and hands playback commands to a [`PlaybackSink`].

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WebRTCConfig;
use crate::models::{
    CandidateOrigin, CastSession, IceCandidateRecord, PlaybackCommand, SessionDescription,
    SessionId, SessionStatus,
};
use crate::service::negotiator::SessionNegotiator;
use crate::service::webrtc::{
    PeerConnectionManager, PeerConnectionState, PeerEvent, RemoteTrackInfo, TransportFactory,
};
use crate::store::Subscription;
use crate::{Error, Result};

/// Where received playback commands and media end up
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    async fn apply(&self, command: &PlaybackCommand) -> Result<()>;

    fn remote_track(&self, _track: &RemoteTrackInfo) {}
}

/// Drops commands that are not newer than the last applied one
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandFilter {
    last_applied: Option<i64>,
}

impl CommandFilter {
    pub fn accept(&mut self, command: &PlaybackCommand) -> bool {
        match self.last_applied {
            Some(last) if command.timestamp <= last => false,
            _ => {
                self.last_applied = Some(command.timestamp);
                true
            }
        }
    }
}

#[derive(Clone)]
pub struct CastReceiver {
    negotiator: SessionNegotiator,
    transports: Arc<dyn TransportFactory>,
    webrtc: WebRTCConfig,
    sink: Arc<dyn PlaybackSink>,
}

impl CastReceiver {
    pub fn new(
        negotiator: SessionNegotiator,
        transports: Arc<dyn TransportFactory>,
        webrtc: WebRTCConfig,
        sink: Arc<dyn PlaybackSink>,
    ) -> Self {
        Self {
            negotiator,
            transports,
            webrtc,
            sink,
        }
    }

    /// Wait for the session's offer and answer it
    pub async fn join(&self, session_id: &SessionId) -> Result<ReceiverSession> {
        let mut updates = self.negotiator.subscribe_to_session(session_id).await?;
        let offer = loop {
            match updates.recv().await {
                None | Some(None) => {
                    return Err(Error::NotFound(format!("cast session {session_id}")));
                }
                Some(Some(session)) if session.status.is_terminal() => {
                    return Err(Error::InvalidState(format!(
                        "cast session {session_id} already {}",
                        session.status.as_str()
                    )));
                }
                Some(Some(session)) => {
                    if let Some(offer) = session.valid_offer() {
                        break offer.clone();
                    }
                    debug!(session_id = %session_id, "Waiting for offer");
                }
            }
        };

        let peer = Arc::new(PeerConnectionManager::new(
            self.transports.clone(),
            &self.webrtc,
        ));
        let mut tasks = Vec::new();
        if let Err(e) = self
            .answer(session_id, &peer, offer, updates, &mut tasks)
            .await
        {
            warn!(session_id = %session_id, error = %e, "Failed to join cast session");
            for task in &tasks {
                task.abort();
            }
            peer.close().await;
            self.mark(session_id, SessionStatus::Failed).await;
            return Err(e);
        }

        info!(session_id = %session_id, "Answer published");
        Ok(ReceiverSession {
            session_id: session_id.clone(),
            negotiator: self.negotiator.clone(),
            peer,
            tasks,
        })
    }

    /// Everything between the offer and a published answer. Spawned tasks
    /// land in `tasks` so the caller can undo a partial join.
    async fn answer(
        &self,
        session_id: &SessionId,
        peer: &Arc<PeerConnectionManager>,
        offer: SessionDescription,
        updates: Subscription<Option<CastSession>>,
        tasks: &mut Vec<JoinHandle<()>>,
    ) -> Result<()> {
        let start = peer.start_as_receiver(offer).await?;
        let remote_candidates = self
            .negotiator
            .subscribe_to_ice_candidates(session_id, CandidateOrigin::Sender)
            .await?;

        tasks.extend([
            tokio::spawn(relay_local_candidates(
                self.negotiator.clone(),
                session_id.clone(),
                self.sink.clone(),
                start.events,
            )),
            tokio::spawn(apply_remote_candidates(peer.clone(), remote_candidates)),
            tokio::spawn(follow_commands(
                peer.clone(),
                self.sink.clone(),
                session_id.clone(),
                updates,
            )),
            tokio::spawn(report_state(
                self.negotiator.clone(),
                session_id.clone(),
                peer.state_changes(),
            )),
        ]);

        self.negotiator
            .publish_answer(session_id, start.description)
            .await
    }

    async fn mark(&self, session_id: &SessionId, status: SessionStatus) {
        if let Err(e) = self.negotiator.mark_status(session_id, status).await {
            warn!(session_id = %session_id, error = %e, "Failed to update session status");
        }
    }
}

impl std::fmt::Debug for CastReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CastReceiver").finish_non_exhaustive()
    }
}

/// A joined session; closing or dropping it stops every background task
pub struct ReceiverSession {
    session_id: SessionId,
    negotiator: SessionNegotiator,
    peer: Arc<PeerConnectionManager>,
    tasks: Vec<JoinHandle<()>>,
}

impl ReceiverSession {
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    #[must_use]
    pub fn state(&self) -> PeerConnectionState {
        self.peer.state()
    }

    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<PeerConnectionState> {
        self.peer.state_changes()
    }

    /// Leave the session and mark it disconnected
    pub async fn close(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.peer.close().await;
        if let Err(e) = self
            .negotiator
            .mark_status(&self.session_id, SessionStatus::Disconnected)
            .await
        {
            warn!(session_id = %self.session_id, error = %e, "Failed to mark session disconnected");
        }
        info!(session_id = %self.session_id, "Receiver left cast session");
    }
}

impl Drop for ReceiverSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for ReceiverSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverSession")
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .finish()
    }
}

async fn relay_local_candidates(
    negotiator: SessionNegotiator,
    session_id: SessionId,
    sink: Arc<dyn PlaybackSink>,
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                if let Err(e) = negotiator
                    .append_ice_candidate(&session_id, CandidateOrigin::Receiver, candidate)
                    .await
                {
                    warn!(session_id = %session_id, error = %e, "Failed to publish local candidate");
                }
            }
            PeerEvent::RemoteTrack(track) => sink.remote_track(&track),
        }
    }
}

async fn apply_remote_candidates(
    peer: Arc<PeerConnectionManager>,
    mut candidates: Subscription<IceCandidateRecord>,
) {
    while let Some(record) = candidates.recv().await {
        if let Err(e) = peer.add_remote_candidate(record.candidate).await {
            debug!(sequence = record.sequence, error = %e, "Remote candidate not applied");
        }
    }
}

async fn follow_commands(
    peer: Arc<PeerConnectionManager>,
    sink: Arc<dyn PlaybackSink>,
    session_id: SessionId,
    mut updates: Subscription<Option<CastSession>>,
) {
    let mut filter = CommandFilter::default();

    while let Some(document) = updates.recv().await {
        let Some(session) = document else {
            warn!(session_id = %session_id, "Cast session removed");
            peer.close().await;
            break;
        };

        if session.status.is_terminal() {
            info!(session_id = %session_id, status = session.status.as_str(), "Sender ended cast session");
            peer.close().await;
            break;
        }

        if let Some(command) = session.command {
            if filter.accept(&command) {
                debug!(session_id = %session_id, command = command.kind.as_str(), "Applying playback command");
                if let Err(e) = sink.apply(&command).await {
                    warn!(session_id = %session_id, error = %e, "Failed to apply playback command");
                }
            }
        }
    }
}

async fn report_state(
    negotiator: SessionNegotiator,
    session_id: SessionId,
    mut states: watch::Receiver<PeerConnectionState>,
) {
    while states.changed().await.is_ok() {
        let state = *states.borrow_and_update();
        let status = match state {
            PeerConnectionState::Connected => SessionStatus::Connected,
            PeerConnectionState::Failed => SessionStatus::Failed,
            _ => continue,
        };

        if let Err(e) = negotiator.mark_status(&session_id, status).await {
            warn!(session_id = %session_id, error = %e, "Failed to report connection state");
        }
        if state.is_terminal() {
            break;
        }
    }
}
