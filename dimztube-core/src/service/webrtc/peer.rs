//! Peer connection manager
//!
//! One manager per cast attempt. It owns the transport and the local stream,
//! drives the offer/answer exchange and keeps remote candidates in a
//! [`CandidateQueue`] until they can be applied.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::candidate_queue::CandidateQueue;
use super::media::{CaptureOptions, CaptureSource, LocalStream};
use super::transport::{
    PeerConnectionState, PeerTransport, RemoteTrackInfo, TransportEvent, TransportFactory,
};
use super::IceServerConfig;
use crate::config::WebRTCConfig;
use crate::models::{IceCandidate, SdpType, SessionDescription};
use crate::{Error, Result};

/// Negotiation phase of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationPhase {
    New,
    /// Sender: capturing and creating the offer
    Offering,
    /// Sender: offer published, waiting for the answer
    AwaitingAnswer,
    /// Receiver: applying the offer and creating the answer
    Answering,
    /// Both descriptions set, ICE running
    NegotiatingIce,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Event forwarded to the owner of the manager
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Local candidate to hand to the negotiator
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteTrackInfo),
}

/// Local description plus the event stream of a started negotiation
#[derive(Debug)]
pub struct NegotiationStart {
    pub description: SessionDescription,
    pub events: mpsc::UnboundedReceiver<PeerEvent>,
}

struct Inner {
    phase: Mutex<NegotiationPhase>,
    transport: Mutex<Option<Arc<dyn PeerTransport>>>,
    stream: Mutex<Option<LocalStream>>,
    applied_answer: Mutex<Option<String>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    // Held across set_remote_description + flush
    queue: tokio::sync::Mutex<CandidateQueue>,
    state_tx: watch::Sender<PeerConnectionState>,
}

impl Inner {
    fn phase(&self) -> NegotiationPhase {
        *self.phase.lock()
    }

    fn transition(&self, from: NegotiationPhase, to: NegotiationPhase) -> Result<()> {
        let mut phase = self.phase.lock();
        if *phase != from {
            return Err(Error::InvalidState(format!(
                "expected phase {from:?}, peer connection is {:?}",
                *phase
            )));
        }
        *phase = to;
        Ok(())
    }

    fn advance(&self, from: &[NegotiationPhase], to: NegotiationPhase) {
        let mut phase = self.phase.lock();
        if from.contains(&phase) {
            debug!(from = ?*phase, to = ?to, "Negotiation phase changed");
            *phase = to;
        }
    }

    fn transport(&self) -> Result<Arc<dyn PeerTransport>> {
        self.transport
            .lock()
            .clone()
            .ok_or_else(|| Error::InvalidState("peer connection has no transport".to_string()))
    }

    /// Stop local media and close the transport
    async fn release(&self, from_pump: bool) {
        if let Some(handle) = self.pump.lock().take() {
            if !from_pump {
                handle.abort();
            }
        }

        if let Some(stream) = self.stream.lock().take() {
            stream.stop();
        }

        let transport = self.transport.lock().take();
        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                warn!(error = %e, "Failed to close peer transport");
            }
        }

        self.queue.lock().await.reset();
        self.applied_answer.lock().take();
    }

    /// Apply a state reported by the transport; returns true once terminal
    async fn on_transport_state(&self, state: PeerConnectionState) -> bool {
        use NegotiationPhase as P;

        if self.phase() == P::Closed {
            return true;
        }

        match state {
            PeerConnectionState::New => {}
            PeerConnectionState::Connecting => {
                self.advance(&[P::Disconnected], P::NegotiatingIce);
            }
            PeerConnectionState::Connected => {
                self.advance(
                    &[P::AwaitingAnswer, P::Answering, P::NegotiatingIce, P::Disconnected],
                    P::Connected,
                );
            }
            PeerConnectionState::Disconnected => {
                self.advance(&[P::NegotiatingIce, P::Connected], P::Disconnected);
            }
            PeerConnectionState::Failed => {
                *self.phase.lock() = P::Failed;
                warn!("Peer connection failed, releasing resources");
                self.release(true).await;
            }
            PeerConnectionState::Closed => {
                *self.phase.lock() = P::Closed;
                info!("Peer connection closed by transport");
                self.release(true).await;
            }
        }

        self.state_tx.send_replace(state);
        state.is_terminal()
    }
}

async fn pump_events(
    inner: Arc<Inner>,
    mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    while let Some(event) = transport_events.recv().await {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                let _ = events.send(PeerEvent::LocalCandidate(candidate));
            }
            TransportEvent::RemoteTrack(track) => {
                debug!(track_id = %track.id, kind = track.kind.as_str(), "Remote track added");
                let _ = events.send(PeerEvent::RemoteTrack(track));
            }
            TransportEvent::StateChanged(state) => {
                debug!(state = state.as_str(), "Peer connection state changed");
                if inner.on_transport_state(state).await {
                    break;
                }
            }
        }
    }
}

/// Owns exactly one peer connection for one cast attempt
pub struct PeerConnectionManager {
    factory: Arc<dyn TransportFactory>,
    ice_servers: IceServerConfig,
    inner: Arc<Inner>,
}

impl PeerConnectionManager {
    pub fn new(factory: Arc<dyn TransportFactory>, config: &WebRTCConfig) -> Self {
        let (state_tx, _) = watch::channel(PeerConnectionState::New);
        Self {
            factory,
            ice_servers: IceServerConfig::from(config),
            inner: Arc::new(Inner {
                phase: Mutex::new(NegotiationPhase::New),
                transport: Mutex::new(None),
                stream: Mutex::new(None),
                applied_answer: Mutex::new(None),
                pump: Mutex::new(None),
                queue: tokio::sync::Mutex::new(CandidateQueue::new(config.max_pending_candidates)),
                state_tx,
            }),
        }
    }

    #[must_use]
    pub fn phase(&self) -> NegotiationPhase {
        self.inner.phase()
    }

    #[must_use]
    pub fn state(&self) -> PeerConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver of connection state transitions
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<PeerConnectionState> {
        self.inner.state_tx.subscribe()
    }

    #[must_use]
    pub fn local_stream(&self) -> Option<LocalStream> {
        self.inner.stream.lock().clone()
    }

    /// Capture local media and create the offer
    pub async fn start_as_sender(
        &self,
        source: &dyn CaptureSource,
        options: CaptureOptions,
    ) -> Result<NegotiationStart> {
        let phase = self.phase();
        if phase != NegotiationPhase::New {
            return Err(Error::InvalidState(format!(
                "cannot start sender in phase {phase:?}"
            )));
        }

        let stream = source.capture(options).await?;
        self.start_with_stream(stream).await
    }

    /// Create the offer for an already captured stream.
    ///
    /// The manager takes ownership of the stream; it is stopped on failure
    /// and on close.
    pub async fn start_with_stream(&self, stream: LocalStream) -> Result<NegotiationStart> {
        if let Err(e) = self
            .inner
            .transition(NegotiationPhase::New, NegotiationPhase::Offering)
        {
            stream.stop();
            return Err(e);
        }
        *self.inner.stream.lock() = Some(stream.clone());

        match self.offer(&stream).await {
            Ok(start) => {
                self.inner
                    .advance(&[NegotiationPhase::Offering], NegotiationPhase::AwaitingAnswer);
                info!(stream_id = stream.id(), tracks = stream.tracks().len(), "Offer created");
                Ok(start)
            }
            Err(e) => {
                warn!(error = %e, "Failed to create offer");
                self.close().await;
                Err(e)
            }
        }
    }

    async fn offer(&self, stream: &LocalStream) -> Result<NegotiationStart> {
        let (transport, events) = self.open_transport().await?;

        for track in stream.tracks() {
            transport.add_track(track.clone()).await?;
        }

        let offer = transport.create_offer().await?;
        transport.set_local_description(offer.clone()).await?;

        Ok(NegotiationStart {
            description: offer,
            events,
        })
    }

    /// Answer a remote offer (receive only)
    pub async fn start_as_receiver(&self, offer: SessionDescription) -> Result<NegotiationStart> {
        if offer.sdp_type != SdpType::Offer || offer.is_empty() {
            return Err(Error::InvalidInput("expected a non-empty offer".to_string()));
        }
        self.inner
            .transition(NegotiationPhase::New, NegotiationPhase::Answering)?;

        match self.answer(offer).await {
            Ok(start) => {
                self.inner
                    .advance(&[NegotiationPhase::Answering], NegotiationPhase::NegotiatingIce);
                info!("Answer created");
                Ok(start)
            }
            Err(e) => {
                warn!(error = %e, "Failed to answer offer");
                self.close().await;
                Err(e)
            }
        }
    }

    async fn answer(&self, offer: SessionDescription) -> Result<NegotiationStart> {
        let (transport, events) = self.open_transport().await?;

        {
            let mut queue = self.inner.queue.lock().await;
            transport.set_remote_description(offer).await?;
            self.flush(&transport, queue.mark_remote_description_set())
                .await;
        }

        let answer = transport.create_answer().await?;
        transport.set_local_description(answer.clone()).await?;

        Ok(NegotiationStart {
            description: answer,
            events,
        })
    }

    async fn open_transport(
        &self,
    ) -> Result<(Arc<dyn PeerTransport>, mpsc::UnboundedReceiver<PeerEvent>)> {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let transport = self.factory.create(&self.ice_servers, transport_tx).await?;
        *self.inner.transport.lock() = Some(transport.clone());

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(pump_events(self.inner.clone(), transport_rx, events_tx));
        *self.inner.pump.lock() = Some(handle);

        Ok((transport, events_rx))
    }

    /// Apply the receiver's answer, then flush held candidates in order.
    ///
    /// Re-applying the same answer is a no-op; a different answer replaces
    /// the remote description (renegotiation).
    pub async fn accept_answer(&self, answer: SessionDescription) -> Result<()> {
        use NegotiationPhase as P;

        if answer.sdp_type != SdpType::Answer || answer.is_empty() {
            return Err(Error::InvalidInput("expected a non-empty answer".to_string()));
        }

        let phase = self.phase();
        let renegotiation = match phase {
            P::AwaitingAnswer => false,
            P::NegotiatingIce | P::Connected | P::Disconnected => true,
            _ => {
                return Err(Error::InvalidState(format!(
                    "cannot accept answer in phase {phase:?}"
                )))
            }
        };

        let mut queue = self.inner.queue.lock().await;
        if self.inner.applied_answer.lock().as_deref() == Some(answer.sdp.as_str()) {
            debug!("Answer already applied");
            return Ok(());
        }
        if renegotiation {
            info!("Different answer received, renegotiating");
        }

        let transport = self.inner.transport()?;
        let sdp = answer.sdp.clone();
        transport.set_remote_description(answer).await?;
        *self.inner.applied_answer.lock() = Some(sdp);

        let pending = queue.mark_remote_description_set();
        debug!(flushed = pending.len(), "Remote description set");
        self.flush(&transport, pending).await;
        drop(queue);

        self.inner.advance(&[P::AwaitingAnswer], P::NegotiatingIce);
        Ok(())
    }

    /// Apply a remote candidate, or hold it until the remote description is set
    pub async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let phase = self.phase();
        if matches!(phase, NegotiationPhase::Failed | NegotiationPhase::Closed) {
            return Err(Error::InvalidState(format!(
                "cannot add candidate in phase {phase:?}"
            )));
        }

        let mut queue = self.inner.queue.lock().await;
        if let Some(candidate) = queue.push(candidate)? {
            let transport = self.inner.transport()?;
            transport.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    async fn flush(&self, transport: &Arc<dyn PeerTransport>, pending: Vec<IceCandidate>) {
        for candidate in pending {
            if let Err(e) = transport.add_ice_candidate(candidate).await {
                warn!(error = %e, "Failed to apply queued candidate");
            }
        }
    }

    /// Stop local media and close the transport; idempotent
    pub async fn close(&self) {
        {
            let mut phase = self.inner.phase.lock();
            if *phase == NegotiationPhase::Closed {
                return;
            }
            *phase = NegotiationPhase::Closed;
        }

        self.inner.release(false).await;
        self.inner.state_tx.send_replace(PeerConnectionState::Closed);
        debug!("Peer connection manager closed");
    }
}

impl Drop for PeerConnectionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.pump.lock().take() {
            handle.abort();
        }
        if let Some(stream) = self.inner.stream.lock().take() {
            stream.stop();
        }
    }
}

impl std::fmt::Debug for PeerConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnectionManager")
            .field("phase", &self.phase())
            .field("state", &self.state())
            .finish()
    }
}
