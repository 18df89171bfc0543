//! Peer transport abstraction
//!
//! The underlying peer connection: a browser `RTCPeerConnection` in a web
//! shell, webrtc-rs in a native one. Transports report what happens on their
//! side through a [`TransportEvent`] channel handed over at creation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::media::{LocalTrack, TrackKind};
use super::IceServerConfig;
use crate::models::{IceCandidate, SessionDescription};
use crate::Result;

/// Peer connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    /// Failed and closed connections never recover
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

/// Inbound track announced by the remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTrackInfo {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

/// Event emitted by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Locally gathered candidate to forward to the remote side
    LocalCandidate(IceCandidate),
    /// Connection state transition
    StateChanged(PeerConnectionState),
    /// The remote side added a track
    RemoteTrack(RemoteTrackInfo),
}

/// One underlying peer connection
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn add_track(&self, track: Arc<dyn LocalTrack>) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply a remote candidate; only valid after a remote description is set
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Creates transports for new cast attempts
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: &IceServerConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>>;
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scriptable in-memory transport

    use super::*;
    use crate::models::SdpType;
    use crate::Error;
    use parking_lot::Mutex;

    /// Everything the transport was asked to do, in order
    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        AddTrack(String),
        CreateOffer,
        CreateAnswer,
        SetLocal(SdpType),
        SetRemote(SdpType),
        AddCandidate(String),
        Close,
    }

    #[derive(Default)]
    pub struct FakeTransport {
        pub calls: Mutex<Vec<Call>>,
        remote_set: Mutex<bool>,
        pub events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    }

    impl FakeTransport {
        pub fn emit(&self, event: TransportEvent) {
            if let Some(tx) = self.events.lock().as_ref() {
                let _ = tx.send(event);
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl PeerTransport for FakeTransport {
        async fn add_track(&self, track: Arc<dyn LocalTrack>) -> Result<()> {
            self.calls.lock().push(Call::AddTrack(track.id().to_string()));
            Ok(())
        }

        async fn create_offer(&self) -> Result<SessionDescription> {
            self.calls.lock().push(Call::CreateOffer);
            Ok(SessionDescription::offer("v=0\r\ns=fake-offer\r\n"))
        }

        async fn create_answer(&self) -> Result<SessionDescription> {
            self.calls.lock().push(Call::CreateAnswer);
            Ok(SessionDescription::answer("v=0\r\ns=fake-answer\r\n"))
        }

        async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
            self.calls.lock().push(Call::SetLocal(description.sdp_type));
            Ok(())
        }

        async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
            tokio::task::yield_now().await;
            self.calls.lock().push(Call::SetRemote(description.sdp_type));
            *self.remote_set.lock() = true;
            Ok(())
        }

        async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
            if !*self.remote_set.lock() {
                return Err(Error::InvalidState(
                    "candidate applied before remote description".to_string(),
                ));
            }
            self.calls.lock().push(Call::AddCandidate(candidate.candidate));
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.calls.lock().push(Call::Close);
            self.events.lock().take();
            Ok(())
        }
    }

    /// Factory handing out one shared [`FakeTransport`]
    #[derive(Default)]
    pub struct FakeFactory {
        pub transport: Arc<FakeTransport>,
    }

    #[async_trait]
    impl TransportFactory for FakeFactory {
        async fn create(
            &self,
            _ice_servers: &IceServerConfig,
            events: mpsc::UnboundedSender<TransportEvent>,
        ) -> Result<Arc<dyn PeerTransport>> {
            *self.transport.events.lock() = Some(events);
            Ok(self.transport.clone())
        }
    }
}
