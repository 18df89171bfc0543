//! WebRTC peer connection management
//!
//! Owns the per-attempt peer connection: local media, SDP offer/answer and
//! ICE candidate exchange. STUN only; there is no TURN relay.

pub mod candidate_queue;
pub mod media;
pub mod peer;
pub mod transport;

pub use candidate_queue::CandidateQueue;
pub use media::{
    CaptureOptions, CaptureSource, EndedCallback, LocalStream, LocalTrack, SampleSink, TrackKind,
};
pub use peer::{NegotiationPhase, NegotiationStart, PeerConnectionManager, PeerEvent};
pub use transport::{
    PeerConnectionState, PeerTransport, RemoteTrackInfo, TransportEvent, TransportFactory,
};

pub use crate::models::{IceCandidate, SdpType, SessionDescription};

use serde::{Deserialize, Serialize};

use crate::config::WebRTCConfig;

/// ICE server configuration handed to transports and clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// STUN URLs (e.g. `stun:stun.l.google.com:19302`)
    pub urls: Vec<String>,
}

impl From<&WebRTCConfig> for IceServerConfig {
    fn from(config: &WebRTCConfig) -> Self {
        Self {
            urls: config.stun_servers.clone(),
        }
    }
}

impl Default for IceServerConfig {
    fn default() -> Self {
        Self::from(&WebRTCConfig::default())
    }
}
