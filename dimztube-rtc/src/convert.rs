//! Conversions between signaling models and webrtc-rs types

use dimztube_core::models::{IceCandidate, SdpType, SessionDescription};
use dimztube_core::service::webrtc::{PeerConnectionState, TrackKind};
use dimztube_core::{Error, Result};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

/// Wrap a webrtc-rs failure as a negotiation error
pub(crate) fn negotiation_error(context: &'static str) -> impl FnOnce(webrtc::Error) -> Error {
    move |e| Error::NegotiationFailed(format!("{context}: {e}"))
}

pub(crate) fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let SessionDescription { sdp_type, sdp } = description;
    let parsed = match sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(sdp),
        SdpType::Answer => RTCSessionDescription::answer(sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(sdp),
        SdpType::Rollback => {
            return Err(Error::InvalidInput(
                "rollback descriptions are not supported".to_string(),
            ))
        }
    };
    parsed.map_err(negotiation_error("parse session description"))
}

pub(crate) fn from_rtc_description(description: &RTCSessionDescription) -> Result<SessionDescription> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(Error::NegotiationFailed(
                "transport produced a description without a type".to_string(),
            ))
        }
    };

    Ok(SessionDescription {
        sdp_type,
        sdp: description.sdp.clone(),
    })
}

pub(crate) fn to_rtc_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_m_line_index,
        username_fragment: candidate.username_fragment,
    }
}

pub(crate) fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

/// `Unspecified` only appears before the connection reports anything
pub(crate) const fn map_state(state: RTCPeerConnectionState) -> PeerConnectionState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => PeerConnectionState::New,
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
    }
}

pub(crate) const fn map_kind(codec_type: RTPCodecType) -> TrackKind {
    match codec_type {
        RTPCodecType::Audio => TrackKind::Audio,
        // Unspecified is treated as video
        _ => TrackKind::Video,
    }
}
