//! webrtc-rs backed peer transport

use async_trait::async_trait;
use dimztube_core::models::{IceCandidate, SessionDescription};
use dimztube_core::service::webrtc::{
    IceServerConfig, LocalTrack, PeerTransport, RemoteTrackInfo, TransportEvent, TransportFactory,
};
use dimztube_core::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::convert::{
    from_rtc_candidate, from_rtc_description, map_kind, map_state, negotiation_error,
    to_rtc_candidate, to_rtc_description,
};
use crate::track::{static_track, TrackSampleSink};

/// Creates webrtc-rs peer connections sharing one media engine setup
pub struct WebRtcTransportFactory {
    api: API,
}

impl WebRtcTransportFactory {
    /// Build the API with default codecs and interceptors
    pub fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::Internal(format!("register codecs: {e}")))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| Error::Internal(format!("register interceptors: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api })
    }
}

impl std::fmt::Debug for WebRtcTransportFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcTransportFactory").finish_non_exhaustive()
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        ice_servers: &IceServerConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>> {
        let configuration = RTCConfiguration {
            ice_servers: if ice_servers.urls.is_empty() {
                Vec::new()
            } else {
                vec![RTCIceServer {
                    urls: ice_servers.urls.clone(),
                    ..Default::default()
                }]
            },
            ..Default::default()
        };

        let pc = Arc::new(
            self.api
                .new_peer_connection(configuration)
                .await
                .map_err(negotiation_error("create peer connection"))?,
        );

        install_handlers(&pc, &events);
        debug!(stun_servers = ice_servers.urls.len(), "Peer connection created");

        Ok(Arc::new(WebRtcTransport {
            pc,
            stream_id: nanoid::nanoid!(12),
            rtcp_readers: Mutex::new(Vec::new()),
        }))
    }
}

fn install_handlers(pc: &RTCPeerConnection, events: &mpsc::UnboundedSender<TransportEvent>) {
    let candidate_events = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = candidate_events.clone();
        Box::pin(async move {
            // None marks the end of gathering
            let Some(candidate) = candidate else {
                debug!("ICE gathering complete");
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    let _ = events.send(TransportEvent::LocalCandidate(from_rtc_candidate(init)));
                }
                Err(e) => warn!(error = %e, "Failed to serialize local ICE candidate"),
            }
        })
    }));

    let state_events = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let events = state_events.clone();
        Box::pin(async move {
            info!(state = %state, "Peer connection state changed");
            let _ = events.send(TransportEvent::StateChanged(map_state(state)));
        })
    }));

    let track_events = events.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
            let events = track_events.clone();
            Box::pin(async move {
                let info = RemoteTrackInfo {
                    id: track.id(),
                    stream_id: track.stream_id(),
                    kind: map_kind(track.kind()),
                };
                debug!(track_id = %info.id, kind = info.kind.as_str(), "Remote track added");
                let _ = events.send(TransportEvent::RemoteTrack(info));
            })
        },
    ));
}

/// One webrtc-rs peer connection
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    stream_id: String,
    rtcp_readers: Mutex<Vec<JoinHandle<()>>>,
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn add_track(&self, track: Arc<dyn LocalTrack>) -> Result<()> {
        let kind = track.kind();
        let rtc_track = static_track(kind, track.id(), &self.stream_id);

        let sender = self
            .pc
            .add_track(Arc::clone(&rtc_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(negotiation_error("add track"))?;

        // RTCP has to be drained for interceptors to make progress
        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        self.rtcp_readers.lock().push(reader);

        track.attach_sink(Arc::new(TrackSampleSink::new(rtc_track)));
        debug!(track_id = track.id(), kind = kind.as_str(), "Local track added");
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(negotiation_error("create offer"))?;
        from_rtc_description(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(negotiation_error("create answer"))?;
        from_rtc_description(&answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc_description(description)?)
            .await
            .map_err(negotiation_error("set local description"))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(negotiation_error("set remote description"))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(to_rtc_candidate(candidate))
            .await
            .map_err(negotiation_error("add ICE candidate"))
    }

    async fn close(&self) -> Result<()> {
        for reader in self.rtcp_readers.lock().drain(..) {
            reader.abort();
        }
        self.pc
            .close()
            .await
            .map_err(negotiation_error("close peer connection"))
    }
}

impl Drop for WebRtcTransport {
    fn drop(&mut self) {
        for reader in self.rtcp_readers.get_mut().drain(..) {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dimztube_core::models::SdpType;
    use dimztube_core::service::webrtc::{SampleSink, TrackKind};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ScreenTrack {
        live: AtomicBool,
        sink: Mutex<Option<Arc<dyn SampleSink>>>,
    }

    impl LocalTrack for ScreenTrack {
        fn id(&self) -> &str {
            "screen"
        }

        fn kind(&self) -> TrackKind {
            TrackKind::Video
        }

        fn stop(&self) {
            self.live.store(false, Ordering::SeqCst);
        }

        fn is_live(&self) -> bool {
            self.live.load(Ordering::SeqCst)
        }

        fn attach_sink(&self, sink: Arc<dyn SampleSink>) {
            *self.sink.lock() = Some(sink);
        }
    }

    fn no_stun() -> IceServerConfig {
        IceServerConfig { urls: Vec::new() }
    }

    #[tokio::test]
    async fn test_offer_includes_video_track() {
        let factory = WebRtcTransportFactory::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = factory.create(&no_stun(), tx).await.unwrap();

        let track = Arc::new(ScreenTrack {
            live: AtomicBool::new(true),
            sink: Mutex::new(None),
        });
        transport.add_track(track.clone()).await.unwrap();
        assert!(track.sink.lock().is_some());

        let offer = transport.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("m=video"));

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_candidate_before_remote_description_fails() {
        let factory = WebRtcTransportFactory::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = factory.create(&no_stun(), tx).await.unwrap();

        let err = transport
            .add_ice_candidate(IceCandidate::new(
                "candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host",
                Some("0".to_string()),
                Some(0),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NegotiationFailed(_)));

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_offer_answer_between_two_transports() {
        let factory = WebRtcTransportFactory::new().unwrap();
        let (sender_tx, _sender_rx) = mpsc::unbounded_channel();
        let (receiver_tx, _receiver_rx) = mpsc::unbounded_channel();
        let sender = factory.create(&no_stun(), sender_tx).await.unwrap();
        let receiver = factory.create(&no_stun(), receiver_tx).await.unwrap();

        sender
            .add_track(Arc::new(ScreenTrack {
                live: AtomicBool::new(true),
                sink: Mutex::new(None),
            }))
            .await
            .unwrap();

        let offer = sender.create_offer().await.unwrap();
        sender.set_local_description(offer.clone()).await.unwrap();
        receiver.set_remote_description(offer).await.unwrap();

        let answer = receiver.create_answer().await.unwrap();
        assert_eq!(answer.sdp_type, SdpType::Answer);
        receiver.set_local_description(answer.clone()).await.unwrap();
        sender.set_remote_description(answer).await.unwrap();

        sender.close().await.unwrap();
        receiver.close().await.unwrap();
    }
}
