//! Outbound media tracks
//!
//! Host capture tracks push encoded samples through a [`SampleSink`]; here
//! the sink writes them into a webrtc-rs static sample track.

use async_trait::async_trait;
use bytes::Bytes;
use dimztube_core::service::webrtc::{SampleSink, TrackKind};
use dimztube_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Codec used for each outbound track kind
#[must_use]
pub fn codec_for(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_string(),
            clock_rate: 90_000,
            ..Default::default()
        },
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            clock_rate: 48_000,
            channels: 2,
            ..Default::default()
        },
    }
}

pub(crate) fn static_track(kind: TrackKind, id: &str, stream_id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        codec_for(kind),
        id.to_string(),
        stream_id.to_string(),
    ))
}

/// [`SampleSink`] backed by a static sample track
pub struct TrackSampleSink {
    track: Arc<TrackLocalStaticSample>,
}

impl TrackSampleSink {
    #[must_use]
    pub const fn new(track: Arc<TrackLocalStaticSample>) -> Self {
        Self { track }
    }
}

#[async_trait]
impl SampleSink for TrackSampleSink {
    async fn write_sample(&self, data: Vec<u8>, duration: Duration) -> Result<()> {
        let sample = Sample {
            data: Bytes::from(data),
            duration,
            ..Default::default()
        };

        self.track
            .write_sample(&sample)
            .await
            .map_err(|e| Error::Internal(format!("write sample: {e}")))
    }
}
