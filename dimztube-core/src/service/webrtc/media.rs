//! Local media handles
//!
//! A captured display (optionally with audio) is a [`LocalStream`] made of
//! [`LocalTrack`]s. Tracks come from the host: a browser shell wraps
//! `MediaStreamTrack`, a native shell wraps its own capturer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::Result;

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

/// Destination for encoded media samples produced by a local track
#[async_trait]
pub trait SampleSink: Send + Sync {
    async fn write_sample(&self, data: Vec<u8>, duration: Duration) -> Result<()>;
}

/// Fired by a track once it stops producing media
pub type EndedCallback = Box<dyn Fn() + Send + Sync>;

/// A single locally captured track
pub trait LocalTrack: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    /// Stop capturing; must be idempotent
    fn stop(&self);

    fn is_live(&self) -> bool;

    /// Hand the track a sink to push encoded samples into.
    ///
    /// Hosts whose tracks are attached natively (browsers) ignore this.
    fn attach_sink(&self, _sink: Arc<dyn SampleSink>) {}

    /// Register a callback for when capture ends outside our control, such
    /// as the user pressing the browser's "stop sharing" button.
    ///
    /// Hosts that cannot observe this keep the default.
    fn on_ended(&self, _callback: EndedCallback) {}
}

/// Options for a display capture request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureOptions {
    pub video: bool,
    pub audio: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }
}

/// Something that can produce a local stream (display or tab capture)
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Prompt for and start a capture.
    ///
    /// Fails with `CaptureDenied` when the user declines and
    /// `CapabilityUnsupported` when capture is unavailable.
    async fn capture(&self, options: CaptureOptions) -> Result<LocalStream>;
}

/// Captured media stream; clones share the same tracks.
///
/// The stream ends when it is stopped or when any of its tracks reports
/// that capture ended.
#[derive(Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<Arc<dyn LocalTrack>>,
    ended: Arc<watch::Sender<bool>>,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<dyn LocalTrack>>) -> Self {
        let ended = Arc::new(watch::channel(false).0);
        for track in &tracks {
            let ended = Arc::downgrade(&ended);
            track.on_ended(Box::new(move || {
                if let Some(ended) = ended.upgrade() {
                    ended.send_replace(true);
                }
            }));
        }

        Self {
            id: id.into(),
            tracks,
            ended,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn tracks(&self) -> &[Arc<dyn LocalTrack>] {
        &self.tracks
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &Arc<dyn LocalTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    /// A stream is live while at least one track still captures
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(|t| t.is_live())
    }

    /// Stop every track
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
        self.ended.send_replace(true);
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        *self.ended.borrow()
    }

    /// Resolves once the stream has ended
    pub async fn ended(&self) {
        let mut rx = self.ended.subscribe();
        // The sender lives as long as `self`
        let _ = rx.wait_for(|ended| *ended).await;
    }

    /// Whether both handles are clones of the same capture
    #[must_use]
    pub fn same_capture(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.ended, &other.ended)
    }
}

impl std::fmt::Debug for LocalStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .field("live", &self.is_live())
            .finish()
    }
}
