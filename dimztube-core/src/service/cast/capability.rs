//! Host capabilities consumed by the cast manager
//!
//! Every capability is optional. The manager probes for presence before use
//! and treats absence as feature degradation, never as a crash.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

use super::events::CastEventRegistry;
use crate::service::negotiator::SessionNegotiator;
use crate::service::webrtc::{CaptureSource, LocalStream, TransportFactory};
use crate::{Error, Result};

/// Native interface injected by a wrapping mobile or desktop shell.
///
/// Calls are synchronous and assumed to succeed.
#[cfg_attr(test, mockall::automock)]
pub trait CastBridge: Send + Sync {
    fn start_miracast(&self, url: &str);

    fn start_mirror(&self);

    fn stop_session(&self);
}

/// Hidden media element the captured stream is attached to
#[derive(Default)]
pub struct MediaElement {
    source: Mutex<Option<LocalStream>>,
}

impl MediaElement {
    pub fn set_source(&self, stream: LocalStream) {
        *self.source.lock() = Some(stream);
    }

    pub fn clear_source(&self) {
        self.source.lock().take();
    }

    #[must_use]
    pub fn source(&self) -> Option<LocalStream> {
        self.source.lock().clone()
    }
}

/// Standards-based remote playback device prompt
#[async_trait]
pub trait RemotePlayback: Send + Sync {
    /// Show the device picker for `element`.
    ///
    /// Returns the chosen device's name when the host knows it. Fails with
    /// `NoCompatibleDevice` when nothing can play the element and
    /// `CapabilityUnsupported` when the prompt cannot be shown at all.
    async fn prompt(&self, element: &MediaElement) -> Result<Option<String>>;
}

/// Held screen wake lock
pub trait WakeLock: Send + Sync {
    fn release(&self);
}

#[async_trait]
pub trait WakeLockProvider: Send + Sync {
    async fn request(&self) -> Result<Box<dyn WakeLock>>;
}

/// External cast framework session control
pub trait CastFramework: Send + Sync {
    fn end_current_session(&self);
}

/// One-shot user notifications
pub trait Notifier: Send + Sync {
    fn notify(&self, error: &Error);
}

/// Notifier for headless hosts: writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, error: &Error) {
        warn!(error = %error, "{}", error.user_message());
    }
}

/// Signaling plus transports, needed for peer mirroring
#[derive(Clone)]
pub struct PeerMirrorSupport {
    pub negotiator: SessionNegotiator,
    pub transports: Arc<dyn TransportFactory>,
}

/// Everything the host offers
#[derive(Clone)]
pub struct CastCapabilities {
    pub bridge: Option<Arc<dyn CastBridge>>,
    pub display_capture: Option<Arc<dyn CaptureSource>>,
    pub remote_playback: Option<Arc<dyn RemotePlayback>>,
    pub wake_lock: Option<Arc<dyn WakeLockProvider>>,
    pub cast_framework: Option<Arc<dyn CastFramework>>,
    pub cast_events: Option<CastEventRegistry>,
    pub peer_mirror: Option<PeerMirrorSupport>,
    pub notifier: Arc<dyn Notifier>,
}

impl Default for CastCapabilities {
    fn default() -> Self {
        Self {
            bridge: None,
            display_capture: None,
            remote_playback: None,
            wake_lock: None,
            cast_framework: None,
            cast_events: None,
            peer_mirror: None,
            notifier: Arc::new(LogNotifier),
        }
    }
}

impl CastCapabilities {
    #[must_use]
    pub fn with_bridge(mut self, bridge: Arc<dyn CastBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    #[must_use]
    pub fn with_display_capture(mut self, capture: Arc<dyn CaptureSource>) -> Self {
        self.display_capture = Some(capture);
        self
    }

    #[must_use]
    pub fn with_remote_playback(mut self, remote_playback: Arc<dyn RemotePlayback>) -> Self {
        self.remote_playback = Some(remote_playback);
        self
    }

    #[must_use]
    pub fn with_wake_lock(mut self, provider: Arc<dyn WakeLockProvider>) -> Self {
        self.wake_lock = Some(provider);
        self
    }

    #[must_use]
    pub fn with_cast_framework(
        mut self,
        framework: Arc<dyn CastFramework>,
        events: CastEventRegistry,
    ) -> Self {
        self.cast_framework = Some(framework);
        self.cast_events = Some(events);
        self
    }

    #[must_use]
    pub fn with_peer_mirror(
        mut self,
        negotiator: SessionNegotiator,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        self.peer_mirror = Some(PeerMirrorSupport {
            negotiator,
            transports,
        });
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub(crate) fn require_display_capture(&self) -> Result<Arc<dyn CaptureSource>> {
        self.display_capture
            .clone()
            .ok_or_else(|| Error::CapabilityUnsupported("Screen capture".to_string()))
    }

    pub(crate) fn require_peer_mirror(&self) -> Result<PeerMirrorSupport> {
        self.peer_mirror
            .clone()
            .ok_or_else(|| Error::CapabilityUnsupported("Device mirroring".to_string()))
    }
}

impl std::fmt::Debug for CastCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CastCapabilities")
            .field("bridge", &self.bridge.is_some())
            .field("display_capture", &self.display_capture.is_some())
            .field("remote_playback", &self.remote_playback.is_some())
            .field("wake_lock", &self.wake_lock.is_some())
            .field("cast_framework", &self.cast_framework.is_some())
            .field("peer_mirror", &self.peer_mirror.is_some())
            .finish()
    }
}

