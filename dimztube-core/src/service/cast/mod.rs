//! Cast orchestration
//!
//! [`CastManager`] unifies the casting strategies (host bridge, remote
//! playback prompt, local mirror, peer mirror, external cast framework)
//! behind one status/mode model.

pub mod capability;
pub mod events;
pub mod manager;

pub use capability::{
    CastBridge, CastCapabilities, CastFramework, LogNotifier, MediaElement, Notifier,
    PeerMirrorSupport, RemotePlayback, WakeLock, WakeLockProvider,
};
pub use events::{CastEventRegistry, CastFrameworkEvent, CastFrameworkState, Registration};
pub use manager::CastManager;

use serde::{Deserialize, Serialize};

use crate::models::SessionId;

/// Outbound cast status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Strategy currently driving the cast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastMode {
    #[default]
    None,
    Miracast,
    Mirror,
    Chromecast,
}

impl CastMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Miracast => "miracast",
            Self::Mirror => "mirror",
            Self::Chromecast => "chromecast",
        }
    }
}

/// Observable cast manager state, published on every change
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastStateSnapshot {
    pub status: CastStatus,
    pub mode: CastMode,
    pub device_name: Option<String>,
    pub session_id: Option<SessionId>,
    pub wake_lock_held: bool,
    pub streaming: bool,
}
