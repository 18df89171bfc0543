pub mod candidate;
pub mod description;
pub mod id;
pub mod playback;
pub mod session;

pub use candidate::{CandidateOrigin, IceCandidate, IceCandidateRecord};
pub use description::{SdpType, SessionDescription};
pub use id::{generate_id, SessionId};
pub use playback::{CommandKind, PlaybackCommand};
pub use session::{CastSession, SessionPatch, SessionStatus};

/// Current time as epoch milliseconds, the timestamp unit of the wire format
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
