pub mod cast;
pub mod negotiator;
pub mod receiver;
pub mod webrtc;

pub use cast::{CastCapabilities, CastManager, CastMode, CastStateSnapshot, CastStatus};
pub use negotiator::SessionNegotiator;
pub use receiver::{CastReceiver, CommandFilter, PlaybackSink, ReceiverSession};
pub use webrtc::{PeerConnectionManager, PeerConnectionState};
