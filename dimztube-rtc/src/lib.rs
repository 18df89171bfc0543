//! Native WebRTC transport for DimzTube casting
//!
//! Implements [`dimztube_core::service::webrtc::TransportFactory`] on top of
//! webrtc-rs so native hosts and the server can run real peer connections.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dimztube_rtc::WebRtcTransportFactory;
//!
//! let transports = Arc::new(WebRtcTransportFactory::new()?);
//! let capabilities = CastCapabilities::default()
//!     .with_display_capture(capture)
//!     .with_peer_mirror(negotiator, transports);
//! ```

mod convert;
mod track;
mod transport;

pub use track::{codec_for, TrackSampleSink};
pub use transport::{WebRtcTransport, WebRtcTransportFactory};
