// DimzTube API Library
//
// HTTP/WebSocket signaling service for DimzTube cast sessions

pub mod http;

// Re-export commonly used types
pub use http::{create_router, AppState};
