use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Signaling store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Capture denied: {0}")]
    CaptureDenied(String),

    #[error("Capability unsupported: {0}")]
    CapabilityUnsupported(String),

    #[error("No compatible device: {0}")]
    NoCompatibleDevice(String),

    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("Cast session already active")]
    AlreadyActive,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short message suitable for a one-shot user notification
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::CaptureDenied(_) => "Screen capture was denied".to_string(),
            Self::CapabilityUnsupported(what) => format!("{what} is not supported on this device"),
            Self::NoCompatibleDevice(_) => "No compatible cast device found".to_string(),
            Self::StoreUnavailable(_) => "Signaling service is unavailable, try again".to_string(),
            Self::NegotiationFailed(_) => "Connection to the receiver failed".to_string(),
            Self::AlreadyActive => "A cast session is already active".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
