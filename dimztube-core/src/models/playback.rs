use serde::{Deserialize, Serialize};

/// Playback control action relayed from sender to receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Play,
    Pause,
    Seek,
    Volume,
}

impl CommandKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Seek => "seek",
            Self::Volume => "volume",
        }
    }

    /// Seek and volume carry a numeric payload; play and pause do not
    #[must_use]
    pub const fn takes_payload(&self) -> bool {
        matches!(self, Self::Seek | Self::Volume)
    }
}

/// Last-write-wins playback command stored on the session document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackCommand {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<f64>,
    /// Epoch millis at which the sender issued the command
    pub timestamp: i64,
}

impl PlaybackCommand {
    #[must_use]
    pub const fn new(kind: CommandKind, payload: Option<f64>, timestamp: i64) -> Self {
        Self {
            kind,
            payload,
            timestamp,
        }
    }

    /// Validate payload presence and range for the command kind
    pub fn validate(&self) -> crate::Result<()> {
        match (self.kind, self.payload) {
            (kind, None) if kind.takes_payload() => Err(crate::Error::InvalidInput(format!(
                "{} command requires a payload",
                kind.as_str()
            ))),
            (CommandKind::Seek, Some(position)) if !position.is_finite() || position < 0.0 => {
                Err(crate::Error::InvalidInput(
                    "seek position must be a non-negative number".to_string(),
                ))
            }
            (CommandKind::Volume, Some(volume)) if !(0.0..=1.0).contains(&volume) => {
                Err(crate::Error::InvalidInput(
                    "volume must be between 0 and 1".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}
