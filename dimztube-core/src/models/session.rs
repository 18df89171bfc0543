use serde::{Deserialize, Serialize};

use super::{PlaybackCommand, SessionDescription};

/// Negotiation status shared by both sides of a cast session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

impl SessionStatus {
    /// Disconnected and failed sessions are logically dead
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        }
    }
}

/// Cast session document, one per negotiation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<PlaybackCommand>,
    /// Epoch millis
    pub created_at: i64,
}

impl CastSession {
    /// Fresh session document awaiting an offer
    #[must_use]
    pub const fn new(created_at: i64) -> Self {
        Self {
            offer: None,
            answer: None,
            status: SessionStatus::Waiting,
            command: None,
            created_at,
        }
    }

    /// Offer usable for negotiation (non-empty)
    #[must_use]
    pub fn valid_offer(&self) -> Option<&SessionDescription> {
        self.offer.as_ref().filter(|d| !d.is_empty())
    }

    /// Answer usable for negotiation (non-empty)
    #[must_use]
    pub fn valid_answer(&self) -> Option<&SessionDescription> {
        self.answer.as_ref().filter(|d| !d.is_empty())
    }

    /// Merge a partial update, last write wins per field
    pub fn apply(&mut self, patch: SessionPatch) {
        if let Some(offer) = patch.offer {
            self.offer = Some(offer);
        }
        if let Some(answer) = patch.answer {
            self.answer = Some(answer);
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(command) = patch.command {
            self.command = Some(command);
        }
    }
}

/// Partial session update; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<PlaybackCommand>,
}

impl SessionPatch {
    #[must_use]
    pub fn offer(offer: SessionDescription) -> Self {
        Self {
            offer: Some(offer),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn answer(answer: SessionDescription) -> Self {
        Self {
            answer: Some(answer),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn command(command: PlaybackCommand) -> Self {
        Self {
            command: Some(command),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.offer.is_none() && self.answer.is_none() && self.status.is_none() && self.command.is_none()
    }
}
