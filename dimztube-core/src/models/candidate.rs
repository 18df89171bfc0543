use serde::{Deserialize, Serialize};

use super::id::SessionId;

/// ICE candidate in the browser's `RTCIceCandidateInit` JSON form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Full candidate string
    pub candidate: String,
    /// SDP mid
    #[serde(default)]
    pub sdp_mid: Option<String>,
    /// SDP mline index
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
    /// ICE username fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    #[must_use]
    pub fn new(candidate: impl Into<String>, sdp_mid: Option<String>, sdp_m_line_index: Option<u16>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid,
            sdp_m_line_index,
            username_fragment: None,
        }
    }
}

/// Which side of a cast session produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateOrigin {
    Sender,
    Receiver,
}

impl CandidateOrigin {
    /// Name of the per-session sub-collection holding this origin's candidates
    #[must_use]
    pub const fn collection(&self) -> &'static str {
        match self {
            Self::Sender => "senderCandidates",
            Self::Receiver => "receiverCandidates",
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::Receiver => "receiver",
        }
    }

    /// The origin whose candidates this side consumes
    #[must_use]
    pub const fn opposite(&self) -> Self {
        match self {
            Self::Sender => Self::Receiver,
            Self::Receiver => Self::Sender,
        }
    }
}

impl std::str::FromStr for CandidateOrigin {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sender" | "senderCandidates" => Ok(Self::Sender),
            "receiver" | "receiverCandidates" => Ok(Self::Receiver),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown candidate origin '{other}'"
            ))),
        }
    }
}

/// Stored candidate; immutable once appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateRecord {
    pub session_id: SessionId,
    pub origin: CandidateOrigin,
    /// Position within the origin's sub-collection, starting at 0
    pub sequence: u64,
    pub candidate: IceCandidate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_wire_names() {
        let candidate = IceCandidate::new(
            "candidate:1 1 UDP 2130706431 192.168.1.1 54321 typ host",
            Some("0".to_string()),
            Some(0),
        );

        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
        assert!(json.get("usernameFragment").is_none());
    }

    #[test]
    fn test_candidate_accepts_missing_fields() {
        let parsed: IceCandidate = serde_json::from_str(r#"{"candidate":"candidate:2 1 UDP 1 10.0.0.1 1 typ host"}"#).unwrap();
        assert!(parsed.sdp_mid.is_none());
        assert!(parsed.sdp_m_line_index.is_none());
    }

    #[test]
    fn test_origin_parsing() {
        assert_eq!("sender".parse::<CandidateOrigin>().unwrap(), CandidateOrigin::Sender);
        assert_eq!(
            "receiverCandidates".parse::<CandidateOrigin>().unwrap(),
            CandidateOrigin::Receiver
        );
        assert!("both".parse::<CandidateOrigin>().is_err());
        assert_eq!(CandidateOrigin::Sender.opposite(), CandidateOrigin::Receiver);
        assert_eq!(CandidateOrigin::Receiver.collection(), "receiverCandidates");
    }
}
