use ice::candidate::Candidate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// ICECandidateInit is used to serialize ice candidates for the signaling
/// channel.
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RTCIceCandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment")]
    pub username_fragment: Option<String>,
}

impl RTCIceCandidateInit {
    pub(crate) fn from_candidate(candidate: &Candidate, mid: &str) -> Self {
        RTCIceCandidateInit {
            candidate: format!("candidate:{}", candidate.marshal()),
            sdp_mid: Some(mid.to_owned()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    pub(crate) fn to_candidate(&self) -> Result<Candidate> {
        Candidate::unmarshal(&self.candidate).map_err(Error::Ice)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_candidate_init_round_trip() -> Result<()> {
        let candidate = Candidate::host("127.0.0.1".to_owned(), 4000);
        let init = RTCIceCandidateInit::from_candidate(&candidate, "0");
        assert!(init.candidate.starts_with("candidate:"));

        let parsed = init.to_candidate()?;
        assert_eq!(parsed.address, "127.0.0.1");
        assert_eq!(parsed.port, 4000);
        Ok(())
    }

    #[test]
    fn test_candidate_init_json_shape() {
        let init = RTCIceCandidateInit {
            candidate: "candidate:1 1 udp 1 127.0.0.1 4000 typ host".to_owned(),
            sdp_mid: Some("0".to_owned()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };
        let json = serde_json::to_string(&init).unwrap();
        assert!(json.contains("\"sdpMid\":\"0\""));
        assert!(json.contains("\"sdpMLineIndex\":0"));
    }
}
