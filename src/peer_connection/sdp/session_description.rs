use sdp::description::session::SessionDescription;
use serde::{Deserialize, Serialize};

use super::sdp_type::RTCSdpType;
use crate::error::{Error, Result};

/// SessionDescription is used to expose local and remote session
/// descriptions. The application transports it out-of-band (the signaling
/// channel); it serializes to the usual `{type, sdp}` JSON shape.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct RTCSessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: RTCSdpType,

    pub sdp: String,
}

impl RTCSessionDescription {
    /// Given SDP representing an answer, wrap it in an
    /// RTCSessionDescription that can be given to an RTCPeerConnection.
    pub fn answer(sdp: String) -> Result<RTCSessionDescription> {
        let desc = RTCSessionDescription {
            sdp,
            sdp_type: RTCSdpType::Answer,
        };
        desc.unmarshal()?;
        Ok(desc)
    }

    /// Given SDP representing an offer, wrap it in an RTCSessionDescription
    /// that can be given to an RTCPeerConnection.
    pub fn offer(sdp: String) -> Result<RTCSessionDescription> {
        let desc = RTCSessionDescription {
            sdp,
            sdp_type: RTCSdpType::Offer,
        };
        desc.unmarshal()?;
        Ok(desc)
    }

    /// Given SDP representing a provisional answer, wrap it in an
    /// RTCSessionDescription that can be given to an RTCPeerConnection.
    pub fn pranswer(sdp: String) -> Result<RTCSessionDescription> {
        let desc = RTCSessionDescription {
            sdp,
            sdp_type: RTCSdpType::Pranswer,
        };
        desc.unmarshal()?;
        Ok(desc)
    }

    /// unmarshal is a helper to deserialize the sdp
    pub fn unmarshal(&self) -> Result<SessionDescription> {
        SessionDescription::unmarshal(&self.sdp)
            .map_err(|e| Error::ErrInvalidSdp(e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const MINIMAL: &str = "v=0\r\no=- 1 2 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n";

    #[test]
    fn test_session_description_json() {
        let desc = RTCSessionDescription {
            sdp_type: RTCSdpType::Offer,
            sdp: "sdp".to_owned(),
        };
        let json = serde_json::to_string(&desc).unwrap();
        assert_eq!(json, r#"{"type":"offer","sdp":"sdp"}"#);

        let parsed: RTCSessionDescription = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.sdp_type, RTCSdpType::Offer);
        assert_eq!(parsed.sdp, "sdp");
    }

    #[test]
    fn test_constructors_validate() {
        assert!(RTCSessionDescription::offer(MINIMAL.to_owned()).is_ok());
        assert!(RTCSessionDescription::answer(MINIMAL.to_owned()).is_ok());
        assert!(RTCSessionDescription::offer("garbage".to_owned()).is_err());
    }
}
