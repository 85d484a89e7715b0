use std::fmt;

use serde::{Deserialize, Serialize};

/// ICETransportPolicy defines the ICE candidate policy surface the browser
/// uses to surface permitted candidates.
///
/// <https://www.w3.org/TR/webrtc/#rtcicetransportpolicy-enum>
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RTCIceTransportPolicy {
    /// All ICE candidates will be considered.
    #[default]
    #[serde(rename = "all")]
    All = 0,

    /// Only media-relay candidates (TURN) will be considered.
    #[serde(rename = "relay")]
    Relay = 1,
}

const ICE_TRANSPORT_POLICY_RELAY_STR: &str = "relay";
const ICE_TRANSPORT_POLICY_ALL_STR: &str = "all";

impl From<&str> for RTCIceTransportPolicy {
    fn from(raw: &str) -> Self {
        match raw {
            ICE_TRANSPORT_POLICY_RELAY_STR => RTCIceTransportPolicy::Relay,
            _ => RTCIceTransportPolicy::All,
        }
    }
}

impl fmt::Display for RTCIceTransportPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RTCIceTransportPolicy::Relay => write!(f, "{ICE_TRANSPORT_POLICY_RELAY_STR}"),
            RTCIceTransportPolicy::All => write!(f, "{ICE_TRANSPORT_POLICY_ALL_STR}"),
        }
    }
}
