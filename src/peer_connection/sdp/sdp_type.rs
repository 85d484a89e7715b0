use std::fmt;

use serde::{Deserialize, Serialize};

/// SDPType describes the type of an SessionDescription.
#[derive(Default, Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub enum RTCSdpType {
    #[default]
    Unspecified = 0,

    /// An SDP offer.
    #[serde(rename = "offer")]
    Offer,

    /// An SDP answer, final.
    #[serde(rename = "answer")]
    Answer,

    /// An SDP provisional answer; may be changed to a definitive answer.
    #[serde(rename = "pranswer")]
    Pranswer,

    /// Cancels the current SDP negotiation and moves the SDP offer and
    /// answer back to what it was in the previous stable state.
    #[serde(rename = "rollback")]
    Rollback,
}

const SDP_TYPE_OFFER_STR: &str = "offer";
const SDP_TYPE_PRANSWER_STR: &str = "pranswer";
const SDP_TYPE_ANSWER_STR: &str = "answer";
const SDP_TYPE_ROLLBACK_STR: &str = "rollback";

impl From<&str> for RTCSdpType {
    fn from(raw: &str) -> Self {
        match raw {
            SDP_TYPE_OFFER_STR => RTCSdpType::Offer,
            SDP_TYPE_PRANSWER_STR => RTCSdpType::Pranswer,
            SDP_TYPE_ANSWER_STR => RTCSdpType::Answer,
            SDP_TYPE_ROLLBACK_STR => RTCSdpType::Rollback,
            _ => RTCSdpType::Unspecified,
        }
    }
}

impl fmt::Display for RTCSdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RTCSdpType::Offer => write!(f, "{SDP_TYPE_OFFER_STR}"),
            RTCSdpType::Pranswer => write!(f, "{SDP_TYPE_PRANSWER_STR}"),
            RTCSdpType::Answer => write!(f, "{SDP_TYPE_ANSWER_STR}"),
            RTCSdpType::Rollback => write!(f, "{SDP_TYPE_ROLLBACK_STR}"),
            _ => write!(f, "{}", crate::UNSPECIFIED_STR),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sdp_type_round_trip() {
        let tests = vec![
            ("offer", RTCSdpType::Offer),
            ("answer", RTCSdpType::Answer),
            ("pranswer", RTCSdpType::Pranswer),
            ("rollback", RTCSdpType::Rollback),
        ];
        for (s, typ) in tests {
            assert_eq!(RTCSdpType::from(s), typ);
            assert_eq!(typ.to_string(), s);
        }
    }
}
