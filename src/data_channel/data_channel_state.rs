use std::fmt;

/// DataChannelState indicates the state of a data channel.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum RTCDataChannelState {
    #[default]
    Unspecified = 0,

    /// The user agent is attempting to establish the underlying data
    /// transport. This is the initial state of an RTCDataChannel.
    Connecting,

    /// The underlying data transport is established and communication is
    /// possible.
    Open,

    /// The procedure to close down the underlying data transport has
    /// started.
    Closing,

    /// The underlying data transport has been closed or could not be
    /// established.
    Closed,
}

const DATA_CHANNEL_STATE_CONNECTING_STR: &str = "connecting";
const DATA_CHANNEL_STATE_OPEN_STR: &str = "open";
const DATA_CHANNEL_STATE_CLOSING_STR: &str = "closing";
const DATA_CHANNEL_STATE_CLOSED_STR: &str = "closed";

impl From<u8> for RTCDataChannelState {
    fn from(v: u8) -> Self {
        match v {
            1 => RTCDataChannelState::Connecting,
            2 => RTCDataChannelState::Open,
            3 => RTCDataChannelState::Closing,
            4 => RTCDataChannelState::Closed,
            _ => RTCDataChannelState::Unspecified,
        }
    }
}

impl From<&str> for RTCDataChannelState {
    fn from(raw: &str) -> Self {
        match raw {
            DATA_CHANNEL_STATE_CONNECTING_STR => RTCDataChannelState::Connecting,
            DATA_CHANNEL_STATE_OPEN_STR => RTCDataChannelState::Open,
            DATA_CHANNEL_STATE_CLOSING_STR => RTCDataChannelState::Closing,
            DATA_CHANNEL_STATE_CLOSED_STR => RTCDataChannelState::Closed,
            _ => RTCDataChannelState::Unspecified,
        }
    }
}

impl fmt::Display for RTCDataChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            RTCDataChannelState::Connecting => DATA_CHANNEL_STATE_CONNECTING_STR,
            RTCDataChannelState::Open => DATA_CHANNEL_STATE_OPEN_STR,
            RTCDataChannelState::Closing => DATA_CHANNEL_STATE_CLOSING_STR,
            RTCDataChannelState::Closed => DATA_CHANNEL_STATE_CLOSED_STR,
            RTCDataChannelState::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_data_channel_state_round_trip() {
        let tests = vec![
            (RTCDataChannelState::Connecting, "connecting", 1u8),
            (RTCDataChannelState::Open, "open", 2),
            (RTCDataChannelState::Closing, "closing", 3),
            (RTCDataChannelState::Closed, "closed", 4),
        ];
        for (state, s, v) in tests {
            assert_eq!(state.to_string(), s);
            assert_eq!(RTCDataChannelState::from(s), state);
            assert_eq!(RTCDataChannelState::from(v), state);
        }
    }
}
