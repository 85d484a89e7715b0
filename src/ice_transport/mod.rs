pub mod ice_candidate;

use std::fmt;

pub use ice::state::{ConnectionState, GatheringState};

/// ICEConnectionState indicates signaling state of the ICE Connection.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum RTCIceConnectionState {
    #[default]
    Unspecified = 0,

    /// The ICE agent is gathering addresses or is waiting to be given remote
    /// candidates.
    New,

    /// The ICE agent has been given one or more remote candidates and is
    /// checking pairs of local and remote candidates against one another.
    Checking,

    /// The ICE agent has found a usable connection but is still checking
    /// other candidate pairs to see if there is a better connection.
    Connected,

    /// The ICE agent has finished gathering candidates, has checked all
    /// pairs, and has found a working connection.
    Completed,

    /// The ICE candidate has checked all candidates pairs against one
    /// another and has failed to find compatible matches.
    Failed,

    /// Checks to ensure that components are still connected failed for at
    /// least one component of the peer connection.
    Disconnected,

    /// The ICE agent has shut down and is no longer handling requests.
    Closed,
}

impl From<ConnectionState> for RTCIceConnectionState {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::New => RTCIceConnectionState::New,
            ConnectionState::Checking => RTCIceConnectionState::Checking,
            ConnectionState::Connected => RTCIceConnectionState::Connected,
            ConnectionState::Completed => RTCIceConnectionState::Completed,
            ConnectionState::Failed => RTCIceConnectionState::Failed,
            ConnectionState::Disconnected => RTCIceConnectionState::Disconnected,
            ConnectionState::Closed => RTCIceConnectionState::Closed,
            ConnectionState::Unspecified => RTCIceConnectionState::Unspecified,
        }
    }
}

impl fmt::Display for RTCIceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            RTCIceConnectionState::New => "new",
            RTCIceConnectionState::Checking => "checking",
            RTCIceConnectionState::Connected => "connected",
            RTCIceConnectionState::Completed => "completed",
            RTCIceConnectionState::Failed => "failed",
            RTCIceConnectionState::Disconnected => "disconnected",
            RTCIceConnectionState::Closed => "closed",
            RTCIceConnectionState::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

/// ICEGatheringState describes the state of the candidate gathering process.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum RTCIceGatheringState {
    #[default]
    Unspecified = 0,

    /// Any of the ICE transports are in the "new" gathering state and none
    /// of the transports are in the "gathering" state, or there are no
    /// transports.
    New,

    /// Any of the ICE transports are in the "gathering" state.
    Gathering,

    /// At least one ICE transport exists, and all ICE transports are in the
    /// "complete" gathering state.
    Complete,
}

impl From<GatheringState> for RTCIceGatheringState {
    fn from(state: GatheringState) -> Self {
        match state {
            GatheringState::New => RTCIceGatheringState::New,
            GatheringState::Gathering => RTCIceGatheringState::Gathering,
            GatheringState::Complete => RTCIceGatheringState::Complete,
            GatheringState::Unspecified => RTCIceGatheringState::Unspecified,
        }
    }
}

impl fmt::Display for RTCIceGatheringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            RTCIceGatheringState::New => "new",
            RTCIceGatheringState::Gathering => "gathering",
            RTCIceGatheringState::Complete => "complete",
            RTCIceGatheringState::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}
