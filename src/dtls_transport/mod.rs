pub mod dtls_fingerprint;
pub mod dtls_role;

use std::fmt;

/// DTLSTransportState indicates the DTLS transport establishment state.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum RTCDtlsTransportState {
    #[default]
    Unspecified = 0,

    /// DTLS has not started negotiating yet.
    New,

    /// DTLS is in the process of negotiating a secure connection and
    /// verifying the remote fingerprint.
    Connecting,

    /// DTLS has completed negotiation of a secure connection and verified
    /// the remote fingerprint.
    Connected,

    /// The transport has been closed intentionally.
    Closed,

    /// The transport has failed as the result of an error (such as receipt
    /// of an error alert or failure to validate the remote fingerprint).
    Failed,
}

impl fmt::Display for RTCDtlsTransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            RTCDtlsTransportState::New => "new",
            RTCDtlsTransportState::Connecting => "connecting",
            RTCDtlsTransportState::Connected => "connected",
            RTCDtlsTransportState::Closed => "closed",
            RTCDtlsTransportState::Failed => "failed",
            RTCDtlsTransportState::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}
