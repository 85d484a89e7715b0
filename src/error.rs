use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// ErrConnectionClosed indicates an operation executed after the
    /// connection has already been closed.
    #[error("connection closed")]
    ErrConnectionClosed,

    /// ErrIncorrectSignalingState indicates that the operation cannot run in
    /// the current signaling state; the state is left unchanged.
    #[error("operation can not be run in current signaling state")]
    ErrIncorrectSignalingState,

    /// ErrInvalidSdp indicates a session description that does not parse or
    /// does not match the pending offer.
    #[error("invalid session description: {0}")]
    ErrInvalidSdp(String),

    /// ErrNoRemoteDescription indicates that an operation was rejected
    /// because the remote description is not set.
    #[error("remote description is not set")]
    ErrNoRemoteDescription,

    /// ErrSessionDescriptionNoFingerprint indicates a remote description
    /// without any `a=fingerprint`.
    #[error("remote description has no fingerprint")]
    ErrSessionDescriptionNoFingerprint,

    /// ErrPayloadTooLarge indicates a send whose payload exceeds the
    /// 1200-byte unfragmented maximum; nothing was transmitted.
    #[error("payload exceeds the maximum message size")]
    ErrPayloadTooLarge,

    /// ErrDataChannelNotOpen indicates a send on a channel that is not (yet)
    /// open.
    #[error("data channel not open")]
    ErrDataChannelNotOpen,

    /// ErrIceFailed indicates the ICE agent exhausted its candidate pairs.
    #[error("ice failed")]
    ErrIceFailed,

    /// ErrDtlsHandshakeFailed indicates the DTLS handshake could not
    /// complete.
    #[error("dtls handshake failed")]
    ErrDtlsHandshakeFailed,

    /// ErrDtlsFingerprintMismatch indicates the peer certificate matched no
    /// fingerprint from the remote description.
    #[error("dtls certificate fingerprint mismatch")]
    ErrDtlsFingerprintMismatch,

    /// ErrSctpClosed indicates a send after the association left
    /// Established.
    #[error("sctp association is closed")]
    ErrSctpClosed,

    /// ErrCertificate indicates local certificate provisioning failed.
    #[error("certificate error: {0}")]
    ErrCertificate(String),

    /// ErrInvalidPortRange indicates `ice_port_range` with min >= max.
    #[error("invalid ice port range")]
    ErrInvalidPortRange,

    #[error("network error: {0}")]
    ErrNetwork(#[from] std::io::Error),

    #[error("sdp: {0}")]
    Sdp(#[from] sdp::Error),
    #[error("ice: {0}")]
    Ice(#[from] ice::Error),
    #[error("dtls: {0}")]
    Dtls(#[from] dtls::Error),
    #[error("sctp: {0}")]
    Sctp(#[from] sctp::Error),
    #[error("dcep: {0}")]
    Data(#[from] data::Error),
}
