use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("raw is too small for a SCTP chunk")]
    ErrChunkHeaderTooSmall,
    #[error("chunk has invalid length")]
    ErrChunkHeaderInvalidLength,
    #[error("chunk PADDING is non-zero at offset")]
    ErrChunkHeaderPaddingNonZero,
    #[error("chunk type mismatch while unmarshalling")]
    ErrChunkTypeMismatch,
    #[error("chunk value isn't long enough for mandatory parameters")]
    ErrChunkValueNotLongEnough,
    #[error("ChunkType of type INIT flags must be all 0")]
    ErrChunkTypeInitFlagZero,
    #[error("INIT InitiateTag must not be 0")]
    ErrChunkTypeInitInitiateTagZero,
    #[error("INIT inbound stream request must be > 0")]
    ErrInitInboundStreamRequestZero,
    #[error("INIT outbound stream request must be > 0")]
    ErrInitOutboundStreamRequestZero,
    #[error("INIT Advertised Receiver Window Credit (a_rwnd) must be >= 1500")]
    ErrInitAdvertisedReceiver1500,
    #[error("packet is smaller than the header size")]
    ErrChunkPayloadSmall,

    #[error("param header too short")]
    ErrParamHeaderTooShort,
    #[error("param self reported length is shorter than header length")]
    ErrParamHeaderSelfReportedLengthShorter,
    #[error("param self reported length is longer than header length")]
    ErrParamHeaderSelfReportedLengthLonger,
    #[error("outgoing SSN reset request parameter too short")]
    ErrSsnResetRequestParamTooShort,
    #[error("add outgoing streams request parameter wrong size")]
    ErrAddOutgoingStreamsParamWrongSize,
    #[error("reconfig response parameter too short")]
    ErrReconfigRespParamTooShort,
    #[error("raw is too small for error cause")]
    ErrErrorCauseTooSmall,

    #[error("raw is smaller than the minimum length for a SCTP packet")]
    ErrPacketRawTooSmall,
    #[error("unable to parse SCTP chunk, not enough data for complete header")]
    ErrParseSctpChunkNotEnoughData,
    #[error("checksum mismatch theirs")]
    ErrChecksumMismatch,
    #[error("sctp packet must not have a source port of 0")]
    ErrSctpPacketSourcePortZero,
    #[error("sctp packet must not have a destination port of 0")]
    ErrSctpPacketDestinationPortZero,
    #[error("init chunk must not be bundled with any other chunk")]
    ErrInitChunkBundled,
    #[error("init chunk expects a verification tag of 0 on the packet")]
    ErrInitChunkVerifyTagNotZero,

    #[error("no cookie in InitAck")]
    ErrInitAckNoCookie,
    #[error("state cookie HMAC does not verify")]
    ErrCookieInvalid,
    #[error("state cookie timestamp outside the acceptance window")]
    ErrCookieStale,

    #[error("outbound payload larger than the maximum message size")]
    ErrOutboundPacketTooLarge,
    #[error("sending payload data in non-established state")]
    ErrPayloadDataStateNotExist,
    #[error("a stream reconfiguration request is already outstanding")]
    ErrReconfigRequestPending,
    #[error("shutdown called in non-established state")]
    ErrShutdownNonEstablished,
    #[error("association closed")]
    ErrAssociationClosed,
    #[error("association handshake exceeded its retransmit budget")]
    ErrHandshakeTimeout,
}
