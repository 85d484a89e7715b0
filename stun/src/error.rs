use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("attribute not found")]
    ErrAttributeNotFound,
    #[error("buffer too small to be a STUN message")]
    ErrUnexpectedHeaderEof,
    #[error("{0} is not a STUN message")]
    ErrInvalidMagicCookie(u32),
    #[error("attribute size is invalid")]
    ErrAttributeSizeInvalid,
    #[error("attribute size overflows message length")]
    ErrAttributeSizeOverflow,
    #[error("hmac integrity check failed")]
    ErrIntegrityMismatch,
    #[error("fingerprint check failed")]
    ErrFingerprintMismatch,
    #[error("fingerprint attribute is not the last attribute")]
    ErrFingerprintBeforeIntegrity,
    #[error("bad UNKNOWN-ATTRIBUTES size")]
    ErrBadUnknownAttrsSize,
    #[error("invalid length of IP value")]
    ErrBadIpLength,
    #[error("attribute value exceeds the maximum encodable length")]
    ErrAttrValueTooLarge,
    #[error("invalid error code value")]
    ErrInvalidErrorCode,
    #[error("unexpected EOF: not enough bytes to read value")]
    ErrUnexpectedEof,
    #[error("invalid utf-8 in text attribute")]
    ErrInvalidString,
}
