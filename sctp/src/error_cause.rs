use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// ErrorCauseCode identifies the cause carried in ERROR and ABORT chunks.
///
/// https://tools.ietf.org/html/rfc4960#section-3.3.10
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ErrorCauseCode(pub u16);

pub const INVALID_MANDATORY_PARAMETER: ErrorCauseCode = ErrorCauseCode(7);
pub const STALE_COOKIE_ERROR: ErrorCauseCode = ErrorCauseCode(3);
pub const PROTOCOL_VIOLATION: ErrorCauseCode = ErrorCauseCode(13);
pub const USER_INITIATED_ABORT: ErrorCauseCode = ErrorCauseCode(12);

impl fmt::Display for ErrorCauseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let others = format!("Unknown CauseCode: {}", self.0);
        let s = match *self {
            INVALID_MANDATORY_PARAMETER => "Invalid Mandatory Parameter",
            STALE_COOKIE_ERROR => "Stale Cookie Error",
            PROTOCOL_VIOLATION => "Protocol Violation",
            USER_INITIATED_ABORT => "User Initiated Abort",
            _ => others.as_str(),
        };
        write!(f, "{s}")
    }
}

pub(crate) const ERROR_CAUSE_HEADER_LENGTH: usize = 4;

/// ErrorCause is one TLV inside an ERROR or ABORT chunk.
///
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Cause Code           |       Cause Length            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                   Cause-Specific Information                  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ErrorCause {
    pub code: ErrorCauseCode,
    pub raw: Bytes,
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}

impl ErrorCause {
    /// stale_cookie builds a Stale Cookie Error cause carrying the measure
    /// of staleness in microseconds.
    pub(crate) fn stale_cookie(staleness_usec: u32) -> Self {
        ErrorCause {
            code: STALE_COOKIE_ERROR,
            raw: Bytes::copy_from_slice(&staleness_usec.to_be_bytes()),
        }
    }

    pub(crate) fn marshal_to(&self, writer: &mut BytesMut) -> usize {
        writer.put_u16(self.code.0);
        writer.put_u16((ERROR_CAUSE_HEADER_LENGTH + self.raw.len()) as u16);
        writer.extend_from_slice(&self.raw);
        writer.len()
    }

    pub(crate) fn unmarshal(raw: &Bytes) -> Result<Self> {
        if raw.len() < ERROR_CAUSE_HEADER_LENGTH {
            return Err(Error::ErrErrorCauseTooSmall);
        }

        let reader = &mut raw.clone();
        let code = ErrorCauseCode(reader.get_u16());
        let length = reader.get_u16() as usize;

        if length < ERROR_CAUSE_HEADER_LENGTH || length > raw.len() {
            return Err(Error::ErrErrorCauseTooSmall);
        }

        Ok(ErrorCause {
            code,
            raw: raw.slice(ERROR_CAUSE_HEADER_LENGTH..length),
        })
    }

    pub(crate) fn length(&self) -> usize {
        ERROR_CAUSE_HEADER_LENGTH + self.raw.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_cause_round_trip() -> Result<()> {
        let cause = ErrorCause::stale_cookie(120_000_000);
        let mut buf = BytesMut::new();
        cause.marshal_to(&mut buf);

        let parsed = ErrorCause::unmarshal(&buf.freeze())?;
        assert_eq!(parsed.code, STALE_COOKIE_ERROR);
        assert_eq!(parsed, cause);
        Ok(())
    }

    #[test]
    fn test_error_cause_too_small() {
        let raw = Bytes::from_static(&[0x00]);
        assert_eq!(
            ErrorCause::unmarshal(&raw).err(),
            Some(Error::ErrErrorCauseTooSmall)
        );
    }
}
