use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::param_header::*;
use super::param_type::*;
use super::*;

pub(crate) const PARAM_RECONFIG_RESPONSE_LENGTH: usize = 8;

/// ReconfigResult is the Result field of a Re-configuration Response,
/// RFC 6525 Section 4.4.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ReconfigResult {
    #[default]
    SuccessNothingToDo = 0,
    SuccessPerformed = 1,
    Denied = 2,
    ErrorWrongSsn = 3,
    ErrorRequestAlreadyInProgress = 4,
    ErrorBadSequenceNumber = 5,
    InProgress = 6,
}

impl From<u32> for ReconfigResult {
    fn from(v: u32) -> ReconfigResult {
        match v {
            1 => ReconfigResult::SuccessPerformed,
            2 => ReconfigResult::Denied,
            3 => ReconfigResult::ErrorWrongSsn,
            4 => ReconfigResult::ErrorRequestAlreadyInProgress,
            5 => ReconfigResult::ErrorBadSequenceNumber,
            6 => ReconfigResult::InProgress,
            _ => ReconfigResult::SuccessNothingToDo,
        }
    }
}

impl fmt::Display for ReconfigResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// ParamReconfigResponse answers a reconfiguration request; its sequence
/// number echoes the peer's request sequence number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ParamReconfigResponse {
    pub(crate) reconfig_response_sequence_number: u32,
    pub(crate) result: ReconfigResult,
}

impl fmt::Display for ParamReconfigResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rsn={} result={}",
            self.header(),
            self.reconfig_response_sequence_number,
            self.result,
        )
    }
}

impl Param for ParamReconfigResponse {
    fn header(&self) -> ParamHeader {
        ParamHeader {
            typ: ParamType::ReconfigResp,
            value_length: PARAM_RECONFIG_RESPONSE_LENGTH as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ParamHeader::unmarshal(raw)?;
        if header.value_length() < PARAM_RECONFIG_RESPONSE_LENGTH {
            return Err(Error::ErrReconfigRespParamTooShort);
        }
        let reader =
            &mut raw.slice(PARAM_HEADER_LENGTH..PARAM_HEADER_LENGTH + header.value_length());
        Ok(ParamReconfigResponse {
            reconfig_response_sequence_number: reader.get_u32(),
            result: ReconfigResult::from(reader.get_u32()),
        })
    }

    fn marshal_to(&self, buf: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(buf);
        buf.put_u32(self.reconfig_response_sequence_number);
        buf.put_u32(self.result as u32);
        Ok(buf.len())
    }

    fn value_length(&self) -> usize {
        PARAM_RECONFIG_RESPONSE_LENGTH
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}
