use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::param_header::*;
use super::param_type::*;
use super::*;

pub(crate) const PARAM_OUTGOING_RESET_REQUEST_MIN_LENGTH: usize = 12;

/// ParamOutgoingResetRequest, RFC 6525 Section 4.1.
///
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     Parameter Type = 13       |      Parameter Length = N     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           Re-configuration Request Sequence Number            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           Re-configuration Response Sequence Number           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                Sender's Last Assigned TSN                     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Stream Number 1 (optional)   |    Stream Number 2 (optional) |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ParamOutgoingResetRequest {
    pub(crate) reconfig_request_sequence_number: u32,
    pub(crate) reconfig_response_sequence_number: u32,
    pub(crate) sender_last_tsn: u32,
    pub(crate) stream_identifiers: Vec<u16>,
}

impl fmt::Display for ParamOutgoingResetRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rsn={}", self.header(), self.reconfig_request_sequence_number)
    }
}

impl Param for ParamOutgoingResetRequest {
    fn header(&self) -> ParamHeader {
        ParamHeader {
            typ: ParamType::OutSsnResetReq,
            value_length: self.value_length() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ParamHeader::unmarshal(raw)?;
        if header.value_length() < PARAM_OUTGOING_RESET_REQUEST_MIN_LENGTH {
            return Err(Error::ErrSsnResetRequestParamTooShort);
        }

        let reader =
            &mut raw.slice(PARAM_HEADER_LENGTH..PARAM_HEADER_LENGTH + header.value_length());

        let reconfig_request_sequence_number = reader.get_u32();
        let reconfig_response_sequence_number = reader.get_u32();
        let sender_last_tsn = reader.get_u32();

        let mut stream_identifiers = vec![];
        while reader.remaining() >= 2 {
            stream_identifiers.push(reader.get_u16());
        }

        Ok(ParamOutgoingResetRequest {
            reconfig_request_sequence_number,
            reconfig_response_sequence_number,
            sender_last_tsn,
            stream_identifiers,
        })
    }

    fn marshal_to(&self, buf: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(buf);
        buf.put_u32(self.reconfig_request_sequence_number);
        buf.put_u32(self.reconfig_response_sequence_number);
        buf.put_u32(self.sender_last_tsn);
        for sid in &self.stream_identifiers {
            buf.put_u16(*sid);
        }
        Ok(buf.len())
    }

    fn value_length(&self) -> usize {
        PARAM_OUTGOING_RESET_REQUEST_MIN_LENGTH + 2 * self.stream_identifiers.len()
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_outgoing_reset_request_round_trip() -> Result<()> {
        let param = ParamOutgoingResetRequest {
            reconfig_request_sequence_number: 1,
            reconfig_response_sequence_number: 2,
            sender_last_tsn: 3,
            stream_identifiers: vec![4, 5],
        };
        let raw = param.marshal()?;
        let parsed = ParamOutgoingResetRequest::unmarshal(&raw)?;
        assert_eq!(parsed, param);
        Ok(())
    }

    #[test]
    fn test_outgoing_reset_request_too_short() {
        let raw = Bytes::from_static(&[0x00, 0x0d, 0x00, 0x08, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(
            ParamOutgoingResetRequest::unmarshal(&raw).err(),
            Some(Error::ErrSsnResetRequestParamTooShort)
        );
    }
}
