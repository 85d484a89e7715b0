use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::param_header::*;
use super::param_type::*;
use super::*;

pub(crate) const PARAM_ADD_OUTGOING_STREAMS_LENGTH: usize = 8;

/// ParamAddOutgoingStreams asks the peer to accept more inbound streams,
/// RFC 6525 Section 4.5.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ParamAddOutgoingStreams {
    pub(crate) reconfig_request_sequence_number: u32,
    pub(crate) number_of_new_streams: u16,
}

impl fmt::Display for ParamAddOutgoingStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rsn={} new={}",
            self.header(),
            self.reconfig_request_sequence_number,
            self.number_of_new_streams,
        )
    }
}

impl Param for ParamAddOutgoingStreams {
    fn header(&self) -> ParamHeader {
        ParamHeader {
            typ: ParamType::AddOutStreamsReq,
            value_length: PARAM_ADD_OUTGOING_STREAMS_LENGTH as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ParamHeader::unmarshal(raw)?;
        if header.value_length() != PARAM_ADD_OUTGOING_STREAMS_LENGTH {
            return Err(Error::ErrAddOutgoingStreamsParamWrongSize);
        }
        let reader =
            &mut raw.slice(PARAM_HEADER_LENGTH..PARAM_HEADER_LENGTH + header.value_length());
        let reconfig_request_sequence_number = reader.get_u32();
        let number_of_new_streams = reader.get_u16();
        // 2 reserved bytes follow
        Ok(ParamAddOutgoingStreams {
            reconfig_request_sequence_number,
            number_of_new_streams,
        })
    }

    fn marshal_to(&self, buf: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(buf);
        buf.put_u32(self.reconfig_request_sequence_number);
        buf.put_u16(self.number_of_new_streams);
        buf.put_u16(0); // reserved
        Ok(buf.len())
    }

    fn value_length(&self) -> usize {
        PARAM_ADD_OUTGOING_STREAMS_LENGTH
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_add_outgoing_streams_round_trip() -> Result<()> {
        let param = ParamAddOutgoingStreams {
            reconfig_request_sequence_number: 11,
            number_of_new_streams: 4,
        };
        let raw = param.marshal()?;
        let parsed = ParamAddOutgoingStreams::unmarshal(&raw)?;
        assert_eq!(parsed, param);
        Ok(())
    }
}
