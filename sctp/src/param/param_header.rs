use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::param_type::*;
use super::*;

/// paramHeader is the opaque TLV prefix shared by all parameters:
/// 2-byte type, 2-byte length including the header but not the padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParamHeader {
    pub(crate) typ: ParamType,
    pub(crate) value_length: u16,
}

pub(crate) const PARAM_HEADER_LENGTH: usize = 4;

impl fmt::Display for ParamHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.typ)
    }
}

impl ParamHeader {
    pub(crate) fn marshal_to(&self, writer: &mut BytesMut) {
        writer.put_u16(self.typ.into());
        writer.put_u16(self.value_length + PARAM_HEADER_LENGTH as u16);
    }

    pub(crate) fn unmarshal(raw: &Bytes) -> Result<Self> {
        if raw.len() < PARAM_HEADER_LENGTH {
            return Err(Error::ErrParamHeaderTooShort);
        }

        let reader = &mut raw.clone();
        let typ = ParamType::from(reader.get_u16());
        let length = reader.get_u16() as usize;

        if length < PARAM_HEADER_LENGTH {
            return Err(Error::ErrParamHeaderSelfReportedLengthShorter);
        }
        if length > raw.len() {
            return Err(Error::ErrParamHeaderSelfReportedLengthLonger);
        }

        Ok(ParamHeader {
            typ,
            value_length: (length - PARAM_HEADER_LENGTH) as u16,
        })
    }

    pub(crate) fn value_length(&self) -> usize {
        self.value_length as usize
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_param_header_round_trip() -> Result<()> {
        let header = ParamHeader {
            typ: ParamType::StateCookie,
            value_length: 24,
        };
        let mut buf = BytesMut::new();
        header.marshal_to(&mut buf);
        buf.extend_from_slice(&[0u8; 24]);

        let parsed = ParamHeader::unmarshal(&buf.freeze())?;
        assert_eq!(parsed, header);
        Ok(())
    }

    #[test]
    fn test_param_header_bad_reported_length() {
        let raw = Bytes::from_static(&[0x00, 0x07, 0x00, 0x10]);
        assert_eq!(
            ParamHeader::unmarshal(&raw).err(),
            Some(Error::ErrParamHeaderSelfReportedLengthLonger)
        );
    }
}
