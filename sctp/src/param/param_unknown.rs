use std::fmt;

use bytes::{Bytes, BytesMut};

use super::param_header::*;
use super::param_type::*;
use super::*;

/// ParamUnknown preserves a parameter this implementation does not
/// interpret; the value is kept verbatim so re-marshalling is faithful.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ParamUnknown {
    typ: u16,
    value: Bytes,
}

impl fmt::Display for ParamUnknown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParamUnknown({}, {} bytes)", self.typ, self.value.len())
    }
}

impl Param for ParamUnknown {
    fn header(&self) -> ParamHeader {
        ParamHeader {
            typ: ParamType::Unknown { param_type: self.typ },
            value_length: self.value.len() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ParamHeader::unmarshal(raw)?;
        let value =
            raw.slice(PARAM_HEADER_LENGTH..PARAM_HEADER_LENGTH + header.value_length());
        Ok(ParamUnknown {
            typ: header.typ.into(),
            value,
        })
    }

    fn marshal_to(&self, buf: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(buf);
        buf.extend_from_slice(&self.value);
        Ok(buf.len())
    }

    fn value_length(&self) -> usize {
        self.value.len()
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}
