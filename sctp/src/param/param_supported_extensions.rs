use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::param_header::*;
use super::param_type::*;
use super::*;
use crate::chunk::chunk_type::ChunkType;

/// ParamSupportedExtensions lists the chunk types the sender understands
/// beyond RFC 4960; this profile advertises FORWARD-TSN and RE-CONFIG.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ParamSupportedExtensions {
    pub(crate) chunk_types: Vec<ChunkType>,
}

impl fmt::Display for ParamSupportedExtensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list: Vec<String> = self.chunk_types.iter().map(|ct| ct.to_string()).collect();
        write!(f, "{} {}", self.header(), list.join(","))
    }
}

impl Param for ParamSupportedExtensions {
    fn header(&self) -> ParamHeader {
        ParamHeader {
            typ: ParamType::SupportedExt,
            value_length: self.chunk_types.len() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ParamHeader::unmarshal(raw)?;
        let chunk_types = raw
            .slice(PARAM_HEADER_LENGTH..PARAM_HEADER_LENGTH + header.value_length())
            .iter()
            .map(|b| ChunkType(*b))
            .collect();
        Ok(ParamSupportedExtensions { chunk_types })
    }

    fn marshal_to(&self, buf: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(buf);
        for ct in &self.chunk_types {
            buf.put_u8(ct.0);
        }
        Ok(buf.len())
    }

    fn value_length(&self) -> usize {
        self.chunk_types.len()
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chunk::chunk_type::{CT_FORWARD_TSN, CT_RECONFIG};

    #[test]
    fn test_supported_extensions_round_trip() -> Result<()> {
        let param = ParamSupportedExtensions {
            chunk_types: vec![CT_FORWARD_TSN, CT_RECONFIG],
        };
        let raw = param.marshal()?;
        let parsed = ParamSupportedExtensions::unmarshal(&raw)?;
        assert_eq!(parsed, param);
        Ok(())
    }
}
