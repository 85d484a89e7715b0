use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::chunk_type::*;
use super::*;

/// chunkHeader represents a SCTP Chunk header, defined in
/// <https://tools.ietf.org/html/rfc4960#section-3.2>
///
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   Chunk Type  | Chunk  Flags  |        Chunk Length           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          Chunk Value                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
#[derive(Debug, Clone)]
pub(crate) struct ChunkHeader {
    pub(crate) typ: ChunkType,
    pub(crate) flags: u8,
    pub(crate) value_length: u16,
}

pub(crate) const CHUNK_HEADER_SIZE: usize = 4;

impl fmt::Display for ChunkHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.typ)
    }
}

impl Chunk for ChunkHeader {
    fn header(&self) -> ChunkHeader {
        self.clone()
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        if raw.len() < CHUNK_HEADER_SIZE {
            return Err(Error::ErrChunkHeaderTooSmall);
        }

        let reader = &mut raw.clone();

        let typ = ChunkType(reader.get_u8());
        let flags = reader.get_u8();
        let length = reader.get_u16();

        if length < CHUNK_HEADER_SIZE as u16 {
            return Err(Error::ErrChunkHeaderInvalidLength);
        }
        if (length as usize) > raw.len() {
            return Err(Error::ErrChunkHeaderInvalidLength);
        }

        // The Chunk Length field does not count any chunk PADDING, but the
        // bytes after the value within this chunk's extent must be zero.
        let value_length = length as usize - CHUNK_HEADER_SIZE;
        let padding = get_padding_size(length as usize);
        for i in 0..padding {
            let offset = length as usize + i;
            if offset < raw.len() && raw[offset] != 0 {
                return Err(Error::ErrChunkHeaderPaddingNonZero);
            }
        }

        Ok(ChunkHeader {
            typ,
            flags,
            value_length: value_length as u16,
        })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        writer.put_u8(self.typ.0);
        writer.put_u8(self.flags);
        writer.put_u16(self.value_length + CHUNK_HEADER_SIZE as u16);
        Ok(writer.len())
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn value_length(&self) -> usize {
        self.value_length as usize
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_chunk_header_round_trip() -> Result<()> {
        let header = ChunkHeader {
            typ: CT_COOKIE_ACK,
            flags: 0,
            value_length: 8,
        };
        let mut buf = BytesMut::new();
        header.marshal_to(&mut buf)?;
        buf.extend_from_slice(&[0u8; 8]);

        let parsed = ChunkHeader::unmarshal(&buf.freeze())?;
        assert_eq!(parsed.typ, CT_COOKIE_ACK);
        assert_eq!(parsed.value_length(), 8);
        Ok(())
    }

    #[test]
    fn test_chunk_header_too_small() {
        let raw = Bytes::from_static(&[0x01]);
        assert_eq!(
            ChunkHeader::unmarshal(&raw).err(),
            Some(Error::ErrChunkHeaderTooSmall)
        );
    }

    #[test]
    fn test_chunk_header_bad_length() {
        let raw = Bytes::from_static(&[0x01, 0x00, 0x00, 0x02]);
        assert_eq!(
            ChunkHeader::unmarshal(&raw).err(),
            Some(Error::ErrChunkHeaderInvalidLength)
        );
    }
}
