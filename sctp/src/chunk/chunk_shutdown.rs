use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::chunk_header::*;
use super::chunk_type::*;
use super::*;

pub(crate) const CHUNK_SHUTDOWN_LENGTH: usize = 4;

/// chunkShutdown represents an SCTP Chunk of type SHUTDOWN.
///
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   Type = 7    |  Chunk Flags  |      Length = 8               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                  Cumulative TSN Ack                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
#[derive(Debug, Default, Clone)]
pub(crate) struct ChunkShutdown {
    pub(crate) cumulative_tsn_ack: u32,
}

impl fmt::Display for ChunkShutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.header())
    }
}

impl Chunk for ChunkShutdown {
    fn header(&self) -> ChunkHeader {
        ChunkHeader {
            typ: CT_SHUTDOWN,
            flags: 0,
            value_length: CHUNK_SHUTDOWN_LENGTH as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ChunkHeader::unmarshal(raw)?;
        if header.typ != CT_SHUTDOWN {
            return Err(Error::ErrChunkTypeMismatch);
        }
        if header.value_length() != CHUNK_SHUTDOWN_LENGTH {
            return Err(Error::ErrChunkValueNotLongEnough);
        }
        let reader = &mut raw.slice(CHUNK_HEADER_SIZE..);
        Ok(ChunkShutdown {
            cumulative_tsn_ack: reader.get_u32(),
        })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(writer)?;
        writer.put_u32(self.cumulative_tsn_ack);
        Ok(writer.len())
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn value_length(&self) -> usize {
        CHUNK_SHUTDOWN_LENGTH
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_shutdown_round_trip() -> Result<()> {
        let chunk = ChunkShutdown {
            cumulative_tsn_ack: 0x01020304,
        };
        let raw = chunk.marshal()?;
        let parsed = ChunkShutdown::unmarshal(&raw)?;
        assert_eq!(parsed.cumulative_tsn_ack, 0x01020304);
        Ok(())
    }
}
