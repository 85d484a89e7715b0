use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::chunk_header::*;
use super::chunk_type::*;
use super::*;

pub(crate) const NEW_CUMULATIVE_TSN_LENGTH: usize = 4;
pub(crate) const FORWARD_TSN_STREAM_LENGTH: usize = 4;

/// chunkForwardTsn represents an SCTP Chunk of type FORWARD TSN.
///
/// https://tools.ietf.org/html/rfc3758#section-3.2
#[derive(Debug, Default, Clone)]
pub(crate) struct ChunkForwardTsn {
    /// This indicates the new cumulative TSN to the data receiver. Upon the
    /// reception of this value, the data receiver MUST consider any missing
    /// TSNs earlier than or equal to this value as received, and stop
    /// reporting them as gaps in any subsequent SACKs.
    pub(crate) new_cumulative_tsn: u32,
    pub(crate) streams: Vec<ChunkForwardTsnStream>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct ChunkForwardTsnStream {
    pub(crate) identifier: u16,
    pub(crate) sequence: u16,
}

impl fmt::Display for ChunkForwardTsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} new_cumulative_tsn={}", self.header(), self.new_cumulative_tsn)
    }
}

impl Chunk for ChunkForwardTsn {
    fn header(&self) -> ChunkHeader {
        ChunkHeader {
            typ: CT_FORWARD_TSN,
            flags: 0,
            value_length: self.value_length() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ChunkHeader::unmarshal(raw)?;
        if header.typ != CT_FORWARD_TSN {
            return Err(Error::ErrChunkTypeMismatch);
        }
        if header.value_length() < NEW_CUMULATIVE_TSN_LENGTH {
            return Err(Error::ErrChunkValueNotLongEnough);
        }

        let reader =
            &mut raw.slice(CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + header.value_length());
        let new_cumulative_tsn = reader.get_u32();

        let mut streams = vec![];
        while reader.remaining() >= FORWARD_TSN_STREAM_LENGTH {
            streams.push(ChunkForwardTsnStream {
                identifier: reader.get_u16(),
                sequence: reader.get_u16(),
            });
        }

        Ok(ChunkForwardTsn {
            new_cumulative_tsn,
            streams,
        })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(writer)?;
        writer.put_u32(self.new_cumulative_tsn);
        for stream in &self.streams {
            writer.put_u16(stream.identifier);
            writer.put_u16(stream.sequence);
        }
        Ok(writer.len())
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn value_length(&self) -> usize {
        NEW_CUMULATIVE_TSN_LENGTH + self.streams.len() * FORWARD_TSN_STREAM_LENGTH
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_forward_tsn_round_trip() -> Result<()> {
        let chunk = ChunkForwardTsn {
            new_cumulative_tsn: 1234,
            streams: vec![ChunkForwardTsnStream {
                identifier: 1,
                sequence: 2,
            }],
        };
        let raw = chunk.marshal()?;
        let parsed = ChunkForwardTsn::unmarshal(&raw)?;
        assert_eq!(parsed.new_cumulative_tsn, 1234);
        assert_eq!(parsed.streams.len(), 1);
        Ok(())
    }
}
