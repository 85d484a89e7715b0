use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::chunk_header::*;
use super::chunk_type::*;
use super::*;

pub(crate) const SELECTIVE_ACK_HEADER_SIZE: usize = 12;

/// chunkSelectiveAck represents an SCTP Chunk of type SACK.
///
/// This implementation never emits SACKs and ignores any it receives; the
/// codec exists so inbound SACKs from conforming peers parse cleanly and so
/// the round-trip law holds for captured traffic.
#[derive(Debug, Default, Clone)]
pub(crate) struct ChunkSelectiveAck {
    pub(crate) cumulative_tsn_ack: u32,
    pub(crate) advertised_receiver_window_credit: u32,
    pub(crate) gap_ack_blocks: Vec<GapAckBlock>,
    pub(crate) duplicate_tsn: Vec<u32>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct GapAckBlock {
    pub(crate) start: u16,
    pub(crate) end: u16,
}

impl fmt::Display for ChunkSelectiveAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cum_tsn_ack={}", self.header(), self.cumulative_tsn_ack)
    }
}

impl Chunk for ChunkSelectiveAck {
    fn header(&self) -> ChunkHeader {
        ChunkHeader {
            typ: CT_SACK,
            flags: 0,
            value_length: self.value_length() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ChunkHeader::unmarshal(raw)?;
        if header.typ != CT_SACK {
            return Err(Error::ErrChunkTypeMismatch);
        }
        if header.value_length() < SELECTIVE_ACK_HEADER_SIZE {
            return Err(Error::ErrChunkValueNotLongEnough);
        }

        let reader =
            &mut raw.slice(CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + header.value_length());
        let cumulative_tsn_ack = reader.get_u32();
        let advertised_receiver_window_credit = reader.get_u32();
        let num_gap_blocks = reader.get_u16() as usize;
        let num_dup_tsn = reader.get_u16() as usize;

        if reader.remaining() < num_gap_blocks * 4 + num_dup_tsn * 4 {
            return Err(Error::ErrChunkValueNotLongEnough);
        }

        let mut gap_ack_blocks = Vec::with_capacity(num_gap_blocks);
        for _ in 0..num_gap_blocks {
            gap_ack_blocks.push(GapAckBlock {
                start: reader.get_u16(),
                end: reader.get_u16(),
            });
        }
        let mut duplicate_tsn = Vec::with_capacity(num_dup_tsn);
        for _ in 0..num_dup_tsn {
            duplicate_tsn.push(reader.get_u32());
        }

        Ok(ChunkSelectiveAck {
            cumulative_tsn_ack,
            advertised_receiver_window_credit,
            gap_ack_blocks,
            duplicate_tsn,
        })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(writer)?;
        writer.put_u32(self.cumulative_tsn_ack);
        writer.put_u32(self.advertised_receiver_window_credit);
        writer.put_u16(self.gap_ack_blocks.len() as u16);
        writer.put_u16(self.duplicate_tsn.len() as u16);
        for block in &self.gap_ack_blocks {
            writer.put_u16(block.start);
            writer.put_u16(block.end);
        }
        for tsn in &self.duplicate_tsn {
            writer.put_u32(*tsn);
        }
        Ok(writer.len())
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn value_length(&self) -> usize {
        SELECTIVE_ACK_HEADER_SIZE + self.gap_ack_blocks.len() * 4 + self.duplicate_tsn.len() * 4
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_selective_ack_round_trip() -> Result<()> {
        let chunk = ChunkSelectiveAck {
            cumulative_tsn_ack: 1000,
            advertised_receiver_window_credit: 128 * 1024,
            gap_ack_blocks: vec![GapAckBlock { start: 2, end: 3 }],
            duplicate_tsn: vec![999],
        };
        let raw = chunk.marshal()?;
        let parsed = ChunkSelectiveAck::unmarshal(&raw)?;
        assert_eq!(parsed.cumulative_tsn_ack, 1000);
        assert_eq!(parsed.gap_ack_blocks, vec![GapAckBlock { start: 2, end: 3 }]);
        assert_eq!(parsed.duplicate_tsn, vec![999]);
        assert_eq!(parsed.marshal()?, raw);
        Ok(())
    }
}
