use std::fmt;

use bytes::{Bytes, BytesMut};

use super::chunk_header::*;
use super::chunk_type::*;
use super::*;

/// chunkHeartbeat represents an SCTP Chunk of type HEARTBEAT (and, with
/// is_ack, HEARTBEAT-ACK). The Heartbeat Info parameter is kept verbatim;
/// the ACK echoes it unchanged.
#[derive(Debug, Default, Clone)]
pub(crate) struct ChunkHeartbeat {
    pub(crate) is_ack: bool,
    pub(crate) heartbeat_info: Bytes,
}

impl fmt::Display for ChunkHeartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.header())
    }
}

impl Chunk for ChunkHeartbeat {
    fn header(&self) -> ChunkHeader {
        ChunkHeader {
            typ: if self.is_ack { CT_HEARTBEAT_ACK } else { CT_HEARTBEAT },
            flags: 0,
            value_length: self.value_length() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ChunkHeader::unmarshal(raw)?;
        if header.typ != CT_HEARTBEAT && header.typ != CT_HEARTBEAT_ACK {
            return Err(Error::ErrChunkTypeMismatch);
        }
        let heartbeat_info =
            raw.slice(CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + header.value_length());
        Ok(ChunkHeartbeat {
            is_ack: header.typ == CT_HEARTBEAT_ACK,
            heartbeat_info,
        })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(writer)?;
        writer.extend_from_slice(&self.heartbeat_info);
        Ok(writer.len())
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn value_length(&self) -> usize {
        self.heartbeat_info.len()
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_heartbeat_ack_echoes_info() -> Result<()> {
        let heartbeat = ChunkHeartbeat {
            is_ack: false,
            heartbeat_info: Bytes::from_static(&[0x00, 0x01, 0x00, 0x08, 1, 2, 3, 4]),
        };
        let raw = heartbeat.marshal()?;
        let parsed = ChunkHeartbeat::unmarshal(&raw)?;
        assert!(!parsed.is_ack);

        let ack = ChunkHeartbeat {
            is_ack: true,
            heartbeat_info: parsed.heartbeat_info.clone(),
        };
        let ack_raw = ack.marshal()?;
        let ack_parsed = ChunkHeartbeat::unmarshal(&ack_raw)?;
        assert!(ack_parsed.is_ack);
        assert_eq!(ack_parsed.heartbeat_info, heartbeat.heartbeat_info);
        Ok(())
    }
}
