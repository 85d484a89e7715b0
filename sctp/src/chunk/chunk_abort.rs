use std::fmt;

use bytes::{Bytes, BytesMut};

use super::chunk_header::*;
use super::chunk_type::*;
use super::*;
use crate::error_cause::*;

/// chunkAbort represents an SCTP Chunk of type ABORT.
///
/// The ABORT chunk is sent to the peer of an association to close the
/// association. The ABORT chunk may contain Cause Parameters to inform the
/// receiver about the reason of the abort.
#[derive(Debug, Default, Clone)]
pub(crate) struct ChunkAbort {
    pub(crate) error_causes: Vec<ErrorCause>,
}

impl fmt::Display for ChunkAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut res = self.header().to_string();
        for cause in &self.error_causes {
            res += format!("\n - {cause}").as_str();
        }
        write!(f, "{res}")
    }
}

impl Chunk for ChunkAbort {
    fn header(&self) -> ChunkHeader {
        ChunkHeader {
            typ: CT_ABORT,
            flags: 0,
            value_length: self.value_length() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ChunkHeader::unmarshal(raw)?;
        if header.typ != CT_ABORT {
            return Err(Error::ErrChunkTypeMismatch);
        }

        let mut error_causes = vec![];
        let mut offset = CHUNK_HEADER_SIZE;
        let end = CHUNK_HEADER_SIZE + header.value_length();
        while offset + ERROR_CAUSE_HEADER_LENGTH <= end {
            let cause = ErrorCause::unmarshal(&raw.slice(offset..end))?;
            offset += cause.length() + get_padding_size(cause.length());
            error_causes.push(cause);
        }

        Ok(ChunkAbort { error_causes })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(writer)?;
        for (idx, cause) in self.error_causes.iter().enumerate() {
            cause.marshal_to(writer);
            if idx != self.error_causes.len() - 1 {
                let padding = get_padding_size(cause.length());
                writer.extend_from_slice(&vec![0u8; padding]);
            }
        }
        Ok(writer.len())
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn value_length(&self) -> usize {
        let mut length = 0;
        for (idx, cause) in self.error_causes.iter().enumerate() {
            length += cause.length();
            if idx != self.error_causes.len() - 1 {
                length += get_padding_size(cause.length());
            }
        }
        length
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_abort_round_trip() -> Result<()> {
        let chunk = ChunkAbort {
            error_causes: vec![ErrorCause {
                code: USER_INITIATED_ABORT,
                raw: Bytes::new(),
            }],
        };
        let raw = chunk.marshal()?;
        let parsed = ChunkAbort::unmarshal(&raw)?;
        assert_eq!(parsed.error_causes.len(), 1);
        assert_eq!(parsed.error_causes[0].code, USER_INITIATED_ABORT);
        Ok(())
    }

    #[test]
    fn test_abort_empty() -> Result<()> {
        let chunk = ChunkAbort::default();
        let raw = chunk.marshal()?;
        let parsed = ChunkAbort::unmarshal(&raw)?;
        assert!(parsed.error_causes.is_empty());
        Ok(())
    }
}
