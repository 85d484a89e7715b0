use std::fmt;

use bytes::{Bytes, BytesMut};

use super::chunk_header::*;
use super::chunk_type::*;
use super::*;
use crate::param::param_header::PARAM_HEADER_LENGTH;
use crate::param::{build_param, Param};

/// chunkReconfig represents an SCTP Chunk used to reconfigure streams,
/// carrying up to two reconfiguration parameters.
///
/// https://tools.ietf.org/html/rfc6525#section-3.1
#[derive(Debug, Default)]
pub(crate) struct ChunkReconfig {
    pub(crate) param_a: Option<Box<dyn Param + Send + Sync>>,
    pub(crate) param_b: Option<Box<dyn Param + Send + Sync>>,
}

impl fmt::Display for ChunkReconfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut res = "Param A:\n".to_string();
        if let Some(param_a) = &self.param_a {
            res += format!("{param_a}").as_str();
        }
        if let Some(param_b) = &self.param_b {
            res += format!("Param B:\n{param_b}").as_str();
        }
        write!(f, "{res}")
    }
}

impl Chunk for ChunkReconfig {
    fn header(&self) -> ChunkHeader {
        ChunkHeader {
            typ: CT_RECONFIG,
            flags: 0,
            value_length: self.value_length() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ChunkHeader::unmarshal(raw)?;
        if header.typ != CT_RECONFIG {
            return Err(Error::ErrChunkTypeMismatch);
        }

        let end = CHUNK_HEADER_SIZE + header.value_length();
        let param_a = build_param(&raw.slice(CHUNK_HEADER_SIZE..end))?;

        let param_a_total = PARAM_HEADER_LENGTH + param_a.value_length();
        let offset = CHUNK_HEADER_SIZE + param_a_total + get_padding_size(param_a_total);
        let param_b = if offset + PARAM_HEADER_LENGTH <= end {
            Some(build_param(&raw.slice(offset..end))?)
        } else {
            None
        };

        Ok(ChunkReconfig {
            param_a: Some(param_a),
            param_b,
        })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(writer)?;
        let Some(param_a) = &self.param_a else {
            return Ok(writer.len());
        };
        param_a.marshal_to(writer)?;
        if let Some(param_b) = &self.param_b {
            let param_a_total = PARAM_HEADER_LENGTH + param_a.value_length();
            writer.extend_from_slice(&vec![0u8; get_padding_size(param_a_total)]);
            param_b.marshal_to(writer)?;
        }
        Ok(writer.len())
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn value_length(&self) -> usize {
        let mut length = 0;
        if let Some(param_a) = &self.param_a {
            length += PARAM_HEADER_LENGTH + param_a.value_length();
        }
        if let Some(param_b) = &self.param_b {
            length += get_padding_size(length) + PARAM_HEADER_LENGTH + param_b.value_length();
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
    use crate::param::param_outgoing_reset_request::ParamOutgoingResetRequest;
    use crate::param::param_reconfig_response::{ParamReconfigResponse, ReconfigResult};

    #[test]
    fn test_reconfig_round_trip_single_param() -> Result<()> {
        let chunk = ChunkReconfig {
            param_a: Some(Box::new(ParamOutgoingResetRequest {
                reconfig_request_sequence_number: 1,
                reconfig_response_sequence_number: 2,
                sender_last_tsn: 3,
                stream_identifiers: vec![4],
            })),
            param_b: None,
        };
        let raw = chunk.marshal()?;
        let parsed = ChunkReconfig::unmarshal(&raw)?;

        let param_a = parsed.param_a.unwrap();
        let req = param_a
            .as_any()
            .downcast_ref::<ParamOutgoingResetRequest>()
            .expect("param A should be an outgoing reset request");
        assert_eq!(req.reconfig_request_sequence_number, 1);
        assert_eq!(req.stream_identifiers, vec![4]);
        assert!(parsed.param_b.is_none());
        Ok(())
    }

    #[test]
    fn test_reconfig_round_trip_two_params() -> Result<()> {
        let chunk = ChunkReconfig {
            param_a: Some(Box::new(ParamOutgoingResetRequest {
                reconfig_request_sequence_number: 1,
                reconfig_response_sequence_number: 2,
                sender_last_tsn: 3,
                stream_identifiers: vec![4, 5],
            })),
            param_b: Some(Box::new(ParamReconfigResponse {
                reconfig_response_sequence_number: 9,
                result: ReconfigResult::SuccessPerformed,
            })),
        };
        let raw = chunk.marshal()?;
        let parsed = ChunkReconfig::unmarshal(&raw)?;
        assert!(parsed.param_a.is_some());
        let param_b = parsed.param_b.unwrap();
        let resp = param_b
            .as_any()
            .downcast_ref::<ParamReconfigResponse>()
            .expect("param B should be a reconfig response");
        assert_eq!(resp.reconfig_response_sequence_number, 9);
        Ok(())
    }
}
