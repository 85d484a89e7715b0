use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::chunk_header::*;
use super::chunk_type::*;
use super::*;
use crate::param::param_state_cookie::ParamStateCookie;
use crate::param::{build_param, Param};

pub(crate) const INIT_CHUNK_MIN_LENGTH: usize = 16;
pub(crate) const INIT_OPTIONAL_VAR_HEADER_LENGTH: usize = 4;

/// chunkInit represents an SCTP Chunk of type INIT (or INIT ACK when is_ack
/// is set; the two share their wire format).
///
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   Type = 1    |  Chunk Flags  |      Chunk Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         Initiate Tag                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           Advertised Receiver Window Credit (a_rwnd)          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Number of Outbound Streams   |  Number of Inbound Streams    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          Initial TSN                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |              Optional/Variable-Length Parameters              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
#[derive(Debug, Default)]
pub(crate) struct ChunkInit {
    pub(crate) is_ack: bool,
    pub(crate) initiate_tag: u32,
    pub(crate) advertised_receiver_window_credit: u32,
    pub(crate) num_outbound_streams: u16,
    pub(crate) num_inbound_streams: u16,
    pub(crate) initial_tsn: u32,
    pub(crate) params: Vec<Box<dyn Param + Send + Sync>>,
}

impl fmt::Display for ChunkInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} initiate_tag={} initial_tsn={}",
            self.header(),
            self.initiate_tag,
            self.initial_tsn,
        )
    }
}

impl Chunk for ChunkInit {
    fn header(&self) -> ChunkHeader {
        ChunkHeader {
            typ: if self.is_ack { CT_INIT_ACK } else { CT_INIT },
            flags: 0,
            value_length: self.value_length() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ChunkHeader::unmarshal(raw)?;

        if header.typ != CT_INIT && header.typ != CT_INIT_ACK {
            return Err(Error::ErrChunkTypeMismatch);
        }
        // The Chunk Flags field in INIT is reserved, and all bits in it
        // should be set to 0 by the sender and ignored by the receiver.
        if header.flags != 0 {
            return Err(Error::ErrChunkTypeInitFlagZero);
        }
        if header.value_length() < INIT_CHUNK_MIN_LENGTH {
            return Err(Error::ErrChunkValueNotLongEnough);
        }

        let reader =
            &mut raw.slice(CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + header.value_length());

        let initiate_tag = reader.get_u32();
        let advertised_receiver_window_credit = reader.get_u32();
        let num_outbound_streams = reader.get_u16();
        let num_inbound_streams = reader.get_u16();
        let initial_tsn = reader.get_u32();

        let mut params = vec![];
        let mut offset = CHUNK_HEADER_SIZE + INIT_CHUNK_MIN_LENGTH;
        let end = CHUNK_HEADER_SIZE + header.value_length();
        while offset + INIT_OPTIONAL_VAR_HEADER_LENGTH <= end {
            let param = build_param(&raw.slice(offset..end))?;
            let param_total = INIT_OPTIONAL_VAR_HEADER_LENGTH + param.value_length();
            offset += param_total + get_padding_size(param_total);
            params.push(param);
        }

        Ok(ChunkInit {
            is_ack: header.typ == CT_INIT_ACK,
            initiate_tag,
            advertised_receiver_window_credit,
            num_outbound_streams,
            num_inbound_streams,
            initial_tsn,
            params,
        })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(writer)?;

        writer.put_u32(self.initiate_tag);
        writer.put_u32(self.advertised_receiver_window_credit);
        writer.put_u16(self.num_outbound_streams);
        writer.put_u16(self.num_inbound_streams);
        writer.put_u32(self.initial_tsn);

        for (idx, param) in self.params.iter().enumerate() {
            param.marshal_to(writer)?;
            // The last parameter is not padded on the wire; its padding, if
            // any, is covered by the chunk-level padding.
            if idx != self.params.len() - 1 {
                let param_total = INIT_OPTIONAL_VAR_HEADER_LENGTH + param.value_length();
                let padding = get_padding_size(param_total);
                writer.extend_from_slice(&vec![0u8; padding]);
            }
        }

        Ok(writer.len())
    }

    fn check(&self) -> Result<()> {
        // The receiver of the INIT (the responding end) records the value of
        // the Initiate Tag parameter. This value MUST be placed into the
        // Verification Tag field of every SCTP packet that the receiver of
        // the INIT transmits within this association. The value 0 is
        // reserved.
        if self.initiate_tag == 0 {
            return Err(Error::ErrChunkTypeInitInitiateTagZero);
        }
        if self.num_inbound_streams == 0 {
            return Err(Error::ErrInitInboundStreamRequestZero);
        }
        if self.num_outbound_streams == 0 {
            return Err(Error::ErrInitOutboundStreamRequestZero);
        }
        if self.advertised_receiver_window_credit < 1500 {
            return Err(Error::ErrInitAdvertisedReceiver1500);
        }
        Ok(())
    }

    fn value_length(&self) -> usize {
        let mut length = INIT_CHUNK_MIN_LENGTH;
        for (idx, param) in self.params.iter().enumerate() {
            let param_total = INIT_OPTIONAL_VAR_HEADER_LENGTH + param.value_length();
            length += param_total;
            if idx != self.params.len() - 1 {
                length += get_padding_size(param_total);
            }
        }
        length
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

impl ChunkInit {
    /// state_cookie returns the state cookie parameter, if present.
    pub(crate) fn state_cookie(&self) -> Option<Bytes> {
        for param in &self.params {
            if let Some(cookie) = param.as_any().downcast_ref::<ParamStateCookie>() {
                return Some(cookie.cookie.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::param::param_forward_tsn_supported::ParamForwardTsnSupported;
    use crate::param::param_supported_extensions::ParamSupportedExtensions;

    #[test]
    fn test_init_round_trip() -> Result<()> {
        let init = ChunkInit {
            is_ack: false,
            initiate_tag: 0xdeadbeef,
            advertised_receiver_window_credit: 1024 * 1024,
            num_outbound_streams: 10,
            num_inbound_streams: 1024,
            initial_tsn: 12345,
            params: vec![
                Box::new(ParamForwardTsnSupported),
                Box::new(ParamSupportedExtensions {
                    chunk_types: vec![CT_FORWARD_TSN, CT_RECONFIG],
                }),
            ],
        };

        let raw = init.marshal()?;
        let parsed = ChunkInit::unmarshal(&raw)?;
        assert!(!parsed.is_ack);
        assert_eq!(parsed.initiate_tag, 0xdeadbeef);
        assert_eq!(parsed.initial_tsn, 12345);
        assert_eq!(parsed.params.len(), 2);
        parsed.check()?;
        Ok(())
    }

    #[test]
    fn test_init_ack_with_cookie() -> Result<()> {
        let init = ChunkInit {
            is_ack: true,
            initiate_tag: 1,
            advertised_receiver_window_credit: 1500,
            num_outbound_streams: 1,
            num_inbound_streams: 1,
            initial_tsn: 1,
            params: vec![Box::new(ParamStateCookie {
                cookie: Bytes::from_static(&[0x42; 24]),
            })],
        };

        let raw = init.marshal()?;
        let parsed = ChunkInit::unmarshal(&raw)?;
        assert!(parsed.is_ack);
        assert_eq!(parsed.state_cookie(), Some(Bytes::from_static(&[0x42; 24])));
        Ok(())
    }

    #[test]
    fn test_init_check_rejects_zero_tag() {
        let init = ChunkInit {
            initiate_tag: 0,
            advertised_receiver_window_credit: 1500,
            num_outbound_streams: 1,
            num_inbound_streams: 1,
            ..Default::default()
        };
        assert_eq!(init.check(), Err(Error::ErrChunkTypeInitInitiateTagZero));
    }
}
