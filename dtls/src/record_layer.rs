use bytes::{BufMut, BytesMut};

use crate::content::ContentType;
use crate::error::{Error, Result};

pub(crate) const RECORD_LAYER_HEADER_SIZE: usize = 13;
pub(crate) const MAX_SEQUENCE_NUMBER: u64 = 0x0000FFFFFFFFFFFF;

pub(crate) const DTLS1_2MAJOR: u8 = 0xfe;
pub(crate) const DTLS1_2MINOR: u8 = 0xfd;

pub(crate) const DTLS1_0MAJOR: u8 = 0xfe;
pub(crate) const DTLS1_0MINOR: u8 = 0xff;

/// <https://tools.ietf.org/html/rfc4346#section-6.2.1>
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

/// PROTOCOL_VERSION1_2 is the DTLS 1.2 wire version (254.253).
pub const PROTOCOL_VERSION1_2: ProtocolVersion = ProtocolVersion {
    major: DTLS1_2MAJOR,
    minor: DTLS1_2MINOR,
};

/// PROTOCOL_VERSION1_0 is accepted in ClientHello for compatibility.
pub const PROTOCOL_VERSION1_0: ProtocolVersion = ProtocolVersion {
    major: DTLS1_0MAJOR,
    minor: DTLS1_0MINOR,
};

/// RecordLayerHeader is the fixed 13-byte DTLS record prefix.
///
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     Type      |   Version (major, minor)      |     Epoch     .
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// .               |                Sequence Number                .
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// .                               |           Length              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct RecordLayerHeader {
    pub content_type: ContentType,
    pub protocol_version: ProtocolVersion,
    pub epoch: u16,
    pub sequence_number: u64, // uint48 in spec
    pub content_len: u16,
}

impl RecordLayerHeader {
    pub fn marshal_to(&self, writer: &mut BytesMut) -> Result<()> {
        if self.sequence_number > MAX_SEQUENCE_NUMBER {
            return Err(Error::ErrSequenceNumberOverflow);
        }

        writer.put_u8(self.content_type as u8);
        writer.put_u8(self.protocol_version.major);
        writer.put_u8(self.protocol_version.minor);
        writer.put_u16(self.epoch);

        let seq = self.sequence_number.to_be_bytes();
        writer.put_slice(&seq[2..]); // 48 bit

        writer.put_u16(self.content_len);
        Ok(())
    }

    pub fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.len() < RECORD_LAYER_HEADER_SIZE {
            return Err(Error::ErrBufferTooSmall);
        }
        let content_type = ContentType::check(raw[0])?;
        let protocol_version = ProtocolVersion {
            major: raw[1],
            minor: raw[2],
        };
        let epoch = u16::from_be_bytes([raw[3], raw[4]]);

        // sequence number is stored as uint48
        let mut seq = [0u8; 8];
        seq[2..].copy_from_slice(&raw[5..11]);
        let sequence_number = u64::from_be_bytes(seq);

        let content_len = u16::from_be_bytes([raw[11], raw[12]]);

        if protocol_version != PROTOCOL_VERSION1_0 && protocol_version != PROTOCOL_VERSION1_2 {
            return Err(Error::ErrUnsupportedProtocolVersion);
        }

        Ok(RecordLayerHeader {
            content_type,
            protocol_version,
            epoch,
            sequence_number,
            content_len,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_record_layer_header_round_trip() -> Result<()> {
        let header = RecordLayerHeader {
            content_type: ContentType::Handshake,
            protocol_version: PROTOCOL_VERSION1_2,
            epoch: 0,
            sequence_number: 18,
            content_len: 62,
        };

        let mut raw = BytesMut::new();
        header.marshal_to(&mut raw)?;
        assert_eq!(raw.len(), RECORD_LAYER_HEADER_SIZE);

        let parsed = RecordLayerHeader::unmarshal(&raw)?;
        assert_eq!(parsed, header);

        // and byte-identical re-marshal
        let mut raw2 = BytesMut::new();
        parsed.marshal_to(&mut raw2)?;
        assert_eq!(raw, raw2);
        Ok(())
    }

    #[test]
    fn test_record_layer_header_sequence_overflow() {
        let header = RecordLayerHeader {
            content_type: ContentType::ApplicationData,
            protocol_version: PROTOCOL_VERSION1_2,
            epoch: 1,
            sequence_number: MAX_SEQUENCE_NUMBER + 1,
            content_len: 0,
        };
        let mut raw = BytesMut::new();
        assert_eq!(
            header.marshal_to(&mut raw),
            Err(Error::ErrSequenceNumberOverflow)
        );
    }

    #[test]
    fn test_record_layer_header_bad_version() {
        let raw = [
            0x16, 0xaa, 0xbb, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x12, 0x00, 0x00,
        ];
        assert_eq!(
            RecordLayerHeader::unmarshal(&raw),
            Err(Error::ErrUnsupportedProtocolVersion)
        );
    }
}
