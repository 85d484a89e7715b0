use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

const CHANNEL_TYPE_RELIABLE: u8 = 0x00;
const CHANNEL_TYPE_RELIABLE_UNORDERED: u8 = 0x80;
const CHANNEL_TYPE_LEN: usize = 1;

/// ChannelPriority
pub const CHANNEL_PRIORITY_NORMAL: u16 = 256;

/// The channel types this profile negotiates. Every channel is carried
/// unreliably at the SCTP layer regardless; the wire value records whether
/// the application asked for ordering.
#[derive(Eq, PartialEq, Copy, Clone, Debug, Default)]
pub enum ChannelType {
    /// The Data Channel provides an ordered bi-directional communication
    /// channel.
    #[default]
    Reliable,
    /// The Data Channel provides an unordered bi-directional communication
    /// channel.
    ReliableUnordered,
}

impl ChannelType {
    pub(crate) fn marshal_to<B: BufMut>(&self, buf: &mut B) -> Result<usize> {
        if buf.remaining_mut() < CHANNEL_TYPE_LEN {
            return Err(Error::UnexpectedEndOfBuffer {
                expected: CHANNEL_TYPE_LEN,
                actual: buf.remaining_mut(),
            });
        }
        let byte = match self {
            Self::Reliable => CHANNEL_TYPE_RELIABLE,
            Self::ReliableUnordered => CHANNEL_TYPE_RELIABLE_UNORDERED,
        };
        buf.put_u8(byte);
        Ok(CHANNEL_TYPE_LEN)
    }

    pub(crate) fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < CHANNEL_TYPE_LEN {
            return Err(Error::UnexpectedEndOfBuffer {
                expected: CHANNEL_TYPE_LEN,
                actual: buf.remaining(),
            });
        }
        let b0 = buf.get_u8();
        match b0 {
            CHANNEL_TYPE_RELIABLE => Ok(Self::Reliable),
            CHANNEL_TYPE_RELIABLE_UNORDERED => Ok(Self::ReliableUnordered),
            _ => Err(Error::InvalidChannelType(b0)),
        }
    }

    /// unordered returns true when the channel should not preserve order.
    pub fn unordered(&self) -> bool {
        *self == Self::ReliableUnordered
    }
}

const CHANNEL_OPEN_HEADER_LEN: usize = 11;

/// The data-part of a data-channel OPEN message without the message type.
///
/// # Memory layout
///
/// ```plain
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | (Message Type)|  Channel Type |            Priority           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Reliability Parameter                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Label Length          |       Protocol Length         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             Label                             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                            Protocol                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Eq, PartialEq, Clone, Debug, Default)]
pub struct DataChannelOpen {
    pub channel_type: ChannelType,
    pub priority: u16,
    pub reliability_parameter: u32,
    pub label: Vec<u8>,
    pub protocol: Vec<u8>,
}

impl DataChannelOpen {
    pub(crate) fn marshal_size(&self) -> usize {
        CHANNEL_OPEN_HEADER_LEN + self.label.len() + self.protocol.len()
    }

    pub(crate) fn marshal_to<B: BufMut>(&self, buf: &mut B) -> Result<usize> {
        let required_len = self.marshal_size();
        if buf.remaining_mut() < required_len {
            return Err(Error::UnexpectedEndOfBuffer {
                expected: required_len,
                actual: buf.remaining_mut(),
            });
        }

        self.channel_type.marshal_to(buf)?;
        buf.put_u16(self.priority);
        buf.put_u32(self.reliability_parameter);
        buf.put_u16(self.label.len() as u16);
        buf.put_u16(self.protocol.len() as u16);
        buf.put_slice(self.label.as_slice());
        buf.put_slice(self.protocol.as_slice());
        Ok(required_len)
    }

    pub(crate) fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        let required_len = CHANNEL_OPEN_HEADER_LEN;
        if buf.remaining() < required_len {
            return Err(Error::UnexpectedEndOfBuffer {
                expected: required_len,
                actual: buf.remaining(),
            });
        }

        let channel_type = ChannelType::unmarshal(buf)?;
        let priority = buf.get_u16();
        let reliability_parameter = buf.get_u32();
        let label_len = buf.get_u16() as usize;
        let protocol_len = buf.get_u16() as usize;

        let required_len = label_len + protocol_len;
        if buf.remaining() < required_len {
            return Err(Error::UnexpectedEndOfBuffer {
                expected: required_len,
                actual: buf.remaining(),
            });
        }

        let mut label = vec![0; label_len];
        let mut protocol = vec![0; protocol_len];
        buf.copy_to_slice(&mut label[..]);
        buf.copy_to_slice(&mut protocol[..]);

        Ok(Self {
            channel_type,
            priority,
            reliability_parameter,
            label,
            protocol,
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use super::*;

    static MARSHALED_BYTES: [u8; 24] = [
        0x80, // channel type: reliable unordered
        0x0f, 0x35, // priority
        0x00, 0xff, 0x0f, 0x35, // reliability parameter
        0x00, 0x05, // label length
        0x00, 0x08, // protocol length
        0x6c, 0x61, 0x62, 0x65, 0x6c, // label
        0x70, 0x72, 0x6f, 0x74, 0x6f, 0x63, 0x6f, 0x6c, // protocol
    ];

    #[test]
    fn test_channel_open_unmarshal_success() -> Result<()> {
        let mut bytes = Bytes::from_static(&MARSHALED_BYTES);
        let channel_open = DataChannelOpen::unmarshal(&mut bytes)?;

        assert_eq!(channel_open.channel_type, ChannelType::ReliableUnordered);
        assert!(channel_open.channel_type.unordered());
        assert_eq!(channel_open.priority, 3893);
        assert_eq!(channel_open.reliability_parameter, 16715573);
        assert_eq!(channel_open.label, b"label");
        assert_eq!(channel_open.protocol, b"protocol");
        Ok(())
    }

    #[test]
    fn test_channel_open_unmarshal_invalid_channel_type() {
        let mut bytes = Bytes::from_static(&[
            0x11, // channel type
            0x0f, 0x35, // priority
            0x00, 0xff, 0x0f, 0x35, // reliability parameter
            0x00, 0x05, // label length
            0x00, 0x08, // protocol length
        ]);
        assert_eq!(
            DataChannelOpen::unmarshal(&mut bytes),
            Err(Error::InvalidChannelType(0x11))
        );
    }

    #[test]
    fn test_channel_open_unmarshal_truncated() {
        let mut bytes = Bytes::from_static(&[0x00; 5]);
        assert_eq!(
            DataChannelOpen::unmarshal(&mut bytes),
            Err(Error::UnexpectedEndOfBuffer {
                expected: 11,
                actual: 5
            })
        );
    }

    #[test]
    fn test_channel_open_marshal_round_trip() -> Result<()> {
        let channel_open = DataChannelOpen {
            channel_type: ChannelType::ReliableUnordered,
            priority: 3893,
            reliability_parameter: 16715573,
            label: b"label".to_vec(),
            protocol: b"protocol".to_vec(),
        };

        let mut buf = BytesMut::with_capacity(channel_open.marshal_size());
        let written = channel_open.marshal_to(&mut buf)?;
        assert_eq!(written, channel_open.marshal_size());
        assert_eq!(&buf.freeze()[..], &MARSHALED_BYTES);
        Ok(())
    }
}
