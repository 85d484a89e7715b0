use std::fmt;

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

// The first byte in a `Message` that specifies its type:
pub(crate) const MESSAGE_TYPE_ACK: u8 = 0x02;
pub(crate) const MESSAGE_TYPE_OPEN: u8 = 0x03;
pub(crate) const MESSAGE_TYPE_LEN: usize = 1;

/// A parsed DataChannel message type.
#[derive(Eq, PartialEq, Copy, Clone, Debug)]
pub enum MessageType {
    DataChannelAck,
    DataChannelOpen,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::DataChannelAck => "DataChannelAck",
            MessageType::DataChannelOpen => "DataChannelOpen",
        };
        write!(f, "{s}")
    }
}

impl MessageType {
    pub(crate) fn marshal_to<B: BufMut>(&self, buf: &mut B) -> Result<usize> {
        let byte = match self {
            MessageType::DataChannelAck => MESSAGE_TYPE_ACK,
            MessageType::DataChannelOpen => MESSAGE_TYPE_OPEN,
        };
        if buf.remaining_mut() < MESSAGE_TYPE_LEN {
            return Err(Error::UnexpectedEndOfBuffer {
                expected: MESSAGE_TYPE_LEN,
                actual: buf.remaining_mut(),
            });
        }
        buf.put_u8(byte);
        Ok(MESSAGE_TYPE_LEN)
    }

    pub(crate) fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < MESSAGE_TYPE_LEN {
            return Err(Error::UnexpectedEndOfBuffer {
                expected: MESSAGE_TYPE_LEN,
                actual: buf.remaining(),
            });
        }
        let b0 = buf.get_u8();
        match b0 {
            MESSAGE_TYPE_ACK => Ok(Self::DataChannelAck),
            MESSAGE_TYPE_OPEN => Ok(Self::DataChannelOpen),
            _ => Err(Error::InvalidMessageType(b0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_message_type_unmarshal_success() -> Result<()> {
        let mut bytes = Bytes::from_static(&[0x03]);
        assert_eq!(MessageType::unmarshal(&mut bytes)?, MessageType::DataChannelOpen);

        let mut bytes = Bytes::from_static(&[0x02]);
        assert_eq!(MessageType::unmarshal(&mut bytes)?, MessageType::DataChannelAck);
        Ok(())
    }

    #[test]
    fn test_message_type_unmarshal_invalid() {
        let mut bytes = Bytes::from_static(&[0x01]);
        assert_eq!(
            MessageType::unmarshal(&mut bytes),
            Err(Error::InvalidMessageType(0x01))
        );
    }

    #[test]
    fn test_message_type_unmarshal_empty() {
        let mut bytes = Bytes::from_static(&[]);
        assert_eq!(
            MessageType::unmarshal(&mut bytes),
            Err(Error::UnexpectedEndOfBuffer {
                expected: 1,
                actual: 0
            })
        );
    }
}
