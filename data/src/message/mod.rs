pub mod message_channel_ack;
pub mod message_channel_open;
pub mod message_type;

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Result;
use message_channel_ack::DataChannelAck;
use message_channel_open::DataChannelOpen;
use message_type::{MessageType, MESSAGE_TYPE_LEN};

/// A parsed DataChannel establishment (DCEP) message.
///
/// https://tools.ietf.org/html/draft-ietf-rtcweb-data-protocol-09#section-5
#[derive(Eq, PartialEq, Clone, Debug)]
pub enum Message {
    DataChannelAck(DataChannelAck),
    DataChannelOpen(DataChannelOpen),
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::DataChannelAck(_) => write!(f, "DataChannelAck"),
            Message::DataChannelOpen(open) => write!(
                f,
                "DataChannelOpen(label={})",
                String::from_utf8_lossy(&open.label)
            ),
        }
    }
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::DataChannelAck(_) => MessageType::DataChannelAck,
            Message::DataChannelOpen(_) => MessageType::DataChannelOpen,
        }
    }

    pub fn marshal_size(&self) -> usize {
        MESSAGE_TYPE_LEN
            + match self {
                Message::DataChannelAck(ack) => ack.marshal_size(),
                Message::DataChannelOpen(open) => open.marshal_size(),
            }
    }

    pub fn marshal_to<B: BufMut>(&self, buf: &mut B) -> Result<usize> {
        let mut written = self.message_type().marshal_to(buf)?;
        written += match self {
            Message::DataChannelAck(ack) => ack.marshal_to(buf)?,
            Message::DataChannelOpen(open) => open.marshal_to(buf)?,
        };
        Ok(written)
    }

    pub fn marshal(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.marshal_size());
        self.marshal_to(&mut buf)?;
        Ok(buf.freeze())
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        Ok(match MessageType::unmarshal(buf)? {
            MessageType::DataChannelAck => Message::DataChannelAck(DataChannelAck::unmarshal(buf)?),
            MessageType::DataChannelOpen => {
                Message::DataChannelOpen(DataChannelOpen::unmarshal(buf)?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::message_channel_open::ChannelType;
    use super::*;

    #[test]
    fn test_message_round_trip_open() -> Result<()> {
        let msg = Message::DataChannelOpen(DataChannelOpen {
            channel_type: ChannelType::ReliableUnordered,
            priority: 256,
            reliability_parameter: 0,
            label: b"t".to_vec(),
            protocol: vec![],
        });

        let raw = msg.marshal()?;
        assert_eq!(raw[0], 0x03);

        let parsed = Message::unmarshal(&mut raw.clone())?;
        assert_eq!(parsed, msg);
        assert_eq!(parsed.marshal()?, raw);
        Ok(())
    }

    #[test]
    fn test_message_round_trip_ack() -> Result<()> {
        let msg = Message::DataChannelAck(DataChannelAck);
        let raw = msg.marshal()?;
        assert_eq!(&raw[..], &[0x02]);
        assert_eq!(Message::unmarshal(&mut raw.clone())?, msg);
        Ok(())
    }
}
