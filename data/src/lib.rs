#![warn(rust_2018_idioms)]
#![allow(dead_code)]

//! The DataChannel Establishment Protocol (DCEP) codec: DATA_CHANNEL_OPEN
//! and DATA_CHANNEL_ACK messages carried on the DCEP payload-protocol
//! identifier over SCTP.

mod error;
pub mod message;

pub use error::{Error, Result};
pub use message::message_channel_open::{ChannelType, DataChannelOpen, CHANNEL_PRIORITY_NORMAL};
pub use message::message_channel_ack::DataChannelAck;
pub use message::message_type::MessageType;
pub use message::Message;
