use bytes::{Buf, BufMut};

use crate::error::Result;

/// The data-part of a data-channel ACK message without the message type; it
/// is empty.
#[derive(Eq, PartialEq, Copy, Clone, Debug, Default)]
pub struct DataChannelAck;

impl DataChannelAck {
    pub(crate) fn marshal_size(&self) -> usize {
        0
    }

    pub(crate) fn marshal_to<B: BufMut>(&self, _buf: &mut B) -> Result<usize> {
        Ok(0)
    }

    pub(crate) fn unmarshal<B: Buf>(_buf: &mut B) -> Result<Self> {
        Ok(Self)
    }
}
