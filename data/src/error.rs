use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("unexpected end of buffer: (expected: {expected}, actual: {actual})")]
    UnexpectedEndOfBuffer { expected: usize, actual: usize },
    #[error("invalid message type (0x{0:02x})")]
    InvalidMessageType(u8),
    #[error("invalid channel type (0x{0:02x})")]
    InvalidChannelType(u8),
}
