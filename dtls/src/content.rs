use crate::error::{Error, Result};

/// The record-layer content types.
///
/// https://tools.ietf.org/html/rfc4346#section-6.2.1
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
    #[default]
    Invalid,
}

impl From<u8> for ContentType {
    fn from(val: u8) -> Self {
        match val {
            20 => ContentType::ChangeCipherSpec,
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            _ => ContentType::Invalid,
        }
    }
}

impl ContentType {
    pub fn check(val: u8) -> Result<ContentType> {
        let typ = ContentType::from(val);
        if typ == ContentType::Invalid {
            return Err(Error::ErrInvalidContentType);
        }
        Ok(typ)
    }
}
