use std::fmt;

use bytes::{Bytes, BytesMut};

use super::param_header::*;
use super::param_type::*;
use super::*;

/// ParamStateCookie carries the server's opaque state cookie between
/// INIT-ACK and COOKIE-ECHO. The contents are opaque at this layer; the
/// association builds and validates the timestamp‖HMAC structure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ParamStateCookie {
    pub(crate) cookie: Bytes,
}

impl fmt::Display for ParamStateCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.header(), self.cookie.len())
    }
}

impl Param for ParamStateCookie {
    fn header(&self) -> ParamHeader {
        ParamHeader {
            typ: ParamType::StateCookie,
            value_length: self.cookie.len() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ParamHeader::unmarshal(raw)?;
        let cookie = raw.slice(PARAM_HEADER_LENGTH..PARAM_HEADER_LENGTH + header.value_length());
        Ok(ParamStateCookie { cookie })
    }

    fn marshal_to(&self, buf: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(buf);
        buf.extend_from_slice(&self.cookie);
        Ok(buf.len())
    }

    fn value_length(&self) -> usize {
        self.cookie.len()
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_state_cookie_round_trip() -> Result<()> {
        let param = ParamStateCookie {
            cookie: Bytes::from_static(&[0xab; 24]),
        };
        let raw = param.marshal()?;
        let parsed = ParamStateCookie::unmarshal(&raw)?;
        assert_eq!(parsed, param);
        Ok(())
    }
}
