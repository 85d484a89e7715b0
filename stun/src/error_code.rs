use std::fmt;

use crate::attributes::*;
use crate::checks::*;
use crate::error::*;
use crate::message::*;

/// ErrorCodeAttribute represents ERROR-CODE attribute.
///
/// RFC 5389 Section 15.6
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ErrorCodeAttribute {
    pub code: ErrorCode,
    pub reason: Vec<u8>,
}

impl fmt::Display for ErrorCodeAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = String::from_utf8_lossy(&self.reason);
        write!(f, "{}: {}", self.code.0, reason)
    }
}

// constants for ERROR-CODE encoding.
const ERROR_CODE_CLASS_BYTE: usize = 2;
const ERROR_CODE_NUMBER_BYTE: usize = 3;
const ERROR_CODE_REASON_START: usize = 4;
const ERROR_CODE_REASON_MAX_B: usize = 763;
const ERROR_CODE_MODULO: u16 = 100;

impl Setter for ErrorCodeAttribute {
    /// add_to adds ERROR-CODE to m.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        check_overflow(self.reason.len(), ERROR_CODE_REASON_MAX_B)?;

        let mut value: Vec<u8> = Vec::with_capacity(ERROR_CODE_REASON_MAX_B);
        let number = (self.code.0 % ERROR_CODE_MODULO) as u8; // error code modulo 100
        let class = (self.code.0 / ERROR_CODE_MODULO) as u8; // hundred digit
        value.extend_from_slice(&[0, 0]);
        value.push(class); // [ERROR_CODE_CLASS_BYTE]
        value.push(number); // [ERROR_CODE_NUMBER_BYTE]
        value.extend_from_slice(&self.reason); //[ERROR_CODE_REASON_START:]

        m.add(ATTR_ERROR_CODE, &value);

        Ok(())
    }
}

impl Getter for ErrorCodeAttribute {
    /// get_from decodes ERROR-CODE from m. Reader is copied to reason.
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_ERROR_CODE)?;
        if v.len() < ERROR_CODE_REASON_START {
            return Err(Error::ErrUnexpectedEof);
        }

        let class = v[ERROR_CODE_CLASS_BYTE] as u16;
        let number = v[ERROR_CODE_NUMBER_BYTE] as u16;
        let code = class * ERROR_CODE_MODULO + number;
        self.code = ErrorCode(code);
        self.reason = v[ERROR_CODE_REASON_START..].to_vec();

        Ok(())
    }
}

/// ErrorCode is code for ERROR-CODE attribute.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ErrorCode(pub u16);

impl Setter for ErrorCode {
    /// add_to adds ERROR-CODE with default reason to m.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let reason: &[u8] = match *self {
            CODE_TRY_ALTERNATE => b"Try Alternate",
            CODE_BAD_REQUEST => b"Bad Request",
            CODE_UNAUTHORIZED => b"Unauthorized",
            CODE_UNKNOWN_ATTRIBUTE => b"Unknown Attribute",
            CODE_STALE_NONCE => b"Stale Nonce",
            CODE_ROLE_CONFLICT => b"Role Conflict",
            CODE_SERVER_ERROR => b"Server Error",
            CODE_FORBIDDEN => b"Forbidden",
            CODE_ALLOC_MISMATCH => b"Allocation Mismatch",
            CODE_WRONG_CREDENTIALS => b"Wrong Credentials",
            CODE_UNSUPPORTED_TRANS_PROTO => b"Unsupported Transport Protocol",
            CODE_ALLOC_QUOTA_REACHED => b"Allocation Quota Reached",
            CODE_INSUFFICIENT_CAPACITY => b"Insufficient Capacity",
            _ => b"Unknown Error",
        };
        let a = ErrorCodeAttribute {
            code: *self,
            reason: reason.to_vec(),
        };
        a.add_to(m)
    }
}

// Possible error codes.
pub const CODE_TRY_ALTERNATE: ErrorCode = ErrorCode(300);
pub const CODE_BAD_REQUEST: ErrorCode = ErrorCode(400);
pub const CODE_UNAUTHORIZED: ErrorCode = ErrorCode(401);
pub const CODE_UNKNOWN_ATTRIBUTE: ErrorCode = ErrorCode(420);
pub const CODE_STALE_NONCE: ErrorCode = ErrorCode(438);
pub const CODE_ROLE_CONFLICT: ErrorCode = ErrorCode(487);
pub const CODE_SERVER_ERROR: ErrorCode = ErrorCode(500);

// TURN specific error codes, RFC 5766 Section 15.
pub const CODE_FORBIDDEN: ErrorCode = ErrorCode(403);
pub const CODE_ALLOC_MISMATCH: ErrorCode = ErrorCode(437);
pub const CODE_WRONG_CREDENTIALS: ErrorCode = ErrorCode(441);
pub const CODE_UNSUPPORTED_TRANS_PROTO: ErrorCode = ErrorCode(442);
pub const CODE_ALLOC_QUOTA_REACHED: ErrorCode = ErrorCode(486);
pub const CODE_INSUFFICIENT_CAPACITY: ErrorCode = ErrorCode(508);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_code_round_trip() -> Result<()> {
        let mut m = Message::new();
        let attr = ErrorCodeAttribute {
            code: CODE_ROLE_CONFLICT,
            reason: b"Role Conflict".to_vec(),
        };
        attr.add_to(&mut m)?;

        let mut got = ErrorCodeAttribute::default();
        got.get_from(&m)?;
        assert_eq!(got, attr);
        Ok(())
    }

    #[test]
    fn test_error_code_default_reason() -> Result<()> {
        let mut m = Message::new();
        CODE_UNAUTHORIZED.add_to(&mut m)?;

        let mut got = ErrorCodeAttribute::default();
        got.get_from(&m)?;
        assert_eq!(got.code, CODE_UNAUTHORIZED);
        assert_eq!(got.reason, b"Unauthorized".to_vec());
        Ok(())
    }

    #[test]
    fn test_error_code_truncated() {
        let mut m = Message::new();
        m.add(ATTR_ERROR_CODE, &[0, 0]);
        let mut got = ErrorCodeAttribute::default();
        assert_eq!(got.get_from(&m), Err(Error::ErrUnexpectedEof));
    }
}
