use subtle::ConstantTimeEq;

use crate::error::*;

/// check_hmac compares the computed HMAC with the expected one in constant
/// time.
pub fn check_hmac(got: &[u8], expected: &[u8]) -> Result<()> {
    if got.ct_eq(expected).unwrap_u8() != 1 {
        return Err(Error::ErrIntegrityMismatch);
    }
    Ok(())
}

/// check_fingerprint compares the computed CRC-32 with the expected one.
pub fn check_fingerprint(got: u32, expected: u32) -> Result<()> {
    if got != expected {
        return Err(Error::ErrFingerprintMismatch);
    }
    Ok(())
}

/// check_overflow returns ErrAttrValueTooLarge if got is bigger than max.
pub fn check_overflow(got: usize, max: usize) -> Result<()> {
    if got > max {
        return Err(Error::ErrAttrValueTooLarge);
    }
    Ok(())
}
