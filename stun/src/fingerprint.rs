use crc::{Crc, CRC_32_ISO_HDLC};

use crate::attributes::*;
use crate::checks::*;
use crate::error::*;
use crate::message::*;

/// FingerprintAttr represents FINGERPRINT attribute.
///
/// RFC 5389 Section 15.5
#[derive(Debug, Default, Clone, Copy)]
pub struct FingerprintAttr;

/// FINGERPRINT is shorthand for FingerprintAttr.
pub const FINGERPRINT: FingerprintAttr = FingerprintAttr;

pub(crate) const FINGERPRINT_XOR_VALUE: u32 = 0x5354554e;
pub(crate) const FINGERPRINT_SIZE: usize = 4; // 32 bit

const ISO_HDLC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// fingerprint_value returns CRC-32 of b XOR-ed by 0x5354554e.
///
/// The value of the attribute is computed as the CRC-32 of the STUN message
/// up to (but excluding) the FINGERPRINT attribute itself, XOR'ed with
/// the 32-bit value 0x5354554e (the XOR helps in cases where an
/// application packet is also using CRC-32 in it).
pub fn fingerprint_value(b: &[u8]) -> u32 {
    let checksum = ISO_HDLC.checksum(b);
    checksum ^ FINGERPRINT_XOR_VALUE
}

impl Setter for FingerprintAttr {
    /// add_to adds fingerprint to message.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let l = m.length;
        // length in header should include size of fingerprint attribute
        m.length += (FINGERPRINT_SIZE + ATTRIBUTE_HEADER_SIZE) as u32; // increasing length
        m.write_length(); // writing Length to Raw
        let val = fingerprint_value(&m.raw);
        m.length = l;
        m.add(ATTR_FINGERPRINT, &val.to_be_bytes());
        Ok(())
    }
}

impl FingerprintAttr {
    /// check reads fingerprint value from m and checks it, returning error if
    /// any. Can return ErrAttributeNotFound.
    pub fn check(&self, m: &mut Message) -> Result<()> {
        let b = m.get(ATTR_FINGERPRINT)?;
        if b.len() != FINGERPRINT_SIZE {
            return Err(Error::ErrAttributeSizeInvalid);
        }
        let val = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        let attr_start = m.raw.len() - (FINGERPRINT_SIZE + ATTRIBUTE_HEADER_SIZE);
        let expected = fingerprint_value(&m.raw[..attr_start]);
        check_fingerprint(val, expected)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fingerprint_check() -> Result<()> {
        let mut m = Message::new();
        m.build(&[Box::new(BINDING_REQUEST), Box::new(TransactionId::new())])?;
        m.add(ATTR_SOFTWARE, b"software");
        FINGERPRINT.add_to(&mut m)?;

        let raw = m.marshal_binary()?;
        let mut decoded = Message::new();
        decoded.unmarshal_binary(&raw)?;
        FINGERPRINT.check(&mut decoded)?;
        Ok(())
    }

    #[test]
    fn test_fingerprint_check_bad() -> Result<()> {
        let mut m = Message::new();
        m.build(&[Box::new(BINDING_REQUEST), Box::new(TransactionId::new())])?;
        FINGERPRINT.add_to(&mut m)?;

        // corrupt a header byte after computing the fingerprint
        m.raw[9] ^= 0xff;
        assert_eq!(FINGERPRINT.check(&mut m), Err(Error::ErrFingerprintMismatch));
        Ok(())
    }
}
