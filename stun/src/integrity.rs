use std::fmt;

use md5::{Digest, Md5};
use ring::hmac;

use crate::attributes::*;
use crate::checks::*;
use crate::error::*;
use crate::message::*;

// separator for long-term credentials.
pub(crate) const CREDENTIALS_SEP: &str = ":";

pub(crate) const MESSAGE_INTEGRITY_SIZE: usize = 20;

/// MessageIntegrity represents MESSAGE-INTEGRITY attribute.
///
/// The value is an HMAC-SHA1 over the message up to and including the
/// attribute preceding MESSAGE-INTEGRITY, with the header length adjusted
/// to pretend the integrity TLV is the last attribute.
///
/// RFC 5389 Section 15.4
#[derive(Default, Clone, PartialEq, Eq)]
pub struct MessageIntegrity(pub Vec<u8>);

fn new_hmac(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mac = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key);
    hmac::sign(&mac, message).as_ref().to_vec()
}

impl fmt::Display for MessageIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KEY: 0x{}", hex_string(&self.0))
    }
}

impl fmt::Debug for MessageIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageIntegrity(0x{})", hex_string(&self.0))
    }
}

impl Setter for MessageIntegrity {
    /// add_to adds MESSAGE-INTEGRITY attribute to message.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        for a in &m.attributes.0 {
            // Message should not contain FINGERPRINT attribute
            // before MESSAGE-INTEGRITY.
            if a.typ == ATTR_FINGERPRINT {
                return Err(Error::ErrFingerprintBeforeIntegrity);
            }
        }
        // The text used as input to HMAC is the STUN message,
        // including the header, up to and including the attribute preceding the
        // MESSAGE-INTEGRITY attribute.
        let length = m.length;
        // Adjusting m.length to contain MESSAGE-INTEGRITY TLV.
        m.length += (MESSAGE_INTEGRITY_SIZE + ATTRIBUTE_HEADER_SIZE) as u32;
        m.write_length(); // writing length to m.raw
        let v = new_hmac(&self.0, &m.raw); // calculating HMAC for adjusted m.raw
        m.length = length; // changing m.length back

        m.add(ATTR_MESSAGE_INTEGRITY, &v);

        Ok(())
    }
}

impl MessageIntegrity {
    /// new_long_term_integrity returns new MessageIntegrity with key for
    /// long-term credentials. Password, username, and realm must be
    /// SASL-prepared.
    pub fn new_long_term_integrity(username: &str, realm: &str, password: &str) -> Self {
        let s = [username, realm, password].join(CREDENTIALS_SEP);

        let mut h = Md5::new();
        h.update(s.as_bytes());

        MessageIntegrity(h.finalize().as_slice().to_vec())
    }

    /// new_short_term_integrity returns new MessageIntegrity with key for
    /// short-term credentials. Password must be SASL-prepared.
    pub fn new_short_term_integrity(password: &str) -> Self {
        MessageIntegrity(password.as_bytes().to_vec())
    }

    /// check checks MESSAGE-INTEGRITY attribute.
    pub fn check(&self, m: &mut Message) -> Result<()> {
        let v = m.get(ATTR_MESSAGE_INTEGRITY)?;

        // Adjusting length in header to match m.raw that was
        // used when computing HMAC.
        let length = m.length;
        let mut after_integrity = false;
        let mut size_reduced = 0u32;

        for a in &m.attributes.0 {
            if after_integrity {
                size_reduced += nearest_padded_value_length(a.length as usize) as u32;
                size_reduced += ATTRIBUTE_HEADER_SIZE as u32;
            }
            if a.typ == ATTR_MESSAGE_INTEGRITY {
                after_integrity = true;
            }
        }
        m.length -= size_reduced;
        m.write_length();
        // start_of_hmac should be first byte of integrity attribute.
        let start_of_hmac = MESSAGE_HEADER_SIZE + m.length as usize
            - (ATTRIBUTE_HEADER_SIZE + MESSAGE_INTEGRITY_SIZE);
        let b = &m.raw[..start_of_hmac]; // data before integrity attribute
        let expected = new_hmac(&self.0, b);
        m.length = length;
        m.write_length(); // writing length back
        check_hmac(&v, &expected)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_message_integrity_check() -> Result<()> {
        let i = MessageIntegrity::new_short_term_integrity("password");

        let mut m = Message::new();
        m.build(&[Box::new(BINDING_REQUEST), Box::new(TransactionId::new())])?;
        m.add(ATTR_SOFTWARE, b"software");
        i.add_to(&mut m)?;

        let raw = m.marshal_binary()?;
        let mut decoded = Message::new();
        decoded.unmarshal_binary(&raw)?;
        i.check(&mut decoded)?;
        Ok(())
    }

    #[test]
    fn test_message_integrity_wrong_key() -> Result<()> {
        let i = MessageIntegrity::new_short_term_integrity("password");

        let mut m = Message::new();
        m.build(&[Box::new(BINDING_REQUEST), Box::new(TransactionId::new())])?;
        i.add_to(&mut m)?;

        let wrong = MessageIntegrity::new_short_term_integrity("wrong");
        assert_eq!(wrong.check(&mut m), Err(Error::ErrIntegrityMismatch));
        Ok(())
    }

    #[test]
    fn test_message_integrity_before_fingerprint() -> Result<()> {
        let mut m = Message::new();
        m.build(&[Box::new(BINDING_REQUEST), Box::new(TransactionId::new())])?;
        m.add(ATTR_FINGERPRINT, &[0, 0, 0, 0]);

        let i = MessageIntegrity::new_short_term_integrity("password");
        assert_eq!(i.add_to(&mut m), Err(Error::ErrFingerprintBeforeIntegrity));
        Ok(())
    }

    #[test]
    fn test_long_term_key_derivation() {
        // key = MD5(username ":" realm ":" password), RFC 5389 Section 15.4
        let i = MessageIntegrity::new_long_term_integrity("user", "realm", "pass");
        assert_eq!(i.0.len(), 16);
    }
}
