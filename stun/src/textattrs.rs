use std::fmt;

use crate::attributes::*;
use crate::checks::*;
use crate::error::*;
use crate::message::*;

const MAX_USERNAME_B: usize = 513;
const MAX_REALM_B: usize = 763;
const MAX_SOFTWARE_B: usize = 763;
const MAX_NONCE_B: usize = 763;

/// Username represents USERNAME attribute.
///
/// RFC 5389 Section 15.3
pub type Username = TextAttribute;
/// Realm represents REALM attribute.
///
/// RFC 5389 Section 15.7
pub type Realm = TextAttribute;
/// Nonce represents NONCE attribute.
///
/// RFC 5389 Section 15.8
pub type Nonce = TextAttribute;
/// Software is SOFTWARE attribute.
///
/// RFC 5389 Section 15.10
pub type Software = TextAttribute;

/// TextAttribute is a helper for adding and extracting simple text
/// attributes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TextAttribute {
    pub attr: AttrType,
    pub text: String,
}

impl fmt::Display for TextAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl Setter for TextAttribute {
    /// add_to adds attribute with type t to m, checking maximum length. If
    /// max_len is less than 0, no check is performed.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let text = self.text.as_bytes();
        let max_len = match self.attr {
            ATTR_USERNAME => MAX_USERNAME_B,
            ATTR_REALM => MAX_REALM_B,
            ATTR_SOFTWARE => MAX_SOFTWARE_B,
            ATTR_NONCE => MAX_NONCE_B,
            _ => usize::MAX,
        };
        check_overflow(text.len(), max_len)?;
        m.add(self.attr, text);
        Ok(())
    }
}

impl TextAttribute {
    pub fn new(attr: AttrType, text: String) -> Self {
        TextAttribute { attr, text }
    }

    /// get_from_as gets t attribute from m and appends its value to reseted v.
    pub fn get_from_as(m: &Message, attr: AttrType) -> Result<Self> {
        let a = m.get(attr)?;
        let text = String::from_utf8(a).map_err(|_| Error::ErrInvalidString)?;
        Ok(TextAttribute { attr, text })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_text_attribute_round_trip() -> Result<()> {
        let mut m = Message::new();
        let user = TextAttribute::new(ATTR_USERNAME, "remote:local".to_owned());
        user.add_to(&mut m)?;

        let got = TextAttribute::get_from_as(&m, ATTR_USERNAME)?;
        assert_eq!(got, user);
        Ok(())
    }

    #[test]
    fn test_text_attribute_overflow() {
        let mut m = Message::new();
        let user = TextAttribute::new(ATTR_USERNAME, "a".repeat(MAX_USERNAME_B + 1));
        assert_eq!(user.add_to(&mut m), Err(Error::ErrAttrValueTooLarge));
    }

    #[test]
    fn test_text_attribute_missing() {
        let m = Message::new();
        let result = TextAttribute::get_from_as(&m, ATTR_SOFTWARE);
        assert_eq!(result.err(), Some(Error::ErrAttributeNotFound));
    }
}
