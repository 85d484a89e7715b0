use std::fmt;

/// HashAlgorithm is the registry value of the hash in a SignatureAndHash
/// pair.
///
/// https://www.iana.org/assignments/tls-parameters/tls-parameters.xhtml#tls-parameters-18
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256 = 4,
    Unsupported,
}

impl From<u8> for HashAlgorithm {
    fn from(val: u8) -> Self {
        match val {
            4 => HashAlgorithm::Sha256,
            _ => HashAlgorithm::Unsupported,
        }
    }
}

/// SignatureAlgorithm is the registry value of the signature in a
/// SignatureAndHash pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Rsa = 1,
    Ecdsa = 3,
    Unsupported,
}

impl From<u8> for SignatureAlgorithm {
    fn from(val: u8) -> Self {
        match val {
            1 => SignatureAlgorithm::Rsa,
            3 => SignatureAlgorithm::Ecdsa,
            _ => SignatureAlgorithm::Unsupported,
        }
    }
}

/// SignatureHashAlgorithm is a signature/hash algorithm pair.
///
/// https://tools.ietf.org/html/rfc5246#section-7.4.1.4.1
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SignatureHashAlgorithm {
    pub hash: HashAlgorithm,
    pub signature: SignatureAlgorithm,
}

impl fmt::Display for SignatureHashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}-{:?}", self.signature, self.hash)
    }
}

impl SignatureHashAlgorithm {
    pub(crate) fn marshal(&self) -> [u8; 2] {
        [self.hash as u8, self.signature as u8]
    }

    pub(crate) fn unmarshal(hash: u8, signature: u8) -> Self {
        SignatureHashAlgorithm {
            hash: HashAlgorithm::from(hash),
            signature: SignatureAlgorithm::from(signature),
        }
    }

    pub(crate) fn is_supported(&self) -> bool {
        self.hash != HashAlgorithm::Unsupported
            && self.signature != SignatureAlgorithm::Unsupported
    }
}

/// The algorithms this profile offers, in preference order.
pub(crate) fn default_signature_schemes() -> Vec<SignatureHashAlgorithm> {
    vec![
        SignatureHashAlgorithm {
            hash: HashAlgorithm::Sha256,
            signature: SignatureAlgorithm::Ecdsa,
        },
        SignatureHashAlgorithm {
            hash: HashAlgorithm::Sha256,
            signature: SignatureAlgorithm::Rsa,
        },
    ]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_marshal_unmarshal() {
        for scheme in default_signature_schemes() {
            let raw = scheme.marshal();
            let parsed = SignatureHashAlgorithm::unmarshal(raw[0], raw[1]);
            assert_eq!(parsed, scheme);
            assert!(parsed.is_supported());
        }
    }

    #[test]
    fn test_unsupported() {
        let parsed = SignatureHashAlgorithm::unmarshal(2, 2);
        assert!(!parsed.is_supported());
    }
}
