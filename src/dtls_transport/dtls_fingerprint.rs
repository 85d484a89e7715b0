use std::fmt;

use serde::{Deserialize, Serialize};

/// DTLSFingerprint specifies the hash function algorithm and certificate
/// fingerprint as described in RFC 4572.
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RTCDtlsFingerprint {
    /// Hash function algorithm name, e.g. "sha-256".
    pub algorithm: String,

    /// The value of the certificate fingerprint in lowercase hex string as
    /// expressed utilizing the syntax of 'fingerprint' in RFC 4572
    /// Section 5.
    pub value: String,
}

impl fmt::Display for RTCDtlsFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.algorithm, self.value)
    }
}

impl RTCDtlsFingerprint {
    /// Parse one `a=fingerprint` attribute value: `<alg> <hex-colon>`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (algorithm, value) = raw.trim().split_once(' ')?;
        Some(RTCDtlsFingerprint {
            algorithm: algorithm.to_owned(),
            value: value.to_owned(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fingerprint_parse() {
        let fp = RTCDtlsFingerprint::parse("sha-256 AA:BB:CC").unwrap();
        assert_eq!(fp.algorithm, "sha-256");
        assert_eq!(fp.value, "AA:BB:CC");
        assert_eq!(fp.to_string(), "sha-256 AA:BB:CC");
        assert!(RTCDtlsFingerprint::parse("nospace").is_none());
    }
}
