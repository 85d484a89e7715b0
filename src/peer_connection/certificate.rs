use dtls::crypto::{fingerprint_certificate, Certificate, CryptoPrivateKey};
use rand::Rng;

use crate::dtls_transport::dtls_fingerprint::RTCDtlsFingerprint;
use crate::error::{Error, Result};

/// Certificate represents an x509 certificate used to authenticate WebRTC
/// communications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RTCCertificate {
    pub(crate) certificate: Certificate,
}

fn math_rand_alpha(n: usize) -> String {
    let mut rng = rand::thread_rng();
    const RUNES: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
    (0..n)
        .map(|_| RUNES[rng.gen_range(0..RUNES.len())] as char)
        .collect()
}

impl RTCCertificate {
    /// generate creates a fresh self-signed ECDSA-P256 certificate to be
    /// used by DTLS for encrypting data sent over the wire.
    pub fn generate() -> Result<Self> {
        let certificate = Certificate::generate_self_signed(vec![math_rand_alpha(16)])
            .map_err(|e| Error::ErrCertificate(e.to_string()))?;
        Ok(RTCCertificate { certificate })
    }

    /// from_existing wraps a preprovisioned key pair and certificate chain
    /// (the `dtls.keys` configuration option).
    pub fn from_existing(certificate_der: Vec<u8>, private_key: CryptoPrivateKey) -> Self {
        RTCCertificate {
            certificate: Certificate {
                certificate: vec![certificate_der],
                private_key,
            },
        }
    }

    /// get_fingerprints returns certificate fingerprints, one of which is
    /// computed with the digest algorithm used in the certificate signature
    /// (sha-256 for every certificate this implementation provisions).
    pub fn get_fingerprints(&self) -> Result<Vec<RTCDtlsFingerprint>> {
        let mut fingerprints = vec![];
        for certificate in &self.certificate.certificate {
            let value = fingerprint_certificate("sha-256", certificate)
                .map_err(|e| Error::ErrCertificate(e.to_string()))?;
            fingerprints.push(RTCDtlsFingerprint {
                algorithm: "sha-256".to_owned(),
                value,
            });
        }
        Ok(fingerprints)
    }

    pub(crate) fn dtls_certificate(&self) -> Certificate {
        self.certificate.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_generate_certificate() -> Result<()> {
        let cert = RTCCertificate::generate()?;
        let fingerprints = cert.get_fingerprints()?;
        assert_eq!(fingerprints.len(), 1);
        assert_eq!(fingerprints[0].algorithm, "sha-256");
        // 32 hex pairs joined by colons
        assert_eq!(fingerprints[0].value.len(), 95);
        Ok(())
    }

    #[test]
    fn test_generated_certificates_differ() -> Result<()> {
        let a = RTCCertificate::generate()?;
        let b = RTCCertificate::generate()?;
        assert_ne!(a.get_fingerprints()?, b.get_fingerprints()?);
        Ok(())
    }
}
