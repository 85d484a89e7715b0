use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, RsaKeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_ASN1,
    ECDSA_P256_SHA256_ASN1_SIGNING, RSA_PKCS1_2048_8192_SHA256, RSA_PKCS1_SHA256,
};
use sha2::{Digest, Sha256, Sha384, Sha512};
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

use crate::error::{Error, Result};
use crate::signature_hash_algorithm::*;

/// CryptoPrivateKeyKind picks the signing algorithm for the local identity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CryptoPrivateKeyKind {
    Ecdsa256,
    Rsa256,
}

/// CryptoPrivateKey holds the local private key as PKCS#8 DER; ring key
/// pairs are rebuilt from it on demand so the type stays cloneable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoPrivateKey {
    pub kind: CryptoPrivateKeyKind,
    pub serialized_der: Vec<u8>,
}

impl CryptoPrivateKey {
    pub fn from_pkcs8_ecdsa256(der: &[u8]) -> Self {
        CryptoPrivateKey {
            kind: CryptoPrivateKeyKind::Ecdsa256,
            serialized_der: der.to_vec(),
        }
    }

    pub fn from_pkcs8_rsa256(der: &[u8]) -> Self {
        CryptoPrivateKey {
            kind: CryptoPrivateKeyKind::Rsa256,
            serialized_der: der.to_vec(),
        }
    }

    pub fn signature_hash_algorithm(&self) -> SignatureHashAlgorithm {
        match self.kind {
            CryptoPrivateKeyKind::Ecdsa256 => SignatureHashAlgorithm {
                hash: HashAlgorithm::Sha256,
                signature: SignatureAlgorithm::Ecdsa,
            },
            CryptoPrivateKeyKind::Rsa256 => SignatureHashAlgorithm {
                hash: HashAlgorithm::Sha256,
                signature: SignatureAlgorithm::Rsa,
            },
        }
    }

    /// sign produces a signature over data with the configured algorithm.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let rng = SystemRandom::new();
        match self.kind {
            CryptoPrivateKeyKind::Ecdsa256 => {
                let key_pair = EcdsaKeyPair::from_pkcs8(
                    &ECDSA_P256_SHA256_ASN1_SIGNING,
                    &self.serialized_der,
                    &rng,
                )
                .map_err(|e| Error::ErrCrypto(e.to_string()))?;
                let signature = key_pair
                    .sign(&rng, data)
                    .map_err(|e| Error::ErrCrypto(e.to_string()))?;
                Ok(signature.as_ref().to_vec())
            }
            CryptoPrivateKeyKind::Rsa256 => {
                let key_pair = RsaKeyPair::from_pkcs8(&self.serialized_der)
                    .map_err(|e| Error::ErrCrypto(e.to_string()))?;
                let mut signature = vec![0u8; key_pair.public().modulus_len()];
                key_pair
                    .sign(&RSA_PKCS1_SHA256, &rng, data, &mut signature)
                    .map_err(|e| Error::ErrCrypto(e.to_string()))?;
                Ok(signature)
            }
        }
    }
}

/// Certificate is the local identity: a leaf certificate chain in DER plus
/// the matching private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub certificate: Vec<Vec<u8>>,
    pub private_key: CryptoPrivateKey,
}

impl Certificate {
    /// generate_self_signed creates a fresh ECDSA-P256 identity for the
    /// given subject names.
    pub fn generate_self_signed(subject_alt_names: Vec<String>) -> Result<Self> {
        let key_pair = rcgen::KeyPair::generate()
            .map_err(|e| Error::ErrCertificateGeneration(e.to_string()))?;
        let serialized_der = key_pair.serialize_der();

        let params = rcgen::CertificateParams::new(subject_alt_names)
            .map_err(|e| Error::ErrCertificateGeneration(e.to_string()))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| Error::ErrCertificateGeneration(e.to_string()))?;

        Ok(Certificate {
            certificate: vec![cert.der().to_vec()],
            private_key: CryptoPrivateKey::from_pkcs8_ecdsa256(&serialized_der),
        })
    }
}

/// generate_key_signature signs the ServerKeyExchange parameters:
/// client_random ‖ server_random ‖ ECDH params.
///
/// https://tools.ietf.org/html/rfc4492#section-5.4
pub(crate) fn generate_key_signature(
    client_random: &[u8],
    server_random: &[u8],
    params: &[u8],
    private_key: &CryptoPrivateKey,
) -> Result<Vec<u8>> {
    let msg = value_key_message(client_random, server_random, params);
    private_key.sign(&msg)
}

/// verify_key_signature checks a peer's ServerKeyExchange signature against
/// its leaf certificate.
pub(crate) fn verify_key_signature(
    client_random: &[u8],
    server_random: &[u8],
    params: &[u8],
    algorithm: &SignatureHashAlgorithm,
    signature: &[u8],
    certificate_der: &[u8],
) -> Result<()> {
    let msg = value_key_message(client_random, server_random, params);
    verify_signature(&msg, algorithm, signature, certificate_der)
}

/// verify_certificate_verify checks a CertificateVerify signature over the
/// handshake transcript.
pub(crate) fn verify_certificate_verify(
    handshake_transcript: &[u8],
    algorithm: &SignatureHashAlgorithm,
    signature: &[u8],
    certificate_der: &[u8],
) -> Result<()> {
    verify_signature(handshake_transcript, algorithm, signature, certificate_der)
        .map_err(|_| Error::ErrCertificateVerifyMismatch)
}

fn value_key_message(client_random: &[u8], server_random: &[u8], params: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(client_random.len() + server_random.len() + params.len());
    msg.extend_from_slice(client_random);
    msg.extend_from_slice(server_random);
    msg.extend_from_slice(params);
    msg
}

fn verify_signature(
    message: &[u8],
    algorithm: &SignatureHashAlgorithm,
    signature: &[u8],
    certificate_der: &[u8],
) -> Result<()> {
    if algorithm.hash != HashAlgorithm::Sha256 {
        return Err(Error::ErrKeySignatureUnsupported);
    }

    let (_, cert) = X509Certificate::from_der(certificate_der)
        .map_err(|e| Error::ErrCertificateParse(e.to_string()))?;
    let spki = cert.public_key();

    match (algorithm.signature, spki.parsed()) {
        (SignatureAlgorithm::Ecdsa, Ok(PublicKey::EC(ec))) => {
            let key = UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, ec.data());
            key.verify(message, signature)
                .map_err(|_| Error::ErrKeySignatureMismatch)
        }
        (SignatureAlgorithm::Rsa, Ok(PublicKey::RSA(_))) => {
            let key = UnparsedPublicKey::new(
                &RSA_PKCS1_2048_8192_SHA256,
                spki.subject_public_key.data.as_ref(),
            );
            key.verify(message, signature)
                .map_err(|_| Error::ErrKeySignatureMismatch)
        }
        _ => Err(Error::ErrKeySignatureUnsupported),
    }
}

/// fingerprint_certificate hashes a certificate with the named algorithm and
/// renders the digest as lowercase colon-separated hex, the SDP
/// `a=fingerprint` form.
pub fn fingerprint_certificate(algorithm: &str, certificate_der: &[u8]) -> Result<String> {
    let digest: Vec<u8> = match algorithm.to_ascii_lowercase().as_str() {
        "sha-256" => Sha256::digest(certificate_der).to_vec(),
        "sha-384" => Sha384::digest(certificate_der).to_vec(),
        "sha-512" => Sha512::digest(certificate_der).to_vec(),
        _ => return Err(Error::ErrKeySignatureUnsupported),
    };
    let hex: Vec<String> = digest.iter().map(|b| format!("{b:02x}")).collect();
    Ok(hex.join(":"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_generate_self_signed() -> Result<()> {
        let cert = Certificate::generate_self_signed(vec!["quickrtc".to_owned()])?;
        assert_eq!(cert.certificate.len(), 1);
        assert!(!cert.certificate[0].is_empty());
        assert_eq!(cert.private_key.kind, CryptoPrivateKeyKind::Ecdsa256);
        Ok(())
    }

    #[test]
    fn test_key_signature_round_trip() -> Result<()> {
        let cert = Certificate::generate_self_signed(vec!["quickrtc".to_owned()])?;
        let client_random = [1u8; 32];
        let server_random = [2u8; 32];
        let params = [3u8; 69];

        let signature = generate_key_signature(
            &client_random,
            &server_random,
            &params,
            &cert.private_key,
        )?;

        verify_key_signature(
            &client_random,
            &server_random,
            &params,
            &cert.private_key.signature_hash_algorithm(),
            &signature,
            &cert.certificate[0],
        )?;

        // tampered params must fail
        let result = verify_key_signature(
            &client_random,
            &server_random,
            &[4u8; 69],
            &cert.private_key.signature_hash_algorithm(),
            &signature,
            &cert.certificate[0],
        );
        assert_eq!(result, Err(Error::ErrKeySignatureMismatch));
        Ok(())
    }

    #[test]
    fn test_fingerprint_format() -> Result<()> {
        let cert = Certificate::generate_self_signed(vec!["quickrtc".to_owned()])?;
        let fp = fingerprint_certificate("sha-256", &cert.certificate[0])?;
        assert_eq!(fp.len(), 32 * 3 - 1);
        assert!(fp
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase() || c == ':'));
        Ok(())
    }

    #[test]
    fn test_fingerprint_unknown_algorithm() {
        let result = fingerprint_certificate("md2", &[1, 2, 3]);
        assert_eq!(result, Err(Error::ErrKeySignatureUnsupported));
    }
}
