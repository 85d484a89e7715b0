use std::fmt;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Nonce};
use rand::RngCore;

use crate::content::ContentType;
use crate::error::{Error, Result};
use crate::prf::EncryptionKeys;
use crate::record_layer::RecordLayerHeader;
use crate::signature_hash_algorithm::SignatureAlgorithm;

/// CipherSuiteId is the registry value of a cipher suite.
///
/// https://www.iana.org/assignments/tls-parameters/tls-parameters.xhtml
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CipherSuiteId {
    TlsEcdheEcdsaWithAes128GcmSha256 = 0xc02b,
    TlsEcdheRsaWithAes128GcmSha256 = 0xc02f,
    Unsupported,
}

impl fmt::Display for CipherSuiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CipherSuiteId::TlsEcdheEcdsaWithAes128GcmSha256 => {
                "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256"
            }
            CipherSuiteId::TlsEcdheRsaWithAes128GcmSha256 => {
                "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"
            }
            CipherSuiteId::Unsupported => "Unsupported CipherSuiteID",
        };
        write!(f, "{s}")
    }
}

impl From<u16> for CipherSuiteId {
    fn from(val: u16) -> Self {
        match val {
            0xc02b => CipherSuiteId::TlsEcdheEcdsaWithAes128GcmSha256,
            0xc02f => CipherSuiteId::TlsEcdheRsaWithAes128GcmSha256,
            _ => CipherSuiteId::Unsupported,
        }
    }
}

impl CipherSuiteId {
    /// certificate_type returns the signature algorithm the suite's
    /// certificate must carry.
    pub(crate) fn certificate_type(&self) -> SignatureAlgorithm {
        match *self {
            CipherSuiteId::TlsEcdheEcdsaWithAes128GcmSha256 => SignatureAlgorithm::Ecdsa,
            CipherSuiteId::TlsEcdheRsaWithAes128GcmSha256 => SignatureAlgorithm::Rsa,
            CipherSuiteId::Unsupported => SignatureAlgorithm::Unsupported,
        }
    }
}

/// The suites this profile offers, in preference order. Both are mandatory
/// AES-128-GCM ECDHE suites.
pub(crate) fn default_cipher_suites() -> Vec<CipherSuiteId> {
    vec![
        CipherSuiteId::TlsEcdheEcdsaWithAes128GcmSha256,
        CipherSuiteId::TlsEcdheRsaWithAes128GcmSha256,
    ]
}

pub(crate) const PRF_KEY_LEN: usize = 16;
pub(crate) const PRF_IV_LEN: usize = 4;

const GCM_TAG_LENGTH: usize = 16;
const GCM_NONCE_LENGTH: usize = 12;
const GCM_EXPLICIT_NONCE_LENGTH: usize = 8;

/// CipherSuite performs AES-128-GCM record protection once the handshake
/// keys exist.
///
/// Nonce: 4-byte implicit write IV ‖ 8-byte explicit part carried on the
/// wire. AAD: seq_num(epoch‖seq) ‖ type ‖ version ‖ plaintext length,
/// RFC 5246 Section 6.2.3.3.
pub(crate) struct CipherSuite {
    local_key: Vec<u8>,
    local_write_iv: Vec<u8>,
    remote_key: Vec<u8>,
    remote_write_iv: Vec<u8>,
}

impl CipherSuite {
    pub(crate) fn new(keys: &EncryptionKeys, is_client: bool) -> Self {
        if is_client {
            CipherSuite {
                local_key: keys.client_write_key.clone(),
                local_write_iv: keys.client_write_iv.clone(),
                remote_key: keys.server_write_key.clone(),
                remote_write_iv: keys.server_write_iv.clone(),
            }
        } else {
            CipherSuite {
                local_key: keys.server_write_key.clone(),
                local_write_iv: keys.server_write_iv.clone(),
                remote_key: keys.client_write_key.clone(),
                remote_write_iv: keys.client_write_iv.clone(),
            }
        }
    }

    /// encrypt seals a record payload, returning explicit-nonce ‖ ciphertext
    /// ‖ tag, ready to be placed after the record header.
    pub(crate) fn encrypt(&self, header: &RecordLayerHeader, payload: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes128Gcm::new_from_slice(&self.local_key)
            .map_err(|e| Error::ErrCrypto(e.to_string()))?;

        let mut explicit_nonce = [0u8; GCM_EXPLICIT_NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut explicit_nonce);

        let mut nonce = [0u8; GCM_NONCE_LENGTH];
        nonce[..PRF_IV_LEN].copy_from_slice(&self.local_write_iv);
        nonce[PRF_IV_LEN..].copy_from_slice(&explicit_nonce);

        let aad = additional_data(header, payload.len());
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: payload,
                    aad: &aad,
                },
            )
            .map_err(|_| Error::ErrCrypto("gcm encrypt".to_owned()))?;

        let mut out = Vec::with_capacity(GCM_EXPLICIT_NONCE_LENGTH + ciphertext.len());
        out.extend_from_slice(&explicit_nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// decrypt opens explicit-nonce ‖ ciphertext ‖ tag back into the record
    /// payload.
    pub(crate) fn decrypt(&self, header: &RecordLayerHeader, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() < GCM_EXPLICIT_NONCE_LENGTH + GCM_TAG_LENGTH {
            return Err(Error::ErrBufferTooSmall);
        }

        let cipher = Aes128Gcm::new_from_slice(&self.remote_key)
            .map_err(|e| Error::ErrCrypto(e.to_string()))?;

        let mut nonce = [0u8; GCM_NONCE_LENGTH];
        nonce[..PRF_IV_LEN].copy_from_slice(&self.remote_write_iv);
        nonce[PRF_IV_LEN..].copy_from_slice(&payload[..GCM_EXPLICIT_NONCE_LENGTH]);

        let ciphertext = &payload[GCM_EXPLICIT_NONCE_LENGTH..];
        let plaintext_len = ciphertext.len() - GCM_TAG_LENGTH;
        let aad = additional_data(header, plaintext_len);

        cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| Error::ErrDecryptFailed)
    }
}

/// seq_num in the AAD is the 16-bit epoch concatenated with the 48-bit
/// sequence number, RFC 6347 Section 4.1.2.1.
fn additional_data(header: &RecordLayerHeader, payload_len: usize) -> [u8; 13] {
    let mut aad = [0u8; 13];
    aad[..2].copy_from_slice(&header.epoch.to_be_bytes());
    aad[2..8].copy_from_slice(&header.sequence_number.to_be_bytes()[2..]);
    aad[8] = header.content_type as u8;
    aad[9] = header.protocol_version.major;
    aad[10] = header.protocol_version.minor;
    aad[11..13].copy_from_slice(&(payload_len as u16).to_be_bytes());
    aad
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::record_layer::PROTOCOL_VERSION1_2;

    fn test_keys() -> EncryptionKeys {
        EncryptionKeys {
            master_secret: vec![0u8; 48],
            client_write_key: (0u8..16).collect(),
            server_write_key: (16u8..32).collect(),
            client_write_iv: vec![1, 2, 3, 4],
            server_write_iv: vec![5, 6, 7, 8],
        }
    }

    fn header(len: u16) -> RecordLayerHeader {
        RecordLayerHeader {
            content_type: ContentType::ApplicationData,
            protocol_version: PROTOCOL_VERSION1_2,
            epoch: 1,
            sequence_number: 42,
            content_len: len,
        }
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() -> Result<()> {
        let client = CipherSuite::new(&test_keys(), true);
        let server = CipherSuite::new(&test_keys(), false);

        let payload = b"hello over dtls";
        let sealed = client.encrypt(&header(payload.len() as u16), payload)?;
        assert_ne!(&sealed[GCM_EXPLICIT_NONCE_LENGTH..], payload);

        let opened = server.decrypt(&header(payload.len() as u16), &sealed)?;
        assert_eq!(opened, payload);
        Ok(())
    }

    #[test]
    fn test_decrypt_rejects_tampering() -> Result<()> {
        let client = CipherSuite::new(&test_keys(), true);
        let server = CipherSuite::new(&test_keys(), false);

        let payload = b"hello over dtls";
        let mut sealed = client.encrypt(&header(payload.len() as u16), payload)?;
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;

        assert_eq!(
            server.decrypt(&header(payload.len() as u16), &sealed),
            Err(Error::ErrDecryptFailed)
        );
        Ok(())
    }

    #[test]
    fn test_decrypt_rejects_wrong_aad() -> Result<()> {
        let client = CipherSuite::new(&test_keys(), true);
        let server = CipherSuite::new(&test_keys(), false);

        let payload = b"hello over dtls";
        let sealed = client.encrypt(&header(payload.len() as u16), payload)?;

        let mut wrong = header(payload.len() as u16);
        wrong.sequence_number = 43;
        assert_eq!(
            server.decrypt(&wrong, &sealed),
            Err(Error::ErrDecryptFailed)
        );
        Ok(())
    }

    #[test]
    fn test_cipher_suite_id_from_u16() {
        assert_eq!(
            CipherSuiteId::from(0xc02bu16),
            CipherSuiteId::TlsEcdheEcdsaWithAes128GcmSha256
        );
        assert_eq!(
            CipherSuiteId::from(0xc02fu16),
            CipherSuiteId::TlsEcdheRsaWithAes128GcmSha256
        );
        assert_eq!(CipherSuiteId::from(0x0000u16), CipherSuiteId::Unsupported);
    }
}
