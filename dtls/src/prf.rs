use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

pub(crate) const PRF_MASTER_SECRET_LABEL: &str = "master secret";
pub(crate) const PRF_KEY_EXPANSION_LABEL: &str = "key expansion";
pub(crate) const PRF_VERIFY_DATA_CLIENT_LABEL: &str = "client finished";
pub(crate) const PRF_VERIFY_DATA_SERVER_LABEL: &str = "server finished";

pub(crate) const MASTER_SECRET_LENGTH: usize = 48;
pub(crate) const VERIFY_DATA_LENGTH: usize = 12;

/// EncryptionKeys is the key block carved out of the PRF key expansion.
#[derive(PartialEq, Eq, Debug, Clone)]
pub(crate) struct EncryptionKeys {
    pub(crate) master_secret: Vec<u8>,
    pub(crate) client_write_key: Vec<u8>,
    pub(crate) server_write_key: Vec<u8>,
    pub(crate) client_write_iv: Vec<u8>,
    pub(crate) server_write_iv: Vec<u8>,
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| Error::ErrCrypto(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// ```text
///  P_hash(secret, seed) = HMAC_hash(secret, A(1) + seed) +
///                         HMAC_hash(secret, A(2) + seed) +
///                         HMAC_hash(secret, A(3) + seed) + ...
///
///  A() is defined as:
///
///     A(0) = seed
///     A(i) = HMAC_hash(secret, A(i-1))
/// ```
///
/// https://tools.ietf.org/html/rfc5246#section-5
pub(crate) fn prf_p_hash(secret: &[u8], seed: &[u8], requested_length: usize) -> Result<Vec<u8>> {
    let mut last_round = seed.to_vec();
    let mut out = vec![];

    while out.len() < requested_length {
        last_round = hmac_sha256(secret, &last_round)?;

        let mut last_round_seed = last_round.clone();
        last_round_seed.extend_from_slice(seed);
        let with_secret = hmac_sha256(secret, &last_round_seed)?;

        out.extend_from_slice(&with_secret);
    }

    out.truncate(requested_length);
    Ok(out)
}

pub(crate) fn prf_master_secret(
    pre_master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
) -> Result<Vec<u8>> {
    let mut seed = PRF_MASTER_SECRET_LABEL.as_bytes().to_vec();
    seed.extend_from_slice(client_random);
    seed.extend_from_slice(server_random);
    prf_p_hash(pre_master_secret, &seed, MASTER_SECRET_LENGTH)
}

pub(crate) fn prf_encryption_keys(
    master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
    prf_key_len: usize,
    prf_iv_len: usize,
) -> Result<EncryptionKeys> {
    let mut seed = PRF_KEY_EXPANSION_LABEL.as_bytes().to_vec();
    seed.extend_from_slice(server_random);
    seed.extend_from_slice(client_random);

    let material = prf_p_hash(master_secret, &seed, 2 * prf_key_len + 2 * prf_iv_len)?;
    let mut key_material = &material[..];

    let client_write_key = key_material[..prf_key_len].to_vec();
    key_material = &key_material[prf_key_len..];

    let server_write_key = key_material[..prf_key_len].to_vec();
    key_material = &key_material[prf_key_len..];

    let client_write_iv = key_material[..prf_iv_len].to_vec();
    key_material = &key_material[prf_iv_len..];

    let server_write_iv = key_material[..prf_iv_len].to_vec();

    Ok(EncryptionKeys {
        master_secret: master_secret.to_vec(),
        client_write_key,
        server_write_key,
        client_write_iv,
        server_write_iv,
    })
}

/// prf_verify_data computes the 12-byte Finished verify_data over the
/// transcript hash.
pub(crate) fn prf_verify_data(
    master_secret: &[u8],
    handshake_transcript: &[u8],
    label: &str,
) -> Result<Vec<u8>> {
    let mut hasher = Sha256::new();
    hasher.update(handshake_transcript);
    let session_hash = hasher.finalize();

    let mut seed = label.as_bytes().to_vec();
    seed.extend_from_slice(&session_hash);
    prf_p_hash(master_secret, &seed, VERIFY_DATA_LENGTH)
}

pub(crate) fn prf_verify_data_client(
    master_secret: &[u8],
    handshake_transcript: &[u8],
) -> Result<Vec<u8>> {
    prf_verify_data(master_secret, handshake_transcript, PRF_VERIFY_DATA_CLIENT_LABEL)
}

pub(crate) fn prf_verify_data_server(
    master_secret: &[u8],
    handshake_transcript: &[u8],
) -> Result<Vec<u8>> {
    prf_verify_data(master_secret, handshake_transcript, PRF_VERIFY_DATA_SERVER_LABEL)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_prf_p_hash_deterministic_and_sized() -> Result<()> {
        let secret = b"secret";
        let seed = b"seed";

        for length in [1usize, 12, 32, 48, 80, 100] {
            let a = prf_p_hash(secret, seed, length)?;
            let b = prf_p_hash(secret, seed, length)?;
            assert_eq!(a.len(), length);
            assert_eq!(a, b);
        }
        Ok(())
    }

    #[test]
    fn test_prf_master_secret_known_vector() -> Result<()> {
        // TLS 1.2 PRF (SHA-256) test vector,
        // https://mailarchive.ietf.org/arch/msg/tls/fzVCzk-z3FShgGJ6DOXqM1ydxms/
        let secret = [
            0x9b, 0xbe, 0x43, 0x6b, 0xa9, 0x40, 0xf0, 0x17, 0xb1, 0x76, 0x52, 0x84, 0x9a, 0x71,
            0xdb, 0x35,
        ];
        let seed_core = [
            0xa0, 0xba, 0x9f, 0x93, 0x6c, 0xda, 0x31, 0x18, 0x27, 0xa6, 0xf7, 0x96, 0xff, 0xd5,
            0x19, 0x8c,
        ];
        let mut seed = b"test label".to_vec();
        seed.extend_from_slice(&seed_core);

        let out = prf_p_hash(&secret, &seed, 100)?;
        let expected_prefix = [
            0xe3, 0xf2, 0x29, 0xba, 0x72, 0x7b, 0xe1, 0x7b, 0x8d, 0x12, 0x26, 0x20, 0x55, 0x7c,
            0xd4, 0x53,
        ];
        assert_eq!(&out[..16], &expected_prefix);
        Ok(())
    }

    #[test]
    fn test_key_expansion_lengths() -> Result<()> {
        let keys = prf_encryption_keys(&[0u8; 48], &[1u8; 32], &[2u8; 32], 16, 4)?;
        assert_eq!(keys.client_write_key.len(), 16);
        assert_eq!(keys.server_write_key.len(), 16);
        assert_eq!(keys.client_write_iv.len(), 4);
        assert_eq!(keys.server_write_iv.len(), 4);
        assert_ne!(keys.client_write_key, keys.server_write_key);
        Ok(())
    }

    #[test]
    fn test_verify_data_length() -> Result<()> {
        let v = prf_verify_data_client(&[0u8; 48], b"transcript")?;
        assert_eq!(v.len(), VERIFY_DATA_LENGTH);
        Ok(())
    }
}
