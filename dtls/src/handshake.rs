use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, BytesMut};
use rand::RngCore;

use crate::cipher_suite::CipherSuiteId;
use crate::error::{Error, Result};
use crate::record_layer::{ProtocolVersion, PROTOCOL_VERSION1_2};
use crate::signature_hash_algorithm::*;

pub(crate) const HANDSHAKE_HEADER_SIZE: usize = 12;
pub(crate) const RANDOM_LENGTH: usize = 32;
const RANDOM_BYTES_LENGTH: usize = 28;

/// NamedCurve registry value for secp256r1, the single curve of this
/// profile.
pub(crate) const NAMED_CURVE_P256: u16 = 0x0017;
const ELLIPTIC_CURVE_TYPE_NAMED: u8 = 0x03;

/// HandshakeType is the msg_type of a handshake message.
///
/// https://tools.ietf.org/html/rfc5246#section-7.4
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HandshakeType {
    HelloRequest = 0,
    ClientHello = 1,
    ServerHello = 2,
    HelloVerifyRequest = 3,
    Certificate = 11,
    ServerKeyExchange = 12,
    CertificateRequest = 13,
    ServerHelloDone = 14,
    CertificateVerify = 15,
    ClientKeyExchange = 16,
    Finished = 20,
    Invalid,
}

impl From<u8> for HandshakeType {
    fn from(val: u8) -> Self {
        match val {
            0 => HandshakeType::HelloRequest,
            1 => HandshakeType::ClientHello,
            2 => HandshakeType::ServerHello,
            3 => HandshakeType::HelloVerifyRequest,
            11 => HandshakeType::Certificate,
            12 => HandshakeType::ServerKeyExchange,
            13 => HandshakeType::CertificateRequest,
            14 => HandshakeType::ServerHelloDone,
            15 => HandshakeType::CertificateVerify,
            16 => HandshakeType::ClientKeyExchange,
            20 => HandshakeType::Finished,
            _ => HandshakeType::Invalid,
        }
    }
}

impl fmt::Display for HandshakeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// HandshakeHeader is the DTLS 12-byte handshake prefix: the TLS header plus
/// message_seq and fragmentation fields.
///
/// https://tools.ietf.org/html/rfc6347#section-4.2.2
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct HandshakeHeader {
    pub(crate) handshake_type: HandshakeType,
    pub(crate) length: u32, // uint24
    pub(crate) message_sequence: u16,
    pub(crate) fragment_offset: u32, // uint24
    pub(crate) fragment_length: u32, // uint24
}

fn put_u24(writer: &mut BytesMut, val: u32) {
    writer.put_slice(&val.to_be_bytes()[1..]);
}

fn get_u24(raw: &[u8]) -> u32 {
    u32::from_be_bytes([0, raw[0], raw[1], raw[2]])
}

impl HandshakeHeader {
    pub(crate) fn marshal_to(&self, writer: &mut BytesMut) {
        writer.put_u8(self.handshake_type as u8);
        put_u24(writer, self.length);
        writer.put_u16(self.message_sequence);
        put_u24(writer, self.fragment_offset);
        put_u24(writer, self.fragment_length);
    }

    pub(crate) fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.len() < HANDSHAKE_HEADER_SIZE {
            return Err(Error::ErrBufferTooSmall);
        }
        let handshake_type = HandshakeType::from(raw[0]);
        if handshake_type == HandshakeType::Invalid {
            return Err(Error::ErrInvalidHandshakeType);
        }
        Ok(HandshakeHeader {
            handshake_type,
            length: get_u24(&raw[1..]),
            message_sequence: u16::from_be_bytes([raw[4], raw[5]]),
            fragment_offset: get_u24(&raw[6..]),
            fragment_length: get_u24(&raw[9..]),
        })
    }
}

/// HandshakeRandom is the 32-byte random: a unix timestamp prefix followed
/// by 28 random bytes.
///
/// https://tools.ietf.org/html/rfc4346#section-7.4.1.2
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HandshakeRandom {
    pub(crate) gmt_unix_time: u32,
    pub(crate) random_bytes: [u8; RANDOM_BYTES_LENGTH],
}

impl Default for HandshakeRandom {
    fn default() -> Self {
        HandshakeRandom {
            gmt_unix_time: 0,
            random_bytes: [0u8; RANDOM_BYTES_LENGTH],
        }
    }
}

impl HandshakeRandom {
    pub(crate) fn generate() -> Self {
        let gmt_unix_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let mut random_bytes = [0u8; RANDOM_BYTES_LENGTH];
        rand::thread_rng().fill_bytes(&mut random_bytes);
        HandshakeRandom {
            gmt_unix_time,
            random_bytes,
        }
    }

    pub(crate) fn marshal(&self) -> [u8; RANDOM_LENGTH] {
        let mut out = [0u8; RANDOM_LENGTH];
        out[..4].copy_from_slice(&self.gmt_unix_time.to_be_bytes());
        out[4..].copy_from_slice(&self.random_bytes);
        out
    }

    pub(crate) fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.len() < RANDOM_LENGTH {
            return Err(Error::ErrBufferTooSmall);
        }
        let mut random_bytes = [0u8; RANDOM_BYTES_LENGTH];
        random_bytes.copy_from_slice(&raw[4..RANDOM_LENGTH]);
        Ok(HandshakeRandom {
            gmt_unix_time: u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]),
            random_bytes,
        })
    }
}

/// The extension block this profile's ClientHello carries: supported groups
/// (secp256r1), point formats (uncompressed), signature algorithms, and an
/// empty renegotiation_info. Extensions are treated as opaque bytes by the
/// parser; negotiation is fixed by the profile.
pub(crate) fn client_extensions() -> Vec<u8> {
    let mut body = BytesMut::new();

    // supported_groups (10)
    body.put_u16(10);
    body.put_u16(4);
    body.put_u16(2);
    body.put_u16(NAMED_CURVE_P256);

    // ec_point_formats (11): uncompressed
    body.put_u16(11);
    body.put_u16(2);
    body.put_u8(1);
    body.put_u8(0);

    // signature_algorithms (13)
    let schemes = default_signature_schemes();
    body.put_u16(13);
    body.put_u16((2 + schemes.len() * 2) as u16);
    body.put_u16((schemes.len() * 2) as u16);
    for scheme in schemes {
        body.put_slice(&scheme.marshal());
    }

    // renegotiation_info (0xff01): empty
    body.put_u16(0xff01);
    body.put_u16(1);
    body.put_u8(0);

    body.to_vec()
}

/// The server's extension block: point formats and empty renegotiation_info.
pub(crate) fn server_extensions() -> Vec<u8> {
    let mut body = BytesMut::new();

    body.put_u16(11);
    body.put_u16(2);
    body.put_u8(1);
    body.put_u8(0);

    body.put_u16(0xff01);
    body.put_u16(1);
    body.put_u8(0);

    body.to_vec()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HandshakeMessageClientHello {
    pub(crate) version: ProtocolVersion,
    pub(crate) random: HandshakeRandom,
    pub(crate) cookie: Vec<u8>,
    pub(crate) cipher_suites: Vec<CipherSuiteId>,
    pub(crate) extensions: Vec<u8>,
}

impl HandshakeMessageClientHello {
    pub(crate) fn marshal(&self) -> Vec<u8> {
        let mut out = BytesMut::new();
        out.put_u8(self.version.major);
        out.put_u8(self.version.minor);
        out.put_slice(&self.random.marshal());
        out.put_u8(0); // empty session id
        out.put_u8(self.cookie.len() as u8);
        out.put_slice(&self.cookie);
        out.put_u16((self.cipher_suites.len() * 2) as u16);
        for suite in &self.cipher_suites {
            out.put_u16(*suite as u16);
        }
        out.put_u8(1); // compression methods
        out.put_u8(0); // null compression
        out.put_u16(self.extensions.len() as u16);
        out.put_slice(&self.extensions);
        out.to_vec()
    }

    pub(crate) fn unmarshal(raw: &[u8]) -> Result<Self> {
        let mut reader = raw;
        if reader.remaining() < 2 + RANDOM_LENGTH + 1 {
            return Err(Error::ErrBufferTooSmall);
        }
        let version = ProtocolVersion {
            major: reader.get_u8(),
            minor: reader.get_u8(),
        };
        let random = HandshakeRandom::unmarshal(&reader[..RANDOM_LENGTH])?;
        reader.advance(RANDOM_LENGTH);

        let session_id_len = reader.get_u8() as usize;
        if reader.remaining() < session_id_len + 1 {
            return Err(Error::ErrBufferTooSmall);
        }
        reader.advance(session_id_len);

        let cookie_len = reader.get_u8() as usize;
        if reader.remaining() < cookie_len + 2 {
            return Err(Error::ErrBufferTooSmall);
        }
        let cookie = reader[..cookie_len].to_vec();
        reader.advance(cookie_len);

        let cipher_suites_len = reader.get_u16() as usize;
        if reader.remaining() < cipher_suites_len + 2 || cipher_suites_len % 2 != 0 {
            return Err(Error::ErrBufferTooSmall);
        }
        let mut cipher_suites = vec![];
        for _ in 0..cipher_suites_len / 2 {
            let id = CipherSuiteId::from(reader.get_u16());
            if id != CipherSuiteId::Unsupported {
                cipher_suites.push(id);
            }
        }

        let compression_len = reader.get_u8() as usize;
        if reader.remaining() < compression_len {
            return Err(Error::ErrBufferTooSmall);
        }
        reader.advance(compression_len);

        let extensions = if reader.remaining() >= 2 {
            let ext_len = reader.get_u16() as usize;
            if reader.remaining() < ext_len {
                return Err(Error::ErrBufferTooSmall);
            }
            reader[..ext_len].to_vec()
        } else {
            vec![]
        };

        Ok(HandshakeMessageClientHello {
            version,
            random,
            cookie,
            cipher_suites,
            extensions,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HandshakeMessageHelloVerifyRequest {
    pub(crate) version: ProtocolVersion,
    pub(crate) cookie: Vec<u8>,
}

impl HandshakeMessageHelloVerifyRequest {
    pub(crate) fn marshal(&self) -> Vec<u8> {
        let mut out = BytesMut::new();
        out.put_u8(self.version.major);
        out.put_u8(self.version.minor);
        out.put_u8(self.cookie.len() as u8);
        out.put_slice(&self.cookie);
        out.to_vec()
    }

    pub(crate) fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.len() < 3 {
            return Err(Error::ErrBufferTooSmall);
        }
        let cookie_len = raw[2] as usize;
        if raw.len() < 3 + cookie_len {
            return Err(Error::ErrBufferTooSmall);
        }
        Ok(HandshakeMessageHelloVerifyRequest {
            version: ProtocolVersion {
                major: raw[0],
                minor: raw[1],
            },
            cookie: raw[3..3 + cookie_len].to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HandshakeMessageServerHello {
    pub(crate) version: ProtocolVersion,
    pub(crate) random: HandshakeRandom,
    pub(crate) cipher_suite: CipherSuiteId,
    pub(crate) extensions: Vec<u8>,
}

impl HandshakeMessageServerHello {
    pub(crate) fn marshal(&self) -> Vec<u8> {
        let mut out = BytesMut::new();
        out.put_u8(self.version.major);
        out.put_u8(self.version.minor);
        out.put_slice(&self.random.marshal());
        out.put_u8(0); // empty session id
        out.put_u16(self.cipher_suite as u16);
        out.put_u8(0); // null compression
        out.put_u16(self.extensions.len() as u16);
        out.put_slice(&self.extensions);
        out.to_vec()
    }

    pub(crate) fn unmarshal(raw: &[u8]) -> Result<Self> {
        let mut reader = raw;
        if reader.remaining() < 2 + RANDOM_LENGTH + 1 {
            return Err(Error::ErrBufferTooSmall);
        }
        let version = ProtocolVersion {
            major: reader.get_u8(),
            minor: reader.get_u8(),
        };
        let random = HandshakeRandom::unmarshal(&reader[..RANDOM_LENGTH])?;
        reader.advance(RANDOM_LENGTH);

        let session_id_len = reader.get_u8() as usize;
        if reader.remaining() < session_id_len + 3 {
            return Err(Error::ErrBufferTooSmall);
        }
        reader.advance(session_id_len);

        let cipher_suite = CipherSuiteId::from(reader.get_u16());
        if cipher_suite == CipherSuiteId::Unsupported {
            return Err(Error::ErrInvalidCipherSuite);
        }
        reader.advance(1); // compression

        let extensions = if reader.remaining() >= 2 {
            let ext_len = reader.get_u16() as usize;
            if reader.remaining() < ext_len {
                return Err(Error::ErrBufferTooSmall);
            }
            reader[..ext_len].to_vec()
        } else {
            vec![]
        };

        Ok(HandshakeMessageServerHello {
            version,
            random,
            cipher_suite,
            extensions,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct HandshakeMessageCertificate {
    pub(crate) certificate: Vec<Vec<u8>>,
}

impl HandshakeMessageCertificate {
    pub(crate) fn marshal(&self) -> Vec<u8> {
        let mut certs = BytesMut::new();
        for cert in &self.certificate {
            put_u24(&mut certs, cert.len() as u32);
            certs.put_slice(cert);
        }

        let mut out = BytesMut::new();
        put_u24(&mut out, certs.len() as u32);
        out.put_slice(&certs);
        out.to_vec()
    }

    pub(crate) fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.len() < 3 {
            return Err(Error::ErrBufferTooSmall);
        }
        let total = get_u24(raw) as usize;
        if raw.len() < 3 + total {
            return Err(Error::ErrLengthMismatch);
        }

        let mut certificate = vec![];
        let mut offset = 3;
        while offset < 3 + total {
            if raw.len() < offset + 3 {
                return Err(Error::ErrLengthMismatch);
            }
            let len = get_u24(&raw[offset..]) as usize;
            offset += 3;
            if raw.len() < offset + len {
                return Err(Error::ErrLengthMismatch);
            }
            certificate.push(raw[offset..offset + len].to_vec());
            offset += len;
        }

        Ok(HandshakeMessageCertificate { certificate })
    }
}

/// ServerKeyExchange for ECDHE: named-curve params plus a signature over
/// client_random ‖ server_random ‖ params.
///
/// https://tools.ietf.org/html/rfc4492#section-5.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HandshakeMessageServerKeyExchange {
    pub(crate) named_curve: u16,
    pub(crate) public_key: Vec<u8>,
    pub(crate) algorithm: SignatureHashAlgorithm,
    pub(crate) signature: Vec<u8>,
}

impl HandshakeMessageServerKeyExchange {
    /// params_bytes is the portion covered by the signature.
    pub(crate) fn params_bytes(&self) -> Vec<u8> {
        let mut out = BytesMut::new();
        out.put_u8(ELLIPTIC_CURVE_TYPE_NAMED);
        out.put_u16(self.named_curve);
        out.put_u8(self.public_key.len() as u8);
        out.put_slice(&self.public_key);
        out.to_vec()
    }

    pub(crate) fn marshal(&self) -> Vec<u8> {
        let mut out = BytesMut::from(&self.params_bytes()[..]);
        out.put_slice(&self.algorithm.marshal());
        out.put_u16(self.signature.len() as u16);
        out.put_slice(&self.signature);
        out.to_vec()
    }

    pub(crate) fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.len() < 4 {
            return Err(Error::ErrBufferTooSmall);
        }
        if raw[0] != ELLIPTIC_CURVE_TYPE_NAMED {
            return Err(Error::ErrInvalidNamedCurve);
        }
        let named_curve = u16::from_be_bytes([raw[1], raw[2]]);
        let pk_len = raw[3] as usize;
        if raw.len() < 4 + pk_len + 4 {
            return Err(Error::ErrBufferTooSmall);
        }
        let public_key = raw[4..4 + pk_len].to_vec();
        let mut offset = 4 + pk_len;

        let algorithm = SignatureHashAlgorithm::unmarshal(raw[offset], raw[offset + 1]);
        offset += 2;
        let sig_len = u16::from_be_bytes([raw[offset], raw[offset + 1]]) as usize;
        offset += 2;
        if raw.len() < offset + sig_len {
            return Err(Error::ErrBufferTooSmall);
        }
        let signature = raw[offset..offset + sig_len].to_vec();

        Ok(HandshakeMessageServerKeyExchange {
            named_curve,
            public_key,
            algorithm,
            signature,
        })
    }
}

const CERTIFICATE_TYPE_RSA_SIGN: u8 = 1;
const CERTIFICATE_TYPE_ECDSA_SIGN: u8 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HandshakeMessageCertificateRequest {
    pub(crate) certificate_types: Vec<u8>,
    pub(crate) signature_hash_algorithms: Vec<SignatureHashAlgorithm>,
}

impl Default for HandshakeMessageCertificateRequest {
    fn default() -> Self {
        HandshakeMessageCertificateRequest {
            certificate_types: vec![CERTIFICATE_TYPE_ECDSA_SIGN, CERTIFICATE_TYPE_RSA_SIGN],
            signature_hash_algorithms: default_signature_schemes(),
        }
    }
}

impl HandshakeMessageCertificateRequest {
    pub(crate) fn marshal(&self) -> Vec<u8> {
        let mut out = BytesMut::new();
        out.put_u8(self.certificate_types.len() as u8);
        out.put_slice(&self.certificate_types);
        out.put_u16((self.signature_hash_algorithms.len() * 2) as u16);
        for algorithm in &self.signature_hash_algorithms {
            out.put_slice(&algorithm.marshal());
        }
        out.put_u16(0); // no certificate authorities
        out.to_vec()
    }

    pub(crate) fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::ErrBufferTooSmall);
        }
        let types_len = raw[0] as usize;
        if raw.len() < 1 + types_len + 2 {
            return Err(Error::ErrBufferTooSmall);
        }
        let certificate_types = raw[1..1 + types_len].to_vec();
        let mut offset = 1 + types_len;

        let algos_len = u16::from_be_bytes([raw[offset], raw[offset + 1]]) as usize;
        offset += 2;
        if raw.len() < offset + algos_len || algos_len % 2 != 0 {
            return Err(Error::ErrBufferTooSmall);
        }
        let mut signature_hash_algorithms = vec![];
        for i in 0..algos_len / 2 {
            let algorithm =
                SignatureHashAlgorithm::unmarshal(raw[offset + i * 2], raw[offset + i * 2 + 1]);
            if algorithm.is_supported() {
                signature_hash_algorithms.push(algorithm);
            }
        }

        Ok(HandshakeMessageCertificateRequest {
            certificate_types,
            signature_hash_algorithms,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct HandshakeMessageClientKeyExchange {
    pub(crate) public_key: Vec<u8>,
}

impl HandshakeMessageClientKeyExchange {
    pub(crate) fn marshal(&self) -> Vec<u8> {
        let mut out = BytesMut::new();
        out.put_u8(self.public_key.len() as u8);
        out.put_slice(&self.public_key);
        out.to_vec()
    }

    pub(crate) fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::ErrBufferTooSmall);
        }
        let pk_len = raw[0] as usize;
        if raw.len() < 1 + pk_len {
            return Err(Error::ErrBufferTooSmall);
        }
        Ok(HandshakeMessageClientKeyExchange {
            public_key: raw[1..1 + pk_len].to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HandshakeMessageCertificateVerify {
    pub(crate) algorithm: SignatureHashAlgorithm,
    pub(crate) signature: Vec<u8>,
}

impl HandshakeMessageCertificateVerify {
    pub(crate) fn marshal(&self) -> Vec<u8> {
        let mut out = BytesMut::new();
        out.put_slice(&self.algorithm.marshal());
        out.put_u16(self.signature.len() as u16);
        out.put_slice(&self.signature);
        out.to_vec()
    }

    pub(crate) fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.len() < 4 {
            return Err(Error::ErrBufferTooSmall);
        }
        let algorithm = SignatureHashAlgorithm::unmarshal(raw[0], raw[1]);
        let sig_len = u16::from_be_bytes([raw[2], raw[3]]) as usize;
        if raw.len() < 4 + sig_len {
            return Err(Error::ErrBufferTooSmall);
        }
        Ok(HandshakeMessageCertificateVerify {
            algorithm,
            signature: raw[4..4 + sig_len].to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct HandshakeMessageFinished {
    pub(crate) verify_data: Vec<u8>,
}

impl HandshakeMessageFinished {
    pub(crate) fn marshal(&self) -> Vec<u8> {
        self.verify_data.clone()
    }

    pub(crate) fn unmarshal(raw: &[u8]) -> Result<Self> {
        Ok(HandshakeMessageFinished {
            verify_data: raw.to_vec(),
        })
    }
}

/// HandshakeMessage unifies all handshake bodies this profile exchanges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HandshakeMessage {
    ClientHello(HandshakeMessageClientHello),
    HelloVerifyRequest(HandshakeMessageHelloVerifyRequest),
    ServerHello(HandshakeMessageServerHello),
    Certificate(HandshakeMessageCertificate),
    ServerKeyExchange(HandshakeMessageServerKeyExchange),
    CertificateRequest(HandshakeMessageCertificateRequest),
    ServerHelloDone,
    ClientKeyExchange(HandshakeMessageClientKeyExchange),
    CertificateVerify(HandshakeMessageCertificateVerify),
    Finished(HandshakeMessageFinished),
}

impl HandshakeMessage {
    pub(crate) fn handshake_type(&self) -> HandshakeType {
        match self {
            HandshakeMessage::ClientHello(_) => HandshakeType::ClientHello,
            HandshakeMessage::HelloVerifyRequest(_) => HandshakeType::HelloVerifyRequest,
            HandshakeMessage::ServerHello(_) => HandshakeType::ServerHello,
            HandshakeMessage::Certificate(_) => HandshakeType::Certificate,
            HandshakeMessage::ServerKeyExchange(_) => HandshakeType::ServerKeyExchange,
            HandshakeMessage::CertificateRequest(_) => HandshakeType::CertificateRequest,
            HandshakeMessage::ServerHelloDone => HandshakeType::ServerHelloDone,
            HandshakeMessage::ClientKeyExchange(_) => HandshakeType::ClientKeyExchange,
            HandshakeMessage::CertificateVerify(_) => HandshakeType::CertificateVerify,
            HandshakeMessage::Finished(_) => HandshakeType::Finished,
        }
    }

    pub(crate) fn marshal_body(&self) -> Vec<u8> {
        match self {
            HandshakeMessage::ClientHello(m) => m.marshal(),
            HandshakeMessage::HelloVerifyRequest(m) => m.marshal(),
            HandshakeMessage::ServerHello(m) => m.marshal(),
            HandshakeMessage::Certificate(m) => m.marshal(),
            HandshakeMessage::ServerKeyExchange(m) => m.marshal(),
            HandshakeMessage::CertificateRequest(m) => m.marshal(),
            HandshakeMessage::ServerHelloDone => vec![],
            HandshakeMessage::ClientKeyExchange(m) => m.marshal(),
            HandshakeMessage::CertificateVerify(m) => m.marshal(),
            HandshakeMessage::Finished(m) => m.marshal(),
        }
    }

    pub(crate) fn unmarshal(typ: HandshakeType, body: &[u8]) -> Result<Self> {
        Ok(match typ {
            HandshakeType::ClientHello => {
                HandshakeMessage::ClientHello(HandshakeMessageClientHello::unmarshal(body)?)
            }
            HandshakeType::HelloVerifyRequest => HandshakeMessage::HelloVerifyRequest(
                HandshakeMessageHelloVerifyRequest::unmarshal(body)?,
            ),
            HandshakeType::ServerHello => {
                HandshakeMessage::ServerHello(HandshakeMessageServerHello::unmarshal(body)?)
            }
            HandshakeType::Certificate => {
                HandshakeMessage::Certificate(HandshakeMessageCertificate::unmarshal(body)?)
            }
            HandshakeType::ServerKeyExchange => HandshakeMessage::ServerKeyExchange(
                HandshakeMessageServerKeyExchange::unmarshal(body)?,
            ),
            HandshakeType::CertificateRequest => HandshakeMessage::CertificateRequest(
                HandshakeMessageCertificateRequest::unmarshal(body)?,
            ),
            HandshakeType::ServerHelloDone => HandshakeMessage::ServerHelloDone,
            HandshakeType::ClientKeyExchange => HandshakeMessage::ClientKeyExchange(
                HandshakeMessageClientKeyExchange::unmarshal(body)?,
            ),
            HandshakeType::CertificateVerify => HandshakeMessage::CertificateVerify(
                HandshakeMessageCertificateVerify::unmarshal(body)?,
            ),
            HandshakeType::Finished => {
                HandshakeMessage::Finished(HandshakeMessageFinished::unmarshal(body)?)
            }
            _ => return Err(Error::ErrInvalidHandshakeType),
        })
    }

    /// marshal produces the complete DTLS handshake message: 12-byte header
    /// plus body, unfragmented.
    pub(crate) fn marshal(&self, message_sequence: u16) -> Vec<u8> {
        let body = self.marshal_body();
        let header = HandshakeHeader {
            handshake_type: self.handshake_type(),
            length: body.len() as u32,
            message_sequence,
            fragment_offset: 0,
            fragment_length: body.len() as u32,
        };
        let mut out = BytesMut::with_capacity(HANDSHAKE_HEADER_SIZE + body.len());
        header.marshal_to(&mut out);
        out.put_slice(&body);
        out.to_vec()
    }
}

pub(crate) fn default_client_hello(
    cookie: Vec<u8>,
    random: HandshakeRandom,
    cipher_suites: Vec<CipherSuiteId>,
) -> HandshakeMessageClientHello {
    HandshakeMessageClientHello {
        version: PROTOCOL_VERSION1_2,
        random,
        cookie,
        cipher_suites,
        extensions: client_extensions(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cipher_suite::default_cipher_suites;

    #[test]
    fn test_handshake_header_round_trip() -> Result<()> {
        let header = HandshakeHeader {
            handshake_type: HandshakeType::ClientHello,
            length: 41,
            message_sequence: 3,
            fragment_offset: 0,
            fragment_length: 41,
        };
        let mut raw = BytesMut::new();
        header.marshal_to(&mut raw);
        assert_eq!(raw.len(), HANDSHAKE_HEADER_SIZE);
        assert_eq!(HandshakeHeader::unmarshal(&raw)?, header);
        Ok(())
    }

    #[test]
    fn test_client_hello_round_trip() -> Result<()> {
        let hello = default_client_hello(
            vec![9u8; 20],
            HandshakeRandom::generate(),
            default_cipher_suites(),
        );
        let raw = hello.marshal();
        let parsed = HandshakeMessageClientHello::unmarshal(&raw)?;
        assert_eq!(parsed, hello);
        assert_eq!(parsed.marshal(), raw);
        Ok(())
    }

    #[test]
    fn test_server_hello_round_trip() -> Result<()> {
        let hello = HandshakeMessageServerHello {
            version: PROTOCOL_VERSION1_2,
            random: HandshakeRandom::generate(),
            cipher_suite: CipherSuiteId::TlsEcdheEcdsaWithAes128GcmSha256,
            extensions: server_extensions(),
        };
        let raw = hello.marshal();
        let parsed = HandshakeMessageServerHello::unmarshal(&raw)?;
        assert_eq!(parsed, hello);
        assert_eq!(parsed.marshal(), raw);
        Ok(())
    }

    #[test]
    fn test_certificate_round_trip() -> Result<()> {
        let cert = HandshakeMessageCertificate {
            certificate: vec![vec![1, 2, 3], vec![4, 5, 6, 7]],
        };
        let raw = cert.marshal();
        let parsed = HandshakeMessageCertificate::unmarshal(&raw)?;
        assert_eq!(parsed, cert);
        Ok(())
    }

    #[test]
    fn test_server_key_exchange_round_trip() -> Result<()> {
        let ske = HandshakeMessageServerKeyExchange {
            named_curve: NAMED_CURVE_P256,
            public_key: vec![4u8; 65],
            algorithm: SignatureHashAlgorithm {
                hash: HashAlgorithm::Sha256,
                signature: SignatureAlgorithm::Ecdsa,
            },
            signature: vec![7u8; 70],
        };
        let raw = ske.marshal();
        let parsed = HandshakeMessageServerKeyExchange::unmarshal(&raw)?;
        assert_eq!(parsed, ske);
        assert_eq!(parsed.marshal(), raw);
        Ok(())
    }

    #[test]
    fn test_full_message_round_trip() -> Result<()> {
        let msg = HandshakeMessage::Finished(HandshakeMessageFinished {
            verify_data: vec![0xau8; 12],
        });
        let raw = msg.marshal(7);
        let header = HandshakeHeader::unmarshal(&raw)?;
        assert_eq!(header.handshake_type, HandshakeType::Finished);
        assert_eq!(header.message_sequence, 7);
        assert_eq!(header.length, 12);
        let parsed =
            HandshakeMessage::unmarshal(header.handshake_type, &raw[HANDSHAKE_HEADER_SIZE..])?;
        assert_eq!(parsed, msg);
        Ok(())
    }

    #[test]
    fn test_hello_verify_request_round_trip() -> Result<()> {
        let hvr = HandshakeMessageHelloVerifyRequest {
            version: PROTOCOL_VERSION1_2,
            cookie: vec![5u8; 20],
        };
        let raw = hvr.marshal();
        assert_eq!(HandshakeMessageHelloVerifyRequest::unmarshal(&raw)?, hvr);
        Ok(())
    }
}
