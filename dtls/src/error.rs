use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("buffer is too small")]
    ErrBufferTooSmall,
    #[error("unsupported protocol version")]
    ErrUnsupportedProtocolVersion,
    #[error("record sequence number overflow")]
    ErrSequenceNumberOverflow,
    #[error("invalid content type")]
    ErrInvalidContentType,
    #[error("invalid handshake type")]
    ErrInvalidHandshakeType,
    #[error("fragmented handshake messages are not supported")]
    ErrHandshakeFragment,
    #[error("handshake message received out of order")]
    ErrHandshakeOutOfOrder,
    #[error("invalid cipher suite")]
    ErrInvalidCipherSuite,
    #[error("no shared cipher suite with the peer")]
    ErrCipherSuiteNoIntersection,
    #[error("invalid named curve")]
    ErrInvalidNamedCurve,
    #[error("invalid elliptic curve point format")]
    ErrInvalidEllipticCurvePoint,
    #[error("length mismatch while decoding")]
    ErrLengthMismatch,
    #[error("cookie mismatch in second ClientHello")]
    ErrCookieMismatch,
    #[error("peer sent no certificate")]
    ErrNoCertificate,
    #[error("unsupported signature or key type")]
    ErrKeySignatureUnsupported,
    #[error("key signature verification failed")]
    ErrKeySignatureMismatch,
    #[error("CertificateVerify verification failed")]
    ErrCertificateVerifyMismatch,
    #[error("verify data in Finished does not match")]
    ErrVerifyDataMismatch,
    #[error("record failed authenticated decryption")]
    ErrDecryptFailed,
    #[error("handshake retransmit budget exhausted")]
    ErrHandshakeTimeout,
    #[error("fatal alert received: {0}")]
    ErrAlertFatal(String),
    #[error("certificate fingerprint does not match any remote fingerprint")]
    ErrFingerprintMismatch,
    #[error("transport is not connected")]
    ErrNotConnected,
    #[error("transport is closed")]
    ErrClosed,
    #[error("failed to generate certificate: {0}")]
    ErrCertificateGeneration(String),
    #[error("failed to parse certificate: {0}")]
    ErrCertificateParse(String),
    #[error("crypto failure: {0}")]
    ErrCrypto(String),
}
