use std::fmt;

use crate::error::{Error, Result};

/// AlertLevel is the severity of an alert record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AlertLevel {
    Warning = 1,
    Fatal = 2,
    Invalid,
}

impl From<u8> for AlertLevel {
    fn from(val: u8) -> Self {
        match val {
            1 => AlertLevel::Warning,
            2 => AlertLevel::Fatal,
            _ => AlertLevel::Invalid,
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            AlertLevel::Warning => write!(f, "LevelWarning"),
            AlertLevel::Fatal => write!(f, "LevelFatal"),
            AlertLevel::Invalid => write!(f, "Invalid alert level"),
        }
    }
}

/// AlertDescription carries the alert reason.
///
/// One of the content types supported by the TLS record layer is the
/// alert type. Alert messages convey the severity of the message
/// (warning or fatal) and a description of the alert.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    DecryptionFailed = 21,
    RecordOverflow = 22,
    DecompressionFailure = 30,
    HandshakeFailure = 40,
    NoCertificate = 41,
    BadCertificate = 42,
    UnsupportedCertificate = 43,
    CertificateRevoked = 44,
    CertificateExpired = 45,
    CertificateUnknown = 46,
    IllegalParameter = 47,
    UnknownCa = 48,
    AccessDenied = 49,
    DecodeError = 50,
    DecryptError = 51,
    ExportRestriction = 60,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    UserCanceled = 90,
    NoRenegotiation = 100,
    UnsupportedExtension = 110,
    Invalid,
}

impl From<u8> for AlertDescription {
    fn from(val: u8) -> Self {
        match val {
            0 => AlertDescription::CloseNotify,
            10 => AlertDescription::UnexpectedMessage,
            20 => AlertDescription::BadRecordMac,
            21 => AlertDescription::DecryptionFailed,
            22 => AlertDescription::RecordOverflow,
            30 => AlertDescription::DecompressionFailure,
            40 => AlertDescription::HandshakeFailure,
            41 => AlertDescription::NoCertificate,
            42 => AlertDescription::BadCertificate,
            43 => AlertDescription::UnsupportedCertificate,
            44 => AlertDescription::CertificateRevoked,
            45 => AlertDescription::CertificateExpired,
            46 => AlertDescription::CertificateUnknown,
            47 => AlertDescription::IllegalParameter,
            48 => AlertDescription::UnknownCa,
            49 => AlertDescription::AccessDenied,
            50 => AlertDescription::DecodeError,
            51 => AlertDescription::DecryptError,
            60 => AlertDescription::ExportRestriction,
            70 => AlertDescription::ProtocolVersion,
            71 => AlertDescription::InsufficientSecurity,
            80 => AlertDescription::InternalError,
            90 => AlertDescription::UserCanceled,
            100 => AlertDescription::NoRenegotiation,
            110 => AlertDescription::UnsupportedExtension,
            _ => AlertDescription::Invalid,
        }
    }
}

impl fmt::Display for AlertDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Alert is the body of an alert-type record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Alert {
    pub alert_level: AlertLevel,
    pub alert_description: AlertDescription,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Alert {}: {:?}",
            self.alert_level, self.alert_description
        )
    }
}

impl Alert {
    pub fn marshal(&self) -> Vec<u8> {
        vec![self.alert_level as u8, self.alert_description as u8]
    }

    pub fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.len() < 2 {
            return Err(Error::ErrBufferTooSmall);
        }
        Ok(Alert {
            alert_level: AlertLevel::from(raw[0]),
            alert_description: AlertDescription::from(raw[1]),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_alert_round_trip() -> Result<()> {
        let alert = Alert {
            alert_level: AlertLevel::Fatal,
            alert_description: AlertDescription::HandshakeFailure,
        };
        let raw = alert.marshal();
        assert_eq!(raw, vec![2, 40]);
        assert_eq!(Alert::unmarshal(&raw)?, alert);
        Ok(())
    }
}
