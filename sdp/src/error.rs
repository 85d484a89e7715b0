use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("sdp: invalid syntax `{0}`")]
    SdpInvalidSyntax(String),
    #[error("sdp: invalid value `{0}`")]
    SdpInvalidValue(String),
    #[error("sdp: empty time descriptions")]
    SdpEmptyTimeDescription,
    #[error("sdp: missing session-level field `{0}=`")]
    SdpMissingSessionField(char),
}

impl From<std::num::ParseIntError> for Error {
    fn from(err: std::num::ParseIntError) -> Self {
        Error::SdpInvalidValue(err.to_string())
    }
}
