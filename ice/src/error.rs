use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("unknown candidate type")]
    ErrUnknownCandidateType,
    #[error("failed to parse candidate attribute `{0}`")]
    ErrParseCandidate(String),
    #[error("invalid ice server scheme")]
    ErrSchemeType,
    #[error("turn server requires credentials")]
    ErrNoTurnCredentials,
    #[error("bad ice server url `{0}`")]
    ErrInvalidUrl(String),
    #[error("remote credentials are not set")]
    ErrRemoteCredentials,
    #[error("no selected candidate pair to send on")]
    ErrNoSelectedPair,
    #[error("agent is closed")]
    ErrClosed,
    #[error("stun: {0}")]
    Stun(#[from] stun::Error),
}
