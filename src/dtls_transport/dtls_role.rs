use std::fmt;

use sdp::description::session::{SessionDescription, ATTR_KEY_SETUP};

/// DtlsRole indicates the role of the DTLS transport.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum DTLSRole {
    #[default]
    Unspecified = 0,

    /// The DTLS role is determined based on the resolved ICE role: the
    /// ICE controlled role acts as the DTLS client and the ICE controlling
    /// role acts as the DTLS server.
    Auto = 1,

    /// The DTLS client role.
    Client = 2,

    /// The DTLS server role.
    Server = 3,
}

/// The endpoint that is the offerer MUST use the setup attribute value of
/// setup:actpass and be prepared to receive a client_hello before it
/// receives the answer.
///
/// <https://tools.ietf.org/html/rfc5763#section-5>
pub(crate) const SETUP_ACTPASS_STR: &str = "actpass";
pub(crate) const SETUP_ACTIVE_STR: &str = "active";
pub(crate) const SETUP_PASSIVE_STR: &str = "passive";

impl fmt::Display for DTLSRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DTLSRole::Auto => write!(f, "auto"),
            DTLSRole::Client => write!(f, "client"),
            DTLSRole::Server => write!(f, "server"),
            _ => write!(f, "{}", crate::UNSPECIFIED_STR),
        }
    }
}

/// dtls_role_from_remote_sdp derives our role from the remote description's
/// `a=setup` attribute.
///
/// When the remote is the answerer: `active` makes the remote the client,
/// so we are the server; `passive` makes us the client. An offer carrying
/// `actpass` (or nothing) leaves the decision to our answer, where this
/// profile always answers `active` (we become the client).
pub(crate) fn dtls_role_from_remote_sdp(sd: &SessionDescription, remote_is_offer: bool) -> DTLSRole {
    let setup = sd
        .media_descriptions
        .first()
        .and_then(|m| m.attribute(ATTR_KEY_SETUP).flatten())
        .or_else(|| sd.attribute(ATTR_KEY_SETUP).flatten());

    match setup {
        Some(SETUP_ACTIVE_STR) => DTLSRole::Server,
        Some(SETUP_PASSIVE_STR) => DTLSRole::Client,
        _ if remote_is_offer => {
            // offerer defaulted to actpass; the answerer must be active
            DTLSRole::Client
        }
        _ => DTLSRole::Server,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sdp_with_setup(setup: &str) -> SessionDescription {
        let raw = format!(
            "v=0\r\no=- 1 2 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n\
m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\na=setup:{setup}\r\n"
        );
        SessionDescription::unmarshal(&raw).unwrap()
    }

    #[test]
    fn test_role_from_answer_setup() {
        // remote answer active -> remote is client -> we are server
        assert_eq!(
            dtls_role_from_remote_sdp(&sdp_with_setup("active"), false),
            DTLSRole::Server,
        );
        // remote answer passive -> we are client
        assert_eq!(
            dtls_role_from_remote_sdp(&sdp_with_setup("passive"), false),
            DTLSRole::Client,
        );
    }

    #[test]
    fn test_role_from_offer_actpass() {
        // remote offer actpass -> we answer active -> we are client
        assert_eq!(
            dtls_role_from_remote_sdp(&sdp_with_setup("actpass"), true),
            DTLSRole::Client,
        );
    }
}
