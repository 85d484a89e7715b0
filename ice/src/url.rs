use std::fmt;

use crate::error::{Error, Result};

/// SchemeType indicates the type of server used.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum SchemeType {
    /// Indicates the URL represents a STUN server.
    Stun,

    /// Indicates the URL represents a TURN server.
    Turn,

    /// Default public constant to use for "enum" like struct comparisons when
    /// no value was defined.
    #[default]
    Unknown,
}

impl From<&str> for SchemeType {
    fn from(raw: &str) -> Self {
        match raw {
            "stun" => SchemeType::Stun,
            "turn" => SchemeType::Turn,
            _ => SchemeType::Unknown,
        }
    }
}

impl fmt::Display for SchemeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            SchemeType::Stun => "stun",
            SchemeType::Turn => "turn",
            SchemeType::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Url represents a STUN (rfc7064) or TURN (rfc7065) URL, UDP transport only.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Url {
    pub scheme: SchemeType,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.scheme, self.host, self.port)
    }
}

impl Url {
    /// parse_url parses a STUN or TURN url, e.g. `stun:stun.l.google.com:19302`
    /// or `turn:turn.example.org:3478`. The `?transport=` query is accepted
    /// but only udp is supported.
    pub fn parse_url(raw: &str) -> Result<Self> {
        let (scheme_str, rest) = raw
            .split_once(':')
            .ok_or_else(|| Error::ErrInvalidUrl(raw.to_owned()))?;

        let scheme = SchemeType::from(scheme_str);
        if scheme == SchemeType::Unknown {
            return Err(Error::ErrSchemeType);
        }

        let rest = rest.split('?').next().unwrap_or(rest);
        let default_port = 3478u16;
        let (host, port) = if let Some(stripped) = rest.strip_prefix('[') {
            // bracketed IPv6 literal, optionally followed by :port
            match stripped.split_once(']') {
                Some((h, "")) => (h, default_port),
                Some((h, p)) => {
                    let p = p
                        .strip_prefix(':')
                        .ok_or_else(|| Error::ErrInvalidUrl(raw.to_owned()))?;
                    let port = p
                        .parse::<u16>()
                        .map_err(|_| Error::ErrInvalidUrl(raw.to_owned()))?;
                    (h, port)
                }
                None => return Err(Error::ErrInvalidUrl(raw.to_owned())),
            }
        } else {
            match rest.rsplit_once(':') {
                Some((h, p)) => {
                    let port = p
                        .parse::<u16>()
                        .map_err(|_| Error::ErrInvalidUrl(raw.to_owned()))?;
                    (h, port)
                }
                None => (rest, default_port),
            }
        };

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(Error::ErrInvalidUrl(raw.to_owned()));
        }

        Ok(Url {
            scheme,
            host: host.to_owned(),
            port,
            username: String::new(),
            password: String::new(),
        })
    }

    /// is_turn returns true for relay schemes.
    pub fn is_turn(&self) -> bool {
        self.scheme == SchemeType::Turn
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_url_success() -> Result<()> {
        let tests = vec![
            ("stun:stun.l.google.com:19302", SchemeType::Stun, "stun.l.google.com", 19302),
            ("stun:stun.example.org", SchemeType::Stun, "stun.example.org", 3478),
            ("turn:turn.example.org:5000", SchemeType::Turn, "turn.example.org", 5000),
            ("turn:turn.example.org?transport=udp", SchemeType::Turn, "turn.example.org", 3478),
            ("stun:[::1]:5000", SchemeType::Stun, "::1", 5000),
        ];

        for (raw, scheme, host, port) in tests {
            let url = Url::parse_url(raw)?;
            assert_eq!(url.scheme, scheme, "{raw}");
            assert_eq!(url.host, host, "{raw}");
            assert_eq!(url.port, port, "{raw}");
        }
        Ok(())
    }

    #[test]
    fn test_parse_url_failure() {
        assert_eq!(Url::parse_url("http://example.org"), Err(Error::ErrSchemeType));
        assert!(Url::parse_url("stun:").is_err());
        assert!(Url::parse_url("nocolon").is_err());
    }
}
