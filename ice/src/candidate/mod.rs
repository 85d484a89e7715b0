pub mod candidate_pair;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crc::{Crc, CRC_32_ISCSI};

use crate::error::{Error, Result};

/// Component identifier for RTP; this profile carries a single component.
pub const COMPONENT_RTP: u16 = 1;

/// CandidateType represents the type of candidate.
///
/// Type preferences per RFC 5245 Section 4.1.2.2:
/// host > peer-reflexive > server-reflexive > relay.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum CandidateType {
    #[default]
    Unspecified,
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CandidateType::Host => "host",
            CandidateType::ServerReflexive => "srflx",
            CandidateType::PeerReflexive => "prflx",
            CandidateType::Relay => "relay",
            CandidateType::Unspecified => "Unknown candidate type",
        };
        write!(f, "{s}")
    }
}

impl From<&str> for CandidateType {
    fn from(raw: &str) -> Self {
        match raw {
            "host" => CandidateType::Host,
            "srflx" => CandidateType::ServerReflexive,
            "prflx" => CandidateType::PeerReflexive,
            "relay" => CandidateType::Relay,
            _ => CandidateType::Unspecified,
        }
    }
}

impl CandidateType {
    /// preference returns the preference weight of a CandidateType.
    ///
    /// 4.1.2.2.  Guidelines for Choosing Type and Local Preferences
    /// The RECOMMENDED values are 126 for host candidates, 100
    /// for server reflexive candidates, 110 for peer reflexive candidates,
    /// and 0 for relayed candidates.
    pub fn preference(&self) -> u16 {
        match *self {
            CandidateType::Host => 126,
            CandidateType::PeerReflexive => 110,
            CandidateType::ServerReflexive => 100,
            CandidateType::Relay | CandidateType::Unspecified => 0,
        }
    }
}

const FOUNDATION_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Candidate represents an ICE candidate: a transport address that is a
/// potential point of contact for receipt of data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub candidate_type: CandidateType,
    pub component: u16,
    pub address: String,
    pub port: u16,
    /// The transport address the candidate is derived from; for host
    /// candidates this equals (address, port).
    pub related_address: Option<(String, u16)>,
    /// The STUN or TURN server the candidate was learned from, if any.
    /// Feeds foundation computation so identical flows collapse.
    pub server: String,
    pub foundation_override: String,
    pub priority_override: u32,
}

impl Default for Candidate {
    fn default() -> Self {
        Candidate {
            candidate_type: CandidateType::default(),
            component: COMPONENT_RTP,
            address: String::new(),
            port: 0,
            related_address: None,
            server: String::new(),
            foundation_override: String::new(),
            priority_override: 0,
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some((raddr, rport)) = &self.related_address {
            write!(
                f,
                "{} {}:{} related {}:{}",
                self.candidate_type, self.address, self.port, raddr, rport,
            )
        } else {
            write!(f, "{} {}:{}", self.candidate_type, self.address, self.port)
        }
    }
}

impl Candidate {
    pub fn host(address: String, port: u16) -> Self {
        Candidate {
            candidate_type: CandidateType::Host,
            address,
            port,
            ..Default::default()
        }
    }

    pub fn server_reflexive(
        address: String,
        port: u16,
        base: (String, u16),
        server: String,
    ) -> Self {
        Candidate {
            candidate_type: CandidateType::ServerReflexive,
            address,
            port,
            related_address: Some(base),
            server,
            ..Default::default()
        }
    }

    pub fn peer_reflexive(address: String, port: u16, priority: u32) -> Self {
        Candidate {
            candidate_type: CandidateType::PeerReflexive,
            address,
            port,
            priority_override: priority,
            ..Default::default()
        }
    }

    pub fn relay(address: String, port: u16, base: (String, u16), server: String) -> Self {
        Candidate {
            candidate_type: CandidateType::Relay,
            address,
            port,
            related_address: Some(base),
            server,
            ..Default::default()
        }
    }

    /// Computes the priority for this ICE Candidate.
    ///
    /// priority = (2^24)*(type preference) +
    ///            (2^8)*(local preference) +
    ///            (2^0)*(256 - component ID)
    pub fn priority(&self) -> u32 {
        if self.priority_override != 0 {
            return self.priority_override;
        }
        let local_preference: u32 = 65535;
        (1 << 24) * (self.candidate_type.preference() as u32)
            + (1 << 8) * local_preference
            + (256 - self.component as u32)
    }

    /// foundation is an arbitrary string identifier such that two candidates
    /// with the same type, base address, and STUN/TURN server share it.
    pub fn foundation(&self) -> String {
        if !self.foundation_override.is_empty() {
            return self.foundation_override.clone();
        }
        let base = match &self.related_address {
            Some((addr, _)) => addr.clone(),
            None => self.address.clone(),
        };
        let input = format!("{}{}{}", self.candidate_type, base, self.server);
        format!("{}", FOUNDATION_CRC.checksum(input.as_bytes()))
    }

    /// addr returns the candidate transport address as a SocketAddr, if it
    /// parses.
    pub fn addr(&self) -> SocketAddr {
        let ip: IpAddr = self
            .address
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        SocketAddr::new(ip, self.port)
    }

    /// marshal returns the string representation of the ICECandidate
    /// following the `candidate:` attribute grammar.
    pub fn marshal(&self) -> String {
        let mut val = format!(
            "{} {} udp {} {} {} typ {}",
            self.foundation(),
            self.component,
            self.priority(),
            self.address,
            self.port,
            self.candidate_type,
        );

        if let Some((raddr, rport)) = &self.related_address {
            val += format!(" raddr {raddr} rport {rport}").as_str();
        }

        val
    }

    /// unmarshal parses the `candidate:` attribute grammar:
    ///
    /// `<foundation> <component> <proto> <prio> <addr> <port> typ <type>
    ///  [raddr <a> rport <p>] [tcptype <t>]`
    ///
    /// A leading `candidate:` prefix is accepted and skipped.
    pub fn unmarshal(raw: &str) -> Result<Self> {
        let raw = raw.strip_prefix("candidate:").unwrap_or(raw);
        let split: Vec<&str> = raw.split_whitespace().collect();
        if split.len() < 8 {
            return Err(Error::ErrParseCandidate(raw.to_owned()));
        }

        let foundation = split[0].to_owned();
        let component: u16 = split[1]
            .parse()
            .map_err(|_| Error::ErrParseCandidate(raw.to_owned()))?;
        let _protocol = split[2];
        let priority: u32 = split[3]
            .parse()
            .map_err(|_| Error::ErrParseCandidate(raw.to_owned()))?;
        let address = split[4].to_owned();
        let port: u16 = split[5]
            .parse()
            .map_err(|_| Error::ErrParseCandidate(raw.to_owned()))?;

        if split[6] != "typ" {
            return Err(Error::ErrParseCandidate(raw.to_owned()));
        }
        let candidate_type = CandidateType::from(split[7]);
        if candidate_type == CandidateType::Unspecified {
            return Err(Error::ErrUnknownCandidateType);
        }

        let mut related_address = None;
        let mut rest = &split[8..];
        while rest.len() >= 2 {
            match rest[0] {
                "raddr" if rest.len() >= 4 && rest[2] == "rport" => {
                    let rport: u16 = rest[3]
                        .parse()
                        .map_err(|_| Error::ErrParseCandidate(raw.to_owned()))?;
                    related_address = Some((rest[1].to_owned(), rport));
                    rest = &rest[4..];
                }
                // only udp is supported; tcptype tokens are parsed and dropped
                "tcptype" => rest = &rest[2..],
                _ => rest = &rest[2..],
            }
        }

        Ok(Candidate {
            candidate_type,
            component,
            address,
            port,
            related_address,
            server: String::new(),
            foundation_override: foundation,
            priority_override: priority,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_candidate_priority() {
        let tests = vec![
            (Candidate::host("192.168.1.2".to_owned(), 1234), 2130706431),
            (
                Candidate::peer_reflexive("10.0.0.2".to_owned(), 1234, 0),
                1862270975,
            ),
            (
                Candidate::server_reflexive(
                    "1.2.3.4".to_owned(),
                    1234,
                    ("192.168.1.2".to_owned(), 1234),
                    "stun.example.org:3478".to_owned(),
                ),
                1694498815,
            ),
            (
                Candidate::relay(
                    "1.2.3.4".to_owned(),
                    1234,
                    ("192.168.1.2".to_owned(), 1234),
                    "turn.example.org:3478".to_owned(),
                ),
                16777215,
            ),
        ];
        for (candidate, expected) in tests {
            assert_eq!(candidate.priority(), expected, "{candidate}");
        }
    }

    #[test]
    fn test_candidate_type_ordering() {
        // host > prflx > srflx > relay
        assert!(CandidateType::Host.preference() > CandidateType::PeerReflexive.preference());
        assert!(
            CandidateType::PeerReflexive.preference() > CandidateType::ServerReflexive.preference()
        );
        assert!(CandidateType::ServerReflexive.preference() > CandidateType::Relay.preference());
    }

    #[test]
    fn test_candidate_foundation_stable() {
        let a = Candidate::host("192.168.1.2".to_owned(), 1234);
        let b = Candidate::host("192.168.1.2".to_owned(), 5678);
        // same type, same base address, same (absent) server
        assert_eq!(a.foundation(), b.foundation());

        let c = Candidate::server_reflexive(
            "1.2.3.4".to_owned(),
            1234,
            ("192.168.1.2".to_owned(), 1234),
            "stun.example.org:3478".to_owned(),
        );
        assert_ne!(a.foundation(), c.foundation());
    }

    #[test]
    fn test_candidate_marshal_unmarshal_round_trip() -> Result<()> {
        let candidate = Candidate::server_reflexive(
            "1.2.3.4".to_owned(),
            1234,
            ("192.168.1.2".to_owned(), 4321),
            "stun.example.org:3478".to_owned(),
        );

        let marshaled = candidate.marshal();
        let parsed = Candidate::unmarshal(&marshaled)?;

        assert_eq!(parsed.candidate_type, CandidateType::ServerReflexive);
        assert_eq!(parsed.address, "1.2.3.4");
        assert_eq!(parsed.port, 1234);
        assert_eq!(
            parsed.related_address,
            Some(("192.168.1.2".to_owned(), 4321))
        );
        assert_eq!(parsed.priority(), candidate.priority());
        assert_eq!(parsed.foundation(), candidate.foundation());
        // and byte-identical re-marshal
        assert_eq!(parsed.marshal(), marshaled);
        Ok(())
    }

    #[test]
    fn test_candidate_unmarshal_with_prefix() -> Result<()> {
        let candidate =
            Candidate::unmarshal("candidate:647372371 1 udp 2130706431 127.0.0.1 53555 typ host")?;
        assert_eq!(candidate.candidate_type, CandidateType::Host);
        assert_eq!(candidate.address, "127.0.0.1");
        assert_eq!(candidate.port, 53555);
        Ok(())
    }

    #[test]
    fn test_candidate_unmarshal_invalid() {
        assert!(Candidate::unmarshal("1 udp 500 192.168.0.1").is_err());
        assert!(Candidate::unmarshal("foundation 1 udp 500 1.2.3.4 5000 xyz host").is_err());
        assert!(
            Candidate::unmarshal("foundation 1 udp 500 1.2.3.4 5000 typ banana").is_err()
        );
    }
}
