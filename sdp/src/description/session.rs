use std::fmt;
use std::fmt::Write as _;

use rand::Rng;

use super::common::*;
use super::media::*;
use crate::error::{Error, Result};

pub(crate) const END_LINE: &str = "\r\n";
pub const ATTR_KEY_CANDIDATE: &str = "candidate";
pub const ATTR_KEY_END_OF_CANDIDATES: &str = "end-of-candidates";
pub const ATTR_KEY_ICELITE: &str = "ice-lite";
pub const ATTR_KEY_ICEUFRAG: &str = "ice-ufrag";
pub const ATTR_KEY_ICEPWD: &str = "ice-pwd";
pub const ATTR_KEY_ICEOPTIONS: &str = "ice-options";
pub const ATTR_KEY_FINGERPRINT: &str = "fingerprint";
pub const ATTR_KEY_SETUP: &str = "setup";
pub const ATTR_KEY_MID: &str = "mid";
pub const ATTR_KEY_GROUP: &str = "group";
pub const ATTR_KEY_SCTP_PORT: &str = "sctp-port";
pub const ATTR_KEY_MAX_MESSAGE_SIZE: &str = "max-message-size";
pub const ATTR_KEY_EXTMAP_ALLOW_MIXED: &str = "extmap-allow-mixed";
pub const ATTR_KEY_MSID_SEMANTIC: &str = "msid-semantic";

/// Origin defined in [RFC 4566 §5.2].
///
/// [RFC 4566 §5.2]: https://tools.ietf.org/html/rfc4566#section-5.2
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Origin {
    pub username: String,
    pub session_id: u64,
    pub session_version: u64,
    pub network_type: String,
    pub address_type: String,
    pub unicast_address: String,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.username,
            self.session_id,
            self.session_version,
            self.network_type,
            self.address_type,
            self.unicast_address,
        )
    }
}

impl Origin {
    pub fn new() -> Self {
        Origin {
            username: "-".to_owned(),
            session_id: new_session_id(),
            session_version: 2,
            network_type: "IN".to_owned(),
            address_type: "IP4".to_owned(),
            unicast_address: "0.0.0.0".to_owned(),
        }
    }
}

/// new_session_id generates a random session id in the top half of the u64
/// range so the leading digit is never zero (some parsers reject it).
pub fn new_session_id() -> u64 {
    let c = u64::MAX ^ (1u64 << 63);
    rand::thread_rng().gen::<u64>() & c | (1u64 << 62)
}

/// Timing defines the "t=" field's structured representation for the start
/// and stop times.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub start_time: u64,
    pub stop_time: u64,
}

impl fmt::Display for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.start_time, self.stop_time)
    }
}

/// SessionDescription is a a well-defined format for conveying sufficient
/// information to discover and participate in a multimedia session.
///
/// ## Specifications
///
/// * [RFC 4566]
///
/// [RFC 4566]: https://tools.ietf.org/html/rfc4566
#[derive(Debug, Default, Clone)]
pub struct SessionDescription {
    /// `v=0`
    pub version: u8,

    /// `o=<username> <sess-id> <sess-version> <nettype> <addrtype> <unicast-address>`
    pub origin: Origin,

    /// `s=<session name>`
    pub session_name: String,

    /// `c=<nettype> <addrtype> <connection-address>`
    pub connection_information: Option<ConnectionInformation>,

    /// `t=<start-time> <stop-time>`
    pub time_descriptions: Vec<Timing>,

    /// `a=<attribute>` / `a=<attribute>:<value>`
    pub attributes: Vec<Attribute>,

    /// `m=<media> <port> <proto> <fmt> ...`
    pub media_descriptions: Vec<MediaDescription>,
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.marshal())
    }
}

impl SessionDescription {
    /// Returns whether a session-level attribute exists
    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.iter().any(|a| a.key == key)
    }

    /// attribute returns the value of a session-level attribute and if it exists
    pub fn attribute(&self, key: &str) -> Option<Option<&str>> {
        for a in &self.attributes {
            if a.key == key {
                return Some(a.value.as_deref());
            }
        }
        None
    }

    pub fn with_property_attribute(mut self, key: String) -> Self {
        self.attributes.push(Attribute::new(key, None));
        self
    }

    pub fn with_value_attribute(mut self, key: String, value: String) -> Self {
        self.attributes.push(Attribute::new(key, Some(value)));
        self
    }

    pub fn with_media(mut self, md: MediaDescription) -> Self {
        self.media_descriptions.push(md);
        self
    }

    /// marshal takes a SDP struct to text
    ///
    /// The order of lines matches the order this implementation emits them
    /// in, so `unmarshal(marshal(sd))` re-marshals byte-identically.
    pub fn marshal(&self) -> String {
        let mut result = String::new();

        let _ = write!(result, "v={}{}", self.version, END_LINE);
        let _ = write!(result, "o={}{}", self.origin, END_LINE);
        let _ = write!(result, "s={}{}", self.session_name, END_LINE);
        if let Some(ci) = &self.connection_information {
            let _ = write!(result, "c={ci}{END_LINE}");
        }
        for td in &self.time_descriptions {
            let _ = write!(result, "t={td}{END_LINE}");
        }
        for a in &self.attributes {
            let _ = write!(result, "a={a}{END_LINE}");
        }
        for md in &self.media_descriptions {
            let _ = write!(result, "m={}{}", md.media_name, END_LINE);
            if let Some(ci) = &md.connection_information {
                let _ = write!(result, "c={ci}{END_LINE}");
            }
            for a in &md.attributes {
                let _ = write!(result, "a={a}{END_LINE}");
            }
        }

        result
    }

    /// unmarshal converts the raw text of a session description into a
    /// SessionDescription. Lines are separated by CRLF; bare LF is accepted
    /// as a fallback. Lines this profile does not use (`b=`, `k=`, `i=`,
    /// `u=`, `e=`, `p=`, `r=`, `z=`) are skipped.
    pub fn unmarshal(raw: &str) -> Result<Self> {
        let mut sd = SessionDescription::default();
        let mut seen_version = false;

        for line in raw.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let mut chars = line.chars();
            let (key, eq) = (chars.next(), chars.next());
            if eq != Some('=') {
                return Err(Error::SdpInvalidSyntax(line.to_owned()));
            }
            let value = &line[2..];

            match key {
                Some('v') => {
                    sd.version = value
                        .parse()
                        .map_err(|_| Error::SdpInvalidValue(value.to_owned()))?;
                    seen_version = true;
                }
                Some('o') => sd.origin = parse_origin(value)?,
                Some('s') => sd.session_name = value.to_owned(),
                Some('c') => {
                    let ci = Some(parse_connection_information(value)?);
                    if let Some(md) = sd.media_descriptions.last_mut() {
                        md.connection_information = ci;
                    } else {
                        sd.connection_information = ci;
                    }
                }
                Some('t') => {
                    if sd.media_descriptions.is_empty() {
                        sd.time_descriptions.push(parse_timing(value)?);
                    }
                }
                Some('a') => {
                    let attr = parse_attribute(value);
                    if let Some(md) = sd.media_descriptions.last_mut() {
                        md.attributes.push(attr);
                    } else {
                        sd.attributes.push(attr);
                    }
                }
                Some('m') => {
                    sd.media_descriptions.push(MediaDescription {
                        media_name: parse_media_name(value)?,
                        ..Default::default()
                    });
                }
                Some('b') | Some('k') | Some('i') | Some('u') | Some('e') | Some('p')
                | Some('r') | Some('z') => {}
                _ => return Err(Error::SdpInvalidSyntax(line.to_owned())),
            }
        }

        if !seen_version {
            return Err(Error::SdpMissingSessionField('v'));
        }
        Ok(sd)
    }
}

fn parse_origin(value: &str) -> Result<Origin> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.len() != 6 {
        return Err(Error::SdpInvalidValue(value.to_owned()));
    }
    Ok(Origin {
        username: fields[0].to_owned(),
        session_id: fields[1].parse()?,
        session_version: fields[2].parse()?,
        network_type: fields[3].to_owned(),
        address_type: fields[4].to_owned(),
        unicast_address: fields[5].to_owned(),
    })
}

fn parse_connection_information(value: &str) -> Result<ConnectionInformation> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.len() < 2 {
        return Err(Error::SdpInvalidValue(value.to_owned()));
    }
    Ok(ConnectionInformation {
        network_type: fields[0].to_owned(),
        address_type: fields[1].to_owned(),
        address: fields.get(2).map(|s| (*s).to_owned()),
    })
}

fn parse_timing(value: &str) -> Result<Timing> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.len() != 2 {
        return Err(Error::SdpInvalidValue(value.to_owned()));
    }
    Ok(Timing {
        start_time: fields[0].parse()?,
        stop_time: fields[1].parse()?,
    })
}

fn parse_attribute(value: &str) -> Attribute {
    match value.split_once(':') {
        Some((key, v)) => Attribute::new(key.to_owned(), Some(v.to_owned())),
        None => Attribute::new(value.to_owned(), None),
    }
}

fn parse_media_name(value: &str) -> Result<MediaName> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.len() < 3 {
        return Err(Error::SdpInvalidValue(value.to_owned()));
    }
    Ok(MediaName {
        media: fields[0].to_owned(),
        port: fields[1]
            .parse()
            .map_err(|_| Error::SdpInvalidValue(fields[1].to_owned()))?,
        protos: fields[2].split('/').map(|s| s.to_owned()).collect(),
        formats: fields[3..].iter().map(|s| (*s).to_owned()).collect(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    const CANONICAL: &str = "v=0\r\n\
o=- 4596489990601351948 2 IN IP4 0.0.0.0\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0\r\n\
a=extmap-allow-mixed\r\n\
a=msid-semantic: WMS\r\n\
a=fingerprint:sha-256 19:E2:1C:3B:4B:9F:81:E6:B8:5C:F4:A5:A8:D8:73:04:BB:05:2F:70:9F:04:A9:0E:05:E9:26:33:E8:70:88:A2\r\n\
m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
c=IN IP4 0.0.0.0\r\n\
a=ice-ufrag:aWm1\r\n\
a=ice-pwd:y0pKLKzxlaxOOsWjJXSLRGCz\r\n\
a=setup:actpass\r\n\
a=mid:0\r\n\
a=sctp-port:5000\r\n\
a=max-message-size:1200\r\n";

    #[test]
    fn test_unmarshal_marshal_round_trip() -> Result<()> {
        let sd = SessionDescription::unmarshal(CANONICAL)?;
        assert_eq!(sd.marshal(), CANONICAL);
        Ok(())
    }

    #[test]
    fn test_unmarshal_lf_fallback() -> Result<()> {
        let lf_only = CANONICAL.replace("\r\n", "\n");
        let sd = SessionDescription::unmarshal(&lf_only)?;
        // marshalling normalizes back to CRLF
        assert_eq!(sd.marshal(), CANONICAL);
        Ok(())
    }

    #[test]
    fn test_unmarshal_fields() -> Result<()> {
        let sd = SessionDescription::unmarshal(CANONICAL)?;
        assert_eq!(sd.version, 0);
        assert_eq!(sd.origin.session_id, 4596489990601351948);
        assert_eq!(sd.time_descriptions.len(), 1);
        assert_eq!(sd.media_descriptions.len(), 1);

        let md = &sd.media_descriptions[0];
        assert_eq!(md.media_name.media, "application");
        assert_eq!(md.media_name.protos, vec!["UDP", "DTLS", "SCTP"]);
        assert_eq!(md.media_name.formats, vec!["webrtc-datachannel"]);
        assert_eq!(md.attribute("ice-ufrag"), Some(Some("aWm1")));
        assert_eq!(md.attribute("sctp-port"), Some(Some("5000")));
        assert_eq!(sd.attribute("group"), Some(Some("BUNDLE 0")));
        Ok(())
    }

    #[test]
    fn test_unmarshal_invalid_line() {
        let result = SessionDescription::unmarshal("v=0\r\nnonsense\r\n");
        assert!(matches!(result, Err(Error::SdpInvalidSyntax(_))));
    }

    #[test]
    fn test_unmarshal_missing_version() {
        let result = SessionDescription::unmarshal("s=-\r\n");
        assert_eq!(result.err(), Some(Error::SdpMissingSessionField('v')));
    }

    #[test]
    fn test_session_id_leading_bit() {
        for _ in 0..16 {
            let id = new_session_id();
            assert!(id & (1u64 << 63) == 0);
            assert!(id & (1u64 << 62) != 0);
        }
    }
}
