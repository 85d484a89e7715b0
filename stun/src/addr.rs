use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::attributes::*;
use crate::error::*;
use crate::message::*;

pub const FAMILY_IPV4: u16 = 0x01;
pub const FAMILY_IPV6: u16 = 0x02;
pub const IPV4LEN: usize = 4;
pub const IPV6LEN: usize = 16;

/// MappedAddress represents MAPPED-ADDRESS attribute.
///
/// This attribute is used only by servers for achieving backwards
/// compatibility with RFC 3489 clients.
///
/// RFC 5389 Section 15.1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl Default for MappedAddress {
    fn default() -> Self {
        MappedAddress {
            ip: IpAddr::V4(Ipv4Addr::from(0)),
            port: 0,
        }
    }
}

impl fmt::Display for MappedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(_) => write!(f, "{}:{}", self.ip, self.port),
            IpAddr::V6(_) => write!(f, "[{}]:{}", self.ip, self.port),
        }
    }
}

impl Setter for MappedAddress {
    /// add_to adds MAPPED-ADDRESS to message.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        self.add_to_as(m, ATTR_MAPPED_ADDRESS)
    }
}

impl Getter for MappedAddress {
    /// get_from decodes MAPPED-ADDRESS from message.
    fn get_from(&mut self, m: &Message) -> Result<()> {
        self.get_from_as(m, ATTR_MAPPED_ADDRESS)
    }
}

impl MappedAddress {
    /// get_from_as decodes MAPPED-ADDRESS value in message m as an attribute of type t.
    pub fn get_from_as(&mut self, m: &Message, t: AttrType) -> Result<()> {
        let v = m.get(t)?;
        if v.len() <= 4 {
            return Err(Error::ErrUnexpectedEof);
        }

        let family = u16::from_be_bytes([v[0], v[1]]);
        if family != FAMILY_IPV6 && family != FAMILY_IPV4 {
            return Err(Error::ErrBadIpLength);
        }
        self.port = u16::from_be_bytes([v[2], v[3]]);

        if family == FAMILY_IPV6 {
            if v.len() < 4 + IPV6LEN {
                return Err(Error::ErrUnexpectedEof);
            }
            let octets: [u8; IPV6LEN] = v[4..4 + IPV6LEN]
                .try_into()
                .map_err(|_| Error::ErrBadIpLength)?;
            self.ip = IpAddr::V6(Ipv6Addr::from(octets));
        } else {
            if v.len() < 4 + IPV4LEN {
                return Err(Error::ErrUnexpectedEof);
            }
            let octets: [u8; IPV4LEN] = v[4..4 + IPV4LEN]
                .try_into()
                .map_err(|_| Error::ErrBadIpLength)?;
            self.ip = IpAddr::V4(Ipv4Addr::from(octets));
        }

        Ok(())
    }

    /// add_to_as adds MAPPED-ADDRESS value to message m as an attribute of type t.
    pub fn add_to_as(&self, m: &mut Message, t: AttrType) -> Result<()> {
        let mut value = vec![0u8; 4];
        match self.ip {
            IpAddr::V4(ipv4) => {
                value[0..2].copy_from_slice(&FAMILY_IPV4.to_be_bytes());
                value[2..4].copy_from_slice(&self.port.to_be_bytes());
                value.extend_from_slice(&ipv4.octets());
            }
            IpAddr::V6(ipv6) => {
                value[0..2].copy_from_slice(&FAMILY_IPV6.to_be_bytes());
                value[2..4].copy_from_slice(&self.port.to_be_bytes());
                value.extend_from_slice(&ipv6.octets());
            }
        }
        m.add(t, &value);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mapped_address_round_trip() -> Result<()> {
        let mut m = Message::new();
        let addr = MappedAddress {
            ip: "122.12.34.5".parse().unwrap(),
            port: 5412,
        };
        addr.add_to(&mut m)?;

        let mut got = MappedAddress::default();
        got.get_from(&m)?;
        assert_eq!(got, addr);
        Ok(())
    }

    #[test]
    fn test_mapped_address_v6_round_trip() -> Result<()> {
        let mut m = Message::new();
        let addr = MappedAddress {
            ip: "::21:5".parse().unwrap(),
            port: 1234,
        };
        addr.add_to(&mut m)?;

        let mut got = MappedAddress::default();
        got.get_from(&m)?;
        assert_eq!(got, addr);
        Ok(())
    }
}
