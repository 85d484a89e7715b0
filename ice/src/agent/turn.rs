use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use stun::attributes::*;
use stun::message::*;
use stun::xoraddr::XorMappedAddress;

type Result<T> = std::result::Result<T, stun::Error>;

/// Transport protocol number for UDP, carried in REQUESTED-TRANSPORT.
pub(crate) const PROTO_UDP: u8 = 17;

/// Default requested allocation lifetime, RFC 5766 Section 2.2.
pub(crate) const DEFAULT_LIFETIME: Duration = Duration::from_secs(600);

/// RequestedTransport represents REQUESTED-TRANSPORT attribute.
///
/// RFC 5766 Section 14.7
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
pub(crate) struct RequestedTransport {
    pub(crate) protocol: u8,
}

const REQUESTED_TRANSPORT_SIZE: usize = 4;

impl Setter for RequestedTransport {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let v = [self.protocol, 0, 0, 0];
        m.add(ATTR_REQUESTED_TRANSPORT, &v);
        Ok(())
    }
}

impl Getter for RequestedTransport {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_REQUESTED_TRANSPORT)?;
        if v.len() != REQUESTED_TRANSPORT_SIZE {
            return Err(stun::Error::ErrAttributeSizeInvalid);
        }
        self.protocol = v[0];
        Ok(())
    }
}

/// Lifetime represents LIFETIME attribute.
///
/// RFC 5766 Section 14.2
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
pub(crate) struct Lifetime(pub(crate) Duration);

impl Setter for Lifetime {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(ATTR_LIFETIME, &(self.0.as_secs() as u32).to_be_bytes());
        Ok(())
    }
}

impl Getter for Lifetime {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_LIFETIME)?;
        if v.len() != 4 {
            return Err(stun::Error::ErrAttributeSizeInvalid);
        }
        let seconds = u32::from_be_bytes(v[..4].try_into().unwrap());
        self.0 = Duration::from_secs(seconds as u64);
        Ok(())
    }
}

/// Allocation tracks the client side of one TURN allocation.
#[derive(Debug)]
pub(crate) struct Allocation {
    pub(crate) server: SocketAddr,
    pub(crate) username: String,
    pub(crate) password: String,
    pub(crate) realm: String,
    pub(crate) nonce: String,
    pub(crate) relayed: Option<SocketAddr>,
    pub(crate) lifetime: Duration,
    pub(crate) refresh_at: Option<Instant>,
    pub(crate) permissions: HashSet<IpAddr>,
}

impl Allocation {
    pub(crate) fn new(server: SocketAddr, username: String, password: String) -> Self {
        Allocation {
            server,
            username,
            password,
            realm: String::new(),
            nonce: String::new(),
            relayed: None,
            lifetime: DEFAULT_LIFETIME,
            refresh_at: None,
            permissions: HashSet::new(),
        }
    }
}

/// send_indication builds a Send indication carrying data to peer through the
/// relay.
///
/// RFC 5766 Section 10.1
pub(crate) fn send_indication(peer: SocketAddr, data: &[u8]) -> Result<Message> {
    let mut msg = Message::new();
    msg.build(&[
        Box::new(MessageType::new(METHOD_SEND, CLASS_INDICATION)),
        Box::new(TransactionId::new()),
        Box::new(XorPeerAddress(XorMappedAddress {
            ip: peer.ip(),
            port: peer.port(),
        })),
    ])?;
    msg.add(ATTR_DATA, data);
    Ok(msg)
}

/// parse_data_indication extracts (peer, data) from a Data indication.
///
/// RFC 5766 Section 10.4
pub(crate) fn parse_data_indication(m: &Message) -> Result<(SocketAddr, Vec<u8>)> {
    let mut peer = XorMappedAddress::default();
    peer.get_from_as(m, ATTR_XOR_PEER_ADDRESS)?;
    let data = m.get(ATTR_DATA)?;
    Ok((SocketAddr::new(peer.ip, peer.port), data))
}

/// XorPeerAddress wraps XOR-PEER-ADDRESS encoding.
#[derive(Debug, Default, Clone)]
pub(crate) struct XorPeerAddress(pub(crate) XorMappedAddress);

impl Setter for XorPeerAddress {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        self.0.add_to_as(m, ATTR_XOR_PEER_ADDRESS)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_requested_transport_round_trip() -> Result<()> {
        let mut m = Message::new();
        RequestedTransport { protocol: PROTO_UDP }.add_to(&mut m)?;

        let mut got = RequestedTransport::default();
        got.get_from(&m)?;
        assert_eq!(got.protocol, PROTO_UDP);
        Ok(())
    }

    #[test]
    fn test_lifetime_round_trip() -> Result<()> {
        let mut m = Message::new();
        Lifetime(Duration::from_secs(600)).add_to(&mut m)?;

        let mut got = Lifetime::default();
        got.get_from(&m)?;
        assert_eq!(got.0, Duration::from_secs(600));
        Ok(())
    }

    #[test]
    fn test_send_data_indication_round_trip() -> Result<()> {
        let peer: SocketAddr = "10.1.2.3:7000".parse().unwrap();
        let ind = send_indication(peer, b"payload")?;

        let mut decoded = Message::new();
        decoded.unmarshal_binary(&ind.raw)?;
        let (got_peer, got_data) = parse_data_indication(&decoded)?;
        assert_eq!(got_peer, peer);
        assert_eq!(got_data, b"payload");
        Ok(())
    }
}
