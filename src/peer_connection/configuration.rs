use std::net::IpAddr;

use stun::message::Message;

use crate::peer_connection::certificate::RTCCertificate;
use crate::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use crate::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;

/// ICEServer describes a single STUN or TURN server that can be used by the
/// ICE agent to establish a connection with a peer.
#[derive(Default, Debug, Clone)]
pub struct RTCIceServer {
    /// `stun:` and `turn:` URLs, udp transport only.
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

/// Predicate invoked for every inbound STUN message; returning false drops
/// it.
pub type StunFilterFn = Box<dyn Fn(&Message) -> bool + Send + Sync>;

/// A Configuration defines how peer-to-peer communication via
/// RTCPeerConnection is established or re-established.
#[derive(Default)]
pub struct RTCConfiguration {
    /// ice_servers defines a slice describing servers available to be used
    /// by ICE, such as STUN and TURN servers.
    pub ice_servers: Vec<RTCIceServer>,

    /// ice_transport_policy indicates which candidates the ICE Agent is
    /// allowed to use.
    pub ice_transport_policy: RTCIceTransportPolicy,

    /// ice_port_range restricts the local UDP port to this closed interval;
    /// min must be smaller than max.
    pub ice_port_range: Option<(u16, u16)>,

    /// ice_interface_addresses restricts gathering to these local
    /// addresses.
    pub ice_interface_addresses: Vec<IpAddr>,

    /// ice_additional_host_addresses includes otherwise-excluded local
    /// addresses (loopback, tunnel interfaces).
    pub ice_additional_host_addresses: Vec<IpAddr>,

    /// Address families enabled for gathering.
    pub ice_use_ipv4: bool,
    pub ice_use_ipv6: bool,

    /// ice_filter_stun_response drops inbound STUN messages the predicate
    /// rejects.
    pub ice_filter_stun_response: Option<StunFilterFn>,

    /// dtls_keys preprovisions the DTLS identity instead of generating a
    /// certificate on demand.
    pub dtls_keys: Option<RTCCertificate>,

    /// bundle_policy defines how the SDP BUNDLE group is produced.
    pub bundle_policy: RTCBundlePolicy,
}

impl RTCConfiguration {
    pub(crate) fn use_ipv4(&self) -> bool {
        // both families default to IPv4-on when nothing was configured
        self.ice_use_ipv4 || !self.ice_use_ipv6
    }

    pub(crate) fn use_ipv6(&self) -> bool {
        self.ice_use_ipv6
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_address_families() {
        let config = RTCConfiguration::default();
        assert!(config.use_ipv4());
        assert!(!config.use_ipv6());

        let v6_only = RTCConfiguration {
            ice_use_ipv6: true,
            ..Default::default()
        };
        assert!(!v6_only.use_ipv4());
        assert!(v6_only.use_ipv6());

        let both = RTCConfiguration {
            ice_use_ipv4: true,
            ice_use_ipv6: true,
            ..Default::default()
        };
        assert!(both.use_ipv4() && both.use_ipv6());
    }
}
