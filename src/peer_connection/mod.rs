pub mod certificate;
pub mod configuration;
pub mod peer_connection_state;
pub mod policy;
pub mod sdp;
pub mod signaling_state;

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use bytes::Bytes;
use dtls::conn::{DtlsConn, DtlsEvent};
use ice::agent::{Agent, AgentConfig, AgentEvent, IceServerAddr};
use ice::candidate::Candidate;
use ice::state::{ConnectionState, GatheringState};
use ice::url::{SchemeType, Url};
use log::{debug, trace, warn};
use sctp::{Association, AssociationEvent, PayloadProtocolIdentifier};
use tokio::net::UdpSocket;
use tokio::sync::Notify;

use crate::data_channel::data_channel_init::RTCDataChannelInit;
use crate::data_channel::data_channel_state::RTCDataChannelState;
use crate::data_channel::{DataChannelMessage, RTCDataChannel};
use crate::dtls_transport::dtls_role::{
    dtls_role_from_remote_sdp, DTLSRole, SETUP_ACTIVE_STR, SETUP_ACTPASS_STR,
};
use crate::dtls_transport::RTCDtlsTransportState;
use crate::error::{Error, Result};
use crate::ice_transport::ice_candidate::RTCIceCandidateInit;
use crate::ice_transport::{RTCIceConnectionState, RTCIceGatheringState};
use crate::peer_connection::certificate::RTCCertificate;
use crate::peer_connection::configuration::RTCConfiguration;
use crate::peer_connection::peer_connection_state::RTCPeerConnectionState;
use crate::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use crate::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use crate::peer_connection::sdp::sdp_type::RTCSdpType;
use crate::peer_connection::sdp::session_description::RTCSessionDescription;
use crate::peer_connection::sdp::*;
use crate::peer_connection::signaling_state::{
    check_next_signaling_state, RTCSignalingState, StateChangeOp,
};

pub type OnDataChannelHdlrFn = Box<dyn FnMut(Arc<RTCDataChannel>) + Send>;
pub type OnLocalCandidateHdlrFn = Box<dyn FnMut(Option<RTCIceCandidateInit>) + Send>;
pub type OnICEGatheringStateChangeHdlrFn = Box<dyn FnMut(RTCIceGatheringState) + Send>;
pub type OnICEConnectionStateChangeHdlrFn = Box<dyn FnMut(RTCIceConnectionState) + Send>;
pub type OnSignalingStateChangeHdlrFn = Box<dyn FnMut(RTCSignalingState) + Send>;
pub type OnPeerConnectionStateChangeHdlrFn = Box<dyn FnMut(RTCPeerConnectionState) + Send>;
pub type OnNegotiationNeededHdlrFn = Box<dyn FnMut() + Send>;

/// One queued application notification. Dispatch happens on the driver task
/// after the connection lock is released, in queue order, so handlers never
/// re-enter the protocol state mid-transition.
enum Dispatch {
    IceCandidate(Option<RTCIceCandidateInit>),
    IceGatheringState(RTCIceGatheringState),
    IceConnectionState(RTCIceConnectionState),
    SignalingState(RTCSignalingState),
    ConnectionState(RTCPeerConnectionState),
    NegotiationNeeded,
    DataChannel(Arc<RTCDataChannel>),
    ChannelOpen(Arc<RTCDataChannel>),
    ChannelMessage(Arc<RTCDataChannel>, Bytes),
    ChannelClose(Arc<RTCDataChannel>),
}

#[derive(Default)]
struct Handlers {
    on_data_channel: Mutex<Option<OnDataChannelHdlrFn>>,
    on_ice_candidate: Mutex<Option<OnLocalCandidateHdlrFn>>,
    on_ice_gathering_state_change: Mutex<Option<OnICEGatheringStateChangeHdlrFn>>,
    on_ice_connection_state_change: Mutex<Option<OnICEConnectionStateChangeHdlrFn>>,
    on_signaling_state_change: Mutex<Option<OnSignalingStateChangeHdlrFn>>,
    on_connection_state_change: Mutex<Option<OnPeerConnectionStateChangeHdlrFn>>,
    on_negotiation_needed: Mutex<Option<OnNegotiationNeededHdlrFn>>,
}

impl Handlers {
    fn clear(&self) {
        *self.on_data_channel.lock().unwrap() = None;
        *self.on_ice_candidate.lock().unwrap() = None;
        *self.on_ice_gathering_state_change.lock().unwrap() = None;
        *self.on_ice_connection_state_change.lock().unwrap() = None;
        *self.on_signaling_state_change.lock().unwrap() = None;
        *self.on_connection_state_change.lock().unwrap() = None;
        *self.on_negotiation_needed.lock().unwrap() = None;
    }
}

/// call_handler takes the handler out of its slot for the duration of the
/// call so the callback may replace it without deadlocking.
fn call_handler<T>(slot: &Mutex<Option<Box<dyn FnMut(T) + Send>>>, arg: T) {
    let taken = slot.lock().unwrap().take();
    if let Some(mut f) = taken {
        f(arg);
        let mut guard = slot.lock().unwrap();
        if guard.is_none() {
            *guard = Some(f);
        }
    }
}

fn call_handler0(slot: &Mutex<Option<Box<dyn FnMut() + Send>>>) {
    let taken = slot.lock().unwrap().take();
    if let Some(mut f) = taken {
        f();
        let mut guard = slot.lock().unwrap();
        if guard.is_none() {
            *guard = Some(f);
        }
    }
}

/// PeerConnectionInternal holds every protocol state machine of one
/// connection. All of it is mutated under a single mutex: API calls and the
/// driver task serialize here, so protocol transitions are atomic with
/// respect to each other.
pub(crate) struct PeerConnectionInternal {
    certificate: RTCCertificate,
    bundle_policy: RTCBundlePolicy,

    signaling_state: RTCSignalingState,
    connection_state: RTCPeerConnectionState,
    ice_connection_state: RTCIceConnectionState,
    ice_gathering_state: RTCIceGatheringState,
    dtls_state: RTCDtlsTransportState,

    agent: Agent,
    dtls: Option<DtlsConn>,
    sctp: Option<Association>,

    dtls_role: DTLSRole,
    remote_fingerprints: Vec<dtls::Fingerprint>,
    remote_sctp_port: u16,

    local_description: Option<RTCSessionDescription>,
    remote_description: Option<RTCSessionDescription>,
    local_candidates: Vec<Candidate>,

    channels: HashMap<u16, Arc<RTCDataChannel>>,
    pending_channels: Vec<Arc<RTCDataChannel>>,
    awaiting_ack: Vec<u16>,
    next_stream_id: u16,
    sctp_established: bool,

    negotiation_needed: bool,
    negotiation_needed_fired: bool,

    closed: bool,

    dispatches: Vec<Dispatch>,

    /// Back-reference handed to data channels; filled in right after the
    /// Arc is created.
    self_ref: Weak<Mutex<PeerConnectionInternal>>,
    notify: Arc<Notify>,
}

impl PeerConnectionInternal {
    /// pump runs every state machine until quiescent, cascading transmit
    /// queues downward (SCTP -> DTLS -> ICE), and returns the datagrams to
    /// put on the socket, in order.
    fn pump(&mut self, now: Instant) -> Vec<(SocketAddr, Bytes)> {
        loop {
            let mut progressed = false;

            while let Some(event) = self.agent.poll_event() {
                progressed = true;
                self.handle_agent_event(event, now);
            }

            loop {
                let event = match self.dtls.as_mut() {
                    Some(dtls_conn) => dtls_conn.poll_event(),
                    None => None,
                };
                let Some(event) = event else { break };
                progressed = true;
                self.handle_dtls_event(event, now);
            }

            loop {
                let event = match self.sctp.as_mut() {
                    Some(assoc) => assoc.poll_event(),
                    None => None,
                };
                let Some(event) = event else { break };
                progressed = true;
                self.handle_sctp_event(event);
            }

            // SCTP packets ride in DTLS application-data records
            loop {
                let packet = match self.sctp.as_mut() {
                    Some(assoc) => assoc.poll_transmit(),
                    None => None,
                };
                let Some(packet) = packet else { break };
                progressed = true;
                if let Some(dtls_conn) = self.dtls.as_mut() {
                    if let Err(err) = dtls_conn.write(&packet) {
                        trace!("dropping sctp packet, dtls not writable: {err}");
                    }
                }
            }

            // DTLS records ride on the ICE selected pair
            loop {
                let datagram = match self.dtls.as_mut() {
                    Some(dtls_conn) => dtls_conn.poll_transmit(),
                    None => None,
                };
                let Some(datagram) = datagram else { break };
                progressed = true;
                if let Err(err) = self.agent.send_payload(&datagram) {
                    trace!("dropping dtls datagram, no selected pair: {err}");
                }
            }

            if !progressed {
                break;
            }
        }

        let mut outbound = vec![];
        while let Some(transmit) = self.agent.poll_transmit() {
            outbound.push((transmit.to, transmit.payload));
        }
        outbound
    }

    fn handle_agent_event(&mut self, event: AgentEvent, now: Instant) {
        match event {
            AgentEvent::Candidate(candidate) => {
                self.local_candidates.push(candidate.clone());
                self.dispatches.push(Dispatch::IceCandidate(Some(
                    RTCIceCandidateInit::from_candidate(&candidate, DEFAULT_MID),
                )));
            }
            AgentEvent::GatheringStateChange(state) => {
                self.ice_gathering_state = state.into();
                self.dispatches
                    .push(Dispatch::IceGatheringState(self.ice_gathering_state));
                if state == GatheringState::Complete {
                    // trickle termination
                    self.dispatches.push(Dispatch::IceCandidate(None));
                }
            }
            AgentEvent::ConnectionStateChange(state) => {
                self.ice_connection_state = state.into();
                self.dispatches
                    .push(Dispatch::IceConnectionState(self.ice_connection_state));
                if state == ConnectionState::Failed {
                    self.transition_failed();
                } else {
                    self.update_connection_state();
                }
            }
            AgentEvent::SelectedPair { local, remote } => {
                debug!("ice selected pair {local} <-> {remote}");
                if let Err(err) = self.start_dtls(now) {
                    warn!("failed to start dtls: {err}");
                    self.transition_failed();
                }
            }
            AgentEvent::PayloadReceived(payload) => {
                let result = match self.dtls.as_mut() {
                    Some(dtls_conn) => dtls_conn.handle_read(&payload, now),
                    None => {
                        trace!("dtls payload before transport start, dropping");
                        Ok(())
                    }
                };
                if let Err(err) = result {
                    warn!("dtls failure: {err}");
                    self.dtls_state = RTCDtlsTransportState::Failed;
                    self.transition_failed();
                }
            }
        }
    }

    fn handle_dtls_event(&mut self, event: DtlsEvent, now: Instant) {
        match event {
            DtlsEvent::Connected => {
                debug!("dtls connected, fingerprint verified");
                self.dtls_state = RTCDtlsTransportState::Connected;
                self.update_connection_state();
                if let Err(err) = self.start_sctp(now) {
                    warn!("failed to start sctp: {err}");
                    self.transition_failed();
                }
            }
            DtlsEvent::ApplicationData(payload) => {
                if let Some(assoc) = self.sctp.as_mut() {
                    let _ = assoc.handle_read(&payload, now);
                }
            }
        }
    }

    fn handle_sctp_event(&mut self, event: AssociationEvent) {
        match event {
            AssociationEvent::Established => {
                debug!("sctp association established");
                self.sctp_established = true;
                self.announce_pending_channels();
            }
            AssociationEvent::Data {
                stream_id,
                ppi,
                payload,
            } => self.handle_sctp_data(stream_id, ppi, payload),
            AssociationEvent::StreamReset(stream_id) => {
                if let Some(channel) = self.channels.get(&stream_id) {
                    channel.set_ready_state(RTCDataChannelState::Closed);
                    self.dispatches
                        .push(Dispatch::ChannelClose(channel.clone()));
                }
            }
            AssociationEvent::Closed => {
                if !self.closed {
                    debug!("sctp association closed by peer");
                    self.close_internal();
                }
            }
        }
    }

    fn handle_sctp_data(
        &mut self,
        stream_id: u16,
        ppi: PayloadProtocolIdentifier,
        payload: Bytes,
    ) {
        match ppi {
            PayloadProtocolIdentifier::Dcep => {
                let mut buf = payload.clone();
                match data::Message::unmarshal(&mut buf) {
                    Ok(data::Message::DataChannelOpen(open)) => {
                        self.handle_dcep_open(stream_id, open);
                    }
                    Ok(data::Message::DataChannelAck(_)) => {
                        if let Some(idx) =
                            self.awaiting_ack.iter().position(|id| *id == stream_id)
                        {
                            self.awaiting_ack.remove(idx);
                            if let Some(channel) = self.channels.get(&stream_id) {
                                channel.set_ready_state(RTCDataChannelState::Open);
                                self.dispatches
                                    .push(Dispatch::ChannelOpen(channel.clone()));
                            }
                        }
                    }
                    Err(err) => warn!("undecodable DCEP message on stream {stream_id}: {err}"),
                }
            }
            _ => {
                // every non-DCEP payload is delivered as opaque bytes
                if let Some(channel) = self.channels.get(&stream_id) {
                    let data = match ppi {
                        PayloadProtocolIdentifier::BinaryEmpty
                        | PayloadProtocolIdentifier::StringEmpty => Bytes::new(),
                        _ => payload,
                    };
                    self.dispatches
                        .push(Dispatch::ChannelMessage(channel.clone(), data));
                } else {
                    trace!("data for unknown stream {stream_id}, dropping");
                }
            }
        }
    }

    fn handle_dcep_open(&mut self, stream_id: u16, open: data::DataChannelOpen) {
        if self.channels.contains_key(&stream_id) {
            trace!("duplicate DATA_CHANNEL_OPEN for stream {stream_id}");
            return;
        }
        let label = String::from_utf8_lossy(&open.label).to_string();
        let protocol = String::from_utf8_lossy(&open.protocol).to_string();
        debug!("remote opened data channel `{label}` on stream {stream_id}");

        let channel = Arc::new(RTCDataChannel::new(
            label,
            protocol,
            !open.channel_type.unordered(),
            Some(stream_id),
            self.self_ref.clone(),
            self.notify.clone(),
        ));
        channel.set_ready_state(RTCDataChannelState::Open);
        self.channels.insert(stream_id, channel.clone());

        let ack = data::Message::DataChannelAck(data::DataChannelAck);
        if let (Some(assoc), Ok(raw)) = (self.sctp.as_mut(), ack.marshal()) {
            let _ = assoc.send(stream_id, PayloadProtocolIdentifier::Dcep, raw, false);
        }

        self.dispatches.push(Dispatch::DataChannel(channel.clone()));
        self.dispatches.push(Dispatch::ChannelOpen(channel));
    }

    /// announce_pending_channels assigns stream ids and sends
    /// DATA_CHANNEL_OPEN for every locally created channel once the
    /// association is up. The DTLS client uses even stream identifiers, the
    /// server odd ones.
    fn announce_pending_channels(&mut self) {
        let pending = std::mem::take(&mut self.pending_channels);
        for channel in pending {
            let stream_id = match channel.id() {
                Some(id) => id,
                None => {
                    let id = self.allocate_stream_id();
                    channel.set_stream_id(id);
                    id
                }
            };

            let open = data::Message::DataChannelOpen(data::DataChannelOpen {
                channel_type: if channel.ordered() {
                    data::ChannelType::Reliable
                } else {
                    data::ChannelType::ReliableUnordered
                },
                priority: data::CHANNEL_PRIORITY_NORMAL,
                reliability_parameter: 0,
                label: channel.label().as_bytes().to_vec(),
                protocol: channel.protocol().as_bytes().to_vec(),
            });

            if let (Some(assoc), Ok(raw)) = (self.sctp.as_mut(), open.marshal()) {
                if let Err(err) = assoc.send(stream_id, PayloadProtocolIdentifier::Dcep, raw, false)
                {
                    warn!("failed to announce data channel: {err}");
                    continue;
                }
            }
            self.channels.insert(stream_id, channel);
            self.awaiting_ack.push(stream_id);
        }
    }

    fn allocate_stream_id(&mut self) -> u16 {
        let mut id = self.next_stream_id;
        while self.channels.contains_key(&id) {
            id = id.wrapping_add(2);
        }
        self.next_stream_id = id.wrapping_add(2);
        id
    }

    fn start_dtls(&mut self, now: Instant) -> Result<()> {
        if self.dtls.is_some() {
            return Ok(());
        }
        let is_client = match self.dtls_role {
            DTLSRole::Client => true,
            DTLSRole::Server => false,
            // fall back to the ICE roles: controlled acts as client
            _ => !self.agent.is_controlling(),
        };
        debug!(
            "starting dtls as {}",
            if is_client { "client" } else { "server" },
        );
        let config = dtls::Config::new(
            self.certificate.dtls_certificate(),
            self.remote_fingerprints.clone(),
        );
        self.dtls = Some(DtlsConn::new(config, is_client, now)?);
        self.dtls_state = RTCDtlsTransportState::Connecting;
        self.update_connection_state();
        Ok(())
    }

    fn start_sctp(&mut self, now: Instant) -> Result<()> {
        if self.sctp.is_some() {
            return Ok(());
        }
        let is_client = matches!(self.dtls_role, DTLSRole::Client)
            || (self.dtls_role == DTLSRole::Auto && !self.agent.is_controlling());
        let config = sctp::Config {
            source_port: sctp::DEFAULT_SCTP_PORT,
            destination_port: self.remote_sctp_port,
            ..Default::default()
        };
        self.sctp = Some(if is_client {
            self.next_stream_id = 0; // dtls client announces on even streams
            Association::client(config, now)?
        } else {
            self.next_stream_id = 1;
            Association::server(config)?
        });
        Ok(())
    }

    pub(crate) fn send_user_data(
        &mut self,
        stream_id: u16,
        data: Bytes,
        unordered: bool,
    ) -> Result<()> {
        let assoc = self.sctp.as_mut().ok_or(Error::ErrSctpClosed)?;
        let ppi = if data.is_empty() {
            PayloadProtocolIdentifier::BinaryEmpty
        } else {
            PayloadProtocolIdentifier::Binary
        };
        assoc
            .send(stream_id, ppi, data, unordered)
            .map_err(|err| match err {
                sctp::Error::ErrOutboundPacketTooLarge => Error::ErrPayloadTooLarge,
                sctp::Error::ErrPayloadDataStateNotExist => Error::ErrSctpClosed,
                other => Error::Sctp(other),
            })
    }

    pub(crate) fn reset_channel_stream(&mut self, stream_id: u16) -> Result<()> {
        if let Some(assoc) = self.sctp.as_mut() {
            match assoc.reset_stream(stream_id, Instant::now()) {
                Ok(()) | Err(sctp::Error::ErrReconfigRequestPending) => {}
                Err(err) => return Err(Error::Sctp(err)),
            }
        }
        if self.signaling_state == RTCSignalingState::Stable {
            self.negotiation_needed = true;
        }
        Ok(())
    }

    fn handle_timeouts(&mut self, now: Instant) {
        self.agent.handle_timeout(now);
        if let Some(dtls_conn) = self.dtls.as_mut() {
            if let Err(err) = dtls_conn.handle_timeout(now) {
                warn!("dtls handshake failed: {err}");
                self.dtls_state = RTCDtlsTransportState::Failed;
                self.transition_failed();
            }
        }
        if let Some(assoc) = self.sctp.as_mut() {
            if let Err(err) = assoc.handle_timeout(now) {
                warn!("sctp handshake failed: {err}");
                self.transition_failed();
            }
        }
    }

    fn poll_timeout(&self) -> Option<Instant> {
        let mut deadline: Option<Instant> = None;
        let mut consider = |d: Option<Instant>| {
            deadline = match (deadline, d) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, None) => a,
                (None, b) => b,
            };
        };
        consider(self.agent.poll_timeout());
        consider(self.dtls.as_ref().and_then(|d| d.poll_timeout()));
        consider(self.sctp.as_ref().and_then(|a| a.poll_timeout()));
        deadline
    }

    fn check_negotiation_needed(&mut self) {
        if self.negotiation_needed
            && !self.negotiation_needed_fired
            && self.signaling_state == RTCSignalingState::Stable
            && !self.closed
        {
            self.negotiation_needed = false;
            self.negotiation_needed_fired = true;
            self.dispatches.push(Dispatch::NegotiationNeeded);
        }
    }

    /// Connection-state aggregation rules: failed wins, then disconnected,
    /// then connected once DTLS is up over a working pair; closed is
    /// terminal.
    fn update_connection_state(&mut self) {
        if self.closed {
            return;
        }
        let next = if self.connection_state == RTCPeerConnectionState::Failed
            || self.ice_connection_state == RTCIceConnectionState::Failed
            || self.dtls_state == RTCDtlsTransportState::Failed
        {
            RTCPeerConnectionState::Failed
        } else if self.ice_connection_state == RTCIceConnectionState::Disconnected {
            RTCPeerConnectionState::Disconnected
        } else if self.dtls_state == RTCDtlsTransportState::Connected
            && matches!(
                self.ice_connection_state,
                RTCIceConnectionState::Connected | RTCIceConnectionState::Completed
            )
        {
            RTCPeerConnectionState::Connected
        } else if matches!(
            self.ice_connection_state,
            RTCIceConnectionState::Checking
                | RTCIceConnectionState::Connected
                | RTCIceConnectionState::Completed
        ) || self.dtls_state == RTCDtlsTransportState::Connecting
        {
            RTCPeerConnectionState::Connecting
        } else {
            RTCPeerConnectionState::New
        };
        self.set_connection_state(next);
    }

    fn set_connection_state(&mut self, state: RTCPeerConnectionState) {
        if self.connection_state != state {
            self.connection_state = state;
            self.dispatches.push(Dispatch::ConnectionState(state));
        }
    }

    fn transition_failed(&mut self) {
        if self.closed {
            return;
        }
        self.set_connection_state(RTCPeerConnectionState::Failed);
    }

    /// close_internal advances every state machine to closed. Used both for
    /// a local `close()` and when the peer tears the session down.
    fn close_internal(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(assoc) = self.sctp.as_mut() {
            assoc.abort();
        }
        // flush the teardown packet through DTLS before closing it
        loop {
            let packet = match self.sctp.as_mut() {
                Some(assoc) => assoc.poll_transmit(),
                None => None,
            };
            let Some(packet) = packet else { break };
            if let Some(dtls_conn) = self.dtls.as_mut() {
                let _ = dtls_conn.write(&packet);
            }
        }
        if let Some(dtls_conn) = self.dtls.as_mut() {
            dtls_conn.close();
        }
        loop {
            let datagram = match self.dtls.as_mut() {
                Some(dtls_conn) => dtls_conn.poll_transmit(),
                None => None,
            };
            let Some(datagram) = datagram else { break };
            let _ = self.agent.send_payload(&datagram);
        }
        self.agent.close();
        // drop trailing agent state events; the terminal states below are
        // dispatched explicitly
        while self.agent.poll_event().is_some() {}

        let channels: Vec<Arc<RTCDataChannel>> = self.channels.values().cloned().collect();
        for channel in channels {
            channel.set_ready_state(RTCDataChannelState::Closed);
            self.dispatches.push(Dispatch::ChannelClose(channel));
        }
        for channel in &self.pending_channels {
            channel.set_ready_state(RTCDataChannelState::Closed);
        }

        if self.signaling_state != RTCSignalingState::Closed {
            self.signaling_state = RTCSignalingState::Closed;
            self.dispatches
                .push(Dispatch::SignalingState(RTCSignalingState::Closed));
        }
        self.connection_state = RTCPeerConnectionState::Closed;
        self.dispatches
            .push(Dispatch::ConnectionState(RTCPeerConnectionState::Closed));
    }
}

/// PeerConnection represents a WebRTC connection between the local endpoint
/// and a remote peer, carrying only data channels in this profile.
pub struct RTCPeerConnection {
    internal: Arc<Mutex<PeerConnectionInternal>>,
    handlers: Arc<Handlers>,
    notify: Arc<Notify>,
}

impl RTCPeerConnection {
    /// new creates a PeerConnection: it provisions a certificate, binds the
    /// single UDP socket, resolves the configured ICE servers, starts
    /// candidate gathering, and spawns the connection's driver task.
    pub async fn new(config: RTCConfiguration) -> Result<Arc<RTCPeerConnection>> {
        let certificate = match &config.dtls_keys {
            Some(certificate) => certificate.clone(),
            None => RTCCertificate::generate()?,
        };

        let servers = resolve_ice_servers(&config).await?;
        let socket = Arc::new(bind_socket(&config).await?);
        let bases = local_bases(&config, &socket).await?;

        let mut agent_config = AgentConfig {
            servers,
            relay_only: config.ice_transport_policy == RTCIceTransportPolicy::Relay,
            ..Default::default()
        };
        let mut config = config;
        agent_config.stun_filter = config.ice_filter_stun_response.take();

        let mut agent = Agent::new(agent_config);
        agent.gather_candidates(&bases, Instant::now())?;

        let notify = Arc::new(Notify::new());
        let internal = Arc::new(Mutex::new(PeerConnectionInternal {
            certificate,
            bundle_policy: config.bundle_policy,
            signaling_state: RTCSignalingState::Stable,
            connection_state: RTCPeerConnectionState::New,
            ice_connection_state: RTCIceConnectionState::New,
            ice_gathering_state: RTCIceGatheringState::New,
            dtls_state: RTCDtlsTransportState::New,
            agent,
            dtls: None,
            sctp: None,
            dtls_role: DTLSRole::Auto,
            remote_fingerprints: vec![],
            remote_sctp_port: sctp::DEFAULT_SCTP_PORT,
            local_description: None,
            remote_description: None,
            local_candidates: vec![],
            channels: HashMap::new(),
            pending_channels: vec![],
            awaiting_ack: vec![],
            next_stream_id: 0,
            sctp_established: false,
            negotiation_needed: false,
            negotiation_needed_fired: false,
            closed: false,
            dispatches: vec![],
            self_ref: Weak::new(),
            notify: notify.clone(),
        }));
        internal.lock().unwrap().self_ref = Arc::downgrade(&internal);

        let handlers = Arc::new(Handlers::default());
        let pc = Arc::new(RTCPeerConnection {
            internal: internal.clone(),
            handlers: handlers.clone(),
            notify: notify.clone(),
        });

        tokio::spawn(drive(socket, internal, handlers, notify));

        Ok(pc)
    }

    /// signaling_state returns the current signaling state.
    pub fn signaling_state(&self) -> RTCSignalingState {
        self.internal.lock().unwrap().signaling_state
    }

    /// connection_state returns the aggregated connection state.
    pub fn connection_state(&self) -> RTCPeerConnectionState {
        self.internal.lock().unwrap().connection_state
    }

    /// ice_connection_state returns the ICE agent's connection state.
    pub fn ice_connection_state(&self) -> RTCIceConnectionState {
        self.internal.lock().unwrap().ice_connection_state
    }

    /// ice_gathering_state returns the candidate gathering state.
    pub fn ice_gathering_state(&self) -> RTCIceGatheringState {
        self.internal.lock().unwrap().ice_gathering_state
    }

    pub fn local_description(&self) -> Option<RTCSessionDescription> {
        self.internal.lock().unwrap().local_description.clone()
    }

    pub fn remote_description(&self) -> Option<RTCSessionDescription> {
        self.internal.lock().unwrap().remote_description.clone()
    }

    /// create_offer starts the PeerConnection and generates the localized
    /// description with the candidates gathered so far.
    pub fn create_offer(&self) -> Result<RTCSessionDescription> {
        self.create_description(RTCSdpType::Offer)
    }

    /// create_answer generates an answer to the received remote offer.
    pub fn create_answer(&self) -> Result<RTCSessionDescription> {
        {
            let internal = self.internal.lock().unwrap();
            if internal.remote_description.is_none() {
                return Err(Error::ErrNoRemoteDescription);
            }
        }
        self.create_description(RTCSdpType::Answer)
    }

    fn create_description(&self, sdp_type: RTCSdpType) -> Result<RTCSessionDescription> {
        let internal = self.internal.lock().unwrap();
        if internal.closed {
            return Err(Error::ErrConnectionClosed);
        }
        let (ufrag, pwd) = internal.agent.local_credentials();
        let fingerprints = internal.certificate.get_fingerprints()?;
        let setup = match sdp_type {
            RTCSdpType::Offer => SETUP_ACTPASS_STR,
            _ => SETUP_ACTIVE_STR,
        };
        let sd = create_session_description(
            ufrag,
            pwd,
            &fingerprints,
            setup,
            &internal.local_candidates,
            internal.ice_gathering_state == RTCIceGatheringState::Complete,
            internal.bundle_policy,
            sctp::DEFAULT_SCTP_PORT,
            sctp::DEFAULT_MAX_MESSAGE_SIZE,
        );
        Ok(RTCSessionDescription {
            sdp_type,
            sdp: sd.marshal(),
        })
    }

    /// set_local_description applies a description generated locally and
    /// advances the signaling state.
    pub fn set_local_description(&self, desc: RTCSessionDescription) -> Result<()> {
        {
            let mut internal = self.internal.lock().unwrap();
            if internal.closed {
                return Err(Error::ErrConnectionClosed);
            }

            let next = next_signaling_state(desc.sdp_type, StateChangeOp::SetLocal)?;
            let new_state = check_next_signaling_state(
                internal.signaling_state,
                next,
                StateChangeOp::SetLocal,
                desc.sdp_type,
            )?;
            desc.unmarshal()?;

            if desc.sdp_type == RTCSdpType::Offer {
                // the first offerer is the controlling agent
                internal.agent.set_controlling(true);
            } else {
                // the answerer is controlled unless the offerer is ice-lite
                let remote_is_lite = internal
                    .remote_description
                    .as_ref()
                    .and_then(|d| d.unmarshal().ok())
                    .map(|sd| summarize_remote_description(&sd).map(|s| s.ice_lite))
                    .transpose()?
                    .unwrap_or(false);
                internal.agent.set_controlling(remote_is_lite);
                internal.dtls_role = DTLSRole::Client; // we answer `active`
            }

            internal.signaling_state = new_state;
            internal.local_description = Some(desc);
            let state = internal.signaling_state;
            internal.dispatches.push(Dispatch::SignalingState(state));
        }
        self.notify.notify_one();
        Ok(())
    }

    /// set_remote_description applies the peer's description: it validates
    /// the media sections, primes the ICE agent with remote credentials and
    /// candidates, stores the fingerprints for DTLS verification, and
    /// advances the signaling state. A disallowed transition or an invalid
    /// description fails without changing any state.
    pub fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<()> {
        {
            let mut internal = self.internal.lock().unwrap();
            if internal.closed {
                return Err(Error::ErrConnectionClosed);
            }

            let next = next_signaling_state(desc.sdp_type, StateChangeOp::SetRemote)?;
            let new_state = check_next_signaling_state(
                internal.signaling_state,
                next,
                StateChangeOp::SetRemote,
                desc.sdp_type,
            )?;

            let sd = desc.unmarshal()?;
            let remote_is_offer = desc.sdp_type == RTCSdpType::Offer;

            if !remote_is_offer {
                // answer media sections must match the pending offer's
                let offer_sd = internal
                    .local_description
                    .as_ref()
                    .ok_or(Error::ErrNoRemoteDescription)?
                    .unmarshal()?;
                validate_answer_matches_offer(&offer_sd, &sd)?;
            }

            let summary = summarize_remote_description(&sd)?;

            internal.agent.set_remote_credentials(
                summary.ice_ufrag.clone(),
                summary.ice_pwd.clone(),
            );
            let now = Instant::now();
            for candidate in summary.candidates {
                internal.agent.add_remote_candidate(candidate, now);
            }

            if remote_is_offer {
                // answerer is controlled, unless the offerer is ice-lite
                internal.agent.set_controlling(summary.ice_lite);
            }

            internal.remote_fingerprints = summary
                .fingerprints
                .iter()
                .map(|f| dtls::Fingerprint {
                    algorithm: f.algorithm.clone(),
                    value: f.value.clone(),
                })
                .collect();
            internal.remote_sctp_port = summary.sctp_port;
            internal.dtls_role = dtls_role_from_remote_sdp(&sd, remote_is_offer);

            internal.signaling_state = new_state;
            internal.remote_description = Some(desc);
            let state = internal.signaling_state;
            internal.dispatches.push(Dispatch::SignalingState(state));
        }
        self.notify.notify_one();
        Ok(())
    }

    /// add_ice_candidate accepts an ICE candidate trickled from the remote
    /// peer over the signaling channel.
    pub fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        {
            let mut internal = self.internal.lock().unwrap();
            if internal.closed {
                return Err(Error::ErrConnectionClosed);
            }
            if internal.remote_description.is_none() {
                return Err(Error::ErrNoRemoteDescription);
            }
            let parsed = candidate.to_candidate()?;
            internal.agent.add_remote_candidate(parsed, Instant::now());
        }
        self.notify.notify_one();
        Ok(())
    }

    /// create_data_channel creates a new data channel with the given label.
    /// The channel opens once the transports connect and the peer
    /// acknowledges it.
    pub fn create_data_channel(
        &self,
        label: &str,
        options: Option<RTCDataChannelInit>,
    ) -> Result<Arc<RTCDataChannel>> {
        let options = options.unwrap_or_default();
        let channel = {
            let mut internal = self.internal.lock().unwrap();
            if internal.closed {
                return Err(Error::ErrConnectionClosed);
            }
            let channel = Arc::new(RTCDataChannel::new(
                label.to_owned(),
                options.protocol,
                options.ordered,
                options.id,
                Arc::downgrade(&self.internal),
                self.notify.clone(),
            ));
            internal.pending_channels.push(channel.clone());
            if internal.sctp_established {
                internal.announce_pending_channels();
            } else if internal.signaling_state == RTCSignalingState::Stable {
                internal.negotiation_needed = true;
            }
            channel
        };
        self.notify.notify_one();
        Ok(channel)
    }

    /// close ends the peer connection: all timers stop, the transports and
    /// the UDP socket are released, and every state machine advances to
    /// closed. Idempotent.
    pub fn close(&self) -> Result<()> {
        {
            let mut internal = self.internal.lock().unwrap();
            if internal.closed {
                return Ok(());
            }
            internal.close_internal();
        }
        self.notify.notify_one();
        Ok(())
    }

    /// on_data_channel sets an event handler which is invoked when the
    /// remote peer opens a data channel.
    pub fn on_data_channel(&self, f: OnDataChannelHdlrFn) {
        *self.handlers.on_data_channel.lock().unwrap() = Some(f);
    }

    /// on_ice_candidate sets an event handler which is invoked for every
    /// gathered local candidate; the final invocation carries `None`.
    pub fn on_ice_candidate(&self, f: OnLocalCandidateHdlrFn) {
        *self.handlers.on_ice_candidate.lock().unwrap() = Some(f);
    }

    /// on_ice_gathering_state_change sets an event handler which is invoked
    /// when the ICE gathering state changes.
    pub fn on_ice_gathering_state_change(&self, f: OnICEGatheringStateChangeHdlrFn) {
        *self.handlers.on_ice_gathering_state_change.lock().unwrap() = Some(f);
    }

    /// on_ice_connection_state_change sets an event handler which is invoked
    /// when the ICE connection state changes.
    pub fn on_ice_connection_state_change(&self, f: OnICEConnectionStateChangeHdlrFn) {
        *self.handlers.on_ice_connection_state_change.lock().unwrap() = Some(f);
    }

    /// on_signaling_state_change sets an event handler which is invoked
    /// when the signaling state changes.
    pub fn on_signaling_state_change(&self, f: OnSignalingStateChangeHdlrFn) {
        *self.handlers.on_signaling_state_change.lock().unwrap() = Some(f);
    }

    /// on_connection_state_change sets an event handler which is invoked
    /// when the aggregated connection state changes.
    pub fn on_connection_state_change(&self, f: OnPeerConnectionStateChangeHdlrFn) {
        *self.handlers.on_connection_state_change.lock().unwrap() = Some(f);
    }

    /// on_negotiation_needed sets an event handler which is invoked on the
    /// tick after an operation that requires (re)negotiation, suppressed
    /// while signaling is non-stable.
    pub fn on_negotiation_needed(&self, f: OnNegotiationNeededHdlrFn) {
        *self.handlers.on_negotiation_needed.lock().unwrap() = Some(f);
    }
}

fn next_signaling_state(sdp_type: RTCSdpType, op: StateChangeOp) -> Result<RTCSignalingState> {
    Ok(match (sdp_type, op) {
        (RTCSdpType::Offer, StateChangeOp::SetLocal) => RTCSignalingState::HaveLocalOffer,
        (RTCSdpType::Offer, StateChangeOp::SetRemote) => RTCSignalingState::HaveRemoteOffer,
        (RTCSdpType::Answer, _) => RTCSignalingState::Stable,
        (RTCSdpType::Pranswer, StateChangeOp::SetLocal) => RTCSignalingState::HaveLocalPranswer,
        (RTCSdpType::Pranswer, StateChangeOp::SetRemote) => RTCSignalingState::HaveRemotePranswer,
        _ => return Err(Error::ErrIncorrectSignalingState),
    })
}

async fn resolve_ice_servers(config: &RTCConfiguration) -> Result<Vec<IceServerAddr>> {
    let mut servers = vec![];
    for server in &config.ice_servers {
        for raw in &server.urls {
            let mut url = Url::parse_url(raw)?;
            if url.scheme == SchemeType::Turn {
                if server.username.is_empty() || server.credential.is_empty() {
                    return Err(Error::Ice(ice::Error::ErrNoTurnCredentials));
                }
                url.username = server.username.clone();
                url.password = server.credential.clone();
            }
            let lookup = tokio::net::lookup_host((url.host.as_str(), url.port)).await?;
            let addr = lookup
                .filter(|a| match a.ip() {
                    IpAddr::V4(_) => config.use_ipv4(),
                    IpAddr::V6(_) => config.use_ipv6(),
                })
                .next();
            if let Some(addr) = addr {
                servers.push(IceServerAddr { url, addr });
            } else {
                warn!("no usable address for ice server {raw}");
            }
        }
    }
    Ok(servers)
}

async fn bind_socket(config: &RTCConfiguration) -> Result<UdpSocket> {
    let bind_ip: IpAddr = if config.use_ipv6() && !config.use_ipv4() {
        "::".parse().unwrap()
    } else {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    };

    match config.ice_port_range {
        Some((min, max)) => {
            if min >= max {
                return Err(Error::ErrInvalidPortRange);
            }
            for port in min..=max {
                if let Ok(socket) = UdpSocket::bind(SocketAddr::new(bind_ip, port)).await {
                    return Ok(socket);
                }
            }
            Err(Error::ErrInvalidPortRange)
        }
        None => Ok(UdpSocket::bind(SocketAddr::new(bind_ip, 0)).await?),
    }
}

/// local_bases determines the host-candidate addresses for the bound socket:
/// configured interface addresses when given, otherwise the default-route
/// source address discovered with a connect probe, with loopback as the
/// fallback.
async fn local_bases(config: &RTCConfiguration, socket: &UdpSocket) -> Result<Vec<SocketAddr>> {
    let port = socket.local_addr()?.port();

    let mut addrs: Vec<IpAddr> = vec![];
    if !config.ice_interface_addresses.is_empty() {
        addrs.extend(config.ice_interface_addresses.iter().copied());
    } else {
        let probe = UdpSocket::bind("0.0.0.0:0").await?;
        if probe.connect("8.8.8.8:80").await.is_ok() {
            if let Ok(local) = probe.local_addr() {
                if !local.ip().is_unspecified() {
                    addrs.push(local.ip());
                }
            }
        }
        if addrs.is_empty() {
            addrs.push(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
    }
    addrs.extend(config.ice_additional_host_addresses.iter().copied());

    addrs.retain(|ip| match ip {
        IpAddr::V4(_) => config.use_ipv4(),
        IpAddr::V6(_) => config.use_ipv6(),
    });
    addrs.dedup();
    if addrs.is_empty() {
        addrs.push(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    Ok(addrs.into_iter().map(|ip| SocketAddr::new(ip, port)).collect())
}

/// drive is the per-connection task: it owns the socket, pumps inbound
/// datagrams and timer expiries through the sans-IO state machines, flushes
/// outbound datagrams in FIFO order, and dispatches application events.
async fn drive(
    socket: Arc<UdpSocket>,
    internal: Arc<Mutex<PeerConnectionInternal>>,
    handlers: Arc<Handlers>,
    notify: Arc<Notify>,
) {
    let mut buf = vec![0u8; 2048];
    loop {
        let (outbound, dispatches, timeout, closed) = {
            let mut pc = internal.lock().unwrap();
            pc.check_negotiation_needed();
            let outbound = pc.pump(Instant::now());
            let dispatches = std::mem::take(&mut pc.dispatches);
            (outbound, dispatches, pc.poll_timeout(), pc.closed)
        };

        for (addr, payload) in outbound {
            if let Err(err) = socket.send_to(&payload, addr).await {
                trace!("socket send to {addr} failed: {err}");
            }
        }
        dispatch_events(dispatches, &handlers);

        if closed {
            handlers.clear();
            let pc = internal.lock().unwrap();
            for channel in pc.channels.values() {
                channel.clear_handlers();
            }
            break;
        }

        let sleeper = async {
            match timeout {
                Some(deadline) => {
                    tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = notify.notified() => {}
            result = socket.recv_from(&mut buf) => {
                if let Ok((n, from)) = result {
                    let mut pc = internal.lock().unwrap();
                    if let Err(err) = pc.agent.handle_read(from, &buf[..n], Instant::now()) {
                        warn!("agent read error: {err}");
                    }
                }
            }
            _ = sleeper => {
                let mut pc = internal.lock().unwrap();
                pc.handle_timeouts(Instant::now());
            }
        }
    }
}

fn dispatch_events(dispatches: Vec<Dispatch>, handlers: &Handlers) {
    for dispatch in dispatches {
        match dispatch {
            Dispatch::IceCandidate(candidate) => {
                call_handler(&handlers.on_ice_candidate, candidate);
            }
            Dispatch::IceGatheringState(state) => {
                call_handler(&handlers.on_ice_gathering_state_change, state);
            }
            Dispatch::IceConnectionState(state) => {
                call_handler(&handlers.on_ice_connection_state_change, state);
            }
            Dispatch::SignalingState(state) => {
                call_handler(&handlers.on_signaling_state_change, state);
            }
            Dispatch::ConnectionState(state) => {
                call_handler(&handlers.on_connection_state_change, state);
            }
            Dispatch::NegotiationNeeded => {
                call_handler0(&handlers.on_negotiation_needed);
            }
            Dispatch::DataChannel(channel) => {
                call_handler(&handlers.on_data_channel, channel);
            }
            Dispatch::ChannelOpen(channel) => {
                call_handler0(&channel.on_open_handler);
            }
            Dispatch::ChannelMessage(channel, data) => {
                call_handler(&channel.on_message_handler, DataChannelMessage { data });
            }
            Dispatch::ChannelClose(channel) => {
                call_handler0(&channel.on_close_handler);
            }
        }
    }
}
