pub(crate) mod timer;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use log::{debug, trace, warn};
use rand::Rng;
use ring::hmac;

use crate::chunk::chunk_abort::ChunkAbort;
use crate::chunk::chunk_cookie_ack::ChunkCookieAck;
use crate::chunk::chunk_cookie_echo::ChunkCookieEcho;
use crate::chunk::chunk_error::ChunkError;
use crate::chunk::chunk_forward_tsn::ChunkForwardTsn;
use crate::chunk::chunk_heartbeat::ChunkHeartbeat;
use crate::chunk::chunk_init::ChunkInit;
use crate::chunk::chunk_payload_data::{ChunkPayloadData, PayloadProtocolIdentifier};
use crate::chunk::chunk_reconfig::ChunkReconfig;
use crate::chunk::chunk_selective_ack::ChunkSelectiveAck;
use crate::chunk::chunk_shutdown::ChunkShutdown;
use crate::chunk::chunk_shutdown_ack::ChunkShutdownAck;
use crate::chunk::chunk_shutdown_complete::ChunkShutdownComplete;
use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::error_cause::ErrorCause;
use crate::packet::Packet;
use crate::param::param_add_outgoing_streams::ParamAddOutgoingStreams;
use crate::param::param_forward_tsn_supported::ParamForwardTsnSupported;
use crate::param::param_outgoing_reset_request::ParamOutgoingResetRequest;
use crate::param::param_reconfig_response::{ParamReconfigResponse, ReconfigResult};
use crate::param::param_state_cookie::ParamStateCookie;
use crate::param::param_supported_extensions::ParamSupportedExtensions;
use crate::param::Param;
use crate::util::{sna32gt, sna32lte};
use timer::*;

use crate::chunk::chunk_type::{CT_FORWARD_TSN, CT_RECONFIG};

/// The default SCTP port for data channels on both sides of the DTLS
/// connection.
pub const DEFAULT_SCTP_PORT: u16 = 5000;

/// Maximum user payload carried by one DATA chunk. There is no
/// fragmentation; larger sends are rejected.
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 1200;

const INITIAL_ARWND: u32 = 1024 * 1024;
const COOKIE_SECRET_LENGTH: usize = 16;
const STATE_COOKIE_LENGTH: usize = 24;
const STATE_COOKIE_HMAC_LENGTH: usize = 20;
/// A state cookie older than this is answered with a Stale Cookie Error.
const STATE_COOKIE_MAX_AGE_SECS: u32 = 60;

/// AssociationState is the state of an association, RFC 4960 Section 4
/// reduced to the transitions this profile performs.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum AssociationState {
    #[default]
    Closed,
    CookieWait,
    CookieEchoed,
    Established,
    ShutdownSent,
    ShutdownReceived,
    ShutdownAckSent,
}

impl fmt::Display for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            AssociationState::Closed => "Closed",
            AssociationState::CookieWait => "CookieWait",
            AssociationState::CookieEchoed => "CookieEchoed",
            AssociationState::Established => "Established",
            AssociationState::ShutdownSent => "ShutdownSent",
            AssociationState::ShutdownReceived => "ShutdownReceived",
            AssociationState::ShutdownAckSent => "ShutdownAckSent",
        };
        write!(f, "{s}")
    }
}

/// Config collects the tunables for one association.
#[derive(Debug, Clone)]
pub struct Config {
    pub source_port: u16,
    pub destination_port: u16,
    pub max_message_size: u32,
    pub max_num_outbound_streams: u16,
    pub max_num_inbound_streams: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            source_port: DEFAULT_SCTP_PORT,
            destination_port: DEFAULT_SCTP_PORT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_num_outbound_streams: 1024,
            max_num_inbound_streams: 1024,
        }
    }
}

/// AssociationEvent is an upward notification drained with
/// [`Association::poll_event`].
#[derive(Debug)]
pub enum AssociationEvent {
    /// The handshake finished; user data may now flow.
    Established,
    /// One inbound DATA chunk, delivered immediately without reassembly or
    /// reordering.
    Data {
        stream_id: u16,
        ppi: PayloadProtocolIdentifier,
        payload: Bytes,
    },
    /// The peer reset one of its outgoing streams.
    StreamReset(u16),
    /// The association reached Closed.
    Closed,
}

/// Association is the reduced SCTP state machine: RFC 4960 packet and chunk
/// formats with the reliability machinery elided. Unordered, unreliable,
/// unfragmented delivery only; no SACK is ever emitted.
pub struct Association {
    state: AssociationState,
    is_client: bool,

    source_port: u16,
    destination_port: u16,
    max_message_size: u32,
    num_outbound_streams: u16,
    num_inbound_streams: u16,

    my_verification_tag: u32,
    peer_verification_tag: u32,
    my_next_tsn: u32,
    peer_last_tsn: u32,
    /// TSNs above the cumulative point that have been seen out of order.
    seen_out_of_order: BTreeSet<u32>,
    /// Per-stream outbound sequence counters for ordered sends; wraps at
    /// 2^16.
    sequence_numbers: HashMap<u16, u16>,

    cookie_secret: [u8; COOKIE_SECRET_LENGTH],
    /// The peer's cookie to echo (client side).
    stored_cookie_echo: Option<Bytes>,

    rto_mgr: RtoManager,
    t1: RtxTimer,
    t2: RtxTimer,
    t_reconfig: RtxTimer,
    handshake_sent_at: Option<Instant>,

    /// Marshaled packet resent on T1/T2/T-Reconfig expiry.
    stored_handshake_packet: Option<Bytes>,
    stored_shutdown_packet: Option<Bytes>,
    stored_reconfig_packet: Option<Bytes>,

    my_next_rsn: u32,
    peer_last_rsn: u32,
    pending_reset_request: Option<u32>,

    events: VecDeque<AssociationEvent>,
    transmits: VecDeque<Bytes>,
}

impl fmt::Display for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Association({}, tag={}, next_tsn={})",
            self.state, self.my_verification_tag, self.my_next_tsn,
        )
    }
}

impl Association {
    fn new(config: Config, is_client: bool) -> Self {
        let mut rng = rand::thread_rng();
        let my_verification_tag = loop {
            let tag = rng.gen::<u32>();
            if tag != 0 {
                break tag;
            }
        };
        let my_next_tsn = rng.gen::<u32>();
        let mut cookie_secret = [0u8; COOKIE_SECRET_LENGTH];
        rng.fill(&mut cookie_secret);

        Association {
            state: AssociationState::Closed,
            is_client,
            source_port: config.source_port,
            destination_port: config.destination_port,
            max_message_size: config.max_message_size,
            num_outbound_streams: config.max_num_outbound_streams,
            num_inbound_streams: config.max_num_inbound_streams,
            my_verification_tag,
            peer_verification_tag: 0,
            my_next_tsn,
            peer_last_tsn: 0,
            seen_out_of_order: BTreeSet::new(),
            sequence_numbers: HashMap::new(),
            cookie_secret,
            stored_cookie_echo: None,
            rto_mgr: RtoManager::new(),
            t1: RtxTimer::new(MAX_INIT_RETRANS),
            t2: RtxTimer::new(MAX_ASSOCIATION_RETRANS),
            t_reconfig: RtxTimer::new(MAX_ASSOCIATION_RETRANS),
            handshake_sent_at: None,
            stored_handshake_packet: None,
            stored_shutdown_packet: None,
            stored_reconfig_packet: None,
            my_next_rsn: my_next_tsn,
            peer_last_rsn: 0,
            pending_reset_request: None,
            events: VecDeque::new(),
            transmits: VecDeque::new(),
        }
    }

    /// client creates an association that initiates the handshake: an INIT
    /// is queued immediately and T1 armed.
    pub fn client(config: Config, now: Instant) -> Result<Self> {
        let mut assoc = Association::new(config, true);
        assoc.send_init(now)?;
        Ok(assoc)
    }

    /// server creates an association that waits for the peer's INIT.
    pub fn server(config: Config) -> Result<Self> {
        Ok(Association::new(config, false))
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    pub fn poll_transmit(&mut self) -> Option<Bytes> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<AssociationEvent> {
        self.events.pop_front()
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        [&self.t1, &self.t2, &self.t_reconfig]
            .iter()
            .filter_map(|t| t.deadline)
            .min()
    }

    /// send queues one user message as a single unfragmented DATA chunk.
    ///
    /// Payloads larger than the maximum message size are rejected; there is
    /// no fragmentation in this profile.
    pub fn send(
        &mut self,
        stream_id: u16,
        ppi: PayloadProtocolIdentifier,
        payload: Bytes,
        unordered: bool,
    ) -> Result<()> {
        if self.state != AssociationState::Established {
            return Err(Error::ErrPayloadDataStateNotExist);
        }
        if payload.len() > self.max_message_size as usize {
            return Err(Error::ErrOutboundPacketTooLarge);
        }

        let stream_sequence_number = if unordered {
            0
        } else {
            let ssn = self.sequence_numbers.entry(stream_id).or_insert(0);
            let current = *ssn;
            *ssn = ssn.wrapping_add(1);
            current
        };

        let chunk = ChunkPayloadData {
            unordered,
            beginning_fragment: true,
            ending_fragment: true,
            tsn: self.my_next_tsn,
            stream_identifier: stream_id,
            stream_sequence_number,
            payload_type: ppi,
            user_data: payload,
        };
        self.my_next_tsn = self.my_next_tsn.wrapping_add(1);

        self.push_packet(vec![Box::new(chunk)], self.peer_verification_tag)
    }

    /// reset_stream closes one outbound stream with an Outgoing SSN Reset
    /// Request. A single request may be outstanding at a time.
    pub fn reset_stream(&mut self, stream_id: u16, now: Instant) -> Result<()> {
        if self.state != AssociationState::Established {
            return Err(Error::ErrPayloadDataStateNotExist);
        }
        if self.pending_reset_request.is_some() {
            return Err(Error::ErrReconfigRequestPending);
        }

        let request_seq = self.my_next_rsn;
        self.my_next_rsn = self.my_next_rsn.wrapping_add(1);

        let reconfig = ChunkReconfig {
            param_a: Some(Box::new(ParamOutgoingResetRequest {
                reconfig_request_sequence_number: request_seq,
                reconfig_response_sequence_number: self.peer_last_rsn,
                sender_last_tsn: self.my_next_tsn.wrapping_sub(1),
                stream_identifiers: vec![stream_id],
            })),
            param_b: None,
        };
        let raw = self.marshal_packet(vec![Box::new(reconfig)], self.peer_verification_tag)?;
        self.transmits.push_back(raw.clone());
        self.stored_reconfig_packet = Some(raw);
        self.pending_reset_request = Some(request_seq);
        self.sequence_numbers.remove(&stream_id);
        self.t_reconfig.start(now, self.rto_mgr.get_rto());
        Ok(())
    }

    /// add_outgoing_streams asks the peer to accept additional streams.
    pub fn add_outgoing_streams(&mut self, count: u16, now: Instant) -> Result<()> {
        if self.state != AssociationState::Established {
            return Err(Error::ErrPayloadDataStateNotExist);
        }
        if self.pending_reset_request.is_some() {
            return Err(Error::ErrReconfigRequestPending);
        }

        let request_seq = self.my_next_rsn;
        self.my_next_rsn = self.my_next_rsn.wrapping_add(1);

        let reconfig = ChunkReconfig {
            param_a: Some(Box::new(ParamAddOutgoingStreams {
                reconfig_request_sequence_number: request_seq,
                number_of_new_streams: count,
            })),
            param_b: None,
        };
        let raw = self.marshal_packet(vec![Box::new(reconfig)], self.peer_verification_tag)?;
        self.transmits.push_back(raw.clone());
        self.stored_reconfig_packet = Some(raw);
        self.pending_reset_request = Some(request_seq);
        self.num_outbound_streams = self.num_outbound_streams.saturating_add(count);
        self.t_reconfig.start(now, self.rto_mgr.get_rto());
        Ok(())
    }

    /// shutdown starts a graceful close.
    pub fn shutdown(&mut self, now: Instant) -> Result<()> {
        if self.state != AssociationState::Established {
            return Err(Error::ErrShutdownNonEstablished);
        }
        let shutdown = ChunkShutdown {
            cumulative_tsn_ack: self.peer_last_tsn,
        };
        let raw = self.marshal_packet(vec![Box::new(shutdown)], self.peer_verification_tag)?;
        self.transmits.push_back(raw.clone());
        self.stored_shutdown_packet = Some(raw);
        self.set_state(AssociationState::ShutdownSent);
        self.t2.start(now, self.rto_mgr.get_rto());
        Ok(())
    }

    /// abort tears the association down immediately with an ABORT chunk.
    pub fn abort(&mut self) {
        if self.state == AssociationState::Closed {
            return;
        }
        let abort = ChunkAbort {
            error_causes: vec![ErrorCause {
                code: crate::error_cause::USER_INITIATED_ABORT,
                raw: Bytes::new(),
            }],
        };
        let _ = self.push_packet(vec![Box::new(abort)], self.peer_verification_tag);
        self.enter_closed();
    }

    /// close silently stops every timer and drops the association state.
    pub fn close(&mut self) {
        self.t1.stop();
        self.t2.stop();
        self.t_reconfig.stop();
        self.state = AssociationState::Closed;
    }

    pub fn handle_timeout(&mut self, now: Instant) -> Result<()> {
        if self.t1.is_due(now) {
            if self.t1.backoff(now) {
                if let Some(raw) = &self.stored_handshake_packet {
                    debug!("T1 expired, retransmitting handshake packet");
                    self.transmits.push_back(raw.clone());
                }
            } else {
                warn!("handshake retransmit budget exhausted");
                self.enter_closed();
                return Err(Error::ErrHandshakeTimeout);
            }
        }
        if self.t2.is_due(now) {
            if self.t2.backoff(now) {
                if let Some(raw) = &self.stored_shutdown_packet {
                    debug!("T2 expired, retransmitting shutdown packet");
                    self.transmits.push_back(raw.clone());
                }
            } else {
                self.enter_closed();
            }
        }
        if self.t_reconfig.is_due(now) {
            if self.t_reconfig.backoff_reconfig(now) {
                if let Some(raw) = &self.stored_reconfig_packet {
                    debug!("T-Reconfig expired, retransmitting request");
                    self.transmits.push_back(raw.clone());
                }
            } else {
                warn!("reconfiguration retransmit budget exhausted, closing");
                self.enter_closed();
            }
        }
        Ok(())
    }

    /// handle_read feeds one inbound SCTP packet (one DTLS application-data
    /// record). Undecodable packets and verification-tag mismatches are
    /// dropped silently.
    pub fn handle_read(&mut self, raw: &Bytes, now: Instant) -> Result<()> {
        let packet = match Packet::unmarshal(raw) {
            Ok(p) => p,
            Err(err) => {
                warn!("undecodable SCTP packet: {err}");
                return Ok(());
            }
        };
        if let Err(err) = packet.check_packet() {
            warn!("SCTP packet failed checks: {err}");
            return Ok(());
        }

        // Verification tag: 0 is only valid on a packet carrying INIT.
        let carries_init = packet
            .chunks
            .first()
            .and_then(|c| c.as_any().downcast_ref::<ChunkInit>())
            .map(|i| !i.is_ack)
            .unwrap_or(false);
        if !carries_init && packet.verification_tag != self.my_verification_tag {
            trace!(
                "dropping packet with verification tag {} (expected {})",
                packet.verification_tag,
                self.my_verification_tag,
            );
            return Ok(());
        }

        for chunk in packet.chunks {
            self.handle_chunk(chunk, now)?;
        }
        Ok(())
    }

    fn handle_chunk(&mut self, chunk: Box<dyn Chunk + Send + Sync>, now: Instant) -> Result<()> {
        let any = chunk.as_any();

        if let Some(init) = any.downcast_ref::<ChunkInit>() {
            if init.is_ack {
                self.handle_init_ack(init, now)?;
            } else {
                self.handle_init(init)?;
            }
        } else if let Some(cookie_echo) = any.downcast_ref::<ChunkCookieEcho>() {
            self.handle_cookie_echo(cookie_echo)?;
        } else if any.downcast_ref::<ChunkCookieAck>().is_some() {
            self.handle_cookie_ack(now);
        } else if let Some(data) = any.downcast_ref::<ChunkPayloadData>() {
            self.handle_data(data);
        } else if any.downcast_ref::<ChunkSelectiveAck>().is_some() {
            // deliberate deviation: no SACK processing in the unreliable
            // profile
            trace!("discarding inbound SACK");
        } else if let Some(heartbeat) = any.downcast_ref::<ChunkHeartbeat>() {
            if !heartbeat.is_ack {
                let ack = ChunkHeartbeat {
                    is_ack: true,
                    heartbeat_info: heartbeat.heartbeat_info.clone(),
                };
                self.push_packet(vec![Box::new(ack)], self.peer_verification_tag)?;
            }
        } else if any.downcast_ref::<ChunkShutdown>().is_some() {
            self.handle_shutdown(now)?;
        } else if any.downcast_ref::<ChunkShutdownAck>().is_some() {
            self.handle_shutdown_ack()?;
        } else if any.downcast_ref::<ChunkShutdownComplete>().is_some() {
            self.handle_shutdown_complete();
        } else if any.downcast_ref::<ChunkAbort>().is_some() {
            debug!("received ABORT, closing");
            self.enter_closed();
        } else if let Some(err) = any.downcast_ref::<ChunkError>() {
            for cause in &err.error_causes {
                warn!("peer reported error cause: {cause}");
            }
        } else if let Some(forward) = any.downcast_ref::<ChunkForwardTsn>() {
            self.handle_forward_tsn(forward);
        } else if let Some(reconfig) = any.downcast_ref::<ChunkReconfig>() {
            self.handle_reconfig(reconfig)?;
        } else {
            trace!("dropping unhandled chunk {chunk}");
        }
        Ok(())
    }

    fn handle_init(&mut self, init: &ChunkInit) -> Result<()> {
        init.check()?;
        debug!("received INIT with initiate_tag {}", init.initiate_tag);

        self.peer_verification_tag = init.initiate_tag;
        self.peer_last_tsn = init.initial_tsn.wrapping_sub(1);
        self.num_outbound_streams = self.num_outbound_streams.min(init.num_inbound_streams);
        self.num_inbound_streams = self.num_inbound_streams.min(init.num_outbound_streams);

        let cookie = build_state_cookie(&self.cookie_secret, unix_now_secs());
        let init_ack = ChunkInit {
            is_ack: true,
            initiate_tag: self.my_verification_tag,
            advertised_receiver_window_credit: INITIAL_ARWND,
            num_outbound_streams: self.num_outbound_streams,
            num_inbound_streams: self.num_inbound_streams,
            initial_tsn: self.my_next_tsn,
            params: vec![
                Box::new(ParamStateCookie { cookie }),
                Box::new(ParamForwardTsnSupported),
                Box::new(ParamSupportedExtensions {
                    chunk_types: vec![CT_FORWARD_TSN, CT_RECONFIG],
                }),
            ],
        };

        // The INIT receiver stays in CLOSED until a valid COOKIE ECHO
        // arrives.
        self.push_packet(vec![Box::new(init_ack)], self.peer_verification_tag)
    }

    fn handle_init_ack(&mut self, init_ack: &ChunkInit, now: Instant) -> Result<()> {
        if self.state != AssociationState::CookieWait {
            return Ok(());
        }
        init_ack.check()?;

        self.peer_verification_tag = init_ack.initiate_tag;
        self.peer_last_tsn = init_ack.initial_tsn.wrapping_sub(1);
        self.num_outbound_streams = self.num_outbound_streams.min(init_ack.num_inbound_streams);
        self.num_inbound_streams = self.num_inbound_streams.min(init_ack.num_outbound_streams);

        if self.t1.retransmits == 0 {
            if let Some(sent_at) = self.handshake_sent_at {
                let rtt_ms = now.duration_since(sent_at).as_secs_f64() * 1000.0;
                let srtt = self.rto_mgr.set_new_rtt(rtt_ms);
                trace!("INIT round trip {rtt_ms:.1} ms (srtt {srtt:.1} ms)");
            }
        }
        self.t1.stop();

        let cookie = init_ack.state_cookie().ok_or(Error::ErrInitAckNoCookie)?;
        self.stored_cookie_echo = Some(cookie.clone());

        let echo = ChunkCookieEcho { cookie };
        let raw = self.marshal_packet(vec![Box::new(echo)], self.peer_verification_tag)?;
        self.transmits.push_back(raw.clone());
        self.stored_handshake_packet = Some(raw);
        self.handshake_sent_at = Some(now);
        self.t1.start(now, self.rto_mgr.get_rto());
        self.set_state(AssociationState::CookieEchoed);
        Ok(())
    }

    fn handle_cookie_echo(&mut self, cookie_echo: &ChunkCookieEcho) -> Result<()> {
        if self.state == AssociationState::Established {
            // our COOKIE ACK was lost; answer again
            return self.push_packet(
                vec![Box::new(ChunkCookieAck)],
                self.peer_verification_tag,
            );
        }
        if self.state != AssociationState::Closed {
            return Ok(());
        }

        match validate_state_cookie(&self.cookie_secret, &cookie_echo.cookie, unix_now_secs()) {
            Ok(()) => {}
            Err(Error::ErrCookieStale) => {
                let age = state_cookie_age_secs(&cookie_echo.cookie, unix_now_secs())
                    .unwrap_or_default();
                let staleness_usec =
                    age.saturating_sub(STATE_COOKIE_MAX_AGE_SECS).saturating_mul(1_000_000);
                debug!("stale state cookie (age {age}s), answering with ERROR");
                let error = ChunkError {
                    error_causes: vec![ErrorCause::stale_cookie(staleness_usec)],
                };
                self.push_packet(vec![Box::new(error)], self.peer_verification_tag)?;
                return Ok(());
            }
            Err(err) => {
                warn!("invalid state cookie, dropping association attempt: {err}");
                return Ok(());
            }
        }

        self.push_packet(vec![Box::new(ChunkCookieAck)], self.peer_verification_tag)?;
        self.rto_mgr.set_no_update();
        self.set_state(AssociationState::Established);
        self.events.push_back(AssociationEvent::Established);
        Ok(())
    }

    fn handle_cookie_ack(&mut self, now: Instant) {
        if self.state != AssociationState::CookieEchoed {
            return;
        }
        if self.t1.retransmits == 0 {
            if let Some(sent_at) = self.handshake_sent_at {
                let rtt_ms = now.duration_since(sent_at).as_secs_f64() * 1000.0;
                self.rto_mgr.set_new_rtt(rtt_ms);
            }
        }
        self.t1.stop();
        self.stored_handshake_packet = None;
        self.rto_mgr.set_no_update();
        self.set_state(AssociationState::Established);
        self.events.push_back(AssociationEvent::Established);
    }

    /// handle_data delivers the payload immediately and tracks the
    /// cumulative TSN point over the out-of-order set. Duplicates are
    /// dropped; nothing is acknowledged.
    fn handle_data(&mut self, data: &ChunkPayloadData) {
        if self.state != AssociationState::Established {
            return;
        }

        let tsn = data.tsn;
        if sna32lte(tsn, self.peer_last_tsn) || self.seen_out_of_order.contains(&tsn) {
            trace!("dropping duplicate DATA tsn={tsn}");
            return;
        }

        if tsn == self.peer_last_tsn.wrapping_add(1) {
            self.peer_last_tsn = tsn;
            // absorb any directly following TSNs seen earlier
            while self
                .seen_out_of_order
                .remove(&self.peer_last_tsn.wrapping_add(1))
            {
                self.peer_last_tsn = self.peer_last_tsn.wrapping_add(1);
            }
        } else {
            self.seen_out_of_order.insert(tsn);
        }

        self.events.push_back(AssociationEvent::Data {
            stream_id: data.stream_identifier,
            ppi: data.payload_type,
            payload: data.user_data.clone(),
        });
    }

    fn handle_shutdown(&mut self, now: Instant) -> Result<()> {
        match self.state {
            AssociationState::Established | AssociationState::ShutdownSent => {
                self.push_packet(
                    vec![Box::new(ChunkShutdownAck)],
                    self.peer_verification_tag,
                )?;
                if self.state == AssociationState::Established {
                    self.set_state(AssociationState::ShutdownAckSent);
                    let ack_raw = self.marshal_packet(
                        vec![Box::new(ChunkShutdownAck)],
                        self.peer_verification_tag,
                    )?;
                    self.stored_shutdown_packet = Some(ack_raw);
                    self.t2.start(now, self.rto_mgr.get_rto());
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_shutdown_ack(&mut self) -> Result<()> {
        if self.state == AssociationState::ShutdownSent
            || self.state == AssociationState::ShutdownAckSent
        {
            self.push_packet(
                vec![Box::new(ChunkShutdownComplete)],
                self.peer_verification_tag,
            )?;
            self.enter_closed();
        }
        Ok(())
    }

    fn handle_shutdown_complete(&mut self) {
        if self.state == AssociationState::ShutdownSent
            || self.state == AssociationState::ShutdownAckSent
        {
            self.enter_closed();
        }
    }

    fn handle_forward_tsn(&mut self, forward: &ChunkForwardTsn) {
        if self.state != AssociationState::Established {
            return;
        }
        if sna32gt(forward.new_cumulative_tsn, self.peer_last_tsn) {
            self.peer_last_tsn = forward.new_cumulative_tsn;
            self.seen_out_of_order
                .retain(|tsn| sna32gt(*tsn, forward.new_cumulative_tsn));
            while self
                .seen_out_of_order
                .remove(&self.peer_last_tsn.wrapping_add(1))
            {
                self.peer_last_tsn = self.peer_last_tsn.wrapping_add(1);
            }
        }
    }

    fn handle_reconfig(&mut self, reconfig: &ChunkReconfig) -> Result<()> {
        for param in [&reconfig.param_a, &reconfig.param_b].into_iter().flatten() {
            self.handle_reconfig_param(param)?;
        }
        Ok(())
    }

    fn handle_reconfig_param(&mut self, param: &Box<dyn Param + Send + Sync>) -> Result<()> {
        let any = param.as_any();
        if let Some(request) = any.downcast_ref::<ParamOutgoingResetRequest>() {
            self.peer_last_rsn = request.reconfig_request_sequence_number;
            for stream_id in &request.stream_identifiers {
                self.events
                    .push_back(AssociationEvent::StreamReset(*stream_id));
            }
            // the response sequence number is the peer's last request
            // sequence number
            let response = ChunkReconfig {
                param_a: Some(Box::new(ParamReconfigResponse {
                    reconfig_response_sequence_number: request.reconfig_request_sequence_number,
                    result: ReconfigResult::SuccessPerformed,
                })),
                param_b: None,
            };
            self.push_packet(vec![Box::new(response)], self.peer_verification_tag)?;
        } else if let Some(request) = any.downcast_ref::<ParamAddOutgoingStreams>() {
            self.peer_last_rsn = request.reconfig_request_sequence_number;
            self.num_inbound_streams = self
                .num_inbound_streams
                .saturating_add(request.number_of_new_streams);
            let response = ChunkReconfig {
                param_a: Some(Box::new(ParamReconfigResponse {
                    reconfig_response_sequence_number: request.reconfig_request_sequence_number,
                    result: ReconfigResult::SuccessPerformed,
                })),
                param_b: None,
            };
            self.push_packet(vec![Box::new(response)], self.peer_verification_tag)?;
        } else if let Some(response) = any.downcast_ref::<ParamReconfigResponse>() {
            if self.pending_reset_request == Some(response.reconfig_response_sequence_number) {
                self.pending_reset_request = None;
                self.stored_reconfig_packet = None;
                self.t_reconfig.stop();
            }
        }
        Ok(())
    }

    fn send_init(&mut self, now: Instant) -> Result<()> {
        let init = ChunkInit {
            is_ack: false,
            initiate_tag: self.my_verification_tag,
            advertised_receiver_window_credit: INITIAL_ARWND,
            num_outbound_streams: self.num_outbound_streams,
            num_inbound_streams: self.num_inbound_streams,
            initial_tsn: self.my_next_tsn,
            params: vec![
                Box::new(ParamForwardTsnSupported),
                Box::new(ParamSupportedExtensions {
                    chunk_types: vec![CT_FORWARD_TSN, CT_RECONFIG],
                }),
            ],
        };

        // an INIT packet always carries verification tag 0
        let raw = self.marshal_packet(vec![Box::new(init)], 0)?;
        self.transmits.push_back(raw.clone());
        self.stored_handshake_packet = Some(raw);
        self.handshake_sent_at = Some(now);
        self.t1.start(now, self.rto_mgr.get_rto());
        self.set_state(AssociationState::CookieWait);
        Ok(())
    }

    fn marshal_packet(
        &self,
        chunks: Vec<Box<dyn Chunk + Send + Sync>>,
        verification_tag: u32,
    ) -> Result<Bytes> {
        let packet = Packet {
            source_port: self.source_port,
            destination_port: self.destination_port,
            verification_tag,
            chunks,
        };
        packet.marshal()
    }

    fn push_packet(
        &mut self,
        chunks: Vec<Box<dyn Chunk + Send + Sync>>,
        verification_tag: u32,
    ) -> Result<()> {
        let raw = self.marshal_packet(chunks, verification_tag)?;
        self.transmits.push_back(raw);
        Ok(())
    }

    fn set_state(&mut self, state: AssociationState) {
        if self.state != state {
            debug!("association state {} -> {}", self.state, state);
            self.state = state;
        }
    }

    fn enter_closed(&mut self) {
        if self.state == AssociationState::Closed
            && self.stored_handshake_packet.is_none()
            && self.stored_shutdown_packet.is_none()
        {
            return;
        }
        self.t1.stop();
        self.t2.stop();
        self.t_reconfig.stop();
        self.stored_handshake_packet = None;
        self.stored_shutdown_packet = None;
        self.stored_reconfig_packet = None;
        self.state = AssociationState::Closed;
        self.events.push_back(AssociationEvent::Closed);
    }
}

fn unix_now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// build_state_cookie produces the 24-byte cookie: a 4-byte big-endian unix
/// timestamp followed by a 20-byte HMAC-SHA1 of those four bytes under the
/// association's secret.
fn build_state_cookie(secret: &[u8], now_secs: u32) -> Bytes {
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, secret);
    let ts = now_secs.to_be_bytes();
    let tag = hmac::sign(&key, &ts);

    let mut cookie = BytesMut::with_capacity(STATE_COOKIE_LENGTH);
    cookie.extend_from_slice(&ts);
    cookie.extend_from_slice(tag.as_ref());
    cookie.freeze()
}

fn state_cookie_age_secs(cookie: &Bytes, now_secs: u32) -> Option<u32> {
    if cookie.len() != STATE_COOKIE_LENGTH {
        return None;
    }
    let ts = u32::from_be_bytes([cookie[0], cookie[1], cookie[2], cookie[3]]);
    now_secs.checked_sub(ts)
}

/// validate_state_cookie requires a byte-exact HMAC match and a timestamp
/// within [now - 60s, now].
fn validate_state_cookie(secret: &[u8], cookie: &Bytes, now_secs: u32) -> Result<()> {
    if cookie.len() != STATE_COOKIE_LENGTH {
        return Err(Error::ErrCookieInvalid);
    }
    let ts = &cookie[..4];
    let mac = &cookie[4..4 + STATE_COOKIE_HMAC_LENGTH];

    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, secret);
    if hmac::verify(&key, ts, mac).is_err() {
        return Err(Error::ErrCookieInvalid);
    }

    let ts = u32::from_be_bytes([cookie[0], cookie[1], cookie[2], cookie[3]]);
    match now_secs.checked_sub(ts) {
        Some(age) if age <= STATE_COOKIE_MAX_AGE_SECS => Ok(()),
        Some(_) => Err(Error::ErrCookieStale),
        // a timestamp from the future never validates
        None => Err(Error::ErrCookieStale),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn pump(a: &mut Association, b: &mut Association, now: Instant) -> Result<()> {
        for _ in 0..16 {
            let mut progressed = false;
            while let Some(raw) = a.poll_transmit() {
                progressed = true;
                b.handle_read(&raw, now)?;
            }
            while let Some(raw) = b.poll_transmit() {
                progressed = true;
                a.handle_read(&raw, now)?;
            }
            if !progressed {
                break;
            }
        }
        Ok(())
    }

    fn established_pair() -> Result<(Association, Association)> {
        let now = Instant::now();
        let mut client = Association::client(Config::default(), now)?;
        let mut server = Association::server(Config::default())?;
        pump(&mut client, &mut server, now)?;
        assert_eq!(client.state(), AssociationState::Established);
        assert_eq!(server.state(), AssociationState::Established);
        // drain Established events
        while client.poll_event().is_some() {}
        while server.poll_event().is_some() {}
        Ok((client, server))
    }

    #[test]
    fn test_handshake_loopback() -> Result<()> {
        let now = Instant::now();
        let mut client = Association::client(Config::default(), now)?;
        let mut server = Association::server(Config::default())?;
        assert_eq!(client.state(), AssociationState::CookieWait);
        assert_eq!(server.state(), AssociationState::Closed);

        pump(&mut client, &mut server, now)?;

        assert_eq!(client.state(), AssociationState::Established);
        assert_eq!(server.state(), AssociationState::Established);
        assert!(matches!(
            client.poll_event(),
            Some(AssociationEvent::Established)
        ));
        assert!(matches!(
            server.poll_event(),
            Some(AssociationEvent::Established)
        ));
        Ok(())
    }

    #[test]
    fn test_send_and_deliver() -> Result<()> {
        let (mut client, mut server) = established_pair()?;
        let now = Instant::now();

        client.send(
            1,
            PayloadProtocolIdentifier::Binary,
            Bytes::from_static(&[1, 2, 3]),
            true,
        )?;
        pump(&mut client, &mut server, now)?;

        match server.poll_event() {
            Some(AssociationEvent::Data {
                stream_id,
                ppi,
                payload,
            }) => {
                assert_eq!(stream_id, 1);
                assert_eq!(ppi, PayloadProtocolIdentifier::Binary);
                assert_eq!(&payload[..], &[1, 2, 3]);
            }
            other => panic!("expected data event, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_send_boundary_sizes() -> Result<()> {
        let (mut client, mut server) = established_pair()?;
        let now = Instant::now();

        // 1201 bytes fails synchronously, nothing is transmitted
        let result = client.send(
            0,
            PayloadProtocolIdentifier::Binary,
            Bytes::from(vec![0u8; 1201]),
            true,
        );
        assert_eq!(result, Err(Error::ErrOutboundPacketTooLarge));
        assert!(client.poll_transmit().is_none());

        // exactly 1200 bytes succeeds and is delivered
        client.send(
            0,
            PayloadProtocolIdentifier::Binary,
            Bytes::from(vec![0u8; 1200]),
            true,
        )?;
        pump(&mut client, &mut server, now)?;
        match server.poll_event() {
            Some(AssociationEvent::Data { payload, .. }) => assert_eq!(payload.len(), 1200),
            other => panic!("expected data event, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_send_requires_established() -> Result<()> {
        let now = Instant::now();
        let mut client = Association::client(Config::default(), now)?;
        let result = client.send(
            0,
            PayloadProtocolIdentifier::Binary,
            Bytes::from_static(&[0]),
            true,
        );
        assert_eq!(result, Err(Error::ErrPayloadDataStateNotExist));
        Ok(())
    }

    #[test]
    fn test_tsn_wrap_ordering() -> Result<()> {
        let (mut client, mut server) = established_pair()?;
        let now = Instant::now();

        // force the sender to the wrap boundary
        client.my_next_tsn = u32::MAX;
        server.peer_last_tsn = u32::MAX.wrapping_sub(1);
        server.seen_out_of_order.clear();

        for i in 0..3u8 {
            client.send(
                0,
                PayloadProtocolIdentifier::Binary,
                Bytes::copy_from_slice(&[i]),
                true,
            )?;
        }
        assert_eq!(client.my_next_tsn, 2); // wrapped past 0

        pump(&mut client, &mut server, now)?;

        let mut received = vec![];
        while let Some(event) = server.poll_event() {
            if let AssociationEvent::Data { payload, .. } = event {
                received.push(payload[0]);
            }
        }
        assert_eq!(received, vec![0, 1, 2]);
        // cumulative point followed the wrap
        assert_eq!(server.peer_last_tsn, 1);
        Ok(())
    }

    #[test]
    fn test_out_of_order_tracking() -> Result<()> {
        let (mut client, mut server) = established_pair()?;
        let now = Instant::now();

        for i in 0..3u8 {
            client.send(
                0,
                PayloadProtocolIdentifier::Binary,
                Bytes::copy_from_slice(&[i]),
                true,
            )?;
        }
        let first = client.poll_transmit().unwrap();
        let second = client.poll_transmit().unwrap();
        let third = client.poll_transmit().unwrap();

        let base = server.peer_last_tsn;
        // deliver 1st and 3rd; the middle TSN stays missing
        server.handle_read(&first, now)?;
        server.handle_read(&third, now)?;
        assert_eq!(server.peer_last_tsn, base.wrapping_add(1));
        assert_eq!(server.seen_out_of_order.len(), 1);

        // both payloads were delivered immediately regardless of the gap
        let mut delivered = 0;
        while server.poll_event().is_some() {
            delivered += 1;
        }
        assert_eq!(delivered, 2);

        // the late middle chunk closes the gap
        server.handle_read(&second, now)?;
        assert_eq!(server.peer_last_tsn, base.wrapping_add(3));
        assert!(server.seen_out_of_order.is_empty());
        Ok(())
    }

    #[test]
    fn test_state_cookie_window() {
        let secret = [7u8; COOKIE_SECRET_LENGTH];
        let now = 1_000_000u32;

        // exactly at now - 60 is accepted
        let cookie = build_state_cookie(&secret, now - 60);
        assert_eq!(validate_state_cookie(&secret, &cookie, now), Ok(()));

        // at now - 61 it is rejected as stale
        let cookie = build_state_cookie(&secret, now - 61);
        assert_eq!(
            validate_state_cookie(&secret, &cookie, now),
            Err(Error::ErrCookieStale)
        );

        // tampering breaks the HMAC
        let mut tampered = BytesMut::from(&build_state_cookie(&secret, now)[..]);
        tampered[5] ^= 0xff;
        assert_eq!(
            validate_state_cookie(&secret, &tampered.freeze(), now),
            Err(Error::ErrCookieInvalid)
        );

        // wrong secret fails
        let cookie = build_state_cookie(&[8u8; COOKIE_SECRET_LENGTH], now);
        assert_eq!(
            validate_state_cookie(&secret, &cookie, now),
            Err(Error::ErrCookieInvalid)
        );
    }

    #[test]
    fn test_stale_cookie_echo_gets_error_chunk() -> Result<()> {
        let now = Instant::now();
        let mut server = Association::server(Config::default())?;
        server.peer_verification_tag = 1; // pretend an INIT happened

        // replay a COOKIE ECHO whose cookie timestamp is 120 s in the past
        let cookie = build_state_cookie(&server.cookie_secret, unix_now_secs() - 120);
        let echo = ChunkCookieEcho { cookie };
        let packet = Packet {
            source_port: DEFAULT_SCTP_PORT,
            destination_port: DEFAULT_SCTP_PORT,
            verification_tag: server.my_verification_tag,
            chunks: vec![Box::new(echo)],
        };
        server.handle_read(&packet.marshal()?, now)?;

        // never established, and an ERROR chunk with a stale cookie cause
        // went out
        assert_eq!(server.state(), AssociationState::Closed);
        let out = server.poll_transmit().expect("an ERROR chunk should be sent");
        let parsed = Packet::unmarshal(&out)?;
        let error = parsed.chunks[0]
            .as_any()
            .downcast_ref::<ChunkError>()
            .expect("expected an ERROR chunk");
        assert_eq!(
            error.error_causes[0].code,
            crate::error_cause::STALE_COOKIE_ERROR
        );
        Ok(())
    }

    #[test]
    fn test_graceful_shutdown() -> Result<()> {
        let (mut client, mut server) = established_pair()?;
        let now = Instant::now();

        client.shutdown(now)?;
        assert_eq!(client.state(), AssociationState::ShutdownSent);
        pump(&mut client, &mut server, now)?;

        assert_eq!(client.state(), AssociationState::Closed);
        assert_eq!(server.state(), AssociationState::Closed);
        assert!(matches!(client.poll_event(), Some(AssociationEvent::Closed)));
        assert!(matches!(server.poll_event(), Some(AssociationEvent::Closed)));
        Ok(())
    }

    #[test]
    fn test_abort_closes_both_sides() -> Result<()> {
        let (mut client, mut server) = established_pair()?;
        let now = Instant::now();

        client.abort();
        pump(&mut client, &mut server, now)?;
        assert_eq!(client.state(), AssociationState::Closed);
        assert_eq!(server.state(), AssociationState::Closed);
        Ok(())
    }

    #[test]
    fn test_stream_reset_round_trip() -> Result<()> {
        let (mut client, mut server) = established_pair()?;
        let now = Instant::now();

        client.reset_stream(3, now)?;
        // only one outstanding request is allowed
        assert_eq!(
            client.reset_stream(4, now),
            Err(Error::ErrReconfigRequestPending)
        );

        pump(&mut client, &mut server, now)?;

        assert!(matches!(
            server.poll_event(),
            Some(AssociationEvent::StreamReset(3))
        ));
        // the response cleared the outstanding request
        assert!(client.pending_reset_request.is_none());
        assert!(!client.t_reconfig.is_running());
        Ok(())
    }

    #[test]
    fn test_handshake_timeout_closes() -> Result<()> {
        let now = Instant::now();
        let mut client = Association::client(Config::default(), now)?;

        let mut t = now;
        for _ in 0..(MAX_INIT_RETRANS + 2) {
            let Some(deadline) = client.poll_timeout() else {
                break;
            };
            t = deadline;
            match client.handle_timeout(t) {
                Ok(()) => {}
                Err(Error::ErrHandshakeTimeout) => {
                    assert_eq!(client.state(), AssociationState::Closed);
                    return Ok(());
                }
                Err(other) => return Err(other),
            }
        }
        panic!("handshake should have timed out");
    }

    #[test]
    fn test_inbound_sack_is_ignored() -> Result<()> {
        let (mut client, mut server) = established_pair()?;
        let now = Instant::now();

        let sack = ChunkSelectiveAck {
            cumulative_tsn_ack: 1,
            advertised_receiver_window_credit: 1500,
            gap_ack_blocks: vec![],
            duplicate_tsn: vec![],
        };
        let packet = Packet {
            source_port: DEFAULT_SCTP_PORT,
            destination_port: DEFAULT_SCTP_PORT,
            verification_tag: server.my_verification_tag,
            chunks: vec![Box::new(sack)],
        };
        server.handle_read(&packet.marshal()?, now)?;

        // no event, no reply of any kind
        assert!(server.poll_event().is_none());
        assert!(server.poll_transmit().is_none());
        let _ = client;
        Ok(())
    }

    #[test]
    fn test_verification_tag_mismatch_dropped() -> Result<()> {
        let (client, mut server) = established_pair()?;
        let now = Instant::now();

        let data = ChunkPayloadData {
            unordered: true,
            beginning_fragment: true,
            ending_fragment: true,
            tsn: server.peer_last_tsn.wrapping_add(1),
            stream_identifier: 0,
            stream_sequence_number: 0,
            payload_type: PayloadProtocolIdentifier::Binary,
            user_data: Bytes::from_static(&[9]),
        };
        let packet = Packet {
            source_port: DEFAULT_SCTP_PORT,
            destination_port: DEFAULT_SCTP_PORT,
            verification_tag: server.my_verification_tag.wrapping_add(1),
            chunks: vec![Box::new(data)],
        };
        server.handle_read(&packet.marshal()?, now)?;
        assert!(server.poll_event().is_none());
        let _ = client;
        Ok(())
    }
}
