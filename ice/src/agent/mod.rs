pub(crate) mod turn;

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, trace, warn};
use rand::Rng;
use stun::attributes::*;
use stun::error_code::*;
use stun::fingerprint::FINGERPRINT;
use stun::integrity::MessageIntegrity;
use stun::message::*;
use stun::textattrs::TextAttribute;
use stun::xoraddr::XorMappedAddress;

use crate::candidate::candidate_pair::{CandidatePair, CandidatePairState};
use crate::candidate::{Candidate, CandidateType};
use crate::control::*;
use crate::error::{Error, Result};
use crate::rand::{generate_pwd, generate_ufrag};
use crate::state::{ConnectionState, GatheringState};
use crate::url::{SchemeType, Url};
use turn::{Allocation, Lifetime, RequestedTransport, PROTO_UDP};

/// First-byte ranges used to demultiplex the shared socket.
///
/// [RFC 7983]: STUN is 0..=3 (effectively 0 or 1), DTLS is 20..=63.
fn is_dtls_packet(b: &[u8]) -> bool {
    !b.is_empty() && (20..=63).contains(&b[0])
}

/// IceServerAddr is a server URL the orchestrator has already resolved.
#[derive(Debug, Clone)]
pub struct IceServerAddr {
    pub url: Url,
    pub addr: SocketAddr,
}

pub type StunFilterFn = Box<dyn Fn(&Message) -> bool + Send + Sync>;

/// AgentConfig collects the tunables for an Agent.
pub struct AgentConfig {
    pub servers: Vec<IceServerAddr>,

    /// Gather and use only relay candidates.
    pub relay_only: bool,

    /// Predicate invoked for every inbound STUN message; returning false
    /// drops it.
    pub stun_filter: Option<StunFilterFn>,

    /// Ta, the connectivity-check pacing interval.
    pub check_interval: Duration,
    /// Interval between keepalives on the selected pair.
    pub keepalive_interval: Duration,
    /// Duration without inbound traffic before the agent is disconnected.
    pub disconnected_timeout: Duration,
    /// Duration without inbound traffic before the agent has failed.
    pub failed_timeout: Duration,
    /// Per-transaction transmission budget (Rc).
    pub max_binding_requests: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            servers: vec![],
            relay_only: false,
            stun_filter: None,
            check_interval: Duration::from_millis(50),
            keepalive_interval: Duration::from_secs(2),
            disconnected_timeout: Duration::from_secs(5),
            failed_timeout: Duration::from_secs(25),
            max_binding_requests: stun::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Transmit is an outbound datagram the driver must put on the socket.
#[derive(Debug, Clone)]
pub struct Transmit {
    pub to: SocketAddr,
    pub payload: Bytes,
}

/// AgentEvent is an upward notification drained with [`Agent::poll_event`].
#[derive(Debug)]
pub enum AgentEvent {
    /// A local candidate finished gathering.
    Candidate(Candidate),
    GatheringStateChange(GatheringState),
    ConnectionStateChange(ConnectionState),
    /// A pair was nominated; all traffic now flows through it.
    SelectedPair {
        local: Candidate,
        remote: Candidate,
    },
    /// A demultiplexed non-STUN datagram (DTLS range) for the upper layers.
    PayloadReceived(Bytes),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionKind {
    GatherSrflx,
    Check { pair: usize, use_candidate: bool },
    Keepalive,
    TurnAllocate { authenticated: bool },
    TurnRefresh,
    TurnPermission,
}

struct Transaction {
    to: SocketAddr,
    raw: Vec<u8>,
    attempt: u32,
    max_attempts: u32,
    rto: Duration,
    deadline: Instant,
    kind: TransactionKind,
    /// Index into allocations for TURN transactions.
    allocation: Option<usize>,
}

/// Agent represents the ICE agent: candidate gathering, connectivity checks,
/// nomination, and socket demultiplexing, as a sans-IO state machine over a
/// single UDP socket owned by the caller.
pub struct Agent {
    config: AgentConfig,

    local_ufrag: String,
    local_pwd: String,
    remote_ufrag: Option<String>,
    remote_pwd: Option<String>,

    is_controlling: bool,
    tie_breaker: u64,

    gathering_state: GatheringState,
    connection_state: ConnectionState,

    local_candidates: Vec<Candidate>,
    remote_candidates: Vec<Candidate>,
    pairs: Vec<CandidatePair>,
    selected_pair: Option<usize>,

    transactions: HashMap<TransactionId, Transaction>,
    allocations: Vec<Allocation>,
    pending_gathers: usize,

    base_addr: Option<SocketAddr>,

    events: VecDeque<AgentEvent>,
    transmits: VecDeque<Transmit>,

    check_deadline: Option<Instant>,
    keepalive_deadline: Option<Instant>,
    last_received: Option<Instant>,

    closed: bool,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Agent {
            config,
            local_ufrag: generate_ufrag(),
            local_pwd: generate_pwd(),
            remote_ufrag: None,
            remote_pwd: None,
            is_controlling: false,
            tie_breaker: rand::thread_rng().gen::<u64>(),
            gathering_state: GatheringState::New,
            connection_state: ConnectionState::New,
            local_candidates: vec![],
            remote_candidates: vec![],
            pairs: vec![],
            selected_pair: None,
            transactions: HashMap::new(),
            allocations: vec![],
            pending_gathers: 0,
            base_addr: None,
            events: VecDeque::new(),
            transmits: VecDeque::new(),
            check_deadline: None,
            keepalive_deadline: None,
            last_received: None,
            closed: false,
        }
    }

    pub fn local_credentials(&self) -> (&str, &str) {
        (&self.local_ufrag, &self.local_pwd)
    }

    pub fn set_remote_credentials(&mut self, ufrag: String, pwd: String) {
        self.remote_ufrag = Some(ufrag);
        self.remote_pwd = Some(pwd);
    }

    pub fn set_controlling(&mut self, controlling: bool) {
        self.is_controlling = controlling;
    }

    pub fn is_controlling(&self) -> bool {
        self.is_controlling
    }

    pub fn gathering_state(&self) -> GatheringState {
        self.gathering_state
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn local_candidates(&self) -> &[Candidate] {
        &self.local_candidates
    }

    pub fn selected_pair(&self) -> Option<&CandidatePair> {
        self.selected_pair.map(|i| &self.pairs[i])
    }

    /// gather_candidates starts candidate gathering for the given bound
    /// socket addresses. Host candidates are emitted synchronously;
    /// server-reflexive and relayed candidates arrive as responses do.
    pub fn gather_candidates(&mut self, bases: &[SocketAddr], now: Instant) -> Result<()> {
        if self.closed {
            return Err(Error::ErrClosed);
        }
        self.set_gathering_state(GatheringState::Gathering);
        self.base_addr = bases.first().copied();

        if !self.config.relay_only {
            for base in bases {
                let candidate = Candidate::host(base.ip().to_string(), base.port());
                self.add_local_candidate(candidate, now);
            }
        }

        let servers = self.config.servers.clone();
        for server in &servers {
            match server.url.scheme {
                SchemeType::Stun if !self.config.relay_only => {
                    let mut msg = Message::new();
                    msg.build(&[Box::new(BINDING_REQUEST), Box::new(TransactionId::new())])?;
                    self.register_transaction(
                        msg,
                        server.addr,
                        TransactionKind::GatherSrflx,
                        None,
                        now,
                    );
                    self.pending_gathers += 1;
                }
                SchemeType::Turn => {
                    let allocation = Allocation::new(
                        server.addr,
                        server.url.username.clone(),
                        server.url.password.clone(),
                    );
                    self.allocations.push(allocation);
                    let idx = self.allocations.len() - 1;
                    self.send_allocate(idx, false, now)?;
                    self.pending_gathers += 1;
                }
                _ => {}
            }
        }

        if self.pending_gathers == 0 {
            self.set_gathering_state(GatheringState::Complete);
        }
        Ok(())
    }

    /// add_remote_candidate adds a candidate learned from the remote
    /// description or trickled in.
    pub fn add_remote_candidate(&mut self, candidate: Candidate, now: Instant) {
        if self.closed {
            return;
        }
        let exists = self
            .remote_candidates
            .iter()
            .any(|c| c.address == candidate.address && c.port == candidate.port);
        if exists {
            return;
        }
        self.remote_candidates.push(candidate);
        self.form_pairs(now);
    }

    /// handle_read feeds one inbound datagram. STUN is consumed internally;
    /// DTLS-range traffic surfaces as [`AgentEvent::PayloadReceived`];
    /// anything else is dropped.
    pub fn handle_read(&mut self, from: SocketAddr, data: &[u8], now: Instant) -> Result<()> {
        if self.closed || data.is_empty() {
            return Ok(());
        }
        self.last_received = Some(now);

        if stun::message::is_message(data) {
            self.handle_stun(from, data, now, false)
        } else if is_dtls_packet(data) {
            self.events
                .push_back(AgentEvent::PayloadReceived(Bytes::copy_from_slice(data)));
            Ok(())
        } else {
            trace!("dropping datagram from {from} with unroutable first byte {}", data[0]);
            Ok(())
        }
    }

    /// send_payload routes one upper-layer datagram through the selected
    /// pair.
    pub fn send_payload(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::ErrClosed);
        }
        let idx = match self.selected_pair.or_else(|| self.best_pair()) {
            Some(idx) => idx,
            None => return Err(Error::ErrNoSelectedPair),
        };
        let pair = self.pairs[idx].clone();
        self.route(&pair, data)
    }

    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<AgentEvent> {
        self.events.pop_front()
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        if self.closed {
            return None;
        }
        let mut deadline: Option<Instant> = None;
        let mut consider = |d: Option<Instant>| {
            deadline = match (deadline, d) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, None) => a,
                (None, b) => b,
            };
        };
        for t in self.transactions.values() {
            consider(Some(t.deadline));
        }
        consider(self.check_deadline);
        consider(self.keepalive_deadline);
        for a in &self.allocations {
            consider(a.refresh_at);
        }
        deadline
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        if self.closed {
            return;
        }

        self.retransmit_due(now);
        self.pace_checks(now);
        self.keepalive(now);
        self.refresh_allocations(now);
        self.update_liveness(now);
    }

    /// close stops the agent. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.transactions.clear();
        self.check_deadline = None;
        self.keepalive_deadline = None;
        self.set_connection_state(ConnectionState::Closed);
    }

    fn set_gathering_state(&mut self, state: GatheringState) {
        if self.gathering_state != state {
            self.gathering_state = state;
            self.events
                .push_back(AgentEvent::GatheringStateChange(state));
        }
    }

    fn set_connection_state(&mut self, state: ConnectionState) {
        if self.connection_state != state {
            debug!("ice connection state {} -> {}", self.connection_state, state);
            self.connection_state = state;
            self.events
                .push_back(AgentEvent::ConnectionStateChange(state));
        }
    }

    fn add_local_candidate(&mut self, candidate: Candidate, now: Instant) {
        let exists = self.local_candidates.iter().any(|c| {
            c.address == candidate.address
                && c.port == candidate.port
                && c.candidate_type == candidate.candidate_type
        });
        if exists {
            return;
        }
        self.local_candidates.push(candidate.clone());
        self.events.push_back(AgentEvent::Candidate(candidate));
        self.form_pairs(now);
    }

    /// form_pairs creates candidate pairs for every (local, remote)
    /// combination not yet on the check list. Only host and relay locals
    /// originate checks; server-reflexive candidates share the host base's
    /// 5-tuple.
    fn form_pairs(&mut self, now: Instant) {
        for local in &self.local_candidates {
            if local.candidate_type != CandidateType::Host
                && local.candidate_type != CandidateType::Relay
            {
                continue;
            }
            if self.config.relay_only && local.candidate_type != CandidateType::Relay {
                continue;
            }
            for remote in &self.remote_candidates {
                let is_v4 = |c: &Candidate| c.addr().is_ipv4();
                if is_v4(local) != is_v4(remote) {
                    continue;
                }
                let present = self.pairs.iter().any(|p| {
                    p.local.address == local.address
                        && p.local.port == local.port
                        && p.local.candidate_type == local.candidate_type
                        && p.remote.address == remote.address
                        && p.remote.port == remote.port
                });
                if !present {
                    self.pairs
                        .push(CandidatePair::new(local.clone(), remote.clone()));
                }
            }
        }
        if !self.pairs.is_empty() && self.remote_pwd.is_some() {
            if self.connection_state == ConnectionState::New {
                self.set_connection_state(ConnectionState::Checking);
            }
            if self.check_deadline.is_none() {
                // first check fires on the next timeout tick
                self.check_deadline = Some(now);
            }
        }
    }

    fn best_pair(&self) -> Option<usize> {
        self.pairs
            .iter()
            .enumerate()
            .filter(|(_, p)| p.state == CandidatePairState::Succeeded)
            .max_by_key(|(_, p)| p.priority(self.is_controlling))
            .map(|(i, _)| i)
    }

    fn register_transaction(
        &mut self,
        msg: Message,
        to: SocketAddr,
        kind: TransactionKind,
        allocation: Option<usize>,
        now: Instant,
    ) {
        let rto = Duration::from_millis(stun::DEFAULT_RTO_MS);
        let transaction = Transaction {
            to,
            raw: msg.raw.clone(),
            attempt: 1,
            max_attempts: self.config.max_binding_requests,
            rto,
            deadline: now + rto,
            kind,
            allocation,
        };
        self.transmits.push_back(Transmit {
            to,
            payload: Bytes::from(msg.raw),
        });
        self.transactions.insert(msg.transaction_id, transaction);
    }

    fn retransmit_due(&mut self, now: Instant) {
        let due: Vec<TransactionId> = self
            .transactions
            .iter()
            .filter(|(_, t)| t.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in due {
            let Some(mut t) = self.transactions.remove(&id) else {
                continue;
            };
            if t.attempt >= t.max_attempts {
                self.transaction_failed(t.kind);
                continue;
            }
            t.attempt += 1;
            t.rto *= 2;
            t.deadline = now + t.rto;
            self.transmits.push_back(Transmit {
                to: t.to,
                payload: Bytes::copy_from_slice(&t.raw),
            });
            self.transactions.insert(id, t);
        }
    }

    fn transaction_failed(&mut self, kind: TransactionKind) {
        match kind {
            TransactionKind::GatherSrflx => {
                debug!("srflx gathering exhausted retransmissions");
                self.gather_done();
            }
            TransactionKind::TurnAllocate { .. } => {
                debug!("turn allocate exhausted retransmissions");
                self.gather_done();
            }
            TransactionKind::Check { pair, .. } => {
                if let Some(p) = self.pairs.get_mut(pair) {
                    debug!("check exhausted retransmissions for pair {p}");
                    p.state = CandidatePairState::Failed;
                }
                self.update_check_list_state();
            }
            TransactionKind::Keepalive
            | TransactionKind::TurnRefresh
            | TransactionKind::TurnPermission => {}
        }
    }

    fn gather_done(&mut self) {
        self.pending_gathers = self.pending_gathers.saturating_sub(1);
        if self.pending_gathers == 0 && self.gathering_state == GatheringState::Gathering {
            self.set_gathering_state(GatheringState::Complete);
        }
    }

    fn pace_checks(&mut self, now: Instant) {
        let Some(deadline) = self.check_deadline else {
            return;
        };
        if deadline > now || self.remote_pwd.is_none() {
            return;
        }

        let next = self
            .pairs
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                p.state == CandidatePairState::Waiting || p.state == CandidatePairState::Frozen
            })
            .max_by_key(|(_, p)| p.priority(self.is_controlling))
            .map(|(i, _)| i);

        if let Some(idx) = next {
            self.pairs[idx].state = CandidatePairState::InProgress;
            self.pairs[idx].binding_request_count += 1;
            if let Err(err) = self.send_check(idx, false, now) {
                warn!("connectivity check failed to send: {err}");
                self.pairs[idx].state = CandidatePairState::Failed;
            }
            self.check_deadline = Some(now + self.config.check_interval);
        } else if self.pairs.iter().any(|p| p.state == CandidatePairState::InProgress) {
            self.check_deadline = Some(now + self.config.check_interval);
        } else {
            self.check_deadline = None;
            self.update_check_list_state();
        }
    }

    fn send_check(&mut self, pair_idx: usize, use_candidate: bool, now: Instant) -> Result<()> {
        let (remote_ufrag, remote_pwd) = match (&self.remote_ufrag, &self.remote_pwd) {
            (Some(u), Some(p)) => (u.clone(), p.clone()),
            _ => return Err(Error::ErrRemoteCredentials),
        };
        let username = format!("{}:{}", remote_ufrag, self.local_ufrag);
        let pair = &self.pairs[pair_idx];
        let remote_addr = pair.remote.addr();

        // the priority a peer-reflexive candidate learned from this check
        // would get
        let prflx_priority = Candidate {
            candidate_type: CandidateType::PeerReflexive,
            component: pair.local.component,
            ..Default::default()
        }
        .priority();

        let mut setters: Vec<Box<dyn Setter>> = vec![
            Box::new(BINDING_REQUEST),
            Box::new(TransactionId::new()),
            Box::new(TextAttribute::new(ATTR_USERNAME, username)),
            Box::new(PriorityAttr(prflx_priority)),
        ];
        if self.is_controlling {
            setters.push(Box::new(AttrControlling(self.tie_breaker)));
            if use_candidate {
                setters.push(Box::new(UseCandidateAttr::new()));
            }
        } else {
            setters.push(Box::new(AttrControlled(self.tie_breaker)));
        }
        setters.push(Box::new(MessageIntegrity::new_short_term_integrity(
            &remote_pwd,
        )));
        setters.push(Box::new(FINGERPRINT));

        let mut msg = Message::new();
        msg.build(&setters)?;

        trace!("sending check on pair {}", self.pairs[pair_idx]);

        let via_relay = self.pairs[pair_idx].local.candidate_type == CandidateType::Relay;
        if via_relay {
            // checks through a relay are wrapped in Send indications and
            // need a permission for the peer
            self.ensure_permission(remote_addr, now)?;
            let raw = msg.raw.clone();
            let id = msg.transaction_id;
            let server = self.allocation_for_local(pair_idx);
            if let Some(server) = server {
                let ind = turn::send_indication(remote_addr, &raw)?;
                self.transmits.push_back(Transmit {
                    to: server,
                    payload: Bytes::copy_from_slice(&ind.raw),
                });
                let rto = Duration::from_millis(stun::DEFAULT_RTO_MS);
                self.transactions.insert(
                    id,
                    Transaction {
                        // retransmissions must stay wrapped for the relay
                        to: server,
                        raw: ind.raw,
                        attempt: 1,
                        max_attempts: self.config.max_binding_requests,
                        rto,
                        deadline: now + rto,
                        kind: TransactionKind::Check {
                            pair: pair_idx,
                            use_candidate,
                        },
                        allocation: None,
                    },
                );
            }
        } else {
            self.register_transaction(
                msg,
                remote_addr,
                TransactionKind::Check {
                    pair: pair_idx,
                    use_candidate,
                },
                None,
                now,
            );
        }
        Ok(())
    }

    fn handle_stun(
        &mut self,
        from: SocketAddr,
        data: &[u8],
        now: Instant,
        via_relay: bool,
    ) -> Result<()> {
        let mut msg = Message::new();
        if let Err(err) = msg.unmarshal_binary(data) {
            warn!("failed to decode inbound STUN from {from}: {err}");
            return Ok(());
        }

        if let Some(filter) = &self.config.stun_filter {
            if !filter(&msg) {
                trace!("stun filter dropped {} from {from}", msg.typ);
                return Ok(());
            }
        }

        match msg.typ.class {
            CLASS_REQUEST => self.handle_binding_request(from, &mut msg, now, via_relay),
            CLASS_SUCCESS_RESPONSE | CLASS_ERROR_RESPONSE => {
                self.handle_response(from, &mut msg, now)
            }
            CLASS_INDICATION => {
                if msg.typ.method == METHOD_DATA {
                    let (peer, inner) = turn::parse_data_indication(&msg)?;
                    if stun::message::is_message(&inner) {
                        self.handle_stun(peer, &inner, now, true)
                    } else if is_dtls_packet(&inner) {
                        self.events
                            .push_back(AgentEvent::PayloadReceived(Bytes::from(inner)));
                        Ok(())
                    } else {
                        Ok(())
                    }
                } else {
                    // binding indication keepalive; nothing more to do
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    fn handle_binding_request(
        &mut self,
        from: SocketAddr,
        msg: &mut Message,
        now: Instant,
        via_relay: bool,
    ) -> Result<()> {
        // validate username: "local-ufrag:remote-ufrag"
        let username = match TextAttribute::get_from_as(msg, ATTR_USERNAME) {
            Ok(u) => u.text,
            Err(_) => {
                trace!("binding request from {from} without USERNAME");
                return Ok(());
            }
        };
        if !username.starts_with(&format!("{}:", self.local_ufrag)) {
            trace!("binding request from {from} with unknown username {username}");
            return Ok(());
        }
        let integrity = MessageIntegrity::new_short_term_integrity(&self.local_pwd);
        if integrity.check(msg).is_err() {
            trace!("binding request from {from} failed integrity");
            return Ok(());
        }

        // role conflict handling per RFC 5245 Section 7.2.1.1
        let mut their_controlling = AttrControlling::default();
        let mut their_controlled = AttrControlled::default();
        if their_controlling.get_from(msg).is_ok() && self.is_controlling {
            if self.tie_breaker >= their_controlling.0 {
                self.send_role_conflict(from, msg, via_relay)?;
                return Ok(());
            }
            debug!("role conflict: switching to controlled");
            self.is_controlling = false;
        } else if their_controlled.get_from(msg).is_ok() && !self.is_controlling {
            if self.tie_breaker >= their_controlled.0 {
                debug!("role conflict: switching to controlling");
                self.is_controlling = true;
            } else {
                self.send_role_conflict(from, msg, via_relay)?;
                return Ok(());
            }
        }

        // learn a peer-reflexive candidate if this source is new
        let known = self
            .remote_candidates
            .iter()
            .any(|c| c.address == from.ip().to_string() && c.port == from.port());
        if !known {
            let mut priority_attr = PriorityAttr::default();
            let _ = priority_attr.get_from(msg);
            let prflx = Candidate::peer_reflexive(
                from.ip().to_string(),
                from.port(),
                priority_attr.0,
            );
            debug!("learned peer-reflexive candidate {prflx}");
            self.remote_candidates.push(prflx);
            self.form_pairs(now);
        }

        // answer
        let mut response = Message::new();
        response.build(&[
            Box::new(BINDING_SUCCESS),
            Box::new(msg.clone()), // copies the transaction id
            Box::new(XorMappedAddress {
                ip: from.ip(),
                port: from.port(),
            }),
            Box::new(MessageIntegrity::new_short_term_integrity(&self.local_pwd)),
            Box::new(FINGERPRINT),
        ])?;
        self.send_stun(from, response.raw.into(), via_relay);

        // triggered check + nomination bookkeeping
        if let Some(idx) = self.pair_index(from, via_relay) {
            if self.pairs[idx].state == CandidatePairState::Failed
                || self.pairs[idx].state == CandidatePairState::Frozen
            {
                self.pairs[idx].state = CandidatePairState::Waiting;
                if self.check_deadline.is_none() {
                    self.check_deadline = Some(now);
                }
            }
            if UseCandidateAttr::is_set(msg) {
                self.pairs[idx].nomination_requested = true;
                if self.pairs[idx].state == CandidatePairState::Succeeded {
                    self.nominate(idx, now);
                }
            }
        }
        Ok(())
    }

    fn send_role_conflict(
        &mut self,
        from: SocketAddr,
        request: &Message,
        via_relay: bool,
    ) -> Result<()> {
        let mut response = Message::new();
        response.build(&[
            Box::new(BINDING_ERROR),
            Box::new(request.clone()),
            Box::new(CODE_ROLE_CONFLICT),
            Box::new(MessageIntegrity::new_short_term_integrity(&self.local_pwd)),
            Box::new(FINGERPRINT),
        ])?;
        self.send_stun(from, response.raw.into(), via_relay);
        Ok(())
    }

    fn handle_response(
        &mut self,
        from: SocketAddr,
        msg: &mut Message,
        now: Instant,
    ) -> Result<()> {
        let Some(transaction) = self.transactions.remove(&msg.transaction_id) else {
            trace!("response from {from} for unknown transaction");
            return Ok(());
        };

        if msg.typ.class == CLASS_ERROR_RESPONSE {
            let mut code = ErrorCodeAttribute::default();
            let _ = code.get_from(msg);
            // 401/438 carry the realm and a (possibly fresh) nonce
            if let Some(idx) = transaction.allocation {
                if let Ok(realm) = TextAttribute::get_from_as(msg, ATTR_REALM) {
                    self.allocations[idx].realm = realm.text;
                }
                if let Ok(nonce) = TextAttribute::get_from_as(msg, ATTR_NONCE) {
                    self.allocations[idx].nonce = nonce.text;
                }
            }
            return self.handle_error_response(transaction, code.code, now);
        }

        match transaction.kind {
            TransactionKind::GatherSrflx => {
                let mut reflexive = XorMappedAddress::default();
                if reflexive.get_from(msg).is_ok() {
                    if let Some(base) = self.base_addr {
                        let candidate = Candidate::server_reflexive(
                            reflexive.ip.to_string(),
                            reflexive.port,
                            (base.ip().to_string(), base.port()),
                            transaction.to.to_string(),
                        );
                        // a srflx that equals the host address adds nothing
                        let duplicate = self
                            .local_candidates
                            .iter()
                            .any(|c| c.address == candidate.address && c.port == candidate.port);
                        if !duplicate {
                            self.add_local_candidate(candidate, now);
                        }
                    }
                }
                self.gather_done();
            }
            TransactionKind::Check {
                pair,
                use_candidate,
            } => {
                if let Some(remote_pwd) = self.remote_pwd.clone() {
                    let integrity = MessageIntegrity::new_short_term_integrity(&remote_pwd);
                    if integrity.check(msg).is_err() {
                        warn!("check response failed integrity, ignoring");
                        return Ok(());
                    }
                }
                let mut do_nominate = false;
                if let Some(p) = self.pairs.get_mut(pair) {
                    p.state = CandidatePairState::Succeeded;
                    debug!("check succeeded for pair {p}");
                    do_nominate = use_candidate || p.nomination_requested;
                }
                if do_nominate {
                    self.nominate(pair, now);
                } else if self.connection_state == ConnectionState::Checking {
                    self.set_connection_state(ConnectionState::Connected);
                }
                if self.is_controlling && self.selected_pair.is_none() {
                    if let Some(best) = self.best_pair() {
                        // nominate the highest-priority succeeded pair
                        self.send_check(best, true, now)?;
                    }
                }
            }
            TransactionKind::TurnAllocate { .. } => {
                self.handle_allocate_success(transaction, msg, now)?;
            }
            TransactionKind::TurnRefresh => {
                if let Some(idx) = transaction.allocation {
                    let mut lifetime = Lifetime::default();
                    let _ = lifetime.get_from(msg);
                    if let Some(allocation) = self.allocations.get_mut(idx) {
                        allocation.lifetime = lifetime.0;
                        allocation.refresh_at = Some(now + lifetime.0 / 2);
                    }
                }
            }
            TransactionKind::TurnPermission | TransactionKind::Keepalive => {}
        }
        Ok(())
    }

    fn handle_error_response(
        &mut self,
        transaction: Transaction,
        code: ErrorCode,
        now: Instant,
    ) -> Result<()> {
        match transaction.kind {
            TransactionKind::Check { pair, .. } if code == CODE_ROLE_CONFLICT => {
                // switch role and retry the check, RFC 5245 Section 7.1.3.1
                debug!("487 role conflict; switching role and retrying");
                self.is_controlling = !self.is_controlling;
                if let Some(p) = self.pairs.get_mut(pair) {
                    p.state = CandidatePairState::Waiting;
                }
                if self.check_deadline.is_none() {
                    self.check_deadline = Some(now);
                }
            }
            TransactionKind::Check { pair, .. } => {
                if let Some(p) = self.pairs.get_mut(pair) {
                    p.state = CandidatePairState::Failed;
                }
                self.update_check_list_state();
            }
            TransactionKind::TurnAllocate { authenticated } if code == CODE_UNAUTHORIZED => {
                if authenticated {
                    debug!("turn credentials rejected");
                    self.gather_done();
                } else if let Some(idx) = transaction.allocation {
                    // first round-trip of the long-term credential exchange
                    self.send_allocate(idx, true, now)?;
                }
            }
            TransactionKind::TurnAllocate { authenticated: true } if code == CODE_STALE_NONCE => {
                if let Some(idx) = transaction.allocation {
                    self.send_allocate(idx, true, now)?;
                }
            }
            TransactionKind::TurnAllocate { .. } => {
                debug!("turn allocate failed with {}", code.0);
                self.gather_done();
            }
            TransactionKind::GatherSrflx => self.gather_done(),
            _ => {}
        }
        Ok(())
    }

    fn handle_allocate_success(
        &mut self,
        transaction: Transaction,
        msg: &Message,
        now: Instant,
    ) -> Result<()> {
        let Some(idx) = transaction.allocation else {
            return Ok(());
        };
        let mut relayed = XorMappedAddress::default();
        if relayed.get_from_as(msg, ATTR_XOR_RELAYED_ADDRESS).is_err() {
            self.gather_done();
            return Ok(());
        }
        let mut lifetime = Lifetime(turn::DEFAULT_LIFETIME);
        let _ = lifetime.get_from(msg);

        let candidate = {
            let base = self.base_addr;
            let allocation = &mut self.allocations[idx];
            allocation.relayed = Some(SocketAddr::new(relayed.ip, relayed.port));
            allocation.lifetime = lifetime.0;
            allocation.refresh_at = Some(now + lifetime.0 / 2);

            let base = base.unwrap_or(allocation.server);
            Candidate::relay(
                relayed.ip.to_string(),
                relayed.port,
                (base.ip().to_string(), base.port()),
                allocation.server.to_string(),
            )
        };

        self.add_local_candidate(candidate, now);
        self.gather_done();
        Ok(())
    }

    fn send_allocate(&mut self, idx: usize, authenticated: bool, now: Instant) -> Result<()> {
        let allocation = &self.allocations[idx];
        let server = allocation.server;

        let mut setters: Vec<Box<dyn Setter>> = vec![
            Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_REQUEST)),
            Box::new(TransactionId::new()),
            Box::new(RequestedTransport { protocol: PROTO_UDP }),
            Box::new(Lifetime(turn::DEFAULT_LIFETIME)),
        ];
        if authenticated {
            setters.push(Box::new(TextAttribute::new(
                ATTR_USERNAME,
                allocation.username.clone(),
            )));
            setters.push(Box::new(TextAttribute::new(
                ATTR_REALM,
                allocation.realm.clone(),
            )));
            setters.push(Box::new(TextAttribute::new(
                ATTR_NONCE,
                allocation.nonce.clone(),
            )));
            setters.push(Box::new(MessageIntegrity::new_long_term_integrity(
                &allocation.username,
                &allocation.realm,
                &allocation.password,
            )));
        }
        setters.push(Box::new(FINGERPRINT));

        let mut msg = Message::new();
        msg.build(&setters)?;
        self.register_transaction(
            msg,
            server,
            TransactionKind::TurnAllocate { authenticated },
            Some(idx),
            now,
        );
        Ok(())
    }

    fn refresh_allocations(&mut self, now: Instant) {
        let due: Vec<usize> = self
            .allocations
            .iter()
            .enumerate()
            .filter(|(_, a)| a.refresh_at.is_some_and(|at| at <= now) && a.relayed.is_some())
            .map(|(i, _)| i)
            .collect();

        for idx in due {
            self.allocations[idx].refresh_at = None;
            let allocation = &self.allocations[idx];
            let setters: Vec<Box<dyn Setter>> = vec![
                Box::new(MessageType::new(METHOD_REFRESH, CLASS_REQUEST)),
                Box::new(TransactionId::new()),
                Box::new(Lifetime(turn::DEFAULT_LIFETIME)),
                Box::new(TextAttribute::new(
                    ATTR_USERNAME,
                    allocation.username.clone(),
                )),
                Box::new(TextAttribute::new(ATTR_REALM, allocation.realm.clone())),
                Box::new(TextAttribute::new(ATTR_NONCE, allocation.nonce.clone())),
                Box::new(MessageIntegrity::new_long_term_integrity(
                    &allocation.username,
                    &allocation.realm,
                    &allocation.password,
                )),
                Box::new(FINGERPRINT),
            ];
            let server = allocation.server;
            let mut msg = Message::new();
            if msg.build(&setters).is_ok() {
                self.register_transaction(
                    msg,
                    server,
                    TransactionKind::TurnRefresh,
                    Some(idx),
                    now,
                );
            }
        }
    }

    fn ensure_permission(&mut self, peer: SocketAddr, now: Instant) -> Result<()> {
        let Some(idx) = self
            .allocations
            .iter()
            .position(|a| a.relayed.is_some() && !a.permissions.contains(&peer.ip()))
        else {
            return Ok(());
        };
        self.allocations[idx].permissions.insert(peer.ip());

        let allocation = &self.allocations[idx];
        let mut msg = Message::new();
        msg.build(&[
            Box::new(MessageType::new(METHOD_CREATE_PERMISSION, CLASS_REQUEST)),
            Box::new(TransactionId::new()),
            Box::new(turn::XorPeerAddress(XorMappedAddress {
                ip: peer.ip(),
                port: peer.port(),
            })),
            Box::new(TextAttribute::new(
                ATTR_USERNAME,
                allocation.username.clone(),
            )),
            Box::new(TextAttribute::new(ATTR_REALM, allocation.realm.clone())),
            Box::new(TextAttribute::new(ATTR_NONCE, allocation.nonce.clone())),
            Box::new(MessageIntegrity::new_long_term_integrity(
                &allocation.username,
                &allocation.realm,
                &allocation.password,
            )),
            Box::new(FINGERPRINT),
        ])?;
        let server = allocation.server;
        self.register_transaction(msg, server, TransactionKind::TurnPermission, Some(idx), now);
        Ok(())
    }

    fn allocation_for_local(&self, pair_idx: usize) -> Option<SocketAddr> {
        let local = &self.pairs[pair_idx].local;
        self.allocations
            .iter()
            .find(|a| {
                a.relayed
                    .map(|r| r.ip().to_string() == local.address && r.port() == local.port)
                    .unwrap_or(false)
            })
            .map(|a| a.server)
    }

    fn pair_index(&self, remote: SocketAddr, via_relay: bool) -> Option<usize> {
        self.pairs.iter().position(|p| {
            let type_matches = if via_relay {
                p.local.candidate_type == CandidateType::Relay
            } else {
                p.local.candidate_type == CandidateType::Host
            };
            type_matches
                && p.remote.address == remote.ip().to_string()
                && p.remote.port == remote.port()
        })
    }

    fn nominate(&mut self, idx: usize, now: Instant) {
        if self.selected_pair == Some(idx) {
            return;
        }
        self.pairs[idx].nominated = true;
        self.selected_pair = Some(idx);
        let pair = &self.pairs[idx];
        debug!("nominated pair {pair}");
        self.events.push_back(AgentEvent::SelectedPair {
            local: pair.local.clone(),
            remote: pair.remote.clone(),
        });
        self.set_connection_state(ConnectionState::Completed);
        if self.keepalive_deadline.is_none() {
            self.keepalive_deadline = Some(now + self.config.keepalive_interval);
        }
    }

    fn keepalive(&mut self, now: Instant) {
        let Some(deadline) = self.keepalive_deadline else {
            return;
        };
        if deadline > now {
            return;
        }
        self.keepalive_deadline = Some(now + self.config.keepalive_interval);

        if let Some(idx) = self.selected_pair {
            let pair = self.pairs[idx].clone();
            let mut msg = Message::new();
            if msg
                .build(&[
                    Box::new(BINDING_INDICATION),
                    Box::new(TransactionId::new()),
                    Box::new(FINGERPRINT),
                ])
                .is_ok()
            {
                let _ = self.route(&pair, &msg.raw);
            }
        }
    }

    fn update_liveness(&mut self, now: Instant) {
        if self.selected_pair.is_none() {
            return;
        }
        let Some(last) = self.last_received else {
            return;
        };
        let silent = now.saturating_duration_since(last);
        if silent >= self.config.failed_timeout {
            self.set_connection_state(ConnectionState::Failed);
        } else if silent >= self.config.disconnected_timeout {
            self.set_connection_state(ConnectionState::Disconnected);
        } else if self.connection_state == ConnectionState::Disconnected {
            self.set_connection_state(ConnectionState::Completed);
        }
    }

    /// update_check_list_state fails the agent once every pair has failed and
    /// gathering can produce no further pairs.
    fn update_check_list_state(&mut self) {
        if self.selected_pair.is_some() {
            return;
        }
        let all_failed = !self.pairs.is_empty()
            && self
                .pairs
                .iter()
                .all(|p| p.state == CandidatePairState::Failed);
        if all_failed && self.gathering_state == GatheringState::Complete {
            self.set_connection_state(ConnectionState::Failed);
        }
    }

    fn route(&mut self, pair: &CandidatePair, data: &[u8]) -> Result<()> {
        let remote = pair.remote.addr();
        if pair.local.candidate_type == CandidateType::Relay {
            let server = self
                .allocations
                .iter()
                .find(|a| {
                    a.relayed
                        .map(|r| {
                            r.ip().to_string() == pair.local.address && r.port() == pair.local.port
                        })
                        .unwrap_or(false)
                })
                .map(|a| a.server)
                .ok_or(Error::ErrNoSelectedPair)?;
            let ind = turn::send_indication(remote, data)?;
            self.transmits.push_back(Transmit {
                to: server,
                payload: Bytes::from(ind.raw),
            });
        } else {
            self.transmits.push_back(Transmit {
                to: remote,
                payload: Bytes::copy_from_slice(data),
            });
        }
        Ok(())
    }

    fn send_stun(&mut self, to: SocketAddr, data: Bytes, via_relay: bool) {
        if via_relay {
            if let Some(server) = self
                .allocations
                .iter()
                .find(|a| a.relayed.is_some())
                .map(|a| a.server)
            {
                if let Ok(ind) = turn::send_indication(to, &data) {
                    self.transmits.push_back(Transmit {
                        to: server,
                        payload: Bytes::from(ind.raw),
                    });
                }
                return;
            }
        }
        self.transmits.push_back(Transmit { to, payload: data });
    }
}

#[cfg(test)]
mod agent_test {
    use super::*;

    const PEER_UFRAG: &str = "peerufrag";
    const PEER_PWD: &str = "peerpasswordpeerpasswordpeerpass";

    fn transmits(agent: &mut Agent) -> Vec<Transmit> {
        let mut out = vec![];
        while let Some(transmit) = agent.poll_transmit() {
            out.push(transmit);
        }
        out
    }

    fn events(agent: &mut Agent) -> Vec<AgentEvent> {
        let mut out = vec![];
        while let Some(event) = agent.poll_event() {
            out.push(event);
        }
        out
    }

    fn decode(transmit: &Transmit) -> Message {
        let mut msg = Message::new();
        msg.unmarshal_binary(&transmit.payload).unwrap();
        msg
    }

    /// An agent with one host candidate, remote credentials, and one remote
    /// host candidate: the check list is formed and the first check fires on
    /// the next timeout tick.
    fn checking_agent(controlling: bool, now: Instant) -> (Agent, SocketAddr) {
        let mut agent = Agent::new(AgentConfig::default());
        agent.set_controlling(controlling);
        agent.set_remote_credentials(PEER_UFRAG.to_owned(), PEER_PWD.to_owned());
        agent
            .gather_candidates(&["192.168.1.2:4000".parse().unwrap()], now)
            .unwrap();
        let remote: SocketAddr = "192.168.1.3:4001".parse().unwrap();
        agent.add_remote_candidate(Candidate::host("192.168.1.3".to_owned(), 4001), now);
        (agent, remote)
    }

    /// A binding request as the peer would send it: USERNAME is
    /// "our-ufrag:peer-ufrag", MESSAGE-INTEGRITY is keyed with our password.
    fn peer_binding_request(
        agent: &Agent,
        controlling: Option<u64>,
        controlled: Option<u64>,
        use_candidate: bool,
    ) -> Message {
        let (local_ufrag, local_pwd) = agent.local_credentials();
        let username = format!("{local_ufrag}:{PEER_UFRAG}");
        let local_pwd = local_pwd.to_owned();

        let mut setters: Vec<Box<dyn Setter>> = vec![
            Box::new(BINDING_REQUEST),
            Box::new(TransactionId::new()),
            Box::new(TextAttribute::new(ATTR_USERNAME, username)),
            Box::new(PriorityAttr(1_862_270_975)),
        ];
        if let Some(tie_breaker) = controlling {
            setters.push(Box::new(AttrControlling(tie_breaker)));
        }
        if let Some(tie_breaker) = controlled {
            setters.push(Box::new(AttrControlled(tie_breaker)));
        }
        if use_candidate {
            setters.push(Box::new(UseCandidateAttr::new()));
        }
        setters.push(Box::new(MessageIntegrity::new_short_term_integrity(
            &local_pwd,
        )));
        setters.push(Box::new(FINGERPRINT));

        let mut msg = Message::new();
        msg.build(&setters).unwrap();
        msg
    }

    fn check_success_response(request: &Message, mapped: SocketAddr) -> Message {
        let mut response = Message::new();
        response
            .build(&[
                Box::new(BINDING_SUCCESS),
                Box::new(request.clone()),
                Box::new(XorMappedAddress {
                    ip: mapped.ip(),
                    port: mapped.port(),
                }),
                Box::new(MessageIntegrity::new_short_term_integrity(PEER_PWD)),
                Box::new(FINGERPRINT),
            ])
            .unwrap();
        response
    }

    #[test]
    fn test_check_carries_credentials_and_role() {
        let now = Instant::now();
        let (mut agent, remote) = checking_agent(true, now);

        agent.handle_timeout(now);
        let out = transmits(&mut agent);
        assert_eq!(out.len(), 1, "exactly one paced check should go out");
        assert_eq!(out[0].to, remote);

        let mut msg = decode(&out[0]);
        assert_eq!(msg.typ, BINDING_REQUEST);
        assert!(msg.contains(ATTR_ICE_CONTROLLING));
        assert!(!msg.contains(ATTR_USE_CANDIDATE));

        let username = TextAttribute::get_from_as(&msg, ATTR_USERNAME).unwrap();
        let (local_ufrag, _) = agent.local_credentials();
        assert_eq!(username.text, format!("{PEER_UFRAG}:{local_ufrag}"));

        // keyed with the peer's password
        MessageIntegrity::new_short_term_integrity(PEER_PWD)
            .check(&mut msg)
            .unwrap();
    }

    #[test]
    fn test_controlling_agent_nominates_after_success() {
        let now = Instant::now();
        let (mut agent, remote) = checking_agent(true, now);
        let mapped: SocketAddr = "192.168.1.2:4000".parse().unwrap();

        agent.handle_timeout(now);
        let request = decode(&transmits(&mut agent)[0]);
        agent
            .handle_read(remote, &check_success_response(&request, mapped).raw, now)
            .unwrap();

        // the controlling agent follows the first success with a
        // USE-CANDIDATE check on the same pair
        let second = transmits(&mut agent);
        assert_eq!(second.len(), 1);
        let nomination = decode(&second[0]);
        assert!(nomination.contains(ATTR_USE_CANDIDATE));

        agent
            .handle_read(remote, &check_success_response(&nomination, mapped).raw, now)
            .unwrap();

        assert!(agent.selected_pair().is_some());
        assert!(agent.selected_pair().unwrap().nominated);
        assert_eq!(agent.connection_state(), ConnectionState::Completed);
        let evs = events(&mut agent);
        assert!(evs
            .iter()
            .any(|e| matches!(e, AgentEvent::SelectedPair { .. })));
    }

    #[test]
    fn test_controlled_agent_nominates_on_use_candidate() {
        let now = Instant::now();
        let (mut agent, remote) = checking_agent(false, now);
        let mapped: SocketAddr = "192.168.1.2:4000".parse().unwrap();

        // our own check succeeds first
        agent.handle_timeout(now);
        let request = decode(&transmits(&mut agent)[0]);
        agent
            .handle_read(remote, &check_success_response(&request, mapped).raw, now)
            .unwrap();
        assert!(agent.selected_pair().is_none());

        // the peer asks for nomination on the succeeded pair
        let nomination = peer_binding_request(&agent, Some(42), None, true);
        agent.handle_read(remote, &nomination.raw, now).unwrap();

        assert!(agent.selected_pair().is_some());
        assert_eq!(agent.connection_state(), ConnectionState::Completed);
    }

    #[test]
    fn test_inbound_request_answered_and_prflx_learned() {
        let now = Instant::now();
        let (mut agent, _remote) = checking_agent(false, now);
        let _ = events(&mut agent);

        let unknown: SocketAddr = "192.168.1.9:7000".parse().unwrap();
        let request = peer_binding_request(&agent, Some(42), None, false);
        agent.handle_read(unknown, &request.raw, now).unwrap();

        let out = transmits(&mut agent);
        assert_eq!(out.len(), 1);
        let mut response = decode(&out[0]);
        assert_eq!(response.typ, BINDING_SUCCESS);
        assert_eq!(response.transaction_id, request.transaction_id);

        let mut mapped = XorMappedAddress::default();
        mapped.get_from(&response).unwrap();
        assert_eq!(mapped.port, 7000);

        let local_pwd = agent.local_credentials().1.to_owned();
        MessageIntegrity::new_short_term_integrity(&local_pwd)
            .check(&mut response)
            .unwrap();

        // the unknown source became a peer-reflexive candidate with the
        // PRIORITY from the request
        assert!(agent.remote_candidates.iter().any(|c| {
            c.candidate_type == CandidateType::PeerReflexive
                && c.port == 7000
                && c.priority() == 1_862_270_975
        }));
    }

    #[test]
    fn test_role_conflict_request_lower_tiebreaker_rejected() {
        let now = Instant::now();
        let (mut agent, remote) = checking_agent(true, now);
        agent.tie_breaker = 1000;

        let request = peer_binding_request(&agent, Some(999), None, false);
        agent.handle_read(remote, &request.raw, now).unwrap();

        // we keep control and answer 487
        assert!(agent.is_controlling());
        let out = transmits(&mut agent);
        assert_eq!(out.len(), 1);
        let response = decode(&out[0]);
        assert_eq!(response.typ, BINDING_ERROR);
        let mut code = ErrorCodeAttribute::default();
        code.get_from(&response).unwrap();
        assert_eq!(code.code, CODE_ROLE_CONFLICT);
    }

    #[test]
    fn test_role_conflict_request_higher_tiebreaker_switches() {
        let now = Instant::now();
        let (mut agent, remote) = checking_agent(true, now);
        agent.tie_breaker = 1000;

        let request = peer_binding_request(&agent, Some(2000), None, false);
        agent.handle_read(remote, &request.raw, now).unwrap();

        // we yield control and answer normally
        assert!(!agent.is_controlling());
        let out = transmits(&mut agent);
        assert_eq!(out.len(), 1);
        assert_eq!(decode(&out[0]).typ, BINDING_SUCCESS);
    }

    #[test]
    fn test_role_conflict_response_switches_and_retries() {
        let now = Instant::now();
        let (mut agent, remote) = checking_agent(true, now);

        agent.handle_timeout(now);
        let request = decode(&transmits(&mut agent)[0]);

        let mut response = Message::new();
        response
            .build(&[
                Box::new(BINDING_ERROR),
                Box::new(request.clone()),
                Box::new(CODE_ROLE_CONFLICT),
            ])
            .unwrap();
        agent.handle_read(remote, &response.raw, now).unwrap();
        assert!(!agent.is_controlling());

        // the pair went back to Waiting; the retried check is controlled
        agent.handle_timeout(now + Duration::from_millis(60));
        let retry = decode(&transmits(&mut agent)[0]);
        assert!(retry.contains(ATTR_ICE_CONTROLLED));
        assert!(!retry.contains(ATTR_ICE_CONTROLLING));
    }

    #[test]
    fn test_check_retransmits_with_same_transaction() {
        let now = Instant::now();
        let (mut agent, remote) = checking_agent(true, now);

        agent.handle_timeout(now);
        let first = transmits(&mut agent);
        assert_eq!(first.len(), 1);

        agent.handle_timeout(now + Duration::from_millis(stun::DEFAULT_RTO_MS + 10));
        let second = transmits(&mut agent);
        assert!(
            second
                .iter()
                .any(|t| t.to == remote && t.payload == first[0].payload),
            "the check should be retransmitted byte-identically",
        );
    }

    #[test]
    fn test_srflx_gathering() {
        let now = Instant::now();
        let server_addr: SocketAddr = "203.0.113.5:3478".parse().unwrap();
        let config = AgentConfig {
            servers: vec![IceServerAddr {
                url: Url {
                    scheme: SchemeType::Stun,
                    host: "stun.example.org".to_owned(),
                    port: 3478,
                    username: String::new(),
                    password: String::new(),
                },
                addr: server_addr,
            }],
            ..Default::default()
        };
        let mut agent = Agent::new(config);
        agent
            .gather_candidates(&["192.168.1.2:4000".parse().unwrap()], now)
            .unwrap();
        assert_eq!(agent.gathering_state(), GatheringState::Gathering);

        let out = transmits(&mut agent);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, server_addr);
        let request = decode(&out[0]);
        assert_eq!(request.typ, BINDING_REQUEST);

        let mut response = Message::new();
        response
            .build(&[
                Box::new(BINDING_SUCCESS),
                Box::new(request.clone()),
                Box::new(XorMappedAddress {
                    ip: "198.51.100.7".parse().unwrap(),
                    port: 62000,
                }),
            ])
            .unwrap();
        agent.handle_read(server_addr, &response.raw, now).unwrap();

        assert_eq!(agent.gathering_state(), GatheringState::Complete);
        let evs = events(&mut agent);
        assert!(evs.iter().any(|e| matches!(
            e,
            AgentEvent::Candidate(c)
                if c.candidate_type == CandidateType::ServerReflexive && c.port == 62000
        )));
        assert!(evs
            .iter()
            .any(|e| matches!(e, AgentEvent::GatheringStateChange(GatheringState::Complete))));
    }

    #[test]
    fn test_turn_allocate_with_long_term_credentials() {
        let now = Instant::now();
        let server_addr: SocketAddr = "203.0.113.9:3478".parse().unwrap();
        let config = AgentConfig {
            servers: vec![IceServerAddr {
                url: Url {
                    scheme: SchemeType::Turn,
                    host: "turn.example.org".to_owned(),
                    port: 3478,
                    username: "user".to_owned(),
                    password: "pass".to_owned(),
                },
                addr: server_addr,
            }],
            ..Default::default()
        };
        let mut agent = Agent::new(config);
        agent
            .gather_candidates(&["192.168.1.2:4000".parse().unwrap()], now)
            .unwrap();

        // the first Allocate goes out without credentials
        let first = transmits(&mut agent);
        assert_eq!(first.len(), 1);
        let allocate = decode(&first[0]);
        assert_eq!(
            allocate.typ,
            MessageType::new(METHOD_ALLOCATE, CLASS_REQUEST)
        );
        assert!(!allocate.contains(ATTR_MESSAGE_INTEGRITY));

        // 401 carries realm and nonce for the long-term credential round
        let mut unauthorized = Message::new();
        unauthorized
            .build(&[
                Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_ERROR_RESPONSE)),
                Box::new(allocate.clone()),
                Box::new(CODE_UNAUTHORIZED),
                Box::new(TextAttribute::new(ATTR_REALM, "example.org".to_owned())),
                Box::new(TextAttribute::new(ATTR_NONCE, "nonce123".to_owned())),
            ])
            .unwrap();
        agent
            .handle_read(server_addr, &unauthorized.raw, now)
            .unwrap();

        let second = transmits(&mut agent);
        assert_eq!(second.len(), 1);
        let retry = decode(&second[0]);
        assert!(retry.contains(ATTR_USERNAME));
        assert!(retry.contains(ATTR_REALM));
        assert!(retry.contains(ATTR_NONCE));
        assert!(retry.contains(ATTR_MESSAGE_INTEGRITY));

        // success carries the relayed address and the granted lifetime
        let mut success = Message::new();
        success
            .build(&[
                Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_SUCCESS_RESPONSE)),
                Box::new(retry.clone()),
                Box::new(Lifetime(Duration::from_secs(600))),
            ])
            .unwrap();
        XorMappedAddress {
            ip: "203.0.113.9".parse().unwrap(),
            port: 49152,
        }
        .add_to_as(&mut success, ATTR_XOR_RELAYED_ADDRESS)
        .unwrap();
        agent.handle_read(server_addr, &success.raw, now).unwrap();

        assert_eq!(agent.gathering_state(), GatheringState::Complete);
        let evs = events(&mut agent);
        assert!(evs.iter().any(|e| matches!(
            e,
            AgentEvent::Candidate(c)
                if c.candidate_type == CandidateType::Relay && c.port == 49152
        )));

        // the refresh is scheduled deterministically at half lifetime
        assert_eq!(agent.poll_timeout(), Some(now + Duration::from_secs(300)));
    }

    #[test]
    fn test_demultiplexing_by_first_byte() {
        let now = Instant::now();
        let (mut agent, remote) = checking_agent(false, now);
        let _ = events(&mut agent);

        // outside both ranges: dropped
        agent.handle_read(remote, &[0x42, 0x00, 0x01], now).unwrap();
        assert!(events(&mut agent).is_empty());

        // 20..=63 surfaces as an upward payload
        agent.handle_read(remote, &[23, 0x00, 0x01], now).unwrap();
        let evs = events(&mut agent);
        assert_eq!(evs.len(), 1);
        match &evs[0] {
            AgentEvent::PayloadReceived(payload) => assert_eq!(&payload[..], &[23, 0x00, 0x01]),
            other => panic!("expected payload event, got {other:?}"),
        }
    }
}
