use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, trace, warn};
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey as P256PublicKey;
use rand::RngCore;

use crate::alert::*;
use crate::cipher_suite::*;
use crate::config::Config;
use crate::content::ContentType;
use crate::crypto::*;
use crate::error::{Error, Result};
use crate::handshake::*;
use crate::prf::*;
use crate::record_layer::*;

const INITIAL_RETRANSMIT_INTERVAL: Duration = Duration::from_secs(1);
const MAX_RETRANSMIT_INTERVAL: Duration = Duration::from_secs(60);
const COOKIE_LENGTH: usize = 20;

/// DtlsEvent is an upward notification drained with [`DtlsConn::poll_event`].
#[derive(Debug)]
pub enum DtlsEvent {
    /// Handshake finished and the peer certificate matched a remote
    /// fingerprint.
    Connected,
    /// One decrypted application-data record.
    ApplicationData(Bytes),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum HandshakeState {
    // client
    AwaitHelloVerify,
    AwaitServerFlight,
    AwaitServerFinished,
    // server
    AwaitClientHello,
    AwaitClientFlight,
    // both
    Connected,
    Failed,
    Closed,
}

enum FlightItem {
    /// Complete handshake message (header included); epoch 0 until a Ccs
    /// item precedes it.
    Msg(Vec<u8>),
    Ccs,
}

/// DtlsConn is a sans-IO DTLS 1.2 endpoint over the ICE selected pair.
///
/// Drive it with `handle_read` for every inbound datagram and
/// `handle_timeout` when `poll_timeout` expires; drain `poll_transmit` to
/// the socket and `poll_event` upward.
pub struct DtlsConn {
    config: Config,
    is_client: bool,
    state: HandshakeState,

    events: VecDeque<DtlsEvent>,
    transmits: VecDeque<Bytes>,

    // record layer
    local_epoch: u16,
    remote_epoch: u16,
    local_sequence: [u64; 2], // per epoch
    cipher: Option<CipherSuite>,

    // handshake bookkeeping
    transcript: Vec<u8>,
    local_msg_seq: u16,
    expected_remote_msg_seq: u16,
    local_random: HandshakeRandom,
    remote_random: Option<HandshakeRandom>,
    cipher_suite_id: Option<CipherSuiteId>,
    cookie: Vec<u8>,
    ecdh_secret: Option<EphemeralSecret>,
    remote_public_key: Vec<u8>,
    peer_certificate: Vec<u8>,
    master_secret: Vec<u8>,
    client_cert_requested: bool,

    // retransmission
    last_flight: Vec<FlightItem>,
    retransmit_deadline: Option<Instant>,
    retransmit_interval: Duration,
    retransmits: u32,
    resent_this_read: bool,
}

impl DtlsConn {
    pub fn new(config: Config, is_client: bool, now: Instant) -> Result<Self> {
        let mut conn = DtlsConn {
            config,
            is_client,
            state: if is_client {
                HandshakeState::AwaitHelloVerify
            } else {
                HandshakeState::AwaitClientHello
            },
            events: VecDeque::new(),
            transmits: VecDeque::new(),
            local_epoch: 0,
            remote_epoch: 0,
            local_sequence: [0, 0],
            cipher: None,
            transcript: vec![],
            local_msg_seq: 0,
            expected_remote_msg_seq: 0,
            local_random: HandshakeRandom::generate(),
            remote_random: None,
            cipher_suite_id: None,
            cookie: vec![],
            ecdh_secret: None,
            remote_public_key: vec![],
            peer_certificate: vec![],
            master_secret: vec![],
            client_cert_requested: false,
            last_flight: vec![],
            retransmit_deadline: None,
            retransmit_interval: INITIAL_RETRANSMIT_INTERVAL,
            retransmits: 0,
            resent_this_read: false,
        };

        if is_client {
            conn.send_client_hello(now, false)?;
        } else {
            let mut cookie = vec![0u8; COOKIE_LENGTH];
            rand::thread_rng().fill_bytes(&mut cookie);
            conn.cookie = cookie;
        }
        Ok(conn)
    }

    pub fn is_connected(&self) -> bool {
        self.state == HandshakeState::Connected
    }

    /// The peer's leaf certificate in DER, empty before the handshake
    /// completed.
    pub fn peer_certificate(&self) -> &[u8] {
        &self.peer_certificate
    }

    pub fn poll_transmit(&mut self) -> Option<Bytes> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<DtlsEvent> {
        self.events.pop_front()
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        self.retransmit_deadline
    }

    /// write encrypts one application datagram. Only valid once connected.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.state != HandshakeState::Connected {
            return Err(Error::ErrNotConnected);
        }
        let record = self.protect_record(ContentType::ApplicationData, data)?;
        self.transmits.push_back(record);
        Ok(())
    }

    /// close emits a close_notify and stops the machine. Idempotent.
    pub fn close(&mut self) {
        if self.state == HandshakeState::Closed {
            return;
        }
        let alert = Alert {
            alert_level: AlertLevel::Warning,
            alert_description: AlertDescription::CloseNotify,
        };
        let payload = alert.marshal();
        if let Ok(record) = self.plain_or_protected_record(ContentType::Alert, &payload) {
            self.transmits.push_back(record);
        }
        self.state = HandshakeState::Closed;
        self.retransmit_deadline = None;
    }

    pub fn handle_timeout(&mut self, now: Instant) -> Result<()> {
        let Some(deadline) = self.retransmit_deadline else {
            return Ok(());
        };
        if deadline > now {
            return Ok(());
        }
        if self.retransmits >= self.config.retransmit_budget {
            self.state = HandshakeState::Failed;
            self.retransmit_deadline = None;
            return Err(Error::ErrHandshakeTimeout);
        }
        self.retransmits += 1;
        self.retransmit_interval = (self.retransmit_interval * 2).min(MAX_RETRANSMIT_INTERVAL);
        self.retransmit_deadline = Some(now + self.retransmit_interval);
        debug!(
            "retransmitting flight (attempt {} interval {:?})",
            self.retransmits, self.retransmit_interval
        );
        self.transmit_last_flight()?;
        Ok(())
    }

    /// handle_read feeds one inbound datagram, which may hold several
    /// records.
    pub fn handle_read(&mut self, datagram: &[u8], now: Instant) -> Result<()> {
        if self.state == HandshakeState::Closed || self.state == HandshakeState::Failed {
            return Ok(());
        }
        self.resent_this_read = false;

        let mut offset = 0;
        while offset + RECORD_LAYER_HEADER_SIZE <= datagram.len() {
            let header = match RecordLayerHeader::unmarshal(&datagram[offset..]) {
                Ok(h) => h,
                Err(err) => {
                    warn!("undecodable record header: {err}");
                    return Ok(());
                }
            };
            let content_start = offset + RECORD_LAYER_HEADER_SIZE;
            let content_end = content_start + header.content_len as usize;
            if content_end > datagram.len() {
                warn!("record length exceeds datagram");
                return Ok(());
            }
            let content = &datagram[content_start..content_end];
            offset = content_end;

            let plaintext: Vec<u8> = if header.epoch > 0 {
                if self.remote_epoch == 0 {
                    // peer is already encrypting but our keys are not ready;
                    // it will retransmit
                    trace!("dropping early epoch-1 record");
                    continue;
                }
                let Some(cipher) = &self.cipher else {
                    continue;
                };
                match cipher.decrypt(&header, content) {
                    Ok(p) => p,
                    Err(err) => {
                        warn!("record failed decryption: {err}");
                        continue;
                    }
                }
            } else {
                content.to_vec()
            };

            self.handle_record(header.content_type, &plaintext, now)?;
        }
        Ok(())
    }

    fn handle_record(&mut self, typ: ContentType, content: &[u8], now: Instant) -> Result<()> {
        match typ {
            ContentType::Handshake => self.handle_handshake_records(content, now),
            ContentType::ChangeCipherSpec => {
                self.remote_epoch = 1;
                Ok(())
            }
            ContentType::Alert => {
                let alert = Alert::unmarshal(content)?;
                debug!("received alert {alert}");
                if alert.alert_description == AlertDescription::CloseNotify {
                    self.state = HandshakeState::Closed;
                    self.retransmit_deadline = None;
                    Ok(())
                } else if alert.alert_level == AlertLevel::Fatal {
                    self.state = HandshakeState::Failed;
                    self.retransmit_deadline = None;
                    Err(Error::ErrAlertFatal(alert.to_string()))
                } else {
                    Ok(())
                }
            }
            ContentType::ApplicationData => {
                if self.state == HandshakeState::Connected {
                    self.events.push_back(DtlsEvent::ApplicationData(
                        Bytes::copy_from_slice(content),
                    ));
                }
                Ok(())
            }
            ContentType::Invalid => Ok(()),
        }
    }

    fn handle_handshake_records(&mut self, content: &[u8], now: Instant) -> Result<()> {
        let mut offset = 0;
        while offset + HANDSHAKE_HEADER_SIZE <= content.len() {
            let header = HandshakeHeader::unmarshal(&content[offset..])?;
            if header.fragment_offset != 0 || header.fragment_length != header.length {
                return Err(Error::ErrHandshakeFragment);
            }
            let body_start = offset + HANDSHAKE_HEADER_SIZE;
            let body_end = body_start + header.length as usize;
            if body_end > content.len() {
                return Err(Error::ErrBufferTooSmall);
            }
            let raw = &content[offset..body_end];
            let body = &content[body_start..body_end];
            offset = body_end;

            if header.message_sequence < self.expected_remote_msg_seq {
                // a retransmitted flight means our answer was lost
                if !self.is_client
                    && header.handshake_type == HandshakeType::ClientHello
                    && self.state == HandshakeState::AwaitClientHello
                {
                    // lost HelloVerifyRequest; it carries no timer of its own
                    self.send_hello_verify_request()?;
                } else if !self.resent_this_read && !self.last_flight.is_empty() {
                    trace!("duplicate flight received, resending ours");
                    self.resent_this_read = true;
                    self.transmit_last_flight()?;
                }
                continue;
            }
            if header.message_sequence > self.expected_remote_msg_seq {
                trace!(
                    "out-of-order handshake message seq {} (expected {})",
                    header.message_sequence,
                    self.expected_remote_msg_seq
                );
                continue;
            }

            let msg = HandshakeMessage::unmarshal(header.handshake_type, body)?;
            self.expected_remote_msg_seq += 1;
            self.handle_handshake_message(msg, raw, now)?;
        }
        Ok(())
    }

    fn handle_handshake_message(
        &mut self,
        msg: HandshakeMessage,
        raw: &[u8],
        now: Instant,
    ) -> Result<()> {
        trace!("handshake message {}", msg.handshake_type());
        match (self.is_client, msg) {
            (true, HandshakeMessage::HelloVerifyRequest(hvr)) => {
                // the initial ClientHello and HelloVerifyRequest are not part
                // of the transcript
                self.cookie = hvr.cookie;
                self.send_client_hello(now, true)?;
                self.state = HandshakeState::AwaitServerFlight;
            }
            (true, HandshakeMessage::ServerHello(sh)) => {
                self.remote_random = Some(sh.random.clone());
                self.cipher_suite_id = Some(sh.cipher_suite);
                self.transcript.extend_from_slice(raw);
            }
            (true, HandshakeMessage::Certificate(cert)) => {
                let leaf = cert
                    .certificate
                    .first()
                    .ok_or(Error::ErrNoCertificate)?
                    .clone();
                self.peer_certificate = leaf;
                self.transcript.extend_from_slice(raw);
            }
            (true, HandshakeMessage::ServerKeyExchange(ske)) => {
                if ske.named_curve != NAMED_CURVE_P256 {
                    return Err(Error::ErrInvalidNamedCurve);
                }
                let remote_random = self
                    .remote_random
                    .as_ref()
                    .ok_or(Error::ErrHandshakeOutOfOrder)?;
                verify_key_signature(
                    &self.local_random.marshal(),
                    &remote_random.marshal(),
                    &ske.params_bytes(),
                    &ske.algorithm,
                    &ske.signature,
                    &self.peer_certificate,
                )?;
                self.remote_public_key = ske.public_key;
                self.transcript.extend_from_slice(raw);
            }
            (true, HandshakeMessage::CertificateRequest(_)) => {
                self.client_cert_requested = true;
                self.transcript.extend_from_slice(raw);
            }
            (true, HandshakeMessage::ServerHelloDone) => {
                self.transcript.extend_from_slice(raw);
                self.send_client_flight(now)?;
                self.state = HandshakeState::AwaitServerFinished;
            }
            (true, HandshakeMessage::Finished(finished)) => {
                let expected = prf_verify_data_server(&self.master_secret, &self.transcript)?;
                if finished.verify_data != expected {
                    self.state = HandshakeState::Failed;
                    return Err(Error::ErrVerifyDataMismatch);
                }
                self.transcript.extend_from_slice(raw);
                self.verify_remote_fingerprint()?;
                self.retransmit_deadline = None;
                self.state = HandshakeState::Connected;
                self.events.push_back(DtlsEvent::Connected);
            }
            (false, HandshakeMessage::ClientHello(ch)) => {
                if ch.cookie != self.cookie {
                    // stateless round: answer with our cookie, stay put
                    self.expected_remote_msg_seq = 1;
                    self.send_hello_verify_request()?;
                    return Ok(());
                }
                self.remote_random = Some(ch.random.clone());
                let our_type = self.config.certificate.private_key.signature_hash_algorithm();
                let selected = ch
                    .cipher_suites
                    .iter()
                    .find(|s| s.certificate_type() == our_type.signature)
                    .copied()
                    .ok_or(Error::ErrCipherSuiteNoIntersection)?;
                self.cipher_suite_id = Some(selected);
                self.transcript.extend_from_slice(raw);
                self.send_server_flight(now)?;
                self.state = HandshakeState::AwaitClientFlight;
            }
            (false, HandshakeMessage::Certificate(cert)) => {
                let leaf = cert
                    .certificate
                    .first()
                    .ok_or(Error::ErrNoCertificate)?
                    .clone();
                self.peer_certificate = leaf;
                self.transcript.extend_from_slice(raw);
            }
            (false, HandshakeMessage::ClientKeyExchange(cke)) => {
                self.remote_public_key = cke.public_key;
                self.transcript.extend_from_slice(raw);
                self.derive_keys()?;
            }
            (false, HandshakeMessage::CertificateVerify(cv)) => {
                verify_certificate_verify(
                    &self.transcript,
                    &cv.algorithm,
                    &cv.signature,
                    &self.peer_certificate,
                )?;
                self.transcript.extend_from_slice(raw);
            }
            (false, HandshakeMessage::Finished(finished)) => {
                let expected = prf_verify_data_client(&self.master_secret, &self.transcript)?;
                if finished.verify_data != expected {
                    self.state = HandshakeState::Failed;
                    return Err(Error::ErrVerifyDataMismatch);
                }
                self.transcript.extend_from_slice(raw);
                self.verify_remote_fingerprint()?;
                self.send_server_finished()?;
                self.state = HandshakeState::Connected;
                self.events.push_back(DtlsEvent::Connected);
            }
            (_, other) => {
                debug!(
                    "ignoring unexpected handshake message {}",
                    other.handshake_type()
                );
            }
        }
        Ok(())
    }

    fn send_client_hello(&mut self, now: Instant, in_transcript: bool) -> Result<()> {
        let hello = default_client_hello(
            self.cookie.clone(),
            self.local_random.clone(),
            default_cipher_suites(),
        );
        let msg = HandshakeMessage::ClientHello(hello);
        let raw = msg.marshal(self.local_msg_seq);
        self.local_msg_seq += 1;
        if in_transcript {
            self.transcript.extend_from_slice(raw.as_slice());
        }
        self.send_flight(vec![FlightItem::Msg(raw)], now)
    }

    fn send_hello_verify_request(&mut self) -> Result<()> {
        let hvr = HandshakeMessage::HelloVerifyRequest(HandshakeMessageHelloVerifyRequest {
            version: PROTOCOL_VERSION1_2,
            cookie: self.cookie.clone(),
        });
        // message_seq 0, outside the retransmission machinery: a lost
        // HelloVerifyRequest is recovered by the client's ClientHello timer
        let raw = hvr.marshal(0);
        self.local_msg_seq = 1;
        let record = self.plain_record(ContentType::Handshake, &raw)?;
        self.transmits.push_back(record);
        Ok(())
    }

    fn send_server_flight(&mut self, now: Instant) -> Result<()> {
        let suite = self.cipher_suite_id.ok_or(Error::ErrInvalidCipherSuite)?;
        let mut items = vec![];

        let server_hello = HandshakeMessage::ServerHello(HandshakeMessageServerHello {
            version: PROTOCOL_VERSION1_2,
            random: self.local_random.clone(),
            cipher_suite: suite,
            extensions: server_extensions(),
        });
        self.append_flight_msg(&mut items, server_hello);

        let certificate = HandshakeMessage::Certificate(HandshakeMessageCertificate {
            certificate: self.config.certificate.certificate.clone(),
        });
        self.append_flight_msg(&mut items, certificate);

        // fresh ECDHE key, signed with the certificate key
        let secret = EphemeralSecret::random(&mut rand::rngs::OsRng);
        let public_key = secret
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        self.ecdh_secret = Some(secret);

        let remote_random = self
            .remote_random
            .as_ref()
            .ok_or(Error::ErrHandshakeOutOfOrder)?;
        let mut ske = HandshakeMessageServerKeyExchange {
            named_curve: NAMED_CURVE_P256,
            public_key,
            algorithm: self.config.certificate.private_key.signature_hash_algorithm(),
            signature: vec![],
        };
        ske.signature = generate_key_signature(
            &remote_random.marshal(),
            &self.local_random.marshal(),
            &ske.params_bytes(),
            &self.config.certificate.private_key,
        )?;
        self.append_flight_msg(&mut items, HandshakeMessage::ServerKeyExchange(ske));

        self.append_flight_msg(
            &mut items,
            HandshakeMessage::CertificateRequest(HandshakeMessageCertificateRequest::default()),
        );
        self.append_flight_msg(&mut items, HandshakeMessage::ServerHelloDone);

        self.send_flight(items, now)
    }

    fn send_client_flight(&mut self, now: Instant) -> Result<()> {
        let mut items = vec![];

        if self.client_cert_requested {
            let certificate = HandshakeMessage::Certificate(HandshakeMessageCertificate {
                certificate: self.config.certificate.certificate.clone(),
            });
            self.append_flight_msg(&mut items, certificate);
        }

        let secret = EphemeralSecret::random(&mut rand::rngs::OsRng);
        let public_key = secret
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        self.ecdh_secret = Some(secret);
        self.append_flight_msg(
            &mut items,
            HandshakeMessage::ClientKeyExchange(HandshakeMessageClientKeyExchange { public_key }),
        );

        self.derive_keys()?;

        if self.client_cert_requested {
            let algorithm = self.config.certificate.private_key.signature_hash_algorithm();
            let signature = self.config.certificate.private_key.sign(&self.transcript)?;
            self.append_flight_msg(
                &mut items,
                HandshakeMessage::CertificateVerify(HandshakeMessageCertificateVerify {
                    algorithm,
                    signature,
                }),
            );
        }

        items.push(FlightItem::Ccs);

        let verify_data = prf_verify_data_client(&self.master_secret, &self.transcript)?;
        self.append_flight_msg(
            &mut items,
            HandshakeMessage::Finished(HandshakeMessageFinished { verify_data }),
        );

        self.send_flight(items, now)
    }

    fn send_server_finished(&mut self) -> Result<()> {
        let mut items = vec![FlightItem::Ccs];
        let verify_data = prf_verify_data_server(&self.master_secret, &self.transcript)?;
        self.append_flight_msg(
            &mut items,
            HandshakeMessage::Finished(HandshakeMessageFinished { verify_data }),
        );

        // the final flight has no response to time out on; a lost flight is
        // resent when the client retransmits its own
        let records = self.marshal_flight_items(&items)?;
        self.last_flight = items;
        for record in records {
            self.transmits.push_back(record);
        }
        self.retransmit_deadline = None;
        Ok(())
    }

    /// append_flight_msg marshals a handshake message, adds it to the
    /// transcript, and queues it as a flight item.
    fn append_flight_msg(&mut self, items: &mut Vec<FlightItem>, msg: HandshakeMessage) {
        let raw = msg.marshal(self.local_msg_seq);
        self.local_msg_seq += 1;
        self.transcript.extend_from_slice(&raw);
        items.push(FlightItem::Msg(raw));
    }

    fn derive_keys(&mut self) -> Result<()> {
        let secret = self.ecdh_secret.as_ref().ok_or(Error::ErrHandshakeOutOfOrder)?;
        let peer = P256PublicKey::from_sec1_bytes(&self.remote_public_key)
            .map_err(|_| Error::ErrInvalidEllipticCurvePoint)?;
        let shared = secret.diffie_hellman(&peer);
        let pre_master_secret = shared.raw_secret_bytes().to_vec();

        let remote_random = self
            .remote_random
            .as_ref()
            .ok_or(Error::ErrHandshakeOutOfOrder)?
            .marshal();
        let local_random = self.local_random.marshal();

        let (client_random, server_random) = if self.is_client {
            (local_random, remote_random)
        } else {
            (remote_random, local_random)
        };

        self.master_secret =
            prf_master_secret(&pre_master_secret, &client_random, &server_random)?;
        let keys = prf_encryption_keys(
            &self.master_secret,
            &client_random,
            &server_random,
            PRF_KEY_LEN,
            PRF_IV_LEN,
        )?;
        self.cipher = Some(CipherSuite::new(&keys, self.is_client));
        Ok(())
    }

    fn verify_remote_fingerprint(&mut self) -> Result<()> {
        if self.peer_certificate.is_empty() {
            self.state = HandshakeState::Failed;
            return Err(Error::ErrNoCertificate);
        }
        for fingerprint in &self.config.remote_fingerprints {
            if let Ok(value) =
                fingerprint_certificate(&fingerprint.algorithm, &self.peer_certificate)
            {
                if value.eq_ignore_ascii_case(&fingerprint.value) {
                    return Ok(());
                }
            }
        }
        self.state = HandshakeState::Failed;
        Err(Error::ErrFingerprintMismatch)
    }

    fn send_flight(&mut self, items: Vec<FlightItem>, now: Instant) -> Result<()> {
        let records = self.marshal_flight_items(&items)?;
        self.last_flight = items;
        for record in records {
            self.transmits.push_back(record);
        }
        self.retransmits = 0;
        self.retransmit_interval = INITIAL_RETRANSMIT_INTERVAL;
        self.retransmit_deadline = Some(now + self.retransmit_interval);
        Ok(())
    }

    fn transmit_last_flight(&mut self) -> Result<()> {
        let items = std::mem::take(&mut self.last_flight);
        let records = self.marshal_flight_items(&items)?;
        self.last_flight = items;
        for record in records {
            self.transmits.push_back(record);
        }
        Ok(())
    }

    /// marshal_flight_items wraps flight items in records with fresh
    /// sequence numbers and bundles them into datagrams of at most mtu
    /// bytes.
    fn marshal_flight_items(&mut self, items: &[FlightItem]) -> Result<Vec<Bytes>> {
        let mut datagrams: Vec<Bytes> = vec![];
        let mut current = BytesMut::new();
        let mut epoch1 = false;

        for item in items {
            let record = match item {
                FlightItem::Ccs => {
                    let record = self.plain_record(ContentType::ChangeCipherSpec, &[1])?;
                    epoch1 = true;
                    record
                }
                FlightItem::Msg(raw) => {
                    if epoch1 {
                        self.protect_record(ContentType::Handshake, raw)?
                    } else {
                        self.plain_record(ContentType::Handshake, raw)?
                    }
                }
            };
            if !current.is_empty() && current.len() + record.len() > self.config.mtu {
                datagrams.push(current.split().freeze());
            }
            current.put_slice(&record);
        }
        if !current.is_empty() {
            datagrams.push(current.freeze());
        }
        Ok(datagrams)
    }

    fn plain_record(&mut self, typ: ContentType, payload: &[u8]) -> Result<Bytes> {
        let header = RecordLayerHeader {
            content_type: typ,
            protocol_version: PROTOCOL_VERSION1_2,
            epoch: 0,
            sequence_number: self.local_sequence[0],
            content_len: payload.len() as u16,
        };
        self.local_sequence[0] += 1;

        let mut out = BytesMut::with_capacity(RECORD_LAYER_HEADER_SIZE + payload.len());
        header.marshal_to(&mut out)?;
        out.put_slice(payload);
        Ok(out.freeze())
    }

    fn protect_record(&mut self, typ: ContentType, payload: &[u8]) -> Result<Bytes> {
        let cipher = self.cipher.as_ref().ok_or(Error::ErrNotConnected)?;
        let mut header = RecordLayerHeader {
            content_type: typ,
            protocol_version: PROTOCOL_VERSION1_2,
            epoch: 1,
            sequence_number: self.local_sequence[1],
            content_len: 0,
        };
        self.local_sequence[1] += 1;

        let sealed = cipher.encrypt(&header, payload)?;
        header.content_len = sealed.len() as u16;

        let mut out = BytesMut::with_capacity(RECORD_LAYER_HEADER_SIZE + sealed.len());
        header.marshal_to(&mut out)?;
        out.put_slice(&sealed);
        Ok(out.freeze())
    }

    fn plain_or_protected_record(&mut self, typ: ContentType, payload: &[u8]) -> Result<Bytes> {
        if self.cipher.is_some() && self.state == HandshakeState::Connected {
            self.protect_record(typ, payload)
        } else {
            self.plain_record(typ, payload)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Fingerprint;

    fn pump(client: &mut DtlsConn, server: &mut DtlsConn, now: Instant) -> Result<()> {
        // shuttle datagrams until both sides go quiet
        for _ in 0..32 {
            let mut progressed = false;
            while let Some(datagram) = client.poll_transmit() {
                progressed = true;
                server.handle_read(&datagram, now)?;
            }
            while let Some(datagram) = server.poll_transmit() {
                progressed = true;
                client.handle_read(&datagram, now)?;
            }
            if !progressed {
                break;
            }
        }
        Ok(())
    }

    fn pair() -> Result<(DtlsConn, DtlsConn)> {
        let client_cert = Certificate::generate_self_signed(vec!["client".to_owned()])?;
        let server_cert = Certificate::generate_self_signed(vec!["server".to_owned()])?;

        let client_fp = Fingerprint {
            algorithm: "sha-256".to_owned(),
            value: fingerprint_certificate("sha-256", &client_cert.certificate[0])?,
        };
        let server_fp = Fingerprint {
            algorithm: "sha-256".to_owned(),
            value: fingerprint_certificate("sha-256", &server_cert.certificate[0])?,
        };

        let now = Instant::now();
        let client = DtlsConn::new(Config::new(client_cert, vec![server_fp]), true, now)?;
        let server = DtlsConn::new(Config::new(server_cert, vec![client_fp]), false, now)?;
        Ok((client, server))
    }

    #[test]
    fn test_handshake_loopback() -> Result<()> {
        let (mut client, mut server) = pair()?;
        let now = Instant::now();
        pump(&mut client, &mut server, now)?;

        assert!(client.is_connected(), "client should finish the handshake");
        assert!(server.is_connected(), "server should finish the handshake");

        assert!(matches!(
            client.poll_event(),
            Some(DtlsEvent::Connected)
        ));
        assert!(matches!(
            server.poll_event(),
            Some(DtlsEvent::Connected)
        ));
        Ok(())
    }

    #[test]
    fn test_application_data_both_directions() -> Result<()> {
        let (mut client, mut server) = pair()?;
        let now = Instant::now();
        pump(&mut client, &mut server, now)?;
        while client.poll_event().is_some() {}
        while server.poll_event().is_some() {}

        client.write(b"ping")?;
        pump(&mut client, &mut server, now)?;
        match server.poll_event() {
            Some(DtlsEvent::ApplicationData(data)) => assert_eq!(&data[..], b"ping"),
            other => panic!("expected application data, got {other:?}"),
        }

        server.write(b"pong")?;
        pump(&mut client, &mut server, now)?;
        match client.poll_event() {
            Some(DtlsEvent::ApplicationData(data)) => assert_eq!(&data[..], b"pong"),
            other => panic!("expected application data, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_fingerprint_mismatch_fails_handshake() -> Result<()> {
        let client_cert = Certificate::generate_self_signed(vec!["client".to_owned()])?;
        let server_cert = Certificate::generate_self_signed(vec!["server".to_owned()])?;

        let client_fp = Fingerprint {
            algorithm: "sha-256".to_owned(),
            value: fingerprint_certificate("sha-256", &client_cert.certificate[0])?,
        };
        // client is told to expect a digest the server cannot produce
        let bogus_fp = Fingerprint {
            algorithm: "sha-256".to_owned(),
            value: "00:".repeat(31) + "00",
        };

        let now = Instant::now();
        let mut client = DtlsConn::new(Config::new(client_cert, vec![bogus_fp]), true, now)?;
        let mut server = DtlsConn::new(Config::new(server_cert, vec![client_fp]), false, now)?;

        let result = pump(&mut client, &mut server, now);
        assert_eq!(result, Err(Error::ErrFingerprintMismatch));
        assert!(!client.is_connected());
        Ok(())
    }

    #[test]
    fn test_write_before_connected_fails() -> Result<()> {
        let (mut client, _server) = pair()?;
        assert_eq!(client.write(b"early"), Err(Error::ErrNotConnected));
        Ok(())
    }

    #[test]
    fn test_retransmit_budget_exhaustion() -> Result<()> {
        let (mut client, _server) = pair()?;
        let mut now = Instant::now();

        // never deliver anything; drive timers past the budget
        for _ in 0..DEFAULT_BUDGET_PLUS_ONE {
            let Some(deadline) = client.poll_timeout() else {
                break;
            };
            now = deadline;
            match client.handle_timeout(now) {
                Ok(()) => {}
                Err(Error::ErrHandshakeTimeout) => return Ok(()),
                Err(other) => return Err(other),
            }
        }
        panic!("handshake should have timed out");
    }

    const DEFAULT_BUDGET_PLUS_ONE: u32 = 16;
}
