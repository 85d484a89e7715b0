pub mod data_channel_init;
pub mod data_channel_state;

use std::fmt;
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::peer_connection::PeerConnectionInternal;
use data_channel_state::RTCDataChannelState;

/// A stream id that has not been negotiated yet.
pub(crate) const UNASSIGNED_STREAM_ID: u16 = u16::MAX;

/// DataChannelMessage represents a message received from the data channel.
/// Payloads are opaque byte buffers in this profile.
#[derive(Debug, Clone)]
pub struct DataChannelMessage {
    pub data: Bytes,
}

pub type OnMessageHdlrFn = Box<dyn FnMut(DataChannelMessage) + Send>;
pub type OnOpenHdlrFn = Box<dyn FnMut() + Send>;
pub type OnCloseHdlrFn = Box<dyn FnMut() + Send>;

/// DataChannel represents a WebRTC DataChannel: a bidirectional channel of
/// unordered, unreliable datagrams identified by a label.
pub struct RTCDataChannel {
    label: String,
    protocol: String,
    ordered: bool,

    stream_id: AtomicU16,
    ready_state: AtomicU8,

    pc_internal: Weak<Mutex<PeerConnectionInternal>>,
    notify: Arc<Notify>,

    pub(crate) on_message_handler: Mutex<Option<OnMessageHdlrFn>>,
    pub(crate) on_open_handler: Mutex<Option<OnOpenHdlrFn>>,
    pub(crate) on_close_handler: Mutex<Option<OnCloseHdlrFn>>,
}

impl fmt::Debug for RTCDataChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RTCDataChannel")
            .field("label", &self.label)
            .field("stream_id", &self.stream_id.load(Ordering::SeqCst))
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

impl RTCDataChannel {
    pub(crate) fn new(
        label: String,
        protocol: String,
        ordered: bool,
        stream_id: Option<u16>,
        pc_internal: Weak<Mutex<PeerConnectionInternal>>,
        notify: Arc<Notify>,
    ) -> Self {
        RTCDataChannel {
            label,
            protocol,
            ordered,
            stream_id: AtomicU16::new(stream_id.unwrap_or(UNASSIGNED_STREAM_ID)),
            ready_state: AtomicU8::new(RTCDataChannelState::Connecting as u8),
            pc_internal,
            notify,
            on_message_handler: Mutex::new(None),
            on_open_handler: Mutex::new(None),
            on_close_handler: Mutex::new(None),
        }
    }

    /// label represents a label that can be used to distinguish this
    /// DataChannel object from other DataChannel objects.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// protocol represents the name of the sub-protocol used with this
    /// DataChannel.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// ordered returns true if the DataChannel was negotiated as ordered.
    /// Delivery remains effectively unordered in this profile.
    pub fn ordered(&self) -> bool {
        self.ordered
    }

    /// id returns the SCTP stream id of this channel, once negotiated.
    pub fn id(&self) -> Option<u16> {
        match self.stream_id.load(Ordering::SeqCst) {
            UNASSIGNED_STREAM_ID => None,
            id => Some(id),
        }
    }

    /// ready_state represents the state of the DataChannel object.
    pub fn ready_state(&self) -> RTCDataChannelState {
        RTCDataChannelState::from(self.ready_state.load(Ordering::SeqCst))
    }

    /// on_message sets an event handler which is invoked on a binary
    /// message arrival over the sctp transport from a remote peer.
    pub fn on_message(&self, f: OnMessageHdlrFn) {
        let mut handler = self.on_message_handler.lock().unwrap();
        *handler = Some(f);
    }

    /// on_open sets an event handler which is invoked when the underlying
    /// data transport has been established (or re-established).
    pub fn on_open(&self, f: OnOpenHdlrFn) {
        let mut handler = self.on_open_handler.lock().unwrap();
        *handler = Some(f);
    }

    /// on_close sets an event handler which is invoked when the underlying
    /// data transport has been closed.
    pub fn on_close(&self, f: OnCloseHdlrFn) {
        let mut handler = self.on_close_handler.lock().unwrap();
        *handler = Some(f);
    }

    /// send queues one message. The payload must fit a single DATA chunk
    /// (1200 bytes); larger payloads fail synchronously with
    /// [`Error::ErrPayloadTooLarge`] and nothing is transmitted.
    pub fn send(&self, data: &Bytes) -> Result<()> {
        if self.ready_state() != RTCDataChannelState::Open {
            return Err(Error::ErrDataChannelNotOpen);
        }
        let stream_id = self.stream_id.load(Ordering::SeqCst);
        if stream_id == UNASSIGNED_STREAM_ID {
            return Err(Error::ErrDataChannelNotOpen);
        }
        let pc = self
            .pc_internal
            .upgrade()
            .ok_or(Error::ErrConnectionClosed)?;
        {
            let mut internal = pc.lock().unwrap();
            internal.send_user_data(stream_id, data.clone(), !self.ordered)?;
        }
        self.notify.notify_one();
        Ok(())
    }

    /// close initiates shutdown of this channel by resetting its outbound
    /// stream.
    pub fn close(&self) -> Result<()> {
        if self.ready_state() == RTCDataChannelState::Closed {
            return Ok(());
        }
        self.set_ready_state(RTCDataChannelState::Closing);
        if let Some(stream_id) = self.id() {
            if let Some(pc) = self.pc_internal.upgrade() {
                let mut internal = pc.lock().unwrap();
                internal.reset_channel_stream(stream_id)?;
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    pub(crate) fn set_stream_id(&self, stream_id: u16) {
        self.stream_id.store(stream_id, Ordering::SeqCst);
    }

    pub(crate) fn set_ready_state(&self, state: RTCDataChannelState) {
        self.ready_state.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn clear_handlers(&self) {
        *self.on_message_handler.lock().unwrap() = None;
        *self.on_open_handler.lock().unwrap() = None;
        *self.on_close_handler.lock().unwrap() = None;
    }
}
