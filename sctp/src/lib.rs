#![warn(rust_2018_idioms)]
#![allow(dead_code)]

//! A reduced SCTP association for the unreliable data-channel profile:
//! RFC 4960 packet and chunk formats, the four-way cookie handshake, and
//! immediate unordered delivery — with retransmission queues, SACK
//! emission, congestion control, and fragmentation deliberately absent.

pub mod association;
pub mod chunk;
mod error;
pub mod error_cause;
pub(crate) mod packet;
pub mod param;
pub(crate) mod util;

pub use association::{
    Association, AssociationEvent, AssociationState, Config, DEFAULT_MAX_MESSAGE_SIZE,
    DEFAULT_SCTP_PORT,
};
pub use chunk::chunk_payload_data::PayloadProtocolIdentifier;
pub use error::{Error, Result};
