#![warn(rust_2018_idioms)]
#![allow(dead_code)]

//! DTLS 1.2 for the data-channel profile: record layer, handshake flights
//! with exponential retransmission, ECDHE-P256 with AES-128-GCM, and SDP
//! fingerprint verification of the peer certificate. Sans-IO; the caller
//! moves datagrams between this crate and the ICE selected pair.

pub mod alert;
pub mod cipher_suite;
pub mod config;
pub mod conn;
pub mod content;
pub mod crypto;
mod error;
pub mod handshake;
pub mod prf;
pub mod record_layer;
pub mod signature_hash_algorithm;

pub use config::{Config, Fingerprint};
pub use conn::{DtlsConn, DtlsEvent};
pub use error::{Error, Result};
