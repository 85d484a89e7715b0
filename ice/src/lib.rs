#![warn(rust_2018_idioms)]
#![allow(dead_code)]

//! Sans-IO ICE agent: candidate gathering (host, server-reflexive, relayed),
//! paced connectivity checks, nomination, and first-byte demultiplexing of
//! the single shared UDP socket. The caller owns the socket and drives the
//! agent with `handle_read` / `handle_timeout`, draining `poll_transmit` and
//! `poll_event`.

pub mod agent;
pub mod candidate;
pub mod control;
mod error;
pub mod rand;
pub mod state;
pub mod url;

pub use error::{Error, Result};
