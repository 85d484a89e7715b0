#![warn(rust_2018_idioms)]
#![allow(dead_code)]

//! Session-description support for the `application`/`UDP/DTLS/SCTP` profile.

pub mod description;
mod error;

pub use error::{Error, Result};
