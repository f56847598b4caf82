//! Core domain + application logic for the paircast multi-session bot host.
//!
//! This crate is intentionally framework-agnostic. The messaging transport and
//! the HTTP surface live behind ports (traits) implemented in adapter crates.

pub mod commands;
pub mod config;
pub mod counter;
pub mod creds;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod pairing;
pub mod session;
pub mod stats;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use errors::{Error, Result};
