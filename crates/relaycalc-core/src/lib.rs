//! # `relaycalc-core`: shared protocol for the relaycalc tiers
//!
//! relaycalc relays computation requests from a caller, through an
//! authenticating gateway, to a compute node that runs the operation on a
//! bounded worker pool. Every hop speaks the same protocol: one JSON object
//! per `\n`-terminated line, one request and one response per TCP
//! connection.
//!
//! This crate holds everything the tiers have to agree on:
//!
//! - [`message`] - field names, request ids, typed requests and responses.
//! - [`codec`] - the line-delimited JSON framing ([`codec::JsonLines`]).
//! - [`compute`] - the pure functions the compute node evaluates.
//! - [`Error`] - the error taxonomy shared by every tier.

mod common;
pub use common::*;
// Public re-export so downstream crates share the same ULID implementation.
pub use ferroid;
