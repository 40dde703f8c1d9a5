//! # `relaycalc-server`: gateway, compute node, and caller
//!
//! Three standalone binaries share this library:
//!
//! - `relaycalc-gateway` accepts caller connections, checks the shared
//!   secret, stamps a request id, relays the request to the compute node,
//!   and returns the reply with its own round-trip time.
//! - `relaycalc-compute` accepts gateway connections and evaluates each
//!   request on a fixed pool of worker threads.
//! - `relaycalc-caller` fires one or more concurrent requests at the gateway
//!   and reports the total latency.
//!
//! Every hop is a fresh TCP connection carrying one JSON line each way (see
//! [`relaycalc_core::codec`]).
//!
//! ## Module Overview
//!
//! - [`server::config`] - CLI/env configuration for each binary.
//! - [`server::listener`] - Bounded accept loop shared by both tiers.
//! - [`server::service`] - Gateway and compute connection handlers.
//! - [`server::pool`] - Worker pool used by the compute node.
//! - [`server::exchange_log`] - Per-tier append-only log sink.
//! - [`server::telemetry`] - Console tracing and optional metrics.

pub mod server;
