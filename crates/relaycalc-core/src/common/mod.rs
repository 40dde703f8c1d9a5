//! Protocol types, framing, and computations shared by every tier.
//!
//! ## Submodules
//!
//! - [`error`] - Unified error type and its wire representation.
//! - [`message`] - Field names, [`RequestId`](message::RequestId), typed
//!   requests and responses.
//! - [`codec`] - `tokio-util` codec for one JSON object per line.
//! - [`compute`] - Arithmetic and Fibonacci evaluation.

pub mod codec;
pub mod compute;
pub mod error;
pub mod message;

pub use error::{Error, Result};
