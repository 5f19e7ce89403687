//! Wire shaping for the seam relay: JSON-RPC 2.0 envelopes and the venue's
//! payload types.
//!
//! This crate is pure data — no I/O, no concurrency. The relay forwards the
//! frames these builders produce without ever looking inside them.

pub mod envelope;
pub mod payload;

pub use envelope::{Envelope, ErrorData, JSONRPC_VERSION, Reply, method};
pub use payload::{
    AccountParams, Quote, Rfq, Transfer, WireError, balances_envelope, positions_envelope,
    quote_envelope, transfer_envelope,
};
