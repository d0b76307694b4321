//! Offline-first client for the event registration backend.
//!
//! [`EventClient`] wires the cache, the pending queue, the connectivity
//! monitor and the sync coordinator into one façade: cached reads with
//! background refresh, and writes that queue themselves when the network
//! is down.

pub mod client;

pub use client::{EventClient, Freshness, PreloadReport};
