//! Usher cache layer.
//!
//! A time-bounded read-through cache for server responses:
//! - JSON values keyed by a deterministic request identity
//! - per-resource-class TTLs with lazy expiry
//! - a persisted registry that survives restarts

pub mod key;
pub mod policy;
pub mod store;

pub use key::{cache_key, keys};
pub use policy::TtlPolicy;
pub use store::{CacheEntry, CacheStore};
