//! Reachability probing and connectivity state for the sync layer.
//!
//! A [`ConnectivityMonitor`] owns a background driver that keeps at most one
//! probe in flight, debounces flapping transitions, and publishes the
//! resulting [`ConnectivityState`] over a watch channel. Platform signals
//! (interface up/down events, app focus changes) are fed in as
//! [`NetworkHint`]s.

pub mod debounce;
pub mod monitor;
pub mod probe;

pub use monitor::{ConnectivityMonitor, ConnectivityState, MonitorConfig, MonitorDriver, NetworkHint};
pub use probe::{HttpProbe, ManualProbe, ReachabilityProbe};
