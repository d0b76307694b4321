//! Connectivity monitoring - probing, debouncing and state publication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use usher_common::{Error, Result};

use crate::debounce::Debouncer;
use crate::probe::ReachabilityProbe;

/// The published reachability state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityState {
    /// Whether the backing service is currently considered reachable.
    pub is_reachable: bool,
    /// When the state last flipped.
    pub last_transition_at: DateTime<Utc>,
}

/// Timing configuration for the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Budget for a single probe before it counts as unreachable.
    pub probe_timeout: Duration,
    /// Routine probe cadence while reachable.
    pub online_interval: Duration,
    /// Routine probe cadence while unreachable.
    pub offline_interval: Duration,
    /// Minimum spacing between committed state flips.
    pub debounce_window: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(3),
            online_interval: Duration::from_secs(15),
            offline_interval: Duration::from_secs(10),
            debounce_window: Duration::from_secs(1),
        }
    }
}

/// Platform-level connectivity signals fed into the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkHint {
    /// The platform reports connectivity came back. Triggers an immediate
    /// probe; the resulting flip still goes through the debounce window.
    CameOnline,
    /// The platform reports connectivity is gone. Commits unreachable
    /// immediately, bypassing the debounce window.
    WentOffline,
    /// The app returned to the foreground. Triggers an immediate probe.
    FocusRegained,
}

/// Commands funnelled into the driver task.
enum Command {
    Probe {
        respond_to: oneshot::Sender<ConnectivityState>,
    },
    Hint(NetworkHint),
}

/// Handle for observing and nudging connectivity state.
///
/// Cheap to clone; every clone talks to the same driver task, so the whole
/// process shares one probe at a time. The monitor is an injected
/// dependency, not a process-wide global: tests construct their own.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    command_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectivityState>,
}

impl ConnectivityMonitor {
    /// Create a monitor and the driver that powers it.
    ///
    /// The driver must be spawned for probes and hints to have any effect.
    /// State starts optimistically reachable.
    pub fn new(
        probe: Arc<dyn ReachabilityProbe>,
        config: MonitorConfig,
    ) -> (Self, MonitorDriver) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (state_tx, state_rx) = watch::channel(ConnectivityState {
            is_reachable: true,
            last_transition_at: Utc::now(),
        });

        let monitor = Self {
            command_tx,
            state_rx,
        };

        let driver = MonitorDriver {
            debounce: Debouncer::new(config.debounce_window),
            next_routine: Instant::now() + config.online_interval,
            probe,
            config,
            command_rx,
            state_tx,
            in_flight: None,
            waiters: Vec::new(),
        };

        (monitor, driver)
    }

    /// Current state without touching the network.
    pub fn status(&self) -> ConnectivityState {
        self.state_rx.borrow().clone()
    }

    /// Shorthand for `status().is_reachable`.
    pub fn is_reachable(&self) -> bool {
        self.state_rx.borrow().is_reachable
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state_rx.clone()
    }

    /// Probe immediately and return the resulting state.
    ///
    /// If a probe is already in flight this call attaches to it instead of
    /// starting another; concurrent callers all observe the outcome of the
    /// same single probe.
    pub async fn probe_now(&self) -> Result<ConnectivityState> {
        let (respond_to, response) = oneshot::channel();
        self.command_tx
            .send(Command::Probe { respond_to })
            .await
            .map_err(|_| Error::Unavailable("connectivity monitor is not running".to_string()))?;
        response
            .await
            .map_err(|_| Error::Unavailable("connectivity monitor is not running".to_string()))
    }

    /// Feed a platform connectivity signal. Dropped silently if the driver
    /// is gone.
    pub async fn hint(&self, hint: NetworkHint) {
        if self.command_tx.send(Command::Hint(hint)).await.is_err() {
            debug!("connectivity monitor is not running, hint dropped");
        }
    }
}

/// Background task that owns probing and state transitions.
///
/// The driver is the only writer of [`ConnectivityState`]. It keeps at most
/// one probe in flight: routine ticks are skipped while one runs, manual
/// probes attach to it, and hints may cancel and supersede it. A cancelled
/// probe's result is never observed.
pub struct MonitorDriver {
    probe: Arc<dyn ReachabilityProbe>,
    config: MonitorConfig,
    command_rx: mpsc::Receiver<Command>,
    state_tx: watch::Sender<ConnectivityState>,
    debounce: Debouncer,
    in_flight: Option<JoinHandle<bool>>,
    waiters: Vec<oneshot::Sender<ConnectivityState>>,
    next_routine: Instant,
}

impl MonitorDriver {
    /// Run the monitor loop. Exits when every handle is dropped.
    pub async fn run(mut self) {
        info!("connectivity monitor started");
        self.start_probe();

        loop {
            let deadline = self.debounce.deadline();
            let next_routine = self.next_routine;

            tokio::select! {
                maybe_cmd = self.command_rx.recv() => {
                    match maybe_cmd {
                        Some(Command::Probe { respond_to }) => {
                            self.waiters.push(respond_to);
                            if self.in_flight.is_none() {
                                self.start_probe();
                            } else {
                                debug!("probe already in flight, attaching caller");
                            }
                        }
                        Some(Command::Hint(hint)) => self.handle_hint(hint),
                        None => {
                            info!("connectivity monitor shutting down");
                            break;
                        }
                    }
                }

                result = join_probe(&mut self.in_flight), if self.in_flight.is_some() => {
                    self.in_flight = None;
                    match result {
                        Ok(observed) => self.apply_observation(observed),
                        Err(e) => error!("probe task failed: {}", e),
                    }
                    self.answer_waiters();
                }

                _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                    let current = self.state_tx.borrow().is_reachable;
                    if let Some(target) = self.debounce.due(current, Instant::now()) {
                        self.publish(target);
                    }
                }

                _ = time::sleep_until(next_routine) => {
                    if self.in_flight.is_none() {
                        self.start_probe();
                    }
                    self.next_routine = Instant::now() + self.current_interval();
                }
            }
        }

        self.abort_probe();
    }

    /// Spawn a probe with the configured timeout. Timeouts count as
    /// unreachable.
    fn start_probe(&mut self) {
        let probe = self.probe.clone();
        let timeout = self.config.probe_timeout;
        debug!("starting reachability probe");
        self.in_flight = Some(tokio::spawn(async move {
            match time::timeout(timeout, probe.check()).await {
                Ok(reachable) => reachable,
                Err(_) => {
                    debug!("probe timed out");
                    false
                }
            }
        }));
    }

    fn abort_probe(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
            debug!("in-flight probe cancelled");
        }
    }

    fn handle_hint(&mut self, hint: NetworkHint) {
        match hint {
            NetworkHint::WentOffline => {
                info!("platform reported offline");
                self.abort_probe();
                self.debounce.cancel_pending();
                let reachable = self.state_tx.borrow().is_reachable;
                if reachable {
                    self.debounce.note_commit(Instant::now());
                    self.publish(false);
                }
                self.answer_waiters();
            }
            NetworkHint::CameOnline | NetworkHint::FocusRegained => {
                debug!(?hint, "immediate probe requested");
                self.abort_probe();
                self.start_probe();
            }
        }
    }

    /// Run a finished probe's answer through the debouncer.
    fn apply_observation(&mut self, observed: bool) {
        let current = self.state_tx.borrow().is_reachable;
        debug!(observed, current, "probe finished");
        if let Some(target) = self.debounce.observe(current, observed, Instant::now()) {
            self.publish(target);
        }
    }

    /// Commit a state flip and re-arm the routine cadence for it.
    fn publish(&mut self, reachable: bool) {
        if reachable {
            info!("connectivity restored");
        } else {
            warn!("connectivity lost");
        }
        self.state_tx.send_replace(ConnectivityState {
            is_reachable: reachable,
            last_transition_at: Utc::now(),
        });
        self.next_routine = Instant::now() + self.current_interval();
    }

    /// Hand every waiting `probe_now` caller the current state.
    fn answer_waiters(&mut self) {
        if self.waiters.is_empty() {
            return;
        }
        let state = self.state_tx.borrow().clone();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(state.clone());
        }
    }

    fn current_interval(&self) -> Duration {
        let reachable = self.state_tx.borrow().is_reachable;
        if reachable {
            self.config.online_interval
        } else {
            self.config.offline_interval
        }
    }
}

async fn join_probe(
    in_flight: &mut Option<JoinHandle<bool>>,
) -> std::result::Result<bool, JoinError> {
    match in_flight.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ManualProbe;

    fn spawn_monitor(probe: Arc<ManualProbe>) -> ConnectivityMonitor {
        let (monitor, driver) = ConnectivityMonitor::new(probe, MonitorConfig::default());
        tokio::spawn(driver.run());
        monitor
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_now_commits_unreachable() {
        let probe = Arc::new(ManualProbe::new(false));
        let monitor = spawn_monitor(probe.clone());

        let state = monitor.probe_now().await.unwrap();
        assert!(!state.is_reachable);
        assert!(!monitor.is_reachable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_probe_now_shares_one_probe() {
        let probe = Arc::new(ManualProbe::with_delay(true, Duration::from_millis(500)));
        let monitor = spawn_monitor(probe.clone());

        let (a, b) = tokio::join!(monitor.probe_now(), monitor.probe_now());
        let a = a.unwrap();
        let b = b.unwrap();

        assert_eq!(a.is_reachable, b.is_reachable);
        // Both callers attached to the probe started by the driver.
        assert_eq!(probe.checks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flip_inside_window_commits_once_with_latest_value() {
        let probe = Arc::new(ManualProbe::new(false));
        let monitor = spawn_monitor(probe.clone());
        let mut rx = monitor.subscribe();

        // First flip commits immediately.
        let state = monitor.probe_now().await.unwrap();
        assert!(!state.is_reachable);

        // Connectivity returns right away; the flip back up is deferred.
        probe.set_reachable(true);
        let state = monitor.probe_now().await.unwrap();
        assert!(!state.is_reachable, "flip inside the window must be deferred");

        // Once the window closes the deferred flip commits.
        rx.borrow_and_update();
        time::sleep(Duration::from_millis(1100)).await;
        assert!(rx.has_changed().unwrap());
        assert!(monitor.is_reachable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reversal_inside_window_cancels_deferred_flip() {
        let probe = Arc::new(ManualProbe::new(false));
        let monitor = spawn_monitor(probe.clone());

        let state = monitor.probe_now().await.unwrap();
        assert!(!state.is_reachable);

        // Up then straight back down inside one window.
        probe.set_reachable(true);
        monitor.probe_now().await.unwrap();
        probe.set_reachable(false);
        monitor.probe_now().await.unwrap();

        time::sleep(Duration::from_millis(1200)).await;
        assert!(
            !monitor.is_reachable(),
            "cancelled flip must not commit at window close"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_went_offline_bypasses_debounce() {
        let probe = Arc::new(ManualProbe::new(true));
        let monitor = spawn_monitor(probe.clone());
        let mut rx = monitor.subscribe();

        monitor.hint(NetworkHint::WentOffline).await;
        rx.changed().await.unwrap();
        assert!(!rx.borrow().is_reachable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_came_online_probes_immediately_but_debounces_flip() {
        let probe = Arc::new(ManualProbe::new(true));
        let monitor = spawn_monitor(probe.clone());
        let mut rx = monitor.subscribe();

        monitor.hint(NetworkHint::WentOffline).await;
        rx.changed().await.unwrap();

        monitor.hint(NetworkHint::CameOnline).await;
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_reachable);
        // The flip back up waited out the debounce window.
        let state = monitor.status();
        assert!(state.is_reachable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_probe_result_is_discarded() {
        // A slow probe that would report unreachable.
        let probe = Arc::new(ManualProbe::with_delay(false, Duration::from_secs(2)));
        let monitor = spawn_monitor(probe.clone());

        // Give the startup probe a moment to be in flight, then supersede it
        // with a fresh one that reports reachable.
        time::sleep(Duration::from_millis(100)).await;
        probe.set_reachable(true);
        monitor.hint(NetworkHint::FocusRegained).await;

        time::sleep(Duration::from_secs(3)).await;
        assert!(
            monitor.is_reachable(),
            "the aborted probe's answer must never apply"
        );
        assert_eq!(probe.checks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_cadence_is_faster() {
        let probe = Arc::new(ManualProbe::new(false));
        let monitor = spawn_monitor(probe.clone());

        // Startup probe commits unreachable.
        monitor.probe_now().await.unwrap();
        let after_first = probe.checks();

        // Next routine probe arrives on the offline interval (10s), well
        // before the online interval (15s).
        time::sleep(Duration::from_millis(9_500)).await;
        assert_eq!(probe.checks(), after_first);
        time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(probe.checks(), after_first + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_now_fails_without_driver() {
        let probe: Arc<ManualProbe> = Arc::new(ManualProbe::new(true));
        let (monitor, driver) = ConnectivityMonitor::new(probe, MonitorConfig::default());
        drop(driver);

        let err = monitor.probe_now().await.unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }
}
