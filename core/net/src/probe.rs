//! Reachability probe seam.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing::debug;

/// A single yes/no reachability check against the backing service.
///
/// Implementations answer "did we get any response at all": a rejection or
/// server error still proves the network path works, so it counts as
/// reachable. Only the absence of a response (timeout, connection failure)
/// is unreachable. Probes are infallible; errors collapse into `false`.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn check(&self) -> bool;
}

/// Probe with a manually controlled answer.
///
/// Useful for tests and demo setups. The answer can be flipped at any time,
/// an optional delay simulates probe latency, and every started check is
/// counted.
pub struct ManualProbe {
    reachable: AtomicBool,
    delay: Duration,
    checks: AtomicU32,
}

impl ManualProbe {
    /// Create a probe that instantly answers `reachable`.
    pub fn new(reachable: bool) -> Self {
        Self::with_delay(reachable, Duration::ZERO)
    }

    /// Create a probe that sleeps `delay` before answering.
    pub fn with_delay(reachable: bool, delay: Duration) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
            delay,
            checks: AtomicU32::new(0),
        }
    }

    /// Change the answer for subsequent checks.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// How many checks have started.
    pub fn checks(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReachabilityProbe for ManualProbe {
    async fn check(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reachable.load(Ordering::SeqCst)
    }
}

const PROBE_USER_AGENT: &str = "Usher/0.1";
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Probe that issues a lightweight GET against the backend.
///
/// Any HTTP response counts as reachable, 4xx and 5xx included. The request
/// carries its own timeout so a stalled connection cannot outlive the
/// monitor's probe budget.
pub struct HttpProbe {
    http: reqwest::Client,
    url: String,
}

impl HttpProbe {
    /// Probe `GET {base_url}/api/events`.
    pub fn new(base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(PROBE_USER_AGENT)
            .timeout(PROBE_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            http,
            url: format!("{}/api/events", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn check(&self) -> bool {
        match self.http.get(&self.url).send().await {
            Ok(response) => {
                debug!(status = %response.status(), "probe got a response");
                true
            }
            Err(e) => {
                debug!("probe failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_probe_answers_and_counts() {
        let probe = ManualProbe::new(true);
        assert!(probe.check().await);

        probe.set_reachable(false);
        assert!(!probe.check().await);
        assert_eq!(probe.checks(), 2);
    }
}
