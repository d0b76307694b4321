//! State-flip debouncing.

use std::time::Duration;
use tokio::time::Instant;

/// A deferred reachability flip waiting for its window to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingFlip {
    target: bool,
    commit_at: Instant,
}

/// Suppresses reachability flapping.
///
/// A flip commits immediately when at least one window has passed since the
/// previous committed flip. Inside the window the flip is deferred until the
/// window closes, and later observations rewrite or cancel it, so the value
/// that finally commits is always the most recent one. All decisions take an
/// explicit `now`, which keeps the machine free of hidden clocks.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last_commit_at: Option<Instant>,
    pending: Option<PendingFlip>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_commit_at: None,
            pending: None,
        }
    }

    /// Feed an observation. Returns `Some(target)` when the flip should
    /// commit right away, `None` when it was deferred, cancelled a pending
    /// flip, or changed nothing.
    pub fn observe(&mut self, current: bool, observed: bool, now: Instant) -> Option<bool> {
        if observed == current {
            // Latest observation agrees with the committed state; any
            // deferred flip is now stale.
            self.pending = None;
            return None;
        }

        match self.last_commit_at {
            Some(last) if now < last + self.window => {
                self.pending = Some(PendingFlip {
                    target: observed,
                    commit_at: last + self.window,
                });
                None
            }
            _ => {
                self.note_commit(now);
                Some(observed)
            }
        }
    }

    /// Check whether a deferred flip is due. Returns the flip to commit, if
    /// any; the pending slot always drains.
    pub fn due(&mut self, current: bool, now: Instant) -> Option<bool> {
        let flip = self.pending?;
        if now < flip.commit_at {
            return None;
        }
        self.pending = None;
        if flip.target == current {
            return None;
        }
        self.note_commit(now);
        Some(flip.target)
    }

    /// When the driver should next call [`due`](Self::due), if ever.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|flip| flip.commit_at)
    }

    /// Drop any deferred flip without committing it.
    pub fn cancel_pending(&mut self) {
        self.pending = None;
    }

    /// Record a commit made outside `observe`/`due`, such as an OS-level
    /// offline report that bypasses the window.
    pub fn note_commit(&mut self, now: Instant) {
        self.last_commit_at = Some(now);
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn test_first_flip_commits_immediately() {
        let mut debounce = Debouncer::new(WINDOW);
        let now = Instant::now();

        assert_eq!(debounce.observe(true, false, now), Some(false));
        assert!(debounce.deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flip_inside_window_is_deferred() {
        let mut debounce = Debouncer::new(WINDOW);
        let start = Instant::now();

        assert_eq!(debounce.observe(true, false, start), Some(false));
        // Second flip 300ms later lands inside the window.
        let t1 = start + Duration::from_millis(300);
        assert_eq!(debounce.observe(false, true, t1), None);
        assert_eq!(debounce.deadline(), Some(start + WINDOW));

        // Window closes: the deferred flip commits.
        let t2 = start + WINDOW;
        assert_eq!(debounce.due(false, t2), Some(true));
        assert!(debounce.deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_observation_wins_at_window_close() {
        let mut debounce = Debouncer::new(WINDOW);
        let start = Instant::now();

        assert_eq!(debounce.observe(true, false, start), Some(false));
        // Flip back up, then back down, both inside the window.
        assert_eq!(
            debounce.observe(false, true, start + Duration::from_millis(200)),
            None
        );
        assert_eq!(
            debounce.observe(false, false, start + Duration::from_millis(400)),
            None
        );

        // The reversal cancelled the pending flip entirely.
        assert!(debounce.deadline().is_none());
        assert_eq!(debounce.due(false, start + WINDOW), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_target_tracks_newest_differing_observation() {
        let mut debounce = Debouncer::new(WINDOW);
        let start = Instant::now();

        assert_eq!(debounce.observe(false, true, start), Some(true));
        assert_eq!(
            debounce.observe(true, false, start + Duration::from_millis(100)),
            None
        );
        // A second differing observation keeps the same deadline.
        assert_eq!(
            debounce.observe(true, false, start + Duration::from_millis(700)),
            None
        );
        assert_eq!(debounce.deadline(), Some(start + WINDOW));
        assert_eq!(debounce.due(true, start + WINDOW), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_before_deadline_is_noop() {
        let mut debounce = Debouncer::new(WINDOW);
        let start = Instant::now();

        debounce.observe(true, false, start);
        debounce.observe(false, true, start + Duration::from_millis(100));

        assert_eq!(debounce.due(false, start + Duration::from_millis(500)), None);
        // Still pending.
        assert_eq!(debounce.deadline(), Some(start + WINDOW));
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_band_commit_resets_window() {
        let mut debounce = Debouncer::new(WINDOW);
        let start = Instant::now();

        debounce.observe(true, false, start);
        debounce.observe(false, true, start + Duration::from_millis(100));
        // OS reports offline: pending flip dropped, new window opens.
        debounce.note_commit(start + Duration::from_millis(200));

        assert!(debounce.deadline().is_none());
        let t = start + Duration::from_millis(300);
        assert_eq!(debounce.observe(false, true, t), None);
        assert_eq!(
            debounce.deadline(),
            Some(start + Duration::from_millis(200) + WINDOW)
        );
    }
}
