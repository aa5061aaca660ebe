use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Counts open jobs and gates the "still alive" heartbeat on job activity.
///
/// Reporting is switched on once an interactive job is up and switched off
/// again when the last open job closes, so an idle service is never reported
/// as hung.
#[derive(Debug, Default)]
pub struct LivenessTracker {
    active_jobs: AtomicUsize,
    reporting: AtomicBool,
    beats: AtomicU64,
    last_beat: Mutex<Option<Instant>>,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly opened job. Returns the number of open jobs.
    pub fn job_opened(&self) -> usize {
        self.active_jobs.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Record a closed job. Returns the number of jobs still open.
    pub fn job_closed(&self) -> usize {
        let previous = self
            .active_jobs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        let remaining = previous.saturating_sub(1);
        if remaining == 0 && self.reporting.swap(false, Ordering::SeqCst) {
            tracing::info!("Last job closed, liveness reporting disabled");
        }
        remaining
    }

    pub fn enable_reporting(&self) {
        if !self.reporting.swap(true, Ordering::SeqCst) {
            tracing::debug!("Liveness reporting enabled");
        }
    }

    pub fn is_reporting(&self) -> bool {
        self.reporting.load(Ordering::SeqCst)
    }

    pub fn active_jobs(&self) -> usize {
        self.active_jobs.load(Ordering::SeqCst)
    }

    /// Record a heartbeat if reporting is on. Returns whether it was recorded.
    pub fn beat(&self) -> bool {
        if !self.is_reporting() {
            return false;
        }
        *self.last_beat.lock() = Some(Instant::now());
        self.beats.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }

    pub fn last_beat_age(&self) -> Option<Duration> {
        self.last_beat.lock().map(|at| at.elapsed())
    }
}

/// Drives [`LivenessTracker::beat`] on a fixed interval
pub struct HeartbeatSender {
    interval: Duration,
}

impl HeartbeatSender {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub async fn run(&self, tracker: Arc<LivenessTracker>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if tracker.beat() {
                        tracing::trace!(active_jobs = tracker.active_jobs(), "Alive");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporting_disabled_when_last_job_closes() {
        let tracker = LivenessTracker::new();
        assert_eq!(tracker.job_opened(), 1);
        assert_eq!(tracker.job_opened(), 2);
        tracker.enable_reporting();

        assert_eq!(tracker.job_closed(), 1);
        assert!(tracker.is_reporting());

        assert_eq!(tracker.job_closed(), 0);
        assert!(!tracker.is_reporting());
    }

    #[test]
    fn job_closed_never_underflows() {
        let tracker = LivenessTracker::new();
        assert_eq!(tracker.job_closed(), 0);
        assert_eq!(tracker.active_jobs(), 0);
    }

    #[test]
    fn beat_only_counts_while_reporting() {
        let tracker = LivenessTracker::new();
        assert!(!tracker.beat());
        assert!(tracker.last_beat_age().is_none());

        tracker.enable_reporting();
        assert!(tracker.beat());
        assert_eq!(tracker.beats(), 1);
        assert!(tracker.last_beat_age().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn sender_beats_until_shutdown() {
        let tracker = Arc::new(LivenessTracker::new());
        tracker.enable_reporting();
        let shutdown = CancellationToken::new();

        let handle = {
            let tracker = tracker.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                HeartbeatSender::new(Duration::from_millis(100))
                    .run(tracker, shutdown)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(350)).await;
        shutdown.cancel();
        handle.await.unwrap();

        // Ticks at 0, 100, 200 and (usually) 300ms
        assert!((3..=4).contains(&tracker.beats()));
    }
}
