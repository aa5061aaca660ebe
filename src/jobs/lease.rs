use tokio::time::{Duration, Instant};

/// Upper bound on a single lease, keeps `Instant` arithmetic far from overflow.
const MAX_LEASE_SECS: f64 = 10.0 * 365.0 * 24.0 * 3600.0;

/// Renewable lease measured on the monotonic (tokio) clock.
///
/// Lease lengths are fractional seconds. Non-positive or non-finite lengths
/// produce a lease that is already expired.
#[derive(Debug, Clone, Copy)]
pub struct Lease {
    expires_at: Instant,
}

impl Lease {
    pub fn new(lease_secs: f64) -> Self {
        Self {
            expires_at: expiration_after(lease_secs),
        }
    }

    /// Restart the lease so it expires `lease_secs` from now.
    pub fn touch(&mut self, lease_secs: f64) {
        self.expires_at = expiration_after(lease_secs);
    }

    /// Seconds until expiry; negative once the lease has run out.
    pub fn remaining_secs(&self) -> f64 {
        let now = Instant::now();
        if self.expires_at >= now {
            (self.expires_at - now).as_secs_f64()
        } else {
            -(now - self.expires_at).as_secs_f64()
        }
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_secs() <= 0.0
    }
}

fn expiration_after(lease_secs: f64) -> Instant {
    let now = Instant::now();
    if !lease_secs.is_finite() || lease_secs <= 0.0 {
        return now;
    }
    let lease = Duration::from_secs_f64(lease_secs.min(MAX_LEASE_SECS));
    now.checked_add(lease).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn remaining_counts_down() {
        let lease = Lease::new(10.0);
        assert!((lease.remaining_secs() - 10.0).abs() < 1e-6);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!((lease.remaining_secs() - 6.0).abs() < 1e-6);
        assert!(!lease.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_goes_negative_after_expiry() {
        let lease = Lease::new(1.0);
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(lease.is_expired());
        assert!((lease.remaining_secs() + 2.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn touch_replaces_previous_expiration() {
        let mut lease = Lease::new(100.0);
        lease.touch(5.0);
        assert!((lease.remaining_secs() - 5.0).abs() < 1e-6);

        tokio::time::advance(Duration::from_secs(6)).await;
        lease.touch(2.5);
        assert!((lease.remaining_secs() - 2.5).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn degenerate_lengths_are_already_expired() {
        assert!(Lease::new(0.0).is_expired());
        assert!(Lease::new(-3.0).is_expired());
        assert!(Lease::new(f64::NAN).is_expired());
        assert!(!Lease::new(f64::MAX).is_expired());
    }
}
