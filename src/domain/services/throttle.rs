use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

/// Token-bucket throttle for order submission. When the per-second budget is
/// exhausted the caller is suspended until capacity frees up, never rejected.
pub struct OrderThrottle {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl OrderThrottle {
    pub fn new(orders_per_second: u32) -> Self {
        let rate = NonZeroU32::new(orders_per_second.max(1))
            .expect("order rate is non-zero after clamp");
        OrderThrottle {
            limiter: RateLimiter::direct(Quota::per_second(rate)),
        }
    }

    /// Wait until an order submission is allowed.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Non-blocking probe, used by tests and diagnostics.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

/// Gate for trailing-stop modifications. A stop update goes through only when
/// the proposed stop moved at least `min_points` from the last applied stop
/// AND `min_interval` elapsed since the last update. Both conditions together
/// keep noisy ticks from producing modification storms.
pub struct StopUpdateGate {
    min_points: f64,
    min_interval: Duration,
    last_update: Option<Instant>,
    last_applied_stop: Option<f64>,
}

impl StopUpdateGate {
    pub fn new(min_points: f64, min_interval: Duration) -> Self {
        StopUpdateGate {
            min_points,
            min_interval,
            last_update: None,
            last_applied_stop: None,
        }
    }

    pub fn permits(&self, proposed_stop: f64) -> bool {
        if let Some(last) = self.last_update {
            if last.elapsed() < self.min_interval {
                return false;
            }
        }
        if let Some(last_stop) = self.last_applied_stop {
            if (proposed_stop - last_stop).abs() < self.min_points {
                return false;
            }
        }
        true
    }

    pub fn mark_applied(&mut self, stop: f64) {
        self.last_update = Some(Instant::now());
        self.last_applied_stop = Some(stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_burst_then_denied() {
        let throttle = OrderThrottle::new(2);
        assert!(throttle.try_acquire());
        assert!(throttle.try_acquire());
        assert!(!throttle.try_acquire());
    }

    #[tokio::test]
    async fn test_throttle_suspends_instead_of_rejecting() {
        let throttle = OrderThrottle::new(2);
        let start = Instant::now();
        throttle.acquire().await;
        throttle.acquire().await;
        // Third submission must wait for the window to roll over.
        throttle.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn test_stop_gate_first_update_allowed() {
        let gate = StopUpdateGate::new(5.0, Duration::from_secs(2));
        assert!(gate.permits(145.0));
    }

    #[test]
    fn test_stop_gate_blocks_small_moves() {
        let mut gate = StopUpdateGate::new(5.0, Duration::ZERO);
        gate.mark_applied(145.0);
        assert!(!gate.permits(147.0));
        assert!(gate.permits(151.0));
    }

    #[test]
    fn test_stop_gate_blocks_rapid_updates() {
        let mut gate = StopUpdateGate::new(0.0, Duration::from_secs(60));
        gate.mark_applied(145.0);
        assert!(!gate.permits(160.0));
    }
}
