use std::time::Duration;

/// Reconnect pacing for the broker links (bus consumer channel, pub/sub
/// receive connection). Delays double from the floor up to the ceiling;
/// both links retry indefinitely, since a node without its brokers is
/// degraded, not dead. Floors and ceilings come from `Config`.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            floor,
            ceiling,
            attempt: 0,
        }
    }

    /// Call once a connection is healthy so the next outage starts back at
    /// the floor.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay to sleep before the next attempt; advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let doubling = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        let base = self.floor.saturating_mul(doubling).min(self.ceiling);
        let delay = base + self.spread(base);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    // Per-process spread of up to a quarter of the base delay, so a fleet
    // restarted together does not hammer the broker in lockstep.
    fn spread(&self, base: Duration) -> Duration {
        let window_ms = base.as_millis() as u64 / 4;
        if window_ms == 0 {
            return Duration::ZERO;
        }
        let salt = (std::process::id() as u64)
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(self.attempt as u64);
        Duration::from_millis(salt % (window_ms + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn within_spread(delay: Duration, base: Duration) -> bool {
        delay >= base && delay <= base + base / 4
    }

    #[test]
    fn delays_double_up_to_the_ceiling() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(8));

        assert!(within_spread(backoff.next_delay(), Duration::from_secs(1)));
        assert!(within_spread(backoff.next_delay(), Duration::from_secs(2)));
        assert!(within_spread(backoff.next_delay(), Duration::from_secs(4)));
        assert!(within_spread(backoff.next_delay(), Duration::from_secs(8)));

        // Saturated: every further attempt stays at the ceiling.
        for _ in 0..40 {
            assert!(within_spread(backoff.next_delay(), Duration::from_secs(8)));
        }
    }

    #[test]
    fn reset_returns_to_the_floor() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));
        for _ in 0..6 {
            backoff.next_delay();
        }

        backoff.reset();
        assert!(within_spread(
            backoff.next_delay(),
            Duration::from_millis(500)
        ));
    }

    #[test]
    fn zero_floor_never_panics() {
        let mut backoff = Backoff::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(backoff.next_delay(), Duration::ZERO);
        assert_eq!(backoff.next_delay(), Duration::ZERO);
    }
}
