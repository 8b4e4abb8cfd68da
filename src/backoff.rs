use rand::Rng;
use std::time::Duration;

/// Bounded exponential backoff with jitter.
///
/// Delay for attempt `n` (1-based) is `base * 2^(n-1)` capped at `max`, plus up to
/// 25% random jitter, with the total still capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    /// Delay before the next attempt; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.delay_for(self.attempt);

        let jitter_range = delay.as_millis() as u64 / 4;
        let jitter = if jitter_range > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_range))
        } else {
            Duration::ZERO
        };

        (delay + jitter).min(self.max)
    }

    /// Un-jittered delay for a given attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max)
            .min(self.max)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_until_cap() {
        let b = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(b.delay_for(1), Duration::from_secs(1));
        assert_eq!(b.delay_for(2), Duration::from_secs(2));
        assert_eq!(b.delay_for(5), Duration::from_secs(16));
        assert_eq!(b.delay_for(6), Duration::from_secs(30));
        assert_eq!(b.delay_for(40), Duration::from_secs(30));
    }

    #[test]
    fn test_jittered_delay_stays_bounded() {
        let mut b = Backoff::new(Duration::from_millis(250), Duration::from_secs(5));
        for _ in 0..50 {
            let d = b.next_delay();
            assert!(d >= Duration::from_millis(250));
            assert!(d <= Duration::from_secs(5));
        }
        assert_eq!(b.attempt(), 50);
        b.reset();
        assert_eq!(b.attempt(), 0);
    }
}
