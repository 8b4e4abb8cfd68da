use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Short-lived set of idempotency keys that have already been sent.
///
/// A key is claimed atomically before the first network call. Claims expire after
/// `ttl`; expired entries are pruned lazily on the next claim.
pub struct IdempotencyGuard {
    claims: DashMap<String, Instant>,
    ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            claims: DashMap::new(),
            ttl,
        }
    }

    /// Returns true if the caller now owns `key`; false if it is a duplicate.
    pub fn try_claim(&self, key: &str) -> bool {
        let now = Instant::now();
        self.prune(now);

        match self.claims.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                if now.duration_since(*e.get()) < self.ttl {
                    false
                } else {
                    e.insert(now);
                    true
                }
            }
            Entry::Vacant(v) => {
                v.insert(now);
                true
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.claims
            .get(key)
            .is_some_and(|t| t.elapsed() < self.ttl)
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    fn prune(&self, now: Instant) {
        let before = self.claims.len();
        self.claims.retain(|_, t| now.duration_since(*t) < self.ttl);
        let removed = before.saturating_sub(self.claims.len());
        if removed > 0 {
            debug!("Pruned {removed} expired idempotency keys");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_within_window() {
        let guard = IdempotencyGuard::new(Duration::from_secs(600));
        assert!(guard.try_claim("event:1"));
        assert!(!guard.try_claim("event:1"));
        assert!(guard.try_claim("event:2"));
        assert!(guard.contains("event:1"));
        assert_eq!(guard.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_expires_after_window() {
        let guard = IdempotencyGuard::new(Duration::from_secs(600));
        assert!(guard.try_claim("event:1"));

        tokio::time::advance(Duration::from_secs(601)).await;
        assert!(!guard.contains("event:1"));
        assert!(guard.try_claim("event:2"));
        // pruned by the claim above
        assert_eq!(guard.len(), 1);
        assert!(guard.try_claim("event:1"));
    }
}
