use crate::backoff::Backoff;
use crate::error::FeedError;
use crate::feeds::feed_client::FeedApi;
use crate::models::rule::Subscription;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const MAX_RETRIES: u32 = 3;

/// Turns configured screen names into provider IDs, one lookup at a time.
///
/// Lookups are spaced by a fixed delay to stay inside the provider's per-window
/// quota. Transient failures are retried; an unknown account or a credential
/// problem aborts startup.
pub struct SubscriptionResolver {
    feed: Arc<dyn FeedApi>,
    delay: Duration,
    retry_base: Duration,
    retry_max: Duration,
}

impl SubscriptionResolver {
    pub fn new(feed: Arc<dyn FeedApi>, delay: Duration) -> Self {
        Self {
            feed,
            delay,
            retry_base: Duration::from_secs(1),
            retry_max: Duration::from_secs(30),
        }
    }

    pub async fn resolve_all(&self, names: &[String]) -> Result<Vec<Subscription>, FeedError> {
        let mut seen = HashSet::new();
        let mut subscriptions = Vec::with_capacity(names.len());

        for name in names {
            if !seen.insert(name.to_lowercase()) {
                warn!("Account @{name} listed twice, ignoring duplicate");
                continue;
            }
            if !subscriptions.is_empty() {
                tokio::time::sleep(self.delay).await;
            }

            let id = self.resolve_one(name).await?;
            info!("Following @{name} (id {id})");
            subscriptions.push(Subscription::new(name.clone(), id));
        }

        Ok(subscriptions)
    }

    async fn resolve_one(&self, name: &str) -> Result<String, FeedError> {
        let mut backoff = Backoff::new(self.retry_base, self.retry_max);
        loop {
            match self.feed.resolve_entity(name).await {
                Ok(id) => return Ok(id),
                Err(e) if e.is_transient() && backoff.attempt() < MAX_RETRIES => {
                    let fallback = backoff.next_delay();
                    let delay = e.retry_after().unwrap_or(fallback);
                    warn!("Lookup of @{name} failed ({e}); retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!("Could not resolve @{name}: {e}");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuleFailure;
    use crate::feeds::feed_client::{DeleteSummary, StreamHandle};
    use crate::models::event::StreamFields;
    use crate::models::rule::{FilterRule, RuleSpec};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct Directory {
        calls: Mutex<Vec<(String, Instant)>>,
        flaky_once: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl FeedApi for Directory {
        async fn resolve_entity(&self, name: &str) -> Result<String, FeedError> {
            self.calls.lock().unwrap().push((name.to_string(), Instant::now()));
            if self.flaky_once.lock().unwrap().remove(name) {
                return Err(FeedError::from_status(503, "busy".into(), None));
            }
            match name {
                "firstsquawk" => Ok("3224717046".into()),
                "DeItaone" => Ok("2704294333".into()),
                "revoked" => Err(FeedError::from_status(401, "Unauthorized".into(), None)),
                other => Err(FeedError::UnknownEntity(other.into())),
            }
        }

        async fn list_rules(&self) -> Result<Vec<FilterRule>, FeedError> {
            unreachable!()
        }

        async fn delete_rules(&self, _ids: &[String]) -> Result<DeleteSummary, FeedError> {
            unreachable!()
        }

        async fn add_rules(
            &self,
            _specs: &[RuleSpec],
        ) -> Result<Vec<Result<FilterRule, RuleFailure>>, FeedError> {
            unreachable!()
        }

        async fn open_stream(&self, _fields: &StreamFields) -> Result<StreamHandle, FeedError> {
            unreachable!()
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_with_fixed_spacing() {
        let dir = Arc::new(Directory::default());
        let resolver = SubscriptionResolver::new(dir.clone(), Duration::from_millis(500));

        let subs = resolver
            .resolve_all(&names(&["firstsquawk", "DeItaone", "FIRSTSQUAWK"]))
            .await
            .unwrap();
        assert_eq!(
            subs,
            vec![
                Subscription::new("firstsquawk", "3224717046"),
                Subscription::new("DeItaone", "2704294333"),
            ]
        );

        let calls = dir.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].1 - calls[0].1 >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let dir = Arc::new(Directory::default());
        dir.flaky_once.lock().unwrap().insert("firstsquawk".into());
        let resolver = SubscriptionResolver::new(dir.clone(), Duration::from_millis(500));

        let subs = resolver.resolve_all(&names(&["firstsquawk"])).await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(dir.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_and_auth_are_fatal() {
        let dir = Arc::new(Directory::default());
        let resolver = SubscriptionResolver::new(dir.clone(), Duration::from_millis(500));

        let err = resolver.resolve_all(&names(&["nobody"])).await.unwrap_err();
        assert!(matches!(err, FeedError::UnknownEntity(n) if n == "nobody"));

        let err = resolver.resolve_all(&names(&["revoked"])).await.unwrap_err();
        assert!(err.is_auth());
    }
}
