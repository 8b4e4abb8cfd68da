use crate::error::SyncError;
use crate::feeds::feed_client::FeedApi;
use crate::models::rule::{FilterRule, RuleSpec, Subscription};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub deleted: usize,
    pub created: Vec<FilterRule>,
}

/// Makes the provider's rule set exactly one `from:<id>` rule per subscription.
///
/// Read, delete everything, add the desired set. Any failure aborts the attempt;
/// the caller re-runs the whole synchronization, which starts from a fresh read.
pub struct RuleSynchronizer {
    feed: Arc<dyn FeedApi>,
}

impl RuleSynchronizer {
    pub fn new(feed: Arc<dyn FeedApi>) -> Self {
        Self { feed }
    }

    pub async fn synchronize(&self, subscriptions: &[Subscription]) -> Result<SyncReport, SyncError> {
        let existing = self.feed.list_rules().await.map_err(SyncError::List)?;

        let mut deleted = 0;
        if !existing.is_empty() {
            let ids: Vec<String> = existing.iter().map(|r| r.id.clone()).collect();
            let summary = self.feed.delete_rules(&ids).await.map_err(SyncError::Delete)?;
            if summary.not_deleted > 0 {
                return Err(SyncError::NotDeleted(summary.not_deleted));
            }
            deleted = summary.deleted;
        }

        let desired: Vec<RuleSpec> = subscriptions.iter().map(Subscription::rule_spec).collect();
        if desired.is_empty() {
            warn!("No subscriptions; stream rule set left empty");
            return Ok(SyncReport { deleted, created: Vec::new() });
        }

        let results = self.feed.add_rules(&desired).await.map_err(SyncError::Add)?;

        let mut created = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(rule) => created.push(rule),
                Err(failure) => {
                    warn!("Rule {} rejected: {}", failure.expression, failure.reason);
                    failures.push(failure);
                }
            }
        }
        if !failures.is_empty() {
            return Err(SyncError::Rejected { failures });
        }

        info!("Stream rules synced: {deleted} removed, {} active", created.len());
        Ok(SyncReport { deleted, created })
    }
}
