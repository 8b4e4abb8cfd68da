use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// A post delivered by the filtered stream. Lives for one pipeline pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Provider post ID, when supplied.
    pub event_id: Option<String>,
    pub text: String,
    pub author_id: String,
    pub occurred_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
}

impl StreamEvent {
    /// Deterministic key for the trigger: the same post redelivered maps to the same key.
    pub fn idempotency_key(&self) -> String {
        if let Some(id) = self.event_id.as_deref().filter(|id| !id.is_empty()) {
            return format!("event:{id}");
        }

        let mut hasher = Sha256::new();
        hasher.update(self.author_id.as_bytes());
        hasher.update([0u8]);
        if let Some(ts) = self.occurred_at {
            hasher.update(ts.timestamp_millis().to_le_bytes());
        }
        hasher.update([0u8]);
        hasher.update(self.text.as_bytes());
        format!("digest:{}", hex::encode(hasher.finalize()))
    }

    /// Delay between the provider timestamp and local receipt.
    pub fn delivery_lag(&self) -> Option<chrono::Duration> {
        self.occurred_at.map(|t| self.received_at - t)
    }
}

/// Frames produced by an open stream handle.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Data(StreamEvent),
    /// Provider-signalled error; the connection should be re-established.
    ConnectionError {
        message: String,
        retry_after: Option<Duration>,
    },
    /// Stream ended or the provider asked us to disconnect.
    Disconnected { retry_after: Option<Duration> },
}

/// Fields requested when opening the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFields {
    pub post_fields: Vec<String>,
    pub expansions: Vec<String>,
}

impl Default for StreamFields {
    fn default() -> Self {
        Self {
            post_fields: vec![
                "author_id".into(),
                "created_at".into(),
                "note_tweet".into(),
            ],
            expansions: vec!["author_id".into()],
        }
    }
}
