use crate::backoff::Backoff;
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::feeds::feed_client::{FeedApi, StreamHandle};
use crate::feeds::rule_sync::RuleSynchronizer;
use crate::models::event::{FeedMessage, StreamEvent, StreamFields};
use crate::models::rule::Subscription;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    SyncingRules,
    Streaming,
    Backoff,
    Closed,
}

/// Why a streaming epoch ended.
enum EpochEnd {
    Scheduled,
    Failed { reason: String, retry_after: Option<Duration> },
    Shutdown,
}

/// Owns the single live stream handle and drives it through
/// connect → rule sync → streaming → reconnect.
///
/// The state watch channel is written only here. Events go to the coordinator
/// one at a time, in delivery order.
pub struct StreamConnection {
    feed: Arc<dyn FeedApi>,
    sync: RuleSynchronizer,
    subscriptions: Vec<Subscription>,
    fields: StreamFields,
    config: StreamConfig,
    state_tx: watch::Sender<ConnectionState>,
}

impl StreamConnection {
    pub fn new(feed: Arc<dyn FeedApi>, subscriptions: Vec<Subscription>, config: StreamConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            sync: RuleSynchronizer::new(feed.clone()),
            feed,
            subscriptions,
            fields: StreamFields::default(),
            config,
            state_tx,
        }
    }

    pub fn with_fields(mut self, fields: StreamFields) -> Self {
        self.fields = fields;
        self
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        let prev = self.state_tx.send_replace(state);
        if prev != state {
            debug!("Stream state {prev:?} → {state:?}");
        }
    }

    /// Provider hint plus margin, else the next backoff step.
    fn retry_delay(&self, suggested: Option<Duration>, backoff: &mut Backoff) -> Duration {
        match suggested {
            Some(d) => d + self.config.provider_delay_margin(),
            None => backoff.next_delay(),
        }
    }

    /// Run until shutdown. Returns an error only for credential failures.
    pub async fn run(
        self,
        events: mpsc::Sender<StreamEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), StreamError> {
        let mut backoff = Backoff::new(
            Duration::from_millis(self.config.backoff_base_ms),
            Duration::from_millis(self.config.backoff_max_ms),
        );
        let mut last_closed: Option<Instant> = None;

        loop {
            self.set_state(ConnectionState::Disconnected);

            // Grace period after the previous handle was torn down.
            if let Some(closed_at) = last_closed.take() {
                if !wait_until(closed_at + self.config.teardown_grace(), &mut shutdown).await {
                    break;
                }
            }

            self.set_state(ConnectionState::Connecting);
            let opened = tokio::select! {
                r = self.feed.open_stream(&self.fields) => r,
                _ = shutdown.recv() => break,
            };

            let mut handle = match opened {
                Ok(h) => h,
                Err(e) if e.is_auth() => {
                    error!("Stream authentication failed: {e}");
                    self.set_state(ConnectionState::Closed);
                    return Err(StreamError::Connect(e));
                }
                Err(e) => {
                    let delay = self.retry_delay(e.retry_after(), &mut backoff);
                    warn!("Stream connect failed: {e}; retrying in {delay:?}");
                    self.set_state(ConnectionState::Backoff);
                    if !wait_for(delay, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            self.set_state(ConnectionState::SyncingRules);
            let synced = tokio::select! {
                r = self.sync.synchronize(&self.subscriptions) => r,
                _ = shutdown.recv() => {
                    handle.close().await;
                    break;
                }
            };

            if let Err(e) = synced {
                handle.close().await;
                last_closed = Some(Instant::now());
                if e.is_auth() {
                    error!("Stream rule sync not authorized: {e}");
                    self.set_state(ConnectionState::Closed);
                    return Err(StreamError::Sync(e));
                }
                let delay = self.retry_delay(e.retry_after(), &mut backoff);
                warn!("{e}; retrying in {delay:?}");
                self.set_state(ConnectionState::Backoff);
                if !wait_for(delay, &mut shutdown).await {
                    break;
                }
                continue;
            }

            let (dropped, control) = handle.discard_pending();
            if dropped > 0 {
                debug!("Discarded {dropped} frame(s) received before rule sync");
            }

            let end = match control {
                Some(msg) => Self::failure_of(msg),
                None => {
                    self.set_state(ConnectionState::Streaming);
                    info!("Streaming ({} account(s) followed)", self.subscriptions.len());
                    backoff.reset();
                    self.stream_epoch(&mut handle, &events, &mut shutdown).await
                }
            };

            handle.close().await;
            last_closed = Some(Instant::now());

            match end {
                EpochEnd::Shutdown => break,
                EpochEnd::Scheduled => {
                    info!("Scheduled stream reconnect");
                }
                EpochEnd::Failed { reason, retry_after } => {
                    let delay = self.retry_delay(retry_after, &mut backoff);
                    warn!("Stream interrupted: {reason}; reconnecting in {delay:?}");
                    self.set_state(ConnectionState::Backoff);
                    if !wait_for(delay, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Closed);
        info!("Stream connection closed");
        Ok(())
    }

    async fn stream_epoch(
        &self,
        handle: &mut StreamHandle,
        events: &mpsc::Sender<StreamEvent>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> EpochEnd {
        let reconnect_at = Instant::now() + self.config.reconnect_interval();

        loop {
            tokio::select! {
                msg = handle.recv() => match msg {
                    Some(FeedMessage::Data(event)) => {
                        if events.send(event).await.is_err() {
                            warn!("Event consumer gone; stopping stream");
                            return EpochEnd::Shutdown;
                        }
                    }
                    Some(control) => return Self::failure_of(control),
                    None => {
                        return EpochEnd::Failed {
                            reason: "stream ended".into(),
                            retry_after: None,
                        }
                    }
                },
                _ = tokio::time::sleep_until(reconnect_at) => return EpochEnd::Scheduled,
                _ = shutdown.recv() => return EpochEnd::Shutdown,
            }
        }
    }

    fn failure_of(msg: FeedMessage) -> EpochEnd {
        match msg {
            FeedMessage::ConnectionError { message, retry_after } => EpochEnd::Failed {
                reason: message,
                retry_after,
            },
            FeedMessage::Disconnected { retry_after } => EpochEnd::Failed {
                reason: "provider disconnected".into(),
                retry_after,
            },
            FeedMessage::Data(_) => EpochEnd::Failed {
                reason: "unexpected data frame".into(),
                retry_after: None,
            },
        }
    }
}

/// Sleep unless shutdown arrives first. Returns false on shutdown.
async fn wait_for(delay: Duration, shutdown: &mut broadcast::Receiver<()>) -> bool {
    wait_until(Instant::now() + delay, shutdown).await
}

async fn wait_until(deadline: Instant, shutdown: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => true,
        _ = shutdown.recv() => false,
    }
}
