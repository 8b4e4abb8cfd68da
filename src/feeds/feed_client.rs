use crate::config::FeedConfig;
use crate::error::{FeedError, RuleFailure};
use crate::models::event::{FeedMessage, StreamEvent, StreamFields};
use crate::models::rule::{FilterRule, RuleSpec};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The feed provider as seen by the resolver, rule sync and stream connection.
#[async_trait]
pub trait FeedApi: Send + Sync {
    /// Look up the provider ID of an account by screen name.
    async fn resolve_entity(&self, name: &str) -> Result<String, FeedError>;

    async fn list_rules(&self) -> Result<Vec<FilterRule>, FeedError>;

    /// Delete rules by ID in one request.
    async fn delete_rules(&self, ids: &[String]) -> Result<DeleteSummary, FeedError>;

    /// Create rules in one request; one entry per spec, in order.
    async fn add_rules(
        &self,
        specs: &[RuleSpec],
    ) -> Result<Vec<Result<FilterRule, RuleFailure>>, FeedError>;

    async fn open_stream(&self, fields: &StreamFields) -> Result<StreamHandle, FeedError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub deleted: usize,
    pub not_deleted: usize,
}

/// An open stream: a frame receiver plus the task that feeds it.
///
/// `close` signals the reader and waits until it has exited. Dropping a handle
/// without closing aborts the reader.
pub struct StreamHandle {
    frames: mpsc::Receiver<FeedMessage>,
    closer: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    pub fn new(
        frames: mpsc::Receiver<FeedMessage>,
        closer: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            frames,
            closer: Some(closer),
            task: Some(task),
        }
    }

    pub async fn recv(&mut self) -> Option<FeedMessage> {
        self.frames.recv().await
    }

    /// Drain frames already buffered. Returns the number of data frames dropped
    /// and the first control frame seen, if any.
    pub fn discard_pending(&mut self) -> (usize, Option<FeedMessage>) {
        let mut dropped = 0;
        while let Ok(msg) = self.frames.try_recv() {
            match msg {
                FeedMessage::Data(_) => dropped += 1,
                control => return (dropped, Some(control)),
            }
        }
        (dropped, None)
    }

    pub async fn close(mut self) {
        if let Some(closer) = self.closer.take() {
            let _ = closer.send(());
        }
        self.frames.close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// HTTP client for the v2 filtered-stream API.
pub struct FeedClient {
    config: FeedConfig,
    http: reqwest::Client,
    /// No overall timeout; liveness is enforced by `stall_timeout`.
    stream_http: reqwest::Client,
    stall_timeout: Duration,
}

const RULES_PATH: &str = "/2/tweets/search/stream/rules";
const STREAM_PATH: &str = "/2/tweets/search/stream";
const FRAME_BUFFER: usize = 256;

#[derive(Debug, Deserialize)]
struct UserLookup {
    data: Option<UserData>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RulesResponse {
    #[serde(default)]
    data: Vec<FilterRule>,
    #[serde(default)]
    errors: Vec<ApiProblem>,
    meta: Option<RulesMeta>,
}

#[derive(Debug, Deserialize)]
struct RulesMeta {
    summary: Option<RulesSummary>,
}

#[derive(Debug, Default, Deserialize)]
struct RulesSummary {
    #[serde(default)]
    deleted: usize,
    #[serde(default)]
    not_deleted: usize,
}

#[derive(Debug, Deserialize)]
struct ApiProblem {
    value: Option<String>,
    title: Option<String>,
    detail: Option<String>,
    disconnect_type: Option<String>,
}

impl ApiProblem {
    fn reason(&self) -> String {
        match (&self.title, &self.detail) {
            (Some(t), Some(d)) => format!("{t}: {d}"),
            (Some(t), None) => t.clone(),
            (None, Some(d)) => d.clone(),
            (None, None) => "unspecified provider error".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    data: Option<PostData>,
    #[serde(default)]
    errors: Vec<ApiProblem>,
}

#[derive(Debug, Deserialize)]
struct PostData {
    id: Option<String>,
    text: String,
    author_id: Option<String>,
    created_at: Option<DateTime<Utc>>,
    note_tweet: Option<NoteText>,
}

#[derive(Debug, Deserialize)]
struct NoteText {
    text: String,
}

impl FeedClient {
    pub fn new(config: FeedConfig, stall_timeout: Duration) -> Result<Self, FeedError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .timeout(Duration::from_secs(10))
            .build()?;

        let stream_http = reqwest::Client::builder()
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            config,
            http,
            stream_http,
            stall_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base, path)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, FeedError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let retry_after = retry_after_from(resp.headers(), Utc::now());
        let body: String = resp.text().await.unwrap_or_default().chars().take(300).collect();
        Err(FeedError::from_status(status.as_u16(), body, retry_after))
    }

    async fn post_rules(&self, body: serde_json::Value) -> Result<RulesResponse, FeedError> {
        let resp = self
            .http
            .post(self.url(RULES_PATH))
            .bearer_auth(&self.config.bearer_token)
            .json(&body)
            .send()
            .await?;
        let text = Self::check(resp).await?.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl FeedApi for FeedClient {
    async fn resolve_entity(&self, name: &str) -> Result<String, FeedError> {
        let url = self.url(&format!("/2/users/by/username/{name}"));
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.config.bearer_token)
            .send()
            .await?;
        let text = Self::check(resp).await?.text().await?;
        let lookup: UserLookup = serde_json::from_str(&text)?;

        lookup
            .data
            .map(|u| u.id)
            .ok_or_else(|| FeedError::UnknownEntity(name.to_string()))
    }

    async fn list_rules(&self) -> Result<Vec<FilterRule>, FeedError> {
        let resp = self
            .http
            .get(self.url(RULES_PATH))
            .bearer_auth(&self.config.bearer_token)
            .send()
            .await?;
        let text = Self::check(resp).await?.text().await?;
        let rules: RulesResponse = serde_json::from_str(&text)?;
        Ok(rules.data)
    }

    async fn delete_rules(&self, ids: &[String]) -> Result<DeleteSummary, FeedError> {
        let resp = self
            .post_rules(serde_json::json!({ "delete": { "ids": ids } }))
            .await?;
        let summary = resp
            .meta
            .and_then(|m| m.summary)
            .ok_or_else(|| FeedError::Payload("delete response without summary".into()))?;
        Ok(DeleteSummary {
            deleted: summary.deleted,
            not_deleted: summary.not_deleted,
        })
    }

    async fn add_rules(
        &self,
        specs: &[RuleSpec],
    ) -> Result<Vec<Result<FilterRule, RuleFailure>>, FeedError> {
        let resp = self.post_rules(serde_json::json!({ "add": specs })).await?;
        Ok(match_added_rules(specs, resp))
    }

    async fn open_stream(&self, fields: &StreamFields) -> Result<StreamHandle, FeedError> {
        info!("Opening filtered stream");
        let resp = self
            .stream_http
            .get(self.url(STREAM_PATH))
            .bearer_auth(&self.config.bearer_token)
            .query(&[
                ("tweet.fields", fields.post_fields.join(",")),
                ("expansions", fields.expansions.join(",")),
            ])
            .send()
            .await?;
        let resp = Self::check(resp).await?;

        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let (close_tx, close_rx) = oneshot::channel();
        let task = tokio::spawn(read_frames(resp.bytes_stream(), tx, close_rx, self.stall_timeout));

        Ok(StreamHandle::new(rx, close_tx, task))
    }
}

/// Read NDJSON lines from a response body until closed, stalled, or the body ends.
///
/// Any chunk, heartbeat newlines included, resets the stall timer.
async fn read_frames<S, B, E>(
    body: S,
    tx: mpsc::Sender<FeedMessage>,
    mut close_rx: oneshot::Receiver<()>,
    stall_timeout: Duration,
) where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut body = std::pin::pin!(body);
    let mut buf: Vec<u8> = Vec::with_capacity(4096);

    let terminal = loop {
        let chunk = tokio::select! {
            _ = &mut close_rx => {
                debug!("Stream reader closed");
                return;
            }
            next = tokio::time::timeout(stall_timeout, body.next()) => next,
        };

        match chunk {
            Err(_) => {
                break FeedMessage::ConnectionError {
                    message: format!("no data for {stall_timeout:?}"),
                    retry_after: None,
                };
            }
            Ok(None) => {
                // last line may lack its newline
                let rest = std::mem::take(&mut buf);
                if !forward_line(&rest, &tx).await {
                    return;
                }
                break FeedMessage::Disconnected { retry_after: None };
            }
            Ok(Some(Err(e))) => {
                break FeedMessage::ConnectionError {
                    message: e.to_string(),
                    retry_after: None,
                };
            }
            Ok(Some(Ok(bytes))) => {
                buf.extend_from_slice(bytes.as_ref());
                while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    if !forward_line(&line, &tx).await {
                        return;
                    }
                }
            }
        }
    };

    let _ = tx.send(terminal).await;
}

/// Parse and forward one line. Returns `false` once the receiver is gone.
async fn forward_line(line: &[u8], tx: &mpsc::Sender<FeedMessage>) -> bool {
    let line = String::from_utf8_lossy(line);
    // blank lines are keep-alive heartbeats
    if line.trim().is_empty() {
        return true;
    }
    match parse_frame(&line, Utc::now()) {
        Some(msg) => tx.send(msg).await.is_ok(),
        None => true,
    }
}

/// Pair each requested spec with the created rule or the provider's complaint.
fn match_added_rules(
    specs: &[RuleSpec],
    resp: RulesResponse,
) -> Vec<Result<FilterRule, RuleFailure>> {
    specs
        .iter()
        .map(|spec| {
            if let Some(rule) = resp.data.iter().find(|r| r.expression == spec.expression) {
                return Ok(rule.clone());
            }
            let reason = resp
                .errors
                .iter()
                .find(|e| e.value.as_deref() == Some(spec.expression.as_str()))
                .map(ApiProblem::reason)
                .unwrap_or_else(|| "rule not created".to_string());
            Err(RuleFailure {
                expression: spec.expression.clone(),
                reason,
            })
        })
        .collect()
}

/// Decode one stream line. Returns `None` for frames that carry nothing usable.
pub fn parse_frame(line: &str, received_at: DateTime<Utc>) -> Option<FeedMessage> {
    let frame: StreamFrame = match serde_json::from_str(line) {
        Ok(f) => f,
        Err(e) => {
            warn!("Skipping malformed stream frame: {e}");
            return None;
        }
    };

    if let Some(post) = frame.data {
        let Some(author_id) = post.author_id else {
            warn!("Skipping post without author_id");
            return None;
        };
        // long posts are truncated in `text`
        let text = post.note_tweet.map(|n| n.text).unwrap_or(post.text);
        return Some(FeedMessage::Data(StreamEvent {
            event_id: post.id,
            text,
            author_id,
            occurred_at: post.created_at,
            received_at,
        }));
    }

    let problem = frame.errors.first()?;
    if problem.disconnect_type.is_some() {
        warn!("Provider disconnect: {}", problem.reason());
        return Some(FeedMessage::Disconnected { retry_after: None });
    }
    Some(FeedMessage::ConnectionError {
        message: problem.reason(),
        retry_after: None,
    })
}

/// Provider-suggested wait from `retry-after` (seconds) or `x-rate-limit-reset` (epoch seconds).
pub fn retry_after_from(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    if let Some(secs) = header("retry-after") {
        return Some(Duration::from_secs(secs.max(0) as u64));
    }
    header("x-rate-limit-reset").map(|reset| {
        let wait = (reset - now.timestamp()).max(0);
        Duration::from_secs(wait as u64)
    })
}
