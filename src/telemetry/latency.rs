use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::info;

/// Stage names recorded by the pipeline.
pub const DELIVERY_LAG: &str = "delivery_lag";
pub const DECISION: &str = "decision";
pub const ORDER_SUBMIT: &str = "order_submit";

/// Rolling latency samples per pipeline stage.
pub struct LatencyTracker {
    histograms: DashMap<String, VecDeque<Duration>>,
    max_samples: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySummary {
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            histograms: DashMap::new(),
            max_samples: max_samples.max(1),
        }
    }

    pub fn record(&self, stage: &str, duration: Duration) {
        let mut hist = self
            .histograms
            .entry(stage.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.max_samples));
        if hist.len() >= self.max_samples {
            hist.pop_front();
        }
        hist.push_back(duration);
    }

    /// Record provider-to-receipt lag. Negative lag (clock skew) is recorded as zero.
    pub fn record_lag(&self, lag: chrono::Duration) {
        self.record(DELIVERY_LAG, lag.to_std().unwrap_or(Duration::ZERO));
    }

    /// Start a timer that records on drop.
    pub fn start_timer(&self, stage: &str) -> Timer<'_> {
        Timer {
            stage: stage.to_string(),
            start: Instant::now(),
            tracker: self,
        }
    }

    pub fn summary(&self, stage: &str) -> Option<LatencySummary> {
        let hist = self.histograms.get(stage)?;
        if hist.is_empty() {
            return None;
        }

        let mut sorted: Vec<Duration> = hist.iter().copied().collect();
        sorted.sort();

        Some(LatencySummary {
            p50: nearest_rank(&sorted, 0.50),
            p95: nearest_rank(&sorted, 0.95),
            p99: nearest_rank(&sorted, 0.99),
            samples: sorted.len(),
        })
    }

    pub fn log_summary(&self) {
        let mut stages: Vec<String> = self.histograms.iter().map(|e| e.key().clone()).collect();
        stages.sort();

        for stage in stages {
            if let Some(s) = self.summary(&stage) {
                info!(
                    "Latency [{stage}]: p50={:.1}ms p95={:.1}ms p99={:.1}ms samples={}",
                    s.p50.as_secs_f64() * 1000.0,
                    s.p95.as_secs_f64() * 1000.0,
                    s.p99.as_secs_f64() * 1000.0,
                    s.samples,
                );
            }
        }
    }
}

fn nearest_rank(sorted: &[Duration], q: f64) -> Duration {
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

pub struct Timer<'a> {
    stage: String,
    start: Instant,
    tracker: &'a LatencyTracker,
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        self.tracker.record(&self.stage, self.start.elapsed());
    }
}
