use crate::types::{ErrorKind, ProviderId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};

/// One dispatch outcome
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub provider: ProviderId,
    pub latency: Duration,
    /// `None` for a successful dispatch
    pub error_kind: Option<ErrorKind>,
}

/// Latency summary over a provider's rolling window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub samples: usize,
    pub success_rate: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
}

impl LatencyStats {
    fn from_window(window: &VecDeque<(Duration, bool)>) -> Self {
        if window.is_empty() {
            return Self::default();
        }

        let mut latencies: Vec<f64> = window
            .iter()
            .map(|(latency, _)| latency.as_micros() as f64 / 1000.0)
            .collect();
        latencies.sort_by(|a, b| a.total_cmp(b));

        let successes = window.iter().filter(|(_, ok)| *ok).count();
        let count = latencies.len() as f64;

        Self {
            samples: latencies.len(),
            success_rate: successes as f64 / count,
            mean_ms: latencies.iter().sum::<f64>() / count,
            p50_ms: percentile(&latencies, 50.0),
            p95_ms: percentile(&latencies, 95.0),
            max_ms: latencies.last().copied().unwrap_or_default(),
        }
    }
}

/// Nearest-rank percentile over sorted values
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

struct Aggregator {
    rx: mpsc::Receiver<Sample>,
    window: usize,
    windows: HashMap<ProviderId, VecDeque<(Duration, bool)>>,
}

impl Aggregator {
    fn drain(&mut self) {
        while let Ok(sample) = self.rx.try_recv() {
            let window = self.windows.entry(sample.provider).or_default();
            window.push_back((sample.latency, sample.error_kind.is_none()));
            while window.len() > self.window {
                window.pop_front();
            }
        }
    }
}

/// Per-provider rolling window of dispatch latency and outcome.
///
/// Recording never blocks: samples go through a bounded channel and are
/// folded into the windows when statistics are read. When the channel is
/// full the recorder drains it only if the aggregator lock is free, and
/// otherwise drops the sample.
pub struct MetricsRecorder {
    tx: mpsc::Sender<Sample>,
    aggregator: Mutex<Aggregator>,
    dropped: AtomicU64,
}

impl MetricsRecorder {
    pub fn new(window: usize, channel_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        Self {
            tx,
            aggregator: Mutex::new(Aggregator {
                rx,
                window: window.max(1),
                windows: HashMap::new(),
            }),
            dropped: AtomicU64::new(0),
        }
    }

    /// Record a sample without blocking the caller
    pub fn record(&self, sample: Sample) {
        let sample = match self.tx.try_send(sample) {
            Ok(()) => return,
            Err(TrySendError::Full(sample)) => sample,
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        if let Some(mut aggregator) = self.aggregator.try_lock() {
            aggregator.drain();
            drop(aggregator);
            if self.tx.try_send(sample).is_ok() {
                return;
            }
        }

        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Statistics for every provider with at least one sample
    pub fn stats(&self) -> HashMap<ProviderId, LatencyStats> {
        let mut aggregator = self.aggregator.lock();
        aggregator.drain();
        aggregator
            .windows
            .iter()
            .map(|(provider, window)| (provider.clone(), LatencyStats::from_window(window)))
            .collect()
    }

    pub fn stats_for(&self, provider: &ProviderId) -> LatencyStats {
        let mut aggregator = self.aggregator.lock();
        aggregator.drain();
        aggregator
            .windows
            .get(provider)
            .map(LatencyStats::from_window)
            .unwrap_or_default()
    }

    /// Samples discarded because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder")
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(100, 1024)
    }
}
