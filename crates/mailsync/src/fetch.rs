//! Bounded-concurrency, priority-ordered message fetcher
//!
//! Batches of message ids are queued with a priority; worker threads
//! drain the shared queue highest-priority-first, bounded globally by
//! the configured concurrency. Each item fetch has its own timeout and
//! a small linear-backoff retry budget (urgent items get shorter
//! timeouts and fewer retries, to fail fast). The scheduler keeps
//! rolling latency/error metrics and can mechanically retune itself
//! via [`FetchScheduler::optimize`].
//!
//! Queue, in-flight count, and metrics are owned by one mutex-guarded
//! region; only the fetches themselves run concurrently.

use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::SyncError;
use crate::models::MessageId;
use crate::remote::api::RemoteMessage;
use crate::remote::MailApi;

/// Queue position of a fetch batch. Higher priorities are dequeued
/// first; in-flight work is never preempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FetchPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Tuning for [`FetchScheduler`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Starting bound on concurrently in-flight fetches
    pub max_concurrency: usize,
    /// Optimizer floor for concurrency (never zero)
    pub min_concurrency: usize,
    /// Optimizer ceiling for concurrency
    pub concurrency_ceiling: usize,
    /// Per-item fetch timeout in milliseconds
    pub item_timeout_ms: u64,
    /// Per-item timeout for urgent batches (shorter, fail fast)
    pub urgent_timeout_ms: u64,
    /// Optimizer floor/ceiling for both timeouts
    pub timeout_floor_ms: u64,
    pub timeout_ceiling_ms: u64,
    /// Retry attempts per item (beyond the first attempt)
    pub item_retries: u32,
    /// Retry attempts for urgent items
    pub urgent_retries: u32,
    /// Optimizer floor for retry counts
    pub retry_floor: u32,
    /// Linear backoff step between item retries, in milliseconds
    pub retry_step_ms: u64,
    /// Rolling latency window size
    pub metrics_window: usize,
    /// Minimum attempts before the optimizer trusts the metrics
    pub optimize_min_samples: u64,
    /// Average latency below this counts as "fast" when loosening
    pub fast_latency_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            min_concurrency: 1,
            concurrency_ceiling: 16,
            item_timeout_ms: 20_000,
            urgent_timeout_ms: 8_000,
            timeout_floor_ms: 2_000,
            timeout_ceiling_ms: 60_000,
            item_retries: 3,
            urgent_retries: 1,
            retry_floor: 1,
            retry_step_ms: 250,
            metrics_window: 50,
            optimize_min_samples: 20,
            fast_latency_ms: 1_000,
        }
    }
}

/// Adjustable parameters, as currently tuned
#[derive(Debug, Clone, PartialEq)]
pub struct FetchTuning {
    pub max_concurrency: usize,
    pub item_timeout: Duration,
    pub urgent_timeout: Duration,
    pub item_retries: u32,
    pub urgent_retries: u32,
}

/// Snapshot of the rolling metrics
#[derive(Debug, Clone, PartialEq)]
pub struct FetchMetrics {
    pub attempts: u64,
    pub errors: u64,
    pub error_rate: f64,
    pub avg_latency: Option<Duration>,
}

/// One queued item fetch. Carries its batch's cancel token so a
/// cancelled batch can be flushed without touching other batches'
/// entries in the shared queue.
struct Job {
    id: MessageId,
    priority: FetchPriority,
    seq: u64,
    cancel: CancelToken,
    reply: mpsc::Sender<(MessageId, Result<RemoteMessage>)>,
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: higher priority first, then FIFO within a priority.
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

struct Metrics {
    latencies: VecDeque<Duration>,
    attempts: u64,
    errors: u64,
}

struct State {
    queue: BinaryHeap<Job>,
    in_flight: usize,
    next_seq: u64,
    tuning: FetchTuning,
    metrics: Metrics,
}

/// Priority-ordered batch fetcher with a global concurrency bound
pub struct FetchScheduler {
    api: Arc<dyn MailApi>,
    config: FetchConfig,
    state: Mutex<State>,
    signal: Condvar,
}

impl FetchScheduler {
    pub fn new(api: Arc<dyn MailApi>, config: FetchConfig) -> Self {
        let tuning = FetchTuning {
            max_concurrency: config.max_concurrency.max(1),
            item_timeout: Duration::from_millis(config.item_timeout_ms),
            urgent_timeout: Duration::from_millis(config.urgent_timeout_ms),
            item_retries: config.item_retries,
            urgent_retries: config.urgent_retries,
        };
        Self {
            api,
            config,
            state: Mutex::new(State {
                queue: BinaryHeap::new(),
                in_flight: 0,
                next_seq: 0,
                tuning,
                metrics: Metrics {
                    latencies: VecDeque::new(),
                    attempts: 0,
                    errors: 0,
                },
            }),
            signal: Condvar::new(),
        }
    }

    /// Fetch a batch of message bodies at the given priority.
    ///
    /// Duplicate ids within the batch are fetched once. Returns one
    /// result per unique id; an `Err` entry means that id genuinely
    /// failed (or the batch was cancelled before it ran).
    pub fn fetch(
        &self,
        ids: &[MessageId],
        priority: FetchPriority,
        cancel: &CancelToken,
    ) -> Vec<(MessageId, Result<RemoteMessage>)> {
        let mut seen = HashSet::new();
        let unique: Vec<&MessageId> = ids.iter().filter(|id| seen.insert((*id).clone())).collect();
        if unique.is_empty() {
            return Vec::new();
        }

        let (tx, rx) = mpsc::channel();
        let workers = {
            let mut state = self.state.lock().unwrap();
            for id in &unique {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.queue.push(Job {
                    id: (*id).clone(),
                    priority,
                    seq,
                    cancel: cancel.clone(),
                    reply: tx.clone(),
                });
            }
            state.tuning.max_concurrency.min(unique.len())
        };
        drop(tx);
        self.signal.notify_all();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| self.worker_loop(cancel));
            }
            rx.iter().take(unique.len()).collect()
        })
    }

    /// Drain the shared queue until it is empty or this worker's batch
    /// is cancelled
    fn worker_loop(&self, cancel: &CancelToken) {
        loop {
            let next = {
                let mut state = self.state.lock().unwrap();
                loop {
                    if cancel.is_cancelled() {
                        // Flush only jobs whose own batch was cancelled;
                        // other batches keep their queue entries.
                        flush_cancelled(&mut state.queue);
                        return;
                    }
                    if state.queue.is_empty() {
                        return;
                    }
                    if state.in_flight < state.tuning.max_concurrency {
                        break;
                    }
                    state = self.signal.wait(state).unwrap();
                }
                let job = state.queue.pop().expect("queue checked non-empty");
                if job.cancel.is_cancelled() {
                    let _ = job.reply.send((job.id, Err(anyhow!("fetch cancelled"))));
                    None
                } else {
                    state.in_flight += 1;
                    let (timeout, retries) = if job.priority == FetchPriority::Urgent {
                        (state.tuning.urgent_timeout, state.tuning.urgent_retries)
                    } else {
                        (state.tuning.item_timeout, state.tuning.item_retries)
                    };
                    Some((job, timeout, retries))
                }
            };
            let Some((job, timeout, retries)) = next else {
                continue;
            };

            let result = self.run_job(&job.id, timeout, retries, &job.cancel);
            let _ = job.reply.send((job.id, result));

            let mut state = self.state.lock().unwrap();
            state.in_flight -= 1;
            drop(state);
            self.signal.notify_all();
        }
    }

    /// Execute one item fetch with linear-backoff retries
    fn run_job(
        &self,
        id: &MessageId,
        timeout: Duration,
        retries: u32,
        cancel: &CancelToken,
    ) -> Result<RemoteMessage> {
        let step = Duration::from_millis(self.config.retry_step_ms);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let start = Instant::now();
            let result = self.api.get_message(id, timeout);
            self.record_attempt(result.is_ok().then(|| start.elapsed()));

            match result {
                Ok(message) => return Ok(message),
                Err(err) => {
                    let retriable = SyncError::classify(&err).is_some_and(|c| c.is_retriable());
                    if attempt > retries || !retriable || cancel.is_cancelled() {
                        debug!("fetch {} failed after {attempt} attempts: {err:#}", id.as_str());
                        return Err(err);
                    }
                    // Linear backoff, unlike the exponential policy for
                    // single critical calls.
                    std::thread::sleep(step * attempt);
                }
            }
        }
    }

    fn record_attempt(&self, latency: Option<Duration>) {
        let mut state = self.state.lock().unwrap();
        state.metrics.attempts += 1;
        match latency {
            Some(latency) => {
                state.metrics.latencies.push_back(latency);
                while state.metrics.latencies.len() > self.config.metrics_window {
                    state.metrics.latencies.pop_front();
                }
            }
            None => state.metrics.errors += 1,
        }
    }

    /// Mechanically retune concurrency, timeouts, and retry budgets
    /// from the rolling metrics. High error rates tighten concurrency
    /// and loosen timeouts; clean fast windows do the reverse. Every
    /// parameter stays inside its configured bounds.
    pub fn optimize(&self) {
        let mut state = self.state.lock().unwrap();
        if state.metrics.attempts < self.config.optimize_min_samples {
            return;
        }

        let error_rate = state.metrics.errors as f64 / state.metrics.attempts as f64;
        let avg_latency = average(&state.metrics.latencies);
        let floor = Duration::from_millis(self.config.timeout_floor_ms);
        let ceiling = Duration::from_millis(self.config.timeout_ceiling_ms);
        let fast = Duration::from_millis(self.config.fast_latency_ms);

        let tuning = &mut state.tuning;
        if error_rate > 0.10 {
            tuning.max_concurrency =
                (tuning.max_concurrency.saturating_sub(1)).max(self.config.min_concurrency);
            tuning.item_timeout = scale(tuning.item_timeout, 3, 2).min(ceiling);
            tuning.urgent_timeout = scale(tuning.urgent_timeout, 3, 2).min(ceiling);
            tuning.item_retries = (tuning.item_retries + 1).min(self.config.item_retries + 2);
            info!(
                "fetch optimizer: error rate {:.0}%, tightening concurrency to {}",
                error_rate * 100.0,
                tuning.max_concurrency
            );
        } else if error_rate < 0.02 && avg_latency.is_some_and(|l| l < fast) {
            tuning.max_concurrency =
                (tuning.max_concurrency + 1).min(self.config.concurrency_ceiling);
            tuning.item_timeout = scale(tuning.item_timeout, 3, 4).max(floor);
            tuning.urgent_timeout = scale(tuning.urgent_timeout, 3, 4).max(floor);
            tuning.item_retries =
                tuning.item_retries.saturating_sub(1).max(self.config.retry_floor);
            info!(
                "fetch optimizer: clean window, loosening concurrency to {}",
                tuning.max_concurrency
            );
        } else {
            warn!(
                "fetch optimizer: no adjustment (error rate {:.1}%, avg latency {avg_latency:?})",
                error_rate * 100.0
            );
        }

        // Start a fresh measurement window after each pass.
        state.metrics.attempts = 0;
        state.metrics.errors = 0;
        state.metrics.latencies.clear();
        drop(state);
        self.signal.notify_all();
    }

    pub fn tuning(&self) -> FetchTuning {
        self.state.lock().unwrap().tuning.clone()
    }

    pub fn metrics(&self) -> FetchMetrics {
        let state = self.state.lock().unwrap();
        let attempts = state.metrics.attempts;
        let errors = state.metrics.errors;
        FetchMetrics {
            attempts,
            errors,
            error_rate: if attempts == 0 {
                0.0
            } else {
                errors as f64 / attempts as f64
            },
            avg_latency: average(&state.metrics.latencies),
        }
    }
}

/// Fail every queued job belonging to a cancelled batch, keeping the
/// rest in queue order
fn flush_cancelled(queue: &mut BinaryHeap<Job>) {
    for job in std::mem::take(queue) {
        if job.cancel.is_cancelled() {
            let _ = job.reply.send((job.id, Err(anyhow!("fetch cancelled"))));
        } else {
            queue.push(job);
        }
    }
}

fn average(latencies: &VecDeque<Duration>) -> Option<Duration> {
    if latencies.is_empty() {
        return None;
    }
    let total: Duration = latencies.iter().sum();
    Some(total / latencies.len() as u32)
}

fn scale(d: Duration, num: u32, den: u32) -> Duration {
    d * num / den
}
