//! Priority-aware task scheduler with a dynamic concurrency limit
//!
//! `submit` is the sole entry point for callers: it normalizes and
//! deduplicates a batch, answers what it can from the cache, and queues the
//! rest. A dispatcher drains the queue in effective-priority order (base
//! priority plus aging) while the number of executing tasks stays under a
//! limit that a background adjuster moves between the configured floor and
//! ceiling in response to memory pressure. Transient failures are resubmitted
//! with capped backoff up to the retry limit; permanent failures terminate
//! immediately with a stable reason code.
//!
//! A URL already in flight is never dispatched twice: later submissions
//! attach to the existing task and receive a clone of its result.

use dashmap::DashMap;
use futures::future::BoxFuture;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, oneshot, watch};
use tokio::task::JoinHandle;

pub mod priority;
pub mod task;

pub use priority::{PriorityRule, PriorityRules, UrlPredicate};
pub use task::{ScheduledTask, TaskState, UrlOutcome, UrlResult};

use crate::cache_store::{AnalysisPayload, CacheStore};
use crate::config::SchedulerConfig;
use crate::errors::AnalyzeError;
use crate::memory_monitor::MemoryPressure;
use crate::renderer_pool::{PoolError, RendererGuard, RendererPool};
use crate::utils::{host_of, is_domain_allowed, normalize_url};

/// What the analysis collaborator produced for one page
#[derive(Debug, Clone)]
pub struct PageAnalysis {
    /// Hash of the fetched page body, the cache's secondary index
    pub content_hash: u64,
    pub payload: AnalysisPayload,
}

/// The fetch/extract/summarize collaborator, injected by the caller.
///
/// Implementations receive an acquired renderer and should call
/// [`RendererGuard::mark_unhealthy`] if the instance stops responding;
/// errors returned here are classified by the scheduler's retry policy.
pub trait PageAnalyzer: Send + Sync {
    fn analyze<'a>(
        &'a self,
        url: &'a str,
        renderer: &'a RendererGuard,
    ) -> BoxFuture<'a, Result<PageAnalysis, AnalyzeError>>;
}

enum Pending {
    Ready(UrlResult),
    Wait(oneshot::Receiver<UrlResult>),
}

/// Priority-aware scheduler over the cache and renderer pool
pub struct TaskScheduler {
    config: SchedulerConfig,
    cache: Arc<CacheStore>,
    pool: Arc<RendererPool>,
    analyzer: Arc<dyn PageAnalyzer>,
    /// Tasks waiting for dispatch; order is recomputed at pop time
    queue: Mutex<Vec<ScheduledTask>>,
    /// Normalized key -> everyone awaiting its result
    in_flight: DashMap<String, Vec<oneshot::Sender<UrlResult>>>,
    cancel_flags: DashMap<String, Arc<AtomicBool>>,
    running: AtomicUsize,
    limit: AtomicUsize,
    notify: Notify,
    shutdown: AtomicBool,
    dispatcher: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    adjuster: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(
        config: SchedulerConfig,
        cache: Arc<CacheStore>,
        pool: Arc<RendererPool>,
        analyzer: Arc<dyn PageAnalyzer>,
    ) -> Arc<Self> {
        let limit = config
            .concurrency_base
            .clamp(config.concurrency_floor, config.concurrency_ceiling);
        Arc::new(Self {
            config,
            cache,
            pool,
            analyzer,
            queue: Mutex::new(Vec::new()),
            in_flight: DashMap::new(),
            cancel_flags: DashMap::new(),
            running: AtomicUsize::new(0),
            limit: AtomicUsize::new(limit),
            notify: Notify::new(),
            shutdown: AtomicBool::new(false),
            dispatcher: tokio::sync::Mutex::new(None),
            adjuster: tokio::sync::Mutex::new(None),
        })
    }

    /// Start the dispatcher and the concurrency adjuster.
    pub async fn start(self: &Arc<Self>, pressure: watch::Receiver<MemoryPressure>) {
        let sched = Arc::clone(self);
        *self.dispatcher.lock().await = Some(tokio::spawn(async move {
            sched.dispatcher_loop().await;
        }));
        let sched = Arc::clone(self);
        *self.adjuster.lock().await = Some(tokio::spawn(async move {
            sched.adjuster_loop(pressure).await;
        }));
    }

    /// Analyze a batch of URLs and return one outcome per input, in
    /// submission order. Duplicates within the batch and URLs already in
    /// flight resolve from a single fetch/render cycle.
    pub async fn submit<S: AsRef<str>>(&self, urls: &[S]) -> Vec<UrlOutcome> {
        let mut pending: Vec<(String, Pending)> = Vec::with_capacity(urls.len());
        let mut to_enqueue: Vec<ScheduledTask> = Vec::new();

        for raw in urls {
            let raw = raw.as_ref();
            if self.shutdown.load(Ordering::Relaxed) {
                pending.push((raw.to_string(), Pending::Ready(Err(AnalyzeError::Cancelled))));
                continue;
            }

            let key = match normalize_url(raw, &self.config.default_scheme) {
                Ok(key) => key,
                Err(e) => {
                    pending.push((
                        raw.to_string(),
                        Pending::Ready(Err(AnalyzeError::MalformedUrl(format!("{e:#}")))),
                    ));
                    continue;
                }
            };

            let host = host_of(&key).unwrap_or_default();
            if !is_domain_allowed(
                &host,
                &self.config.allowed_domains,
                &self.config.blocked_domains,
            ) {
                pending.push((
                    raw.to_string(),
                    Pending::Ready(Err(AnalyzeError::DomainBlocked(host))),
                ));
                continue;
            }

            if let Some(hit) = self.cache.lookup(&key).await {
                debug!("cache hit for {key}");
                pending.push((raw.to_string(), Pending::Ready(Ok(hit))));
                continue;
            }

            let (tx, rx) = oneshot::channel();
            let newly_queued = {
                let mut waiters = self.in_flight.entry(key.clone()).or_default();
                let newly = waiters.is_empty();
                waiters.push(tx);
                newly
            };
            if newly_queued {
                let task =
                    ScheduledTask::new(key.clone(), self.config.priority_rules.classify(&key));
                self.cancel_flags
                    .insert(key.clone(), Arc::clone(&task.cancelled));
                to_enqueue.push(task);
            } else {
                debug!("{key} already in flight, attaching to existing task");
            }
            pending.push((raw.to_string(), Pending::Wait(rx)));
        }

        if !to_enqueue.is_empty() {
            self.queue.lock().extend(to_enqueue);
            self.notify.notify_one();
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for (url, entry) in pending {
            let result = match entry {
                Pending::Ready(result) => result,
                Pending::Wait(rx) => rx.await.unwrap_or(Err(AnalyzeError::Cancelled)),
            };
            outcomes.push(UrlOutcome { url, result });
        }
        outcomes
    }

    /// Cancel a URL before or during dispatch. Queued tasks are dropped
    /// without side effects; an executing task finishes its current
    /// operation but its result is discarded and its renderer re-verified.
    pub fn cancel(&self, url: &str) -> bool {
        let Ok(key) = normalize_url(url, &self.config.default_scheme) else {
            return false;
        };
        match self.cancel_flags.get(&key) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                self.notify.notify_one();
                true
            }
            None => false,
        }
    }

    /// Current dynamic concurrency limit
    #[must_use]
    pub fn current_limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    /// Tasks waiting for dispatch
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Stop accepting work, cancel queued tasks, and drain dispatched ones.
    pub async fn shutdown(&self) {
        info!("shutting down task scheduler");
        self.shutdown.store(true, Ordering::Relaxed);
        // notify_one stores a permit, so the dispatcher wakes even if it is
        // between polls right now
        self.notify.notify_one();

        while self.running.load(Ordering::Relaxed) > 0 {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        if let Some(handle) = self.dispatcher.lock().await.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.adjuster.lock().await.take() {
            handle.abort();
        }
    }

    async fn dispatcher_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            while self.running.load(Ordering::Relaxed) < self.limit.load(Ordering::Relaxed) {
                let Some(mut task) = self.pop_next() else { break };
                task.state = TaskState::Dispatched;
                self.running.fetch_add(1, Ordering::Relaxed);
                let sched = Arc::clone(&self);
                tokio::spawn(async move {
                    sched.run_task(task).await;
                });
            }
            self.notify.notified().await;
        }

        // Queued tasks never dispatched are cancelled, not abandoned
        let leftover: Vec<ScheduledTask> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };
        for task in leftover {
            self.complete(&task.url, Err(AnalyzeError::Cancelled));
        }
        debug!("dispatcher loop exiting");
    }

    /// Remove and return the queued task with the highest effective
    /// priority, FIFO among equals. Cancelled tasks are completed here.
    fn pop_next(&self) -> Option<ScheduledTask> {
        let now = Instant::now();
        let aging_window = self.config.aging_window;
        let (cancelled, best) = {
            let mut queue = self.queue.lock();

            let mut cancelled = Vec::new();
            let mut i = 0;
            while i < queue.len() {
                if queue[i].is_cancelled() {
                    cancelled.push(queue.swap_remove(i));
                } else {
                    i += 1;
                }
            }

            let best_idx = queue
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| {
                    a.effective_priority(now, aging_window)
                        .cmp(&b.effective_priority(now, aging_window))
                        .then_with(|| b.submitted_at.cmp(&a.submitted_at))
                })
                .map(|(i, _)| i);
            (cancelled, best_idx.map(|i| queue.swap_remove(i)))
        };

        for task in cancelled {
            debug!("dropping cancelled task {}", task.url);
            self.complete(&task.url, Err(AnalyzeError::Cancelled));
        }
        best
    }

    async fn run_task(self: &Arc<Self>, mut task: ScheduledTask) {
        debug!(
            "dispatching {} (priority {}, attempt {})",
            task.url, task.priority, task.attempt
        );
        let result = match tokio::time::timeout(self.config.task_deadline, self.execute(&task)).await
        {
            Ok(result) => result,
            Err(_) => Err(AnalyzeError::Timeout(self.config.task_deadline)),
        };

        if task.is_cancelled() {
            task.state = TaskState::Failed;
            self.complete(&task.url, Err(AnalyzeError::Cancelled));
        } else {
            match result {
                Ok(payload) => {
                    task.state = TaskState::Succeeded;
                    self.complete(&task.url, Ok(payload));
                }
                Err(err)
                    if err.is_retryable()
                        && task.attempt < self.config.retry_limit
                        && !self.shutdown.load(Ordering::Relaxed) =>
                {
                    task.state = TaskState::Retrying;
                    self.schedule_retry(task, &err);
                }
                Err(err) => {
                    task.state = TaskState::Failed;
                    let terminal = if err.is_retryable()
                        && self.config.retry_limit > 0
                        && task.attempt >= self.config.retry_limit
                    {
                        AnalyzeError::RetriesExhausted {
                            attempts: task.attempt + 1,
                            last: err.to_string(),
                        }
                    } else {
                        err
                    };
                    warn!(
                        "task {} failed terminally ({}): {terminal}",
                        task.url,
                        terminal.reason_code()
                    );
                    self.complete(&task.url, Err(terminal));
                }
            }
        }

        self.running.fetch_sub(1, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// One dispatch: consult the cache once more, borrow a renderer, run the
    /// analysis, and store the result.
    async fn execute(&self, task: &ScheduledTask) -> Result<Arc<AnalysisPayload>, AnalyzeError> {
        // A concurrent task for identical content may have landed while this
        // one waited in the queue
        if let Some(hit) = self.cache.lookup(&task.url).await {
            return Ok(hit);
        }

        let acquire_timeout = self.pool.config().acquire_timeout;
        let guard = self
            .pool
            .acquire(acquire_timeout)
            .await
            .map_err(|e| match e {
                PoolError::AcquireTimeout(d) => AnalyzeError::Timeout(d),
                PoolError::Exhausted(_) | PoolError::ShutDown => AnalyzeError::PoolExhausted,
            })?;

        match self.analyzer.analyze(&task.url, &guard).await {
            Ok(analysis) => {
                guard.report_healthy();
                let payload = Arc::new(analysis.payload);
                self.cache
                    .put(&task.url, analysis.content_hash, Arc::clone(&payload));
                Ok(payload)
            }
            Err(err) => {
                match &err {
                    AnalyzeError::Renderer(_) => guard.mark_unhealthy(),
                    // A timed-out renderer is neither known-good nor
                    // known-bad; leave it unverified so the pool probes it
                    AnalyzeError::Timeout(_) => {}
                    _ => guard.report_healthy(),
                }
                Err(err)
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, mut task: ScheduledTask, err: &AnalyzeError) {
        task.attempt += 1;
        let delay = self.backoff_delay(task.attempt);
        warn!(
            "task {} failed transiently ({}), retry {}/{} in {delay:?}",
            task.url,
            err.reason_code(),
            task.attempt,
            self.config.retry_limit
        );
        let sched = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if sched.shutdown.load(Ordering::Relaxed) || task.is_cancelled() {
                sched.complete(&task.url, Err(AnalyzeError::Cancelled));
                return;
            }
            task.state = TaskState::Queued;
            sched.queue.lock().push(task);
            sched.notify.notify_one();
        });
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.config
            .backoff_base
            .saturating_mul(attempt)
            .min(self.config.backoff_cap)
    }

    /// Deliver a result to everyone awaiting this key.
    fn complete(&self, key: &str, result: UrlResult) {
        self.cancel_flags.remove(key);
        if let Some((_, waiters)) = self.in_flight.remove(key) {
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        }
    }

    async fn adjuster_loop(self: Arc<Self>, mut pressure: watch::Receiver<MemoryPressure>) {
        let mut low_streak = 0u32;
        while !self.shutdown.load(Ordering::Relaxed) {
            if pressure.changed().await.is_err() {
                // Monitor is gone; the limit stays where it is
                break;
            }
            let level = *pressure.borrow_and_update();
            let current = self.limit.load(Ordering::Relaxed);
            match level {
                MemoryPressure::High => {
                    low_streak = 0;
                    let next = current
                        .saturating_sub(1)
                        .max(self.config.concurrency_floor);
                    if next != current {
                        info!("memory pressure high, lowering concurrency {current} -> {next}");
                        self.limit.store(next, Ordering::Relaxed);
                    }
                }
                MemoryPressure::Low => {
                    low_streak += 1;
                    if low_streak >= self.config.low_pressure_streak {
                        low_streak = 0;
                        let next = (current + 1).min(self.config.concurrency_ceiling);
                        if next != current {
                            info!(
                                "sustained low memory pressure, raising concurrency \
                                 {current} -> {next}"
                            );
                            self.limit.store(next, Ordering::Relaxed);
                            self.notify.notify_one();
                        }
                    }
                }
                MemoryPressure::Normal => low_streak = 0,
            }
        }
        debug!("concurrency adjuster exiting");
    }
}
