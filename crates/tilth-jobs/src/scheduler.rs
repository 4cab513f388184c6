//! Priority job scheduler with bounded concurrency and retry backoff.
//!
//! A single dispatcher loop ticks on a fixed timer and admits queued jobs
//! up to the concurrency bound; each admitted job runs the ingest pipeline
//! as an independent task. The job map and active set live behind one
//! mutex with short critical sections; no job work happens under the lock.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Local, Timelike, Utc};
use rand::Rng;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use tilth_core::{
    defaults, BatchError, BatchReport, Job, JobOutput, JobStatus, MediaItem, SchedulerStatus,
};

use crate::ingest::{IngestOutcome, IngestPipeline};

/// Hour range during which dispatching is allowed.
///
/// `start_hour <= end_hour` is a same-day window `[start, end)`; a larger
/// start wraps past midnight. Equal hours make an empty window (never
/// dispatch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffPeakWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl OffPeakWindow {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Configuration for the ingest scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum simultaneously processing jobs.
    pub max_concurrent_jobs: usize,
    /// Dispatcher tick interval in milliseconds.
    pub tick_interval_ms: u64,
    /// Maximum attempts per job (first try + retries).
    pub max_attempts: i32,
    /// Base retry delay, doubled per attempt.
    pub retry_delay_base_ms: u64,
    /// Upper bound of the random jitter added to each retry delay.
    pub retry_jitter_ms: u64,
    /// Base offset applied to every batch job's first attempt.
    pub batch_stagger_base_ms: u64,
    /// Additional per-index offset within a batch.
    pub batch_stagger_step_ms: u64,
    /// When set, jobs dispatch only inside this local-time window.
    pub off_peak: Option<OffPeakWindow>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: defaults::JOB_MAX_CONCURRENT,
            tick_interval_ms: defaults::DISPATCH_TICK_MS,
            max_attempts: defaults::JOB_MAX_ATTEMPTS,
            retry_delay_base_ms: defaults::RETRY_DELAY_BASE_MS,
            retry_jitter_ms: defaults::RETRY_JITTER_MS,
            batch_stagger_base_ms: defaults::BATCH_STAGGER_BASE_MS,
            batch_stagger_step_ms: defaults::BATCH_STAGGER_STEP_MS,
            off_peak: None,
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TILTH_JOB_MAX_CONCURRENT` | `2` | Max concurrent jobs |
    /// | `TILTH_JOB_TICK_MS` | `1000` | Dispatcher tick interval |
    /// | `TILTH_JOB_MAX_ATTEMPTS` | `3` | Attempts per job |
    /// | `TILTH_OFFPEAK_START_HOUR` / `TILTH_OFFPEAK_END_HOUR` | unset | Off-peak window |
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = read_env_parse::<usize>(defaults::ENV_JOB_MAX_CONCURRENT) {
            config.max_concurrent_jobs = v.max(1);
        }
        if let Some(v) = read_env_parse::<u64>(defaults::ENV_JOB_TICK_MS) {
            config.tick_interval_ms = v;
        }
        if let Some(v) = read_env_parse::<i32>(defaults::ENV_JOB_MAX_ATTEMPTS) {
            config.max_attempts = v.max(1);
        }

        let start = read_env_parse::<u32>(defaults::ENV_OFFPEAK_START);
        let end = read_env_parse::<u32>(defaults::ENV_OFFPEAK_END);
        if let (Some(start_hour), Some(end_hour)) = (start, end) {
            config.off_peak = Some(OffPeakWindow {
                start_hour: start_hour % 24,
                end_hour: end_hour % 24,
            });
        }

        config
    }

    /// Set maximum concurrent jobs.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    /// Set the dispatcher tick interval.
    pub fn with_tick_interval(mut self, ms: u64) -> Self {
        self.tick_interval_ms = ms;
        self
    }

    /// Set maximum attempts per job.
    pub fn with_max_attempts(mut self, attempts: i32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set retry backoff base and jitter.
    pub fn with_retry_delay(mut self, base_ms: u64, jitter_ms: u64) -> Self {
        self.retry_delay_base_ms = base_ms;
        self.retry_jitter_ms = jitter_ms;
        self
    }

    /// Set batch stagger offsets.
    pub fn with_batch_stagger(mut self, base_ms: u64, step_ms: u64) -> Self {
        self.batch_stagger_base_ms = base_ms;
        self.batch_stagger_step_ms = step_ms;
        self
    }

    /// Restrict dispatching to an off-peak window.
    pub fn with_off_peak(mut self, window: OffPeakWindow) -> Self {
        self.off_peak = Some(window);
        self
    }
}

fn read_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

/// Event emitted by the scheduler.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    SchedulerStarted,
    SchedulerStopped,
    JobStarted {
        job_id: Uuid,
        subject_key: String,
        attempt: i32,
    },
    JobCompleted {
        job_id: Uuid,
        subject_key: String,
    },
    JobRetrying {
        job_id: Uuid,
        subject_key: String,
        attempt: i32,
        delay_ms: u64,
    },
    JobFailed {
        job_id: Uuid,
        subject_key: String,
        error: String,
    },
}

struct JobTable {
    jobs: HashMap<Uuid, Job>,
    active: HashSet<Uuid>,
    batch_errors: Vec<BatchError>,
}

struct RunHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    pipeline: Arc<IngestPipeline>,
    table: Mutex<JobTable>,
    event_tx: broadcast::Sender<SchedulerEvent>,
    run: tokio::sync::Mutex<Option<RunHandle>>,
}

impl SchedulerInner {
    fn table(&self) -> MutexGuard<'_, JobTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Releases a job's concurrency slot when dropped, on every exit path.
struct SlotGuard {
    inner: Arc<SchedulerInner>,
    job_id: Uuid,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.inner.table().active.remove(&self.job_id);
    }
}

/// Priority scheduler driving media items through the ingest pipeline.
#[derive(Clone)]
pub struct IngestScheduler {
    inner: Arc<SchedulerInner>,
}

impl IngestScheduler {
    pub fn new(pipeline: Arc<IngestPipeline>, config: SchedulerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                pipeline,
                table: Mutex::new(JobTable {
                    jobs: HashMap::new(),
                    active: HashSet::new(),
                    batch_errors: Vec::new(),
                }),
                event_tx,
                run: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Queue one item. Returns the job id.
    pub fn enqueue(&self, item: MediaItem, priority: i32) -> Uuid {
        let job = Job::new(item, priority, self.inner.config.max_attempts);
        let job_id = job.id;
        debug!(job_id = %job_id, media_key = %job.subject_key, priority, "Job queued");
        self.inner.table().jobs.insert(job_id, job);
        job_id
    }

    /// Queue a batch with staggered first attempts.
    pub fn enqueue_batch(&self, items: Vec<MediaItem>, priority: i32) -> Vec<Uuid> {
        let config = &self.inner.config;
        let now = Utc::now();
        let mut ids = Vec::with_capacity(items.len());
        let mut table = self.inner.table();

        for (index, item) in items.into_iter().enumerate() {
            let mut job = Job::new(item, priority, config.max_attempts);
            let offset_ms =
                config.batch_stagger_base_ms + index as u64 * config.batch_stagger_step_ms;
            if offset_ms > 0 {
                job.earliest_start = Some(now + chrono::Duration::milliseconds(offset_ms as i64));
            }
            ids.push(job.id);
            table.jobs.insert(job.id, job);
        }

        info!(batch_size = ids.len(), priority, "Batch queued");
        ids
    }

    /// Start the dispatcher loop. Idempotent.
    pub async fn start(&self) {
        let mut run = self.inner.run.lock().await;
        if run.is_some() {
            debug!("Scheduler already running");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let scheduler = self.clone();
        let join = tokio::spawn(async move {
            scheduler.run_loop(&mut shutdown_rx).await;
        });

        *run = Some(RunHandle { shutdown_tx, join });
        let _ = self.inner.event_tx.send(SchedulerEvent::SchedulerStarted);
        info!(
            max_concurrent = self.inner.config.max_concurrent_jobs,
            tick_interval_ms = self.inner.config.tick_interval_ms,
            "Scheduler started"
        );
    }

    /// Stop future dispatch ticks. Idempotent; running jobs finish.
    pub async fn stop(&self) {
        let handle = self.inner.run.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.shutdown_tx.send(()).await;
            let _ = handle.join.await;
            info!("Scheduler stopped");
        }
    }

    /// Get a receiver for scheduler events.
    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.event_tx.subscribe()
    }

    async fn run_loop(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        let tick = Duration::from_millis(self.inner.config.tick_interval_ms);
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Scheduler received shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    self.tick();
                }
            }
        }

        let _ = self.inner.event_tx.send(SchedulerEvent::SchedulerStopped);
    }

    /// One dispatcher pass: admit jobs until the bound is hit or the queue
    /// is drained. Never blocks on job work.
    fn tick(&self) {
        if let Some(window) = self.inner.config.off_peak {
            let hour = Local::now().hour();
            if !window.contains(hour) {
                trace!(hour, "Outside off-peak window, skipping tick");
                return;
            }
        }

        loop {
            let dispatched = self.dispatch_one();
            if !dispatched {
                break;
            }
        }
    }

    /// Claim the highest-ranked dispatchable job, if a slot is free.
    fn dispatch_one(&self) -> bool {
        let now = Utc::now();
        let claimed = {
            let mut table = self.inner.table();
            if table.active.len() >= self.inner.config.max_concurrent_jobs {
                return false;
            }

            let next_id = table
                .jobs
                .values()
                .filter(|j| j.is_dispatchable(now) && !table.active.contains(&j.id))
                .min_by_key(|j| (Reverse(j.priority), j.created_at, j.id))
                .map(|j| j.id);

            match next_id {
                Some(job_id) => {
                    // Slot acquired: the attempt officially begins here.
                    let job = table.jobs.get_mut(&job_id).map(|job| {
                        job.status = JobStatus::Processing;
                        job.attempts += 1;
                        job.started_at = Some(now);
                        job.clone()
                    });
                    table.active.insert(job_id);
                    job
                }
                None => None,
            }
        };

        match claimed {
            Some(job) => {
                let _ = self.inner.event_tx.send(SchedulerEvent::JobStarted {
                    job_id: job.id,
                    subject_key: job.subject_key.clone(),
                    attempt: job.attempts,
                });
                info!(
                    job_id = %job.id,
                    media_key = %job.subject_key,
                    attempt = job.attempts,
                    "Processing job"
                );
                let scheduler = self.clone();
                tokio::spawn(async move {
                    scheduler.execute_job(job).await;
                });
                true
            }
            None => false,
        }
    }

    /// Execute one claimed job and record its outcome.
    async fn execute_job(&self, job: Job) {
        let started = Instant::now();
        // Slot released on every exit path, panics included.
        let _slot = SlotGuard {
            inner: self.inner.clone(),
            job_id: job.id,
        };

        let outcome = self.inner.pipeline.run(&job.payload).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                self.complete_job(&job, result, duration_ms);
            }
            Err(stage_err) => {
                self.handle_job_error(&job, stage_err, duration_ms);
            }
        }
    }

    fn complete_job(&self, job: &Job, outcome: IngestOutcome, duration_ms: u64) {
        {
            let mut table = self.inner.table();
            if let Some(stored) = table.jobs.get_mut(&job.id) {
                stored.status = JobStatus::Completed;
                stored.completed_at = Some(Utc::now());
                stored.result = Some(JobOutput {
                    output_size: outcome.transcript_len(),
                    processing_duration_ms: duration_ms,
                });
            }
        }
        info!(
            job_id = %job.id,
            media_key = %job.subject_key,
            duration_ms,
            "Job completed"
        );
        let _ = self.inner.event_tx.send(SchedulerEvent::JobCompleted {
            job_id: job.id,
            subject_key: job.subject_key.clone(),
        });
    }

    fn handle_job_error(&self, job: &Job, stage_err: crate::ingest::StageError, duration_ms: u64) {
        let message = stage_err.error.to_string();
        let retryable = stage_err.error.is_retryable();
        let attempts = job.attempts;
        let exhausted = attempts >= job.max_attempts;

        if !retryable || exhausted {
            {
                let mut table = self.inner.table();
                if let Some(stored) = table.jobs.get_mut(&job.id) {
                    stored.status = JobStatus::Failed;
                    stored.completed_at = Some(Utc::now());
                    stored.last_error = Some(message.clone());
                }
                table.batch_errors.push(BatchError {
                    subject_key: job.subject_key.clone(),
                    stage: stage_err.stage,
                    message: message.clone(),
                });
            }
            error!(
                job_id = %job.id,
                media_key = %job.subject_key,
                attempt = attempts,
                permanent = !retryable,
                duration_ms,
                error = %message,
                "Job failed"
            );
            let _ = self.inner.event_tx.send(SchedulerEvent::JobFailed {
                job_id: job.id,
                subject_key: job.subject_key.clone(),
                error: message,
            });
            return;
        }

        let config = &self.inner.config;
        let jitter = if config.retry_jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=config.retry_jitter_ms)
        } else {
            0
        };
        let delay_ms = config
            .retry_delay_base_ms
            .saturating_mul(1 << (attempts - 1).max(0) as u32)
            + jitter;

        {
            let mut table = self.inner.table();
            if let Some(stored) = table.jobs.get_mut(&job.id) {
                stored.status = JobStatus::Retrying;
                stored.last_error = Some(message.clone());
            }
        }
        warn!(
            job_id = %job.id,
            media_key = %job.subject_key,
            attempt = attempts,
            delay_ms,
            error = %message,
            "Job failed, scheduling retry"
        );
        let _ = self.inner.event_tx.send(SchedulerEvent::JobRetrying {
            job_id: job.id,
            subject_key: job.subject_key.clone(),
            attempt: attempts,
            delay_ms,
        });

        let scheduler = self.clone();
        let job_id = job.id;
        tokio::spawn(async move {
            sleep(Duration::from_millis(delay_ms)).await;
            let mut table = scheduler.inner.table();
            if let Some(stored) = table.jobs.get_mut(&job_id) {
                if stored.status == JobStatus::Retrying {
                    stored.status = JobStatus::Queued;
                    stored.earliest_start = None;
                }
            }
        });
    }

    /// Point-in-time queue summary.
    pub fn status(&self) -> SchedulerStatus {
        let table = self.inner.table();
        let now = Utc::now();

        let mut by_status: HashMap<String, usize> = HashMap::new();
        for job in table.jobs.values() {
            *by_status.entry(job.status.as_str().to_string()).or_insert(0) += 1;
        }

        let queued: Vec<&Job> = table
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .collect();

        let eta_next_secs = if queued.is_empty() {
            None
        } else if queued.iter().any(|j| j.is_dispatchable(now)) {
            Some(0)
        } else {
            queued
                .iter()
                .filter_map(|j| j.earliest_start)
                .map(|t| (t - now).num_seconds().max(0))
                .min()
        };

        SchedulerStatus {
            total_jobs: table.jobs.len(),
            queued: queued.len(),
            active: table.active.len(),
            by_status,
            eta_next_secs,
        }
    }

    /// Jobs, optionally filtered by status, ordered by creation time.
    pub fn list_jobs(&self, status: Option<JobStatus>) -> Vec<Job> {
        let table = self.inner.table();
        let mut jobs: Vec<Job> = table
            .jobs
            .values()
            .filter(|j| status.map(|s| j.status == s).unwrap_or(true))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.created_at, j.id));
        jobs
    }

    /// Batch outcome so far: every terminal job, independent per item.
    pub fn batch_report(&self) -> BatchReport {
        let table = self.inner.table();
        let completed = table
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Completed)
            .count();
        let failed = table
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Failed)
            .count();
        BatchReport {
            processed: completed + failed,
            completed,
            failed,
            errors: table.batch_errors.clone(),
        }
    }
}
