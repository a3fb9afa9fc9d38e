use std::str::FromStr;
use std::time::Duration;

use gdc_core::retry::RetryPolicy;

use crate::error::PipelineError;

/// Pipeline tuning loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Workers draining the saga kick-off queue.
    pub saga_workers: usize,
    /// Bound on queued kick-offs; ingest waits when the queue is full.
    pub saga_queue_capacity: usize,
    /// Backoff for registry lookups and channel publishes.
    pub retry: RetryPolicy,
    /// LOADED filesets idle, and SUPERSEDED ones replaced, longer than this
    /// are purged along with orphaned terminal sagas.
    pub stale_fileset_ttl: chrono::Duration,
    pub purge_interval: Duration,
    /// Non-terminal sagas idle longer than this are republished.
    pub saga_stall_threshold: chrono::Duration,
    pub saga_sweep_interval: Duration,
    /// Republishes allowed before a stalled saga is marked ERROR.
    pub saga_max_republishes: i32,
    /// Sagas examined per sweep.
    pub saga_sweep_batch: i64,
    pub completion_check_interval: Duration,
    /// How long fetched registry code tables are reused.
    pub code_table_ttl: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            saga_workers: 4,
            saga_queue_capacity: 1000,
            retry: RetryPolicy::default(),
            stale_fileset_ttl: chrono::Duration::hours(72),
            purge_interval: Duration::from_secs(3600),
            saga_stall_threshold: chrono::Duration::seconds(600),
            saga_sweep_interval: Duration::from_secs(60),
            saga_max_republishes: 3,
            saga_sweep_batch: 100,
            completion_check_interval: Duration::from_secs(30),
            code_table_ttl: Duration::from_secs(3600),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default |
    /// |-----------------------------------|---------|
    /// | `SAGA_WORKERS`                    | `4`     |
    /// | `SAGA_QUEUE_CAPACITY`             | `1000`  |
    /// | `RETRY_MAX_ATTEMPTS`              | `5`     |
    /// | `RETRY_INITIAL_DELAY_MS`          | `500`   |
    /// | `RETRY_MULTIPLIER`                | `2.0`   |
    /// | `RETRY_MAX_DELAY_MS`              | `30000` |
    /// | `STALE_FILESET_TTL_HOURS`         | `72`    |
    /// | `PURGE_INTERVAL_SECS`             | `3600`  |
    /// | `SAGA_STALL_THRESHOLD_SECS`       | `600`   |
    /// | `SAGA_SWEEP_INTERVAL_SECS`        | `60`    |
    /// | `SAGA_MAX_REPUBLISHES`            | `3`     |
    /// | `SAGA_SWEEP_BATCH`                | `100`   |
    /// | `COMPLETION_CHECK_INTERVAL_SECS`  | `30`    |
    /// | `CODE_TABLE_TTL_SECS`             | `3600`  |
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PipelineError> {
        let d = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let saga_workers: usize = parse(&var, "SAGA_WORKERS", d.saga_workers)?;
        if saga_workers == 0 {
            return Err(PipelineError::Config("SAGA_WORKERS must be at least 1".into()));
        }
        let saga_queue_capacity: usize = parse(&var, "SAGA_QUEUE_CAPACITY", d.saga_queue_capacity)?;
        if saga_queue_capacity == 0 {
            return Err(PipelineError::Config("SAGA_QUEUE_CAPACITY must be at least 1".into()));
        }

        let retry = RetryPolicy {
            max_attempts: parse(&var, "RETRY_MAX_ATTEMPTS", d.retry.max_attempts)?,
            initial_delay: Duration::from_millis(parse(
                &var,
                "RETRY_INITIAL_DELAY_MS",
                d.retry.initial_delay.as_millis() as u64,
            )?),
            multiplier: parse(&var, "RETRY_MULTIPLIER", d.retry.multiplier)?,
            max_delay: Duration::from_millis(parse(
                &var,
                "RETRY_MAX_DELAY_MS",
                d.retry.max_delay.as_millis() as u64,
            )?),
        };
        if retry.multiplier < 1.0 {
            return Err(PipelineError::Config("RETRY_MULTIPLIER must be >= 1.0".into()));
        }

        Ok(Self {
            saga_workers,
            saga_queue_capacity,
            retry,
            stale_fileset_ttl: chrono::Duration::hours(parse(
                &var,
                "STALE_FILESET_TTL_HOURS",
                d.stale_fileset_ttl.num_hours(),
            )?),
            purge_interval: Duration::from_secs(parse(&var, "PURGE_INTERVAL_SECS", d.purge_interval.as_secs())?),
            saga_stall_threshold: chrono::Duration::seconds(parse(
                &var,
                "SAGA_STALL_THRESHOLD_SECS",
                d.saga_stall_threshold.num_seconds(),
            )?),
            saga_sweep_interval: Duration::from_secs(parse(
                &var,
                "SAGA_SWEEP_INTERVAL_SECS",
                d.saga_sweep_interval.as_secs(),
            )?),
            saga_max_republishes: parse(&var, "SAGA_MAX_REPUBLISHES", d.saga_max_republishes)?,
            saga_sweep_batch: parse(&var, "SAGA_SWEEP_BATCH", d.saga_sweep_batch)?,
            completion_check_interval: Duration::from_secs(parse(
                &var,
                "COMPLETION_CHECK_INTERVAL_SECS",
                d.completion_check_interval.as_secs(),
            )?),
            code_table_ttl: Duration::from_secs(parse(&var, "CODE_TABLE_TTL_SECS", d.code_table_ttl.as_secs())?),
        })
    }
}

fn parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T, PipelineError> {
    match var(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| PipelineError::Config(format!("{name} has invalid value '{raw}'"))),
    }
}
