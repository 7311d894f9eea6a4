//! Process-wide training job table.
//!
//! One session writes snapshots, any number of request handlers read them,
//! and cancellation requests raise a flag the session polls. Records are
//! immutable values replaced whole under a short write lock, so a reader
//! always sees exactly one snapshot.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Initializing,
    Running,
    Completed,
    Cancelled,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Error
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Initializing => "initializing",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub run_id: String,
    pub status: JobStatus,
    pub progress: f32,
    pub timesteps_done: u64,
    pub timesteps_total: u64,
    #[serde(default)]
    pub stats: BTreeMap<String, f64>,
    pub last_updated_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobRecord {
    fn initializing(run_id: &str, timesteps_total: u64) -> Self {
        Self {
            run_id: run_id.to_string(),
            status: JobStatus::Initializing,
            progress: 0.0,
            timesteps_done: 0,
            timesteps_total,
            stats: BTreeMap::new(),
            last_updated_ms: now_unix_ms(),
            error_message: None,
        }
    }
}

/// A full progress snapshot written by the sampler.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub progress: f32,
    pub stats: BTreeMap<String, f64>,
    pub timesteps_done: u64,
    pub timesteps_total: u64,
    pub status: JobStatus,
}

impl JobUpdate {
    pub fn running(
        progress: f32,
        stats: BTreeMap<String, f64>,
        timesteps_done: u64,
        timesteps_total: u64,
    ) -> Self {
        Self {
            progress,
            stats,
            timesteps_done,
            timesteps_total,
            status: JobStatus::Running,
        }
    }
}

/// How a session ended, as reported by the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Default)]
struct TableInner {
    records: HashMap<String, Arc<JobRecord>>,
    cancelled: HashSet<String>,
    tokens: HashMap<String, CancellationToken>,
}

#[derive(Debug, Default)]
pub struct JobTable {
    inner: RwLock<TableInner>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) the record for `run_id` and hand back the token
    /// the session polls for cancellation.
    pub fn init(&self, run_id: &str, timesteps_total: u64) -> CancellationToken {
        let token = CancellationToken::new();
        let record = Arc::new(JobRecord::initializing(run_id, timesteps_total));

        let mut inner = self.write();
        inner.records.insert(run_id.to_string(), record);
        inner.cancelled.remove(run_id);
        if let Some(old) = inner.tokens.insert(run_id.to_string(), token.clone()) {
            old.cancel();
        }
        debug!(run_id, timesteps_total, "job initialized");
        token
    }

    /// Replace the stored snapshot. Unknown ids are created; terminal records
    /// are left alone and `false` is returned.
    pub fn update(&self, run_id: &str, update: JobUpdate) -> bool {
        let timesteps_total = update.timesteps_total;
        let record = Arc::new(JobRecord {
            run_id: run_id.to_string(),
            status: update.status,
            progress: clamp_progress(update.progress),
            timesteps_done: update.timesteps_done.min(timesteps_total),
            timesteps_total,
            stats: update.stats,
            last_updated_ms: now_unix_ms(),
            error_message: None,
        });

        let mut inner = self.write();
        if let Some(existing) = inner.records.get(run_id) {
            if existing.status.is_terminal() {
                return false;
            }
        }
        inner.records.insert(run_id.to_string(), record);
        true
    }

    /// Latest snapshot. A run flagged for cancellation reads as `cancelled`
    /// regardless of the stored progress. Unknown and cleaned-up ids both
    /// return `None`.
    pub fn get_status(&self, run_id: &str) -> Option<JobRecord> {
        let inner = self.read();
        let stored = inner.records.get(run_id)?;
        let mut record = JobRecord::clone(stored);
        if inner.cancelled.contains(run_id) {
            record.status = JobStatus::Cancelled;
            record.error_message = None;
        }
        Some(record)
    }

    /// Flag a live run for cancellation. Returns `false` for unknown or
    /// already-terminal runs, which are left untouched.
    pub fn request_cancel(&self, run_id: &str) -> bool {
        let mut inner = self.write();
        let live = inner
            .records
            .get(run_id)
            .is_some_and(|r| !r.status.is_terminal());
        if !live {
            return false;
        }

        if inner.cancelled.insert(run_id.to_string()) {
            info!(run_id, "cancellation requested");
        }
        if let Some(token) = inner.tokens.get(run_id) {
            token.cancel();
        }
        true
    }

    pub fn should_stop(&self, run_id: &str) -> bool {
        self.read().cancelled.contains(run_id)
    }

    /// Terminal write by the runner. A run flagged for cancellation is
    /// recorded as cancelled whatever the session reported.
    pub fn finish(&self, run_id: &str, outcome: JobOutcome) -> Option<JobStatus> {
        let mut inner = self.write();
        let flagged = inner.cancelled.contains(run_id);
        let stored = inner.records.get(run_id)?;
        let mut record = JobRecord::clone(stored);

        match outcome {
            _ if flagged => {
                record.status = JobStatus::Cancelled;
                record.error_message = None;
            }
            JobOutcome::Completed => {
                record.status = JobStatus::Completed;
                record.progress = 1.0;
                record.error_message = None;
            }
            JobOutcome::Cancelled => {
                record.status = JobStatus::Cancelled;
                record.error_message = None;
            }
            JobOutcome::Failed(message) => {
                record.status = JobStatus::Error;
                record.error_message = Some(message);
            }
        }
        record.last_updated_ms = now_unix_ms();

        let status = record.status;
        inner.records.insert(run_id.to_string(), Arc::new(record));
        inner.tokens.remove(run_id);
        Some(status)
    }

    /// Drop the record and any cancellation state for `run_id`.
    ///
    /// A run whose session is still attached (its token has not been
    /// released by `finish`) is refused with `false` and left intact, so the
    /// session's last snapshot and terminal write cannot bring it back.
    pub fn cleanup(&self, run_id: &str) -> bool {
        let mut inner = self.write();
        if inner.tokens.contains_key(run_id) {
            debug!(run_id, "cleanup refused, session still attached");
            return false;
        }
        inner.cancelled.remove(run_id);
        let removed = inner.records.remove(run_id).is_some();
        if removed {
            debug!(run_id, "job cleaned up");
        }
        removed
    }

    /// Whether a session still holds `run_id`'s token.
    pub fn is_attached(&self, run_id: &str) -> bool {
        self.read().tokens.contains_key(run_id)
    }

    /// Ids of runs that have not reached a terminal state, sorted.
    pub fn active_ids(&self) -> Vec<String> {
        let inner = self.read();
        let mut ids: Vec<String> = inner
            .records
            .values()
            .filter(|r| !r.status.is_terminal() && !inner.cancelled.contains(&r.run_id))
            .map(|r| r.run_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of records, live or terminal.
    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }

    // A panic while holding the lock cannot leave a half-written record
    // behind (records are replaced whole), so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, TableInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TableInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn clamp_progress(p: f32) -> f32 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
