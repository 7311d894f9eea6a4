//! Publishes training progress into the job table while a session runs.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serpent::stats::EpisodeStats;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::jobs::{JobTable, JobUpdate};
use crate::optimizer::SessionHook;

pub struct ProgressSampler {
    table: Arc<JobTable>,
    run_id: String,
    token: CancellationToken,
    target: u64,
    interval: Duration,
    last_report: Option<Instant>,
    last_done: u64,
}

impl ProgressSampler {
    pub fn new(
        table: Arc<JobTable>,
        run_id: impl Into<String>,
        token: CancellationToken,
        target: u64,
        interval: Duration,
    ) -> Self {
        Self {
            table,
            run_id: run_id.into(),
            token,
            target,
            interval,
            last_report: None,
            last_done: 0,
        }
    }

    fn snapshot(&self, done: u64, stats: &EpisodeStats) -> JobUpdate {
        let progress = if self.target == 0 {
            1.0
        } else {
            (done as f64 / self.target as f64).min(1.0) as f32
        };

        let mut out = BTreeMap::new();
        out.insert("episodes".to_string(), stats.episodes as f64);
        if let Some(r) = stats.mean_return() {
            out.insert("mean_reward".to_string(), f64::from(r));
        }
        if let Some(l) = stats.mean_length() {
            out.insert("mean_length".to_string(), f64::from(l));
        }

        JobUpdate::running(progress, out, done.min(self.target), self.target)
    }

    fn report(&mut self, done: u64, stats: &EpisodeStats) {
        let update = self.snapshot(done, stats);
        if !self.table.update(&self.run_id, update) {
            debug!(run_id = %self.run_id, "snapshot dropped, job already terminal");
        }
        self.last_report = Some(Instant::now());
    }

    /// Unthrottled snapshot of the last step seen.
    pub fn finish_report(&mut self, stats: &EpisodeStats) {
        let done = self.last_done;
        self.report(done, stats);
    }
}

impl SessionHook for ProgressSampler {
    fn on_step(&mut self, timesteps_done: u64, stats: &EpisodeStats) -> ControlFlow<()> {
        self.last_done = timesteps_done;
        if self.token.is_cancelled() {
            return ControlFlow::Break(());
        }

        let due = self
            .last_report
            .map_or(true, |t| t.elapsed() >= self.interval);
        if due {
            self.report(timesteps_done, stats);
            if self.table.should_stop(&self.run_id) {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }
}
