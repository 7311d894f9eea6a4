//! Launches training sessions on the blocking pool and records how they end.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serpent::error::EngineError;
use serpent::snake::{GameMode, SnakeConfig};
use serpent::vec_env::VecEnv;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::DaemonConfig;
use crate::jobs::{now_unix_ms, JobOutcome, JobStatus, JobTable};
use crate::optimizer::{Optimizer, OptimizerError, QLearner, QParams, QTable, SessionEnd};
use crate::policy::{PolicyInfo, PolicyStore, TrainedPolicy};
use crate::sampler::ProgressSampler;

/// Upper bound on envs per session.
pub const MAX_ENVS: usize = 64;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("timesteps must be positive")]
    ZeroTimesteps,
    #[error("n_envs must be between 1 and 64, got {0}")]
    EnvCount(usize),
    #[error("no trained policy for run {0}")]
    UnknownPolicy(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),
}

/// A client's request to train. Unset fields take the daemon defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingRequest {
    pub timesteps: u64,
    #[serde(default)]
    pub grid_size: Option<usize>,
    #[serde(default)]
    pub n_envs: Option<usize>,
    #[serde(default)]
    pub mode: GameMode,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub max_steps: Option<u32>,
    /// Continue from the policy of a completed run.
    #[serde(default)]
    pub resume_from: Option<String>,
}

/// Everything a session needs, resolved and validated.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub run_id: String,
    pub env: SnakeConfig,
    pub n_envs: usize,
    pub timesteps: u64,
    pub seed: u64,
    pub params: QParams,
    pub resume: Option<(String, QTable)>,
}

#[derive(Debug, Clone)]
struct RunnerDefaults {
    grid_size: usize,
    n_envs: usize,
    max_steps: u32,
    report_interval: Duration,
    params: QParams,
}

pub struct Launched {
    pub run_id: String,
    /// Resolves after the terminal write.
    pub supervisor: JoinHandle<()>,
}

struct SessionReport {
    end: SessionEnd,
    mean_reward: Option<f32>,
    policy: Option<QTable>,
}

#[derive(Clone)]
pub struct JobRunner {
    jobs: Arc<JobTable>,
    policies: Arc<PolicyStore>,
    defaults: Arc<RunnerDefaults>,
}

impl JobRunner {
    pub fn new(jobs: Arc<JobTable>, policies: Arc<PolicyStore>, config: &DaemonConfig) -> Self {
        Self {
            jobs,
            policies,
            defaults: Arc::new(RunnerDefaults {
                grid_size: config.default_grid_size,
                n_envs: config.default_n_envs,
                max_steps: config.default_max_steps,
                report_interval: Duration::from_millis(config.report_interval_ms),
                params: config.q,
            }),
        }
    }

    pub fn jobs(&self) -> &Arc<JobTable> {
        &self.jobs
    }

    pub fn policies(&self) -> &Arc<PolicyStore> {
        &self.policies
    }

    /// Validate `req` against the daemon defaults and the policy store.
    pub fn plan(&self, req: &TrainingRequest) -> Result<SessionPlan, RunnerError> {
        if req.timesteps == 0 {
            return Err(RunnerError::ZeroTimesteps);
        }
        let n_envs = req.n_envs.unwrap_or(self.defaults.n_envs);
        if n_envs == 0 || n_envs > MAX_ENVS {
            return Err(RunnerError::EnvCount(n_envs));
        }

        let mut grid_size = req.grid_size.unwrap_or(self.defaults.grid_size);
        let resume = match &req.resume_from {
            None => None,
            Some(id) => {
                let parent = self
                    .policies
                    .get(id)
                    .ok_or_else(|| RunnerError::UnknownPolicy(id.clone()))?;
                if req.grid_size.is_some_and(|g| g != parent.info.grid_size) {
                    warn!(
                        "Resuming {} on its own grid size {} (requested {})",
                        id, parent.info.grid_size, grid_size
                    );
                }
                grid_size = parent.info.grid_size;
                Some((id.clone(), parent.table.clone()))
            }
        };

        let env = SnakeConfig {
            grid_size,
            max_steps: req.max_steps.unwrap_or(self.defaults.max_steps),
            mode: req.mode,
            ..SnakeConfig::default()
        };
        env.validate()?;
        self.defaults.params.validate()?;

        Ok(SessionPlan {
            run_id: Uuid::new_v4().to_string(),
            env,
            n_envs,
            timesteps: req.timesteps,
            seed: req.seed.unwrap_or_else(now_unix_ms),
            params: self.defaults.params,
            resume,
        })
    }

    /// Start a tabular Q-learning run.
    pub fn start(&self, req: &TrainingRequest) -> Result<Launched, RunnerError> {
        let plan = self.plan(req)?;
        let optimizer: Box<dyn Optimizer> = match &plan.resume {
            Some((_, table)) => Box::new(QLearner::with_table(
                plan.params,
                table.clone(),
                plan.seed,
            )?),
            None => Box::new(QLearner::new(plan.params, plan.seed)?),
        };
        Ok(self.launch(plan, optimizer))
    }

    /// Register `plan` in the job table and run `optimizer` on the blocking
    /// pool. Must be called from within a tokio runtime.
    pub fn launch(&self, plan: SessionPlan, optimizer: Box<dyn Optimizer>) -> Launched {
        let run_id = plan.run_id.clone();
        let token = self.jobs.init(&run_id, plan.timesteps);
        info!(
            run_id = %run_id,
            grid_size = plan.env.grid_size,
            n_envs = plan.n_envs,
            timesteps = plan.timesteps,
            "training started"
        );

        let jobs = self.jobs.clone();
        let policies = self.policies.clone();
        let interval = self.defaults.report_interval;
        let session_plan = plan.clone();
        let session_jobs = jobs.clone();
        let session = tokio::task::spawn_blocking(move || {
            run_session(session_jobs, &session_plan, token, optimizer, interval)
        });

        let supervisor = tokio::spawn(async move {
            let (outcome, report) = match session.await {
                Ok(Ok(report)) => match report.end {
                    SessionEnd::Completed { .. } => (JobOutcome::Completed, Some(report)),
                    SessionEnd::Stopped { .. } => (JobOutcome::Cancelled, None),
                },
                Ok(Err(e)) => (JobOutcome::Failed(e.to_string()), None),
                Err(join) if join.is_panic() => (
                    JobOutcome::Failed(format!(
                        "session panicked: {}",
                        panic_message(join.into_panic())
                    )),
                    None,
                ),
                Err(join) => (JobOutcome::Failed(join.to_string()), None),
            };

            if let JobOutcome::Failed(message) = &outcome {
                error!(run_id = %plan.run_id, "training failed: {}", message);
            }

            let status = jobs.finish(&plan.run_id, outcome);
            info!(
                run_id = %plan.run_id,
                status = status.map(JobStatus::as_str).unwrap_or("gone"),
                "training finished"
            );

            if status == Some(JobStatus::Completed) {
                if let Some(report) = report {
                    register_policy(&policies, &plan, report);
                }
            }
        });

        Launched { run_id, supervisor }
    }
}

fn run_session(
    jobs: Arc<JobTable>,
    plan: &SessionPlan,
    token: CancellationToken,
    mut optimizer: Box<dyn Optimizer>,
    interval: Duration,
) -> Result<SessionReport, RunnerError> {
    let mut envs = VecEnv::new(plan.n_envs, plan.env.clone(), plan.seed)?;
    let mut sampler = ProgressSampler::new(jobs, &plan.run_id, token, plan.timesteps, interval);

    let end = optimizer.learn(&mut envs, plan.timesteps, &mut sampler)?;
    sampler.finish_report(envs.stats());

    Ok(SessionReport {
        end,
        mean_reward: envs.stats().mean_return(),
        policy: optimizer.policy(),
    })
}

fn register_policy(policies: &PolicyStore, plan: &SessionPlan, report: SessionReport) {
    let Some(table) = report.policy else {
        return;
    };
    policies.insert(TrainedPolicy {
        info: PolicyInfo {
            run_id: plan.run_id.clone(),
            grid_size: plan.env.grid_size,
            mode: plan.env.mode,
            timesteps: report.end.timesteps(),
            mean_reward: report.mean_reward,
            parent: plan.resume.as_ref().map(|(id, _)| id.clone()),
            created_ms: now_unix_ms(),
        },
        table,
    });
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
