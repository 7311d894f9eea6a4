use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serpent::error::EngineError;
use serpent::snake::{Action, GameMode, InteractionKind, SnakeConfig};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::DaemonConfig;
use crate::jobs::{now_unix_ms, JobTable};
use crate::play::PlaySession;
use crate::policy::PolicyStore;
use crate::protocol::{Request, Response};
use crate::runner::JobRunner;

/// Floor for client-chosen watch intervals.
pub const MIN_WATCH_INTERVAL_MS: u64 = 10;

pub struct DaemonState {
    pub config: DaemonConfig,
    pub runner: JobRunner,
    pub play: RwLock<PlaySession>,
    pub shutdown: CancellationToken,
    supervisors: Mutex<Vec<JoinHandle<()>>>,
}

/// Write one JSON line.
pub async fn send<W>(writer: &mut W, resp: &Response) -> Result<(), Box<dyn std::error::Error>>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(serde_json::to_string(resp)?.as_bytes())
        .await?;
    writer.write_all(b"\n").await?;
    Ok(())
}

impl DaemonState {
    pub fn new(config: DaemonConfig) -> Result<Self, EngineError> {
        let jobs = Arc::new(JobTable::new());
        let policies = Arc::new(PolicyStore::new());
        let runner = JobRunner::new(jobs, policies, &config);

        let play_config = SnakeConfig {
            max_steps: config.default_max_steps,
            ..SnakeConfig::with_grid_size(config.default_grid_size)
        };
        let play = PlaySession::new(play_config, now_unix_ms())?;

        Ok(Self {
            config,
            runner,
            play: RwLock::new(play),
            shutdown: CancellationToken::new(),
            supervisors: Mutex::new(Vec::new()),
        })
    }

    pub fn jobs(&self) -> &JobTable {
        self.runner.jobs()
    }

    /// Stop accepting work and ask every live session to wind down.
    pub fn begin_shutdown(&self) {
        let active = self.jobs().active_ids();
        for id in &active {
            self.jobs().request_cancel(id);
        }
        if !active.is_empty() {
            info!(
                tracked = self.jobs().len(),
                "Shutdown: cancelled {} running job(s)",
                active.len()
            );
        }
        self.shutdown.cancel();
    }

    fn track(&self, supervisor: JoinHandle<()>) {
        let mut held = self
            .supervisors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        held.retain(|h| !h.is_finished());
        held.push(supervisor);
    }

    /// Wait up to `grace` for every launched session to record its terminal
    /// status. Returns how many were still running when time ran out.
    pub async fn drain(&self, grace: Duration) -> usize {
        let held: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self
                .supervisors
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let deadline = time::Instant::now() + grace;
        let mut pending = 0;
        for handle in held {
            if time::timeout_at(deadline, handle).await.is_err() {
                pending += 1;
            }
        }
        pending
    }

    /// Stream `run_id`'s status as `Job` lines every `interval_ms` until it is
    /// terminal (then `WatchEnd`) or gone (then `JobUnknown`). Shutdown ends
    /// the stream without a final line.
    pub async fn watch_job<W>(
        &self,
        writer: &mut W,
        run_id: String,
        interval_ms: Option<u64>,
    ) -> Result<(), Box<dyn std::error::Error>>
    where
        W: AsyncWrite + Unpin,
    {
        let period = interval_ms
            .unwrap_or(self.config.watch_interval_ms)
            .max(MIN_WATCH_INTERVAL_MS);
        let mut ticker = time::interval(Duration::from_millis(period));

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.cancelled() => return Ok(()),
            }

            let Some(job) = self.jobs().get_status(&run_id) else {
                send(writer, &Response::JobUnknown { run_id }).await?;
                return Ok(());
            };
            let status = job.status;
            send(writer, &Response::Job { job }).await?;

            if status.is_terminal() {
                let end = Response::WatchEnd {
                    run_id,
                    status: Some(status),
                };
                send(writer, &end).await?;
                return Ok(());
            }
        }
    }

    /// Answer a single request. `WatchJob` streams and is handled by the
    /// connection loop; here it returns one snapshot.
    pub async fn handle_request(&self, request: Request) -> Response {
        match request {
            Request::StartTraining { request } => match self.runner.start(&request) {
                Ok(launched) => {
                    self.track(launched.supervisor);
                    Response::TrainingStarted {
                        run_id: launched.run_id,
                    }
                }
                Err(e) => {
                    warn!("StartTraining rejected: {}", e);
                    Response::error(e)
                }
            },

            Request::JobStatus { run_id } | Request::WatchJob { run_id, .. } => {
                match self.jobs().get_status(&run_id) {
                    Some(job) => Response::Job { job },
                    None => Response::JobUnknown { run_id },
                }
            }

            Request::CancelJob { run_id } => {
                if self.jobs().request_cancel(&run_id) {
                    Response::success(format!("Cancellation requested for {}", run_id))
                } else {
                    Response::success(format!("No live job {}", run_id))
                }
            }

            Request::CleanupJob { run_id } => {
                if self.jobs().cleanup(&run_id) {
                    Response::success(format!("Removed {}", run_id))
                } else if self.jobs().is_attached(&run_id) {
                    Response::error(format!("Job {} is still running", run_id))
                } else {
                    Response::success(format!("No job {}", run_id))
                }
            }

            Request::ActiveJobs => Response::ActiveJobs {
                run_ids: self.jobs().active_ids(),
            },

            Request::ListPolicies => Response::Policies {
                policies: self.runner.policies().list(),
            },

            Request::PlayReset {
                grid_size,
                mode,
                seed,
            } => {
                let mode = match mode.as_deref().map(GameMode::parse).transpose() {
                    Ok(m) => m,
                    Err(e) => return Response::error(e),
                };
                let mut play = self.play.write().await;
                match play.reset(grid_size, mode, seed) {
                    Ok(view) => Response::PlayState { view },
                    Err(e) => Response::error(e),
                }
            }

            Request::PlayStep { action } => {
                let action = match action.as_deref().map(Action::parse).transpose() {
                    Ok(a) => a,
                    Err(e) => return Response::error(e),
                };
                let mut play = self.play.write().await;
                let outcome = play.step(action);
                Response::PlayStep {
                    outcome,
                    state: play.view(),
                }
            }

            Request::PlayInteract { kind, x, y } => {
                let kind = match InteractionKind::parse(&kind) {
                    Ok(k) => k,
                    Err(e) => return Response::error(e),
                };
                let mut play = self.play.write().await;
                match play.interact(kind, x, y) {
                    Ok(()) => Response::success(format!("Queued {} at ({}, {})", kind.as_str(), x, y)),
                    Err(e) => Response::error(e),
                }
            }

            Request::PlaySetMode { mode } => match GameMode::parse(&mode) {
                Ok(mode) => {
                    self.play.write().await.set_mode(mode);
                    Response::success(format!("Mode set to {}", mode.as_str()))
                }
                Err(e) => Response::error(e),
            },

            Request::PlayLoadPolicy { run_id } => {
                let policy = match run_id {
                    None => None,
                    Some(id) => match self.runner.policies().get(&id) {
                        Some(p) => Some(p),
                        None => return Response::error(format!("No trained policy for run {}", id)),
                    },
                };
                let mut play = self.play.write().await;
                play.set_policy(policy);
                Response::PlayState { view: play.view() }
            }

            Request::PlayState => Response::PlayState {
                view: self.play.read().await.view(),
            },

            Request::PlayStart => {
                self.play.write().await.set_running(true);
                Response::success("Play started")
            }

            Request::PlayStop => {
                self.play.write().await.set_running(false);
                Response::success("Play stopped")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStatus;

    fn state() -> DaemonState {
        let config = DaemonConfig {
            default_grid_size: 6,
            default_n_envs: 2,
            report_interval_ms: 0,
            ..DaemonConfig::default()
        };
        DaemonState::new(config).unwrap()
    }

    async fn wait_terminal(s: &DaemonState, run_id: &str) -> JobStatus {
        loop {
            let status = s.jobs().get_status(run_id).unwrap().status;
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn training_round_trip() {
        let s = state();
        let resp = s
            .handle_request(Request::StartTraining {
                request: crate::runner::TrainingRequest {
                    timesteps: 100,
                    seed: Some(1),
                    ..Default::default()
                },
            })
            .await;
        let Response::TrainingStarted { run_id } = resp else {
            panic!("unexpected {:?}", resp);
        };

        assert_eq!(wait_terminal(&s, &run_id).await, JobStatus::Completed);
        let resp = s.handle_request(Request::ListPolicies).await;
        let Response::Policies { policies } = resp else {
            panic!("unexpected {:?}", resp);
        };
        assert_eq!(policies.len(), 1);

        let resp = s
            .handle_request(Request::CleanupJob {
                run_id: run_id.clone(),
            })
            .await;
        assert!(matches!(resp, Response::Success { .. }));
        assert_eq!(
            s.handle_request(Request::JobStatus {
                run_id: run_id.clone()
            })
            .await,
            Response::JobUnknown { run_id }
        );
    }

    #[tokio::test]
    async fn bad_requests_map_to_errors() {
        let s = state();
        let zero = s
            .handle_request(Request::StartTraining {
                request: Default::default(),
            })
            .await;
        assert!(matches!(zero, Response::Error { .. }));

        let bad_action = s
            .handle_request(Request::PlayStep {
                action: Some("sideways".to_string()),
            })
            .await;
        assert!(matches!(bad_action, Response::Error { .. }));

        let bad_cell = s
            .handle_request(Request::PlayInteract {
                kind: "place_food".to_string(),
                x: -1,
                y: 0,
            })
            .await;
        assert!(matches!(bad_cell, Response::Error { .. }));

        let bad_policy = s
            .handle_request(Request::PlayLoadPolicy {
                run_id: Some("nope".to_string()),
            })
            .await;
        assert!(matches!(bad_policy, Response::Error { .. }));
    }

    #[tokio::test]
    async fn play_requests_drive_the_live_game() {
        let s = state();
        let resp = s
            .handle_request(Request::PlayReset {
                grid_size: Some(8),
                mode: Some("obstacles".to_string()),
                seed: Some(4),
            })
            .await;
        let Response::PlayState { view } = resp else {
            panic!("unexpected {:?}", resp);
        };
        assert_eq!(view.state.grid.len(), 8);
        assert_eq!(view.state.mode, GameMode::Obstacles);

        let resp = s
            .handle_request(Request::PlayStep {
                action: Some("left".to_string()),
            })
            .await;
        let Response::PlayStep { outcome, state } = resp else {
            panic!("unexpected {:?}", resp);
        };
        assert_eq!(outcome.action, Action::Left);
        assert_eq!(state.state.score, 1);

        s.handle_request(Request::PlaySetMode {
            mode: "plain".to_string(),
        })
        .await;
        s.handle_request(Request::PlayStart).await;
        let Response::PlayState { view } = s.handle_request(Request::PlayState).await else {
            panic!("expected PlayState");
        };
        assert!(view.running);
        assert_eq!(view.state.mode, GameMode::Plain);
    }

    fn parse_lines(buf: &[u8]) -> Vec<serde_json::Value> {
        std::str::from_utf8(buf)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn watch_streams_until_terminal_then_ends() {
        let s = state();
        let launched = s
            .runner
            .start(&crate::runner::TrainingRequest {
                timesteps: 2_000,
                seed: Some(3),
                ..Default::default()
            })
            .unwrap();

        let mut out = Vec::new();
        s.watch_job(&mut out, launched.run_id.clone(), Some(1))
            .await
            .unwrap();

        let lines = parse_lines(&out);
        let (end, jobs) = lines.split_last().unwrap();
        assert!(!jobs.is_empty());
        assert!(jobs.iter().all(|l| l["type"] == "Job"));
        assert!(jobs.iter().all(|l| l["run_id"] == launched.run_id.as_str()));
        assert_eq!(jobs.last().unwrap()["status"], "completed");
        assert_eq!(end["type"], "WatchEnd");
        assert_eq!(end["status"], "completed");
    }

    #[tokio::test]
    async fn watch_on_unknown_run_sends_one_line() {
        let s = state();
        let mut out = Vec::new();
        s.watch_job(&mut out, "ghost".to_string(), None)
            .await
            .unwrap();

        let lines = parse_lines(&out);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["type"], "JobUnknown");
        assert_eq!(lines[0]["run_id"], "ghost");
    }

    #[tokio::test]
    async fn watch_stops_quietly_on_shutdown() {
        let s = state();
        s.jobs().init("parked", 10);
        s.shutdown.cancel();

        let mut out = Vec::new();
        s.watch_job(&mut out, "parked".to_string(), Some(10_000))
            .await
            .unwrap();
        assert!(parse_lines(&out).iter().all(|l| l["type"] == "Job"));
    }

    #[tokio::test]
    async fn cleanup_of_a_running_job_is_refused() {
        let s = state();
        let resp = s
            .handle_request(Request::StartTraining {
                request: crate::runner::TrainingRequest {
                    timesteps: 50_000_000,
                    seed: Some(5),
                    ..Default::default()
                },
            })
            .await;
        let Response::TrainingStarted { run_id } = resp else {
            panic!("unexpected {:?}", resp);
        };

        let resp = s
            .handle_request(Request::CleanupJob {
                run_id: run_id.clone(),
            })
            .await;
        assert!(matches!(resp, Response::Error { .. }));
        assert!(s.jobs().get_status(&run_id).is_some());

        s.handle_request(Request::CancelJob {
            run_id: run_id.clone(),
        })
        .await;
        assert_eq!(s.drain(std::time::Duration::from_secs(30)).await, 0);
        assert_eq!(
            s.jobs().get_status(&run_id).unwrap().status,
            JobStatus::Cancelled
        );

        let resp = s
            .handle_request(Request::CleanupJob {
                run_id: run_id.clone(),
            })
            .await;
        assert!(matches!(resp, Response::Success { .. }));
        assert!(s.jobs().get_status(&run_id).is_none());
        assert!(s.jobs().is_empty());
    }

    #[tokio::test]
    async fn shutdown_cancels_live_jobs() {
        let s = state();
        let launched = s
            .runner
            .start(&crate::runner::TrainingRequest {
                timesteps: 50_000_000,
                seed: Some(2),
                ..Default::default()
            })
            .unwrap();

        s.begin_shutdown();
        assert!(s.shutdown.is_cancelled());
        launched.supervisor.await.unwrap();
        assert_eq!(
            s.jobs().get_status(&launched.run_id).unwrap().status,
            JobStatus::Cancelled
        );
    }
}
