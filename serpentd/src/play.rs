//! The live game shown to viewers.
//!
//! A single [`PlaySession`] is driven either by explicit `PlayStep` requests
//! or by the daemon's game loop while `running` is set. Moves come from the
//! request, the loaded policy, or the last direction a human chose.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serpent::error::EngineError;
use serpent::snake::{
    Action, Cell, GameMode, InteractionKind, SnakeConfig, SnakeSim, SnakeState, StepInfo,
};
use serpent::walls::WallPhase;

use crate::policy::TrainedPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayView {
    #[serde(flatten)]
    pub state: SnakeState,
    pub food: Option<Cell>,
    pub wall_phase: WallPhase,
    pub running: bool,
    /// Run id of the policy steering the snake, if any.
    pub policy: Option<String>,
    pub episode_return: f32,
    pub episodes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayOutcome {
    pub action: Action,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
    pub info: StepInfo,
}

#[derive(Debug)]
pub struct PlaySession {
    sim: SnakeSim,
    running: bool,
    policy: Option<Arc<TrainedPolicy>>,
    heading: Action,
    episode_return: f32,
    episodes: u64,
    finished: bool,
}

impl PlaySession {
    pub fn new(config: SnakeConfig, seed: u64) -> Result<Self, EngineError> {
        Ok(Self {
            sim: SnakeSim::new(config, seed)?,
            running: false,
            policy: None,
            heading: Action::Up,
            episode_return: 0.0,
            episodes: 0,
            finished: false,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// Steer with `policy`, or hand control back to the human with `None`.
    pub fn set_policy(&mut self, policy: Option<Arc<TrainedPolicy>>) {
        self.policy = policy;
    }

    /// Start a new episode. A different grid size rebuilds the simulation.
    pub fn reset(
        &mut self,
        grid_size: Option<usize>,
        mode: Option<GameMode>,
        seed: Option<u64>,
    ) -> Result<PlayView, EngineError> {
        let mode = mode.unwrap_or(self.sim.mode());
        match grid_size {
            Some(n) if n != self.sim.grid_size() => {
                let config = SnakeConfig {
                    grid_size: n,
                    mode,
                    ..self.sim.config().clone()
                };
                let seed = seed.unwrap_or_else(|| self.episodes.wrapping_add(n as u64));
                self.sim = SnakeSim::new(config, seed)?;
            }
            _ => {
                self.sim.set_mode(mode);
                self.sim.reset(seed);
            }
        }

        self.heading = Action::Up;
        self.episode_return = 0.0;
        self.finished = false;
        Ok(self.view())
    }

    /// Advance one move. `None` defers to the policy, then to the current
    /// heading.
    pub fn step(&mut self, action: Option<Action>) -> PlayOutcome {
        let action = match (action, &self.policy) {
            (Some(a), _) => a,
            (None, Some(p)) => p.act(&self.sim),
            (None, None) => self.heading,
        };
        self.heading = action;

        let r = self.sim.step(action);
        self.episode_return += r.reward;
        if r.done() {
            self.finished = true;
            self.episodes += 1;
        }

        PlayOutcome {
            action,
            reward: r.reward,
            terminated: r.terminated,
            truncated: r.truncated,
            info: r.info,
        }
    }

    /// One game-loop frame: restart a finished episode, otherwise step.
    pub fn tick(&mut self) -> Option<PlayOutcome> {
        if self.finished {
            self.sim.reset(None);
            self.episode_return = 0.0;
            self.finished = false;
            return None;
        }
        Some(self.step(None))
    }

    pub fn interact(&mut self, kind: InteractionKind, x: i64, y: i64) -> Result<(), EngineError> {
        self.sim.queue_interaction(kind, x, y)
    }

    pub fn set_mode(&mut self, mode: GameMode) {
        self.sim.set_mode(mode);
    }

    pub fn view(&self) -> PlayView {
        PlayView {
            state: self.sim.get_state(),
            food: self.sim.food(),
            wall_phase: self.sim.wall_phase(),
            running: self.running,
            policy: self.policy.as_ref().map(|p| p.info.run_id.clone()),
            episode_return: self.episode_return,
            episodes: self.episodes,
        }
    }
}
