//! Training sessions over a [`VecEnv`].
//!
//! The daemon only relies on the [`Optimizer`] trait: step the envs for a
//! number of timesteps and call the hook after every vector step. The
//! bundled [`QLearner`] is a small tabular learner over a compact view of
//! the board.

use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};
use serpent::error::EngineError;
use serpent::prng::Prng;
use serpent::snake::{Action, SnakeSim};
use serpent::stats::EpisodeStats;
use serpent::vec_env::VecEnv;
use thiserror::Error;

/// Four neighbour-blocked bits times a 3x3 food direction.
pub const STATE_COUNT: usize = 16 * 9;

const N_ACTIONS: usize = Action::ALL.len();

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("invalid optimizer parameter: {0}")]
    InvalidParams(&'static str),
    #[error("q-table has {got} states, expected {expected}")]
    TableShape { expected: usize, got: usize },
    #[error("q-value diverged in state {state}")]
    Diverged { state: usize },
}

/// Called after every vector step with the session's timestep count.
pub trait SessionHook {
    fn on_step(&mut self, timesteps_done: u64, stats: &EpisodeStats) -> ControlFlow<()>;
}

impl<F> SessionHook for F
where
    F: FnMut(u64, &EpisodeStats) -> ControlFlow<()>,
{
    fn on_step(&mut self, timesteps_done: u64, stats: &EpisodeStats) -> ControlFlow<()> {
        self(timesteps_done, stats)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Ran the full budget.
    Completed { timesteps: u64 },
    /// The hook asked to stop early.
    Stopped { timesteps: u64 },
}

impl SessionEnd {
    pub fn timesteps(self) -> u64 {
        match self {
            SessionEnd::Completed { timesteps } | SessionEnd::Stopped { timesteps } => timesteps,
        }
    }
}

pub trait Optimizer: Send {
    fn learn(
        &mut self,
        envs: &mut VecEnv,
        timesteps: u64,
        hook: &mut dyn SessionHook,
    ) -> Result<SessionEnd, OptimizerError>;

    /// Greedy table to register once a session completes.
    fn policy(&self) -> Option<QTable> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QParams {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    #[serde(default = "default_discount")]
    pub discount: f32,
    #[serde(default = "default_epsilon_start")]
    pub epsilon_start: f32,
    #[serde(default = "default_epsilon_end")]
    pub epsilon_end: f32,
    /// Share of the budget over which epsilon decays linearly.
    #[serde(default = "default_exploration_fraction")]
    pub exploration_fraction: f32,
}

fn default_learning_rate() -> f32 {
    0.1
}

fn default_discount() -> f32 {
    0.95
}

fn default_epsilon_start() -> f32 {
    1.0
}

fn default_epsilon_end() -> f32 {
    0.05
}

fn default_exploration_fraction() -> f32 {
    0.5
}

impl Default for QParams {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            discount: default_discount(),
            epsilon_start: default_epsilon_start(),
            epsilon_end: default_epsilon_end(),
            exploration_fraction: default_exploration_fraction(),
        }
    }
}

impl QParams {
    pub fn validate(&self) -> Result<(), OptimizerError> {
        let unit = 0.0..=1.0;
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(OptimizerError::InvalidParams("learning_rate must be in (0, 1]"));
        }
        if !unit.contains(&self.discount) {
            return Err(OptimizerError::InvalidParams("discount must be in [0, 1]"));
        }
        if !unit.contains(&self.epsilon_start) || !unit.contains(&self.epsilon_end) {
            return Err(OptimizerError::InvalidParams("epsilon must be in [0, 1]"));
        }
        if !unit.contains(&self.exploration_fraction) {
            return Err(OptimizerError::InvalidParams(
                "exploration_fraction must be in [0, 1]",
            ));
        }
        Ok(())
    }

    fn epsilon(&self, done: u64, total: u64) -> f32 {
        let horizon = self.exploration_fraction * total as f32;
        let done = done as f32;
        if horizon <= 0.0 || done >= horizon {
            return self.epsilon_end;
        }
        // Weighted form so both endpoints are hit exactly.
        let t = done / horizon;
        self.epsilon_start * (1.0 - t) + self.epsilon_end * t
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QTable {
    values: Vec<[f32; N_ACTIONS]>,
}

impl Default for QTable {
    fn default() -> Self {
        Self::new()
    }
}

impl QTable {
    pub fn new() -> Self {
        Self {
            values: vec![[0.0; N_ACTIONS]; STATE_COUNT],
        }
    }

    /// Greedy action; ties go to the lowest action index.
    pub fn best_action(&self, state: usize) -> Action {
        let Some(row) = self.values.get(state) else {
            return Action::Up;
        };
        let mut best = 0;
        for (i, v) in row.iter().enumerate().skip(1) {
            if *v > row[best] {
                best = i;
            }
        }
        Action::ALL[best]
    }

    fn max_value(&self, state: usize) -> f32 {
        self.values
            .get(state)
            .map(|row| row.iter().copied().fold(f32::NEG_INFINITY, f32::max))
            .unwrap_or(0.0)
    }

    fn nudge(&mut self, state: usize, action: Action, target: f32, lr: f32) -> Option<f32> {
        let q = self.values.get_mut(state)?.get_mut(action.index() as usize)?;
        *q += lr * (target - *q);
        Some(*q)
    }
}

/// Compact state for `sim`: which neighbours of the head are blocked, and
/// which way the food lies.
pub fn state_key(sim: &SnakeSim) -> usize {
    let Some(head) = sim.head() else {
        return 0;
    };
    let (hr, hc) = (head.row as i64, head.col as i64);

    let mut blocked = 0usize;
    for (bit, a) in Action::ALL.iter().enumerate() {
        let (dr, dc) = a.delta();
        if sim.is_blocked(hr + dr, hc + dc) {
            blocked |= 1 << bit;
        }
    }

    let (dy, dx) = match sim.food() {
        Some(f) => (sign_bucket(f.row as i64 - hr), sign_bucket(f.col as i64 - hc)),
        None => (1, 1),
    };
    blocked * 9 + dy * 3 + dx
}

fn sign_bucket(d: i64) -> usize {
    match d.signum() {
        -1 => 0,
        0 => 1,
        _ => 2,
    }
}

#[derive(Debug, Clone)]
pub struct QLearner {
    params: QParams,
    table: QTable,
    rng: Prng,
}

impl QLearner {
    pub fn new(params: QParams, seed: u64) -> Result<Self, OptimizerError> {
        Self::with_table(params, QTable::new(), seed)
    }

    /// Continue from an existing table.
    pub fn with_table(params: QParams, table: QTable, seed: u64) -> Result<Self, OptimizerError> {
        params.validate()?;
        if table.values.len() != STATE_COUNT {
            return Err(OptimizerError::TableShape {
                expected: STATE_COUNT,
                got: table.values.len(),
            });
        }
        Ok(Self {
            params,
            table,
            rng: Prng::new(seed),
        })
    }

    fn pick(&mut self, state: usize, epsilon: f32) -> Action {
        if self.rng.chance(epsilon) {
            Action::ALL[self.rng.index(N_ACTIONS)]
        } else {
            self.table.best_action(state)
        }
    }
}

impl Optimizer for QLearner {
    fn learn(
        &mut self,
        envs: &mut VecEnv,
        timesteps: u64,
        hook: &mut dyn SessionHook,
    ) -> Result<SessionEnd, OptimizerError> {
        let per_step = envs.len() as u64;
        let mut states: Vec<usize> = envs.envs().map(state_key).collect();
        let mut done = 0u64;

        while done < timesteps {
            let epsilon = self.params.epsilon(done, timesteps);
            let actions: Vec<Action> = states
                .iter()
                .map(|&s| self.pick(s, epsilon))
                .collect();

            let out = envs.step(&actions)?;

            for (i, t) in out.iter().enumerate() {
                let next = envs.env(i).map(state_key).unwrap_or(0);
                // Envs have already auto-reset, so `next` belongs to a new
                // episode whenever this one ended.
                let target = if t.done() {
                    t.reward
                } else {
                    t.reward + self.params.discount * self.table.max_value(next)
                };
                let q = self
                    .table
                    .nudge(states[i], actions[i], target, self.params.learning_rate)
                    .unwrap_or(0.0);
                if !q.is_finite() {
                    return Err(OptimizerError::Diverged { state: states[i] });
                }
                states[i] = next;
            }

            done += per_step;
            if hook.on_step(done, envs.stats()).is_break() {
                return Ok(SessionEnd::Stopped { timesteps: done });
            }
        }

        Ok(SessionEnd::Completed { timesteps: done })
    }

    fn policy(&self) -> Option<QTable> {
        Some(self.table.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serpent::snake::{GameMode, InteractionKind, SnakeConfig};

    fn envs(n: usize, seed: u64) -> VecEnv {
        VecEnv::new(n, SnakeConfig::with_grid_size(6), seed).unwrap()
    }

    #[test]
    fn runs_the_full_budget() {
        let mut v = envs(4, 3);
        let mut learner = QLearner::new(QParams::default(), 3).unwrap();
        let mut calls = 0u64;
        let mut hook = |_: u64, _: &EpisodeStats| {
            calls += 1;
            ControlFlow::Continue(())
        };

        let end = learner.learn(&mut v, 400, &mut hook).unwrap();
        assert_eq!(end, SessionEnd::Completed { timesteps: 400 });
        assert_eq!(calls, 100);
        assert_eq!(v.timesteps(), 400);
        assert!(v.stats().episodes > 0);
    }

    #[test]
    fn hook_break_stops_after_that_step() {
        let mut v = envs(2, 9);
        let mut learner = QLearner::new(QParams::default(), 9).unwrap();
        let mut hook = |done: u64, _: &EpisodeStats| {
            if done >= 10 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        };

        let end = learner.learn(&mut v, 1_000, &mut hook).unwrap();
        assert_eq!(end, SessionEnd::Stopped { timesteps: 10 });
        assert_eq!(v.timesteps(), 10);
    }

    #[test]
    fn learning_moves_the_table() {
        let mut v = envs(4, 21);
        let mut learner = QLearner::new(QParams::default(), 21).unwrap();
        let mut hook = |_: u64, _: &EpisodeStats| ControlFlow::Continue(());
        learner.learn(&mut v, 2_000, &mut hook).unwrap();
        assert_ne!(learner.table, QTable::new());
    }

    #[test]
    fn rejects_bad_params_and_tables() {
        let bad = QParams {
            learning_rate: 0.0,
            ..QParams::default()
        };
        assert!(matches!(
            QLearner::new(bad, 0),
            Err(OptimizerError::InvalidParams(_))
        ));

        let table = QTable { values: vec![] };
        assert!(matches!(
            QLearner::with_table(QParams::default(), table, 0),
            Err(OptimizerError::TableShape { got: 0, .. })
        ));
    }

    #[test]
    fn epsilon_decays_linearly_then_holds() {
        let p = QParams::default();
        assert_eq!(p.epsilon(0, 100), 1.0);
        assert!((p.epsilon(25, 100) - 0.525).abs() < 1e-6);
        assert_eq!(p.epsilon(50, 100), 0.05);
        assert_eq!(p.epsilon(90, 100), 0.05);

        let odd = QParams {
            epsilon_start: 0.9,
            epsilon_end: 0.1,
            exploration_fraction: 0.3,
            ..QParams::default()
        };
        assert_eq!(odd.epsilon(0, 7), 0.9);
        assert_eq!(odd.epsilon(3, 7), 0.1);
        assert_eq!(odd.epsilon(7, 7), 0.1);
        assert!(odd.epsilon(1, 7) < 0.9 && odd.epsilon(1, 7) > 0.1);
        assert_eq!(QParams::default().epsilon(0, 0), 0.05);
    }

    #[test]
    fn state_key_sees_walls_and_food() {
        let cfg = SnakeConfig::with_grid_size(5).with_mode(GameMode::Plain);
        let mut sim = SnakeSim::new(cfg, 1).unwrap();
        sim.queue_interaction(InteractionKind::PlaceFood, 4, 0).unwrap();
        sim.reset(None);

        let food = sim.food().unwrap();
        assert_eq!((food.row, food.col), (0, 4));

        // Lone head in the centre, food up and to the right.
        assert_eq!(state_key(&sim), 2);

        // Food straight below, head against the top edge after moving up twice.
        sim.queue_interaction(InteractionKind::PlaceFood, 2, 4).unwrap();
        sim.reset(None);
        sim.step(Action::Up);
        sim.step(Action::Up);
        let up_blocked = 1;
        assert_eq!(state_key(&sim), up_blocked * 9 + 2 * 3 + 1);
    }
}
