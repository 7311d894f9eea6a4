//! A batch of independent simulations stepped in lockstep.
//!
//! Every env auto-resets when its episode ends, and finished episodes are
//! folded into one shared [`EpisodeStats`] window. Each env is owned by
//! exactly one slot; with the `parallel` feature the slots are stepped on
//! the rayon pool, one worker per slot at a time.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::EngineError;
use crate::snake::{Action, SnakeConfig, SnakeSim};
use crate::stats::{EpisodeRecord, EpisodeStats};

#[derive(Debug, Clone)]
struct EnvSlot {
    sim: SnakeSim,
    episode_return: f32,
    episode_len: u32,
}

impl EnvSlot {
    fn step(&mut self, action: Action) -> VecTransition {
        let r = self.sim.step(action);
        self.episode_return += r.reward;
        self.episode_len += 1;

        let finished = if r.done() {
            let rec = EpisodeRecord {
                episode_return: self.episode_return,
                length: self.episode_len,
            };
            self.sim.reset(None);
            self.episode_return = 0.0;
            self.episode_len = 0;
            Some(rec)
        } else {
            None
        };

        VecTransition {
            reward: r.reward,
            terminated: r.terminated,
            truncated: r.truncated,
            ate: r.info.ate,
            finished,
        }
    }
}

/// Outcome of one env in one vector step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VecTransition {
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
    pub ate: bool,
    /// Set when this step ended an episode; the env has already been reset.
    pub finished: Option<EpisodeRecord>,
}

impl VecTransition {
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

#[derive(Debug, Clone)]
pub struct VecEnv {
    slots: Vec<EnvSlot>,
    stats: EpisodeStats,
    timesteps: u64,
}

impl VecEnv {
    /// Env `i` is seeded with `seed + i`.
    pub fn new(n: usize, config: SnakeConfig, seed: u64) -> Result<Self, EngineError> {
        if n == 0 {
            return Err(EngineError::InvalidConfig("need at least one env"));
        }
        let slots = (0..n)
            .map(|i| {
                SnakeSim::new(config.clone(), seed.wrapping_add(i as u64)).map(|sim| EnvSlot {
                    sim,
                    episode_return: 0.0,
                    episode_len: 0,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            slots,
            stats: EpisodeStats::new(),
            timesteps: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn env(&self, i: usize) -> Option<&SnakeSim> {
        self.slots.get(i).map(|s| &s.sim)
    }

    pub fn envs(&self) -> impl Iterator<Item = &SnakeSim> + '_ {
        self.slots.iter().map(|s| &s.sim)
    }

    pub fn stats(&self) -> &EpisodeStats {
        &self.stats
    }

    /// Total env steps taken (vector steps times env count).
    pub fn timesteps(&self) -> u64 {
        self.timesteps
    }

    pub fn grid_size(&self) -> usize {
        self.slots.first().map(|s| s.sim.grid_size()).unwrap_or(0)
    }

    /// Reset every env and drop unfinished episode accumulators.
    pub fn reset(&mut self) {
        for s in &mut self.slots {
            s.sim.reset(None);
            s.episode_return = 0.0;
            s.episode_len = 0;
        }
    }

    pub fn step(&mut self, actions: &[Action]) -> Result<Vec<VecTransition>, EngineError> {
        if actions.len() != self.slots.len() {
            return Err(EngineError::ActionCount {
                expected: self.slots.len(),
                got: actions.len(),
            });
        }

        #[cfg(feature = "parallel")]
        let out: Vec<VecTransition> = self
            .slots
            .par_iter_mut()
            .zip(actions.par_iter())
            .map(|(slot, &a)| slot.step(a))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let out: Vec<VecTransition> = self
            .slots
            .iter_mut()
            .zip(actions.iter())
            .map(|(slot, &a)| slot.step(a))
            .collect();

        // Fold in env order so the window is identical with or without rayon.
        for t in &out {
            if let Some(rec) = t.finished {
                self.stats.record_episode(rec.episode_return, rec.length);
            }
        }
        self.timesteps += out.len() as u64;
        Ok(out)
    }
}
