use std::collections::VecDeque;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default size of the rolling episode window.
pub const EPISODE_WINDOW: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EpisodeRecord {
    pub episode_return: f32,
    pub length: u32,
}

/// Rolling statistics over recently completed episodes.
#[derive(Debug, Clone)]
pub struct EpisodeStats {
    recent: VecDeque<EpisodeRecord>,
    window: usize,
    pub episodes: u64,
    pub total_steps: u64,
    pub best_return: Option<f32>,
}

impl EpisodeStats {
    pub fn new() -> Self {
        Self::with_window(EPISODE_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        let window = window.max(1);
        Self {
            recent: VecDeque::with_capacity(window),
            window,
            episodes: 0,
            total_steps: 0,
            best_return: None,
        }
    }

    pub fn record_episode(&mut self, episode_return: f32, length: u32) {
        self.recent.push_back(EpisodeRecord {
            episode_return,
            length,
        });
        if self.recent.len() > self.window {
            self.recent.pop_front();
        }

        self.episodes += 1;
        self.total_steps += u64::from(length);
        self.best_return = Some(match self.best_return {
            Some(b) if b >= episode_return => b,
            _ => episode_return,
        });
    }

    pub fn recent(&self) -> impl Iterator<Item = &EpisodeRecord> + '_ {
        self.recent.iter()
    }

    pub fn recent_len(&self) -> usize {
        self.recent.len()
    }

    /// Mean return over the rolling window, `None` before the first episode.
    pub fn mean_return(&self) -> Option<f32> {
        if self.recent.is_empty() {
            return None;
        }
        let sum: f32 = self.recent.iter().map(|e| e.episode_return).sum();
        Some(sum / self.recent.len() as f32)
    }

    pub fn mean_length(&self) -> Option<f32> {
        if self.recent.is_empty() {
            return None;
        }
        let sum: u64 = self.recent.iter().map(|e| u64::from(e.length)).sum();
        Some(sum as f32 / self.recent.len() as f32)
    }

    pub fn clear(&mut self) {
        self.recent.clear();
        self.episodes = 0;
        self.total_steps = 0;
        self.best_return = None;
    }
}

impl Default for EpisodeStats {
    fn default() -> Self {
        Self::new()
    }
}
