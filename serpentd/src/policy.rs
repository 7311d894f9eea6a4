//! In-memory registry of policies produced by completed runs.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serpent::snake::{Action, GameMode, SnakeSim};

use crate::optimizer::{state_key, QTable};

#[derive(Debug, Clone, PartialEq)]
pub struct TrainedPolicy {
    pub info: PolicyInfo,
    pub table: QTable,
}

impl TrainedPolicy {
    /// Greedy action for the current board.
    pub fn act(&self, sim: &SnakeSim) -> Action {
        self.table.best_action(state_key(sim))
    }
}

/// What clients see in `ListPolicies`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyInfo {
    pub run_id: String,
    pub grid_size: usize,
    pub mode: GameMode,
    pub timesteps: u64,
    #[serde(default)]
    pub mean_reward: Option<f32>,
    /// Run this policy was resumed from, if any.
    #[serde(default)]
    pub parent: Option<String>,
    pub created_ms: u64,
}

#[derive(Debug, Default)]
pub struct PolicyStore {
    policies: RwLock<HashMap<String, Arc<TrainedPolicy>>>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, policy: TrainedPolicy) {
        let id = policy.info.run_id.clone();
        self.policies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(policy));
    }

    pub fn get(&self, run_id: &str) -> Option<Arc<TrainedPolicy>> {
        self.policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(run_id)
            .cloned()
    }

    /// Oldest first.
    pub fn list(&self) -> Vec<PolicyInfo> {
        let mut out: Vec<PolicyInfo> = self
            .policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|p| p.info.clone())
            .collect();
        out.sort_by(|a, b| {
            a.created_ms
                .cmp(&b.created_ms)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        out
    }
}
