//! # serpent
//!
//! A deterministic snake grid-world for reinforcement learning.
//!
//! ## Quick Start
//!
//! ```
//! use serpent::prelude::*;
//!
//! let cfg = SnakeConfig::with_grid_size(8).with_mode(GameMode::Plain);
//! let mut sim = SnakeSim::new(cfg, 42).unwrap();
//!
//! // Drop food at column 1, row 0 on the next placement.
//! sim.queue_interaction(InteractionKind::PlaceFood, 1, 0).unwrap();
//!
//! let r = sim.step(Action::Up);
//! assert!(!r.terminated);
//! assert_eq!(r.observation.size(), 8);
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` (default): Serialize/deserialize configs, cells and snapshots
//! - `parallel`: Step [`vec_env::VecEnv`] workers on the rayon pool
//!
//! ## Modules
//!
//! - [`snake`]: The simulation (`reset`, `step`, `queue_interaction`, `get_state`)
//! - [`walls`]: Dynamic obstacle scheduler
//! - [`vec_env`]: Batched envs with auto-reset and episode monitoring
//! - [`stats`]: Rolling episode statistics

#[path = "core/error.rs"]
pub mod error;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/snake.rs"]
pub mod snake;

#[path = "core/vec_env.rs"]
pub mod vec_env;

#[path = "core/walls.rs"]
pub mod walls;

pub mod stats;

/// Prelude module for convenient imports.
///
/// ```
/// use serpent::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::EngineError;
    pub use crate::snake::{
        Action, Cell, GameMode, InteractionKind, Observation, SnakeConfig, SnakeSim, SnakeState,
        StepInfo, StepResult,
    };
    pub use crate::stats::EpisodeStats;
    pub use crate::vec_env::{VecEnv, VecTransition};
    pub use crate::walls::WallPhase;
}
