//! Dynamic obstacle scheduler.
//!
//! A wall lives for `duration` steps, then the board stays wall-free for
//! `cooldown` steps before another one may appear. The scheduler only tracks
//! time; the simulation decides where a wall goes and whether it is legal.
//!
//! ```text
//!   Idle --spawn--> Active{duration} --0--> Cooldown{cooldown} --0--> Idle
//! ```

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "phase", rename_all = "snake_case"))]
pub enum WallPhase {
    Idle,
    Active { remaining: u32 },
    Cooldown { remaining: u32 },
}

/// Result of advancing the scheduler by one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WallTick {
    /// The active wall ran out this step and must be removed.
    pub expired: bool,
    /// The scheduler is idle after this step; a spawn attempt is allowed.
    pub can_spawn: bool,
}

#[derive(Debug, Clone)]
pub struct WallScheduler {
    phase: WallPhase,
    duration: u32,
    cooldown: u32,
}

impl WallScheduler {
    pub fn new(duration: u32, cooldown: u32) -> Self {
        Self {
            phase: WallPhase::Idle,
            duration: duration.max(1),
            cooldown,
        }
    }

    pub fn phase(&self) -> WallPhase {
        self.phase
    }

    /// Remaining lifetime of the active wall (0 when none is active).
    pub fn timer(&self) -> u32 {
        match self.phase {
            WallPhase::Active { remaining } => remaining,
            _ => 0,
        }
    }

    /// Remaining cooldown (0 unless cooling down).
    pub fn cooldown(&self) -> u32 {
        match self.phase {
            WallPhase::Cooldown { remaining } => remaining,
            _ => 0,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.phase, WallPhase::Active { .. })
    }

    pub fn advance(&mut self) -> WallTick {
        let mut tick = WallTick::default();

        self.phase = match self.phase {
            WallPhase::Idle => WallPhase::Idle,
            WallPhase::Active { remaining } => {
                let remaining = remaining.saturating_sub(1);
                if remaining == 0 {
                    tick.expired = true;
                    self.cooldown_or_idle()
                } else {
                    WallPhase::Active { remaining }
                }
            }
            WallPhase::Cooldown { remaining } => {
                let remaining = remaining.saturating_sub(1);
                if remaining == 0 {
                    WallPhase::Idle
                } else {
                    WallPhase::Cooldown { remaining }
                }
            }
        };

        tick.can_spawn = self.phase == WallPhase::Idle;
        tick
    }

    /// Start the lifetime countdown for a freshly placed wall.
    pub fn activate(&mut self) {
        self.phase = WallPhase::Active {
            remaining: self.duration,
        };
    }

    pub fn clear(&mut self) {
        self.phase = WallPhase::Idle;
    }

    fn cooldown_or_idle(&self) -> WallPhase {
        if self.cooldown == 0 {
            WallPhase::Idle
        } else {
            WallPhase::Cooldown {
                remaining: self.cooldown,
            }
        }
    }
}
