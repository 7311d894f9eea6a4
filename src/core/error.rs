use thiserror::Error;

/// Input-validation failures at the engine boundary.
///
/// Transitions themselves are total; every variant here describes malformed
/// external input that is rejected instead of being clamped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid action index {0} (expected 0..=3)")]
    InvalidAction(u8),
    #[error("unknown action '{0}' (expected up|down|left|right)")]
    UnknownAction(String),
    #[error("unknown interaction '{0}' (expected place_food|place_wall)")]
    UnknownInteraction(String),
    #[error("unknown game mode '{0}' (expected plain|obstacles)")]
    UnknownMode(String),
    #[error("coordinate ({x}, {y}) is outside a {size}x{size} grid")]
    OutOfBounds { x: i64, y: i64, size: usize },
    #[error("grid size {0} is too small (minimum 2)")]
    GridTooSmall(usize),
    #[error("grid size {0} is too large (maximum 256)")]
    GridTooLarge(usize),
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    #[error("expected {expected} actions, got {got}")]
    ActionCount { expected: usize, got: usize },
}
