//! Snake grid-world simulation.
//!
//! Coordinate system:
//! - internal cells are `(row, col)` with `(0, 0)` in the top-left corner
//! - `up` decreases the row, `left` decreases the column
//! - external callers of [`SnakeSim::queue_interaction`] speak `x = column`,
//!   `y = row`
//!
//! Observation codes: 0 empty, 1 body, 2 food, 3 wall.

use std::collections::VecDeque;

use hashbrown::HashSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::prng::Prng;
use crate::walls::{WallPhase, WallScheduler};

pub const CELL_EMPTY: u8 = 0;
pub const CELL_BODY: u8 = 1;
pub const CELL_FOOD: u8 = 2;
pub const CELL_WALL: u8 = 3;

/// Reward for any terminating collision.
pub const COLLISION_REWARD: f32 = -1.0;
/// Reward for eating, including the final eat that fills the board.
pub const FOOD_REWARD: f32 = 1.0;

/// Largest accepted board side.
pub const MAX_GRID_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Cell {
    pub row: usize,
    pub col: usize,
}

impl Cell {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Action {
    Up,
    Down,
    Left,
    Right,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Up, Action::Down, Action::Left, Action::Right];

    /// Discrete action index: 0=up, 1=down, 2=left, 3=right.
    pub fn from_index(i: u8) -> Result<Self, EngineError> {
        match i {
            0 => Ok(Action::Up),
            1 => Ok(Action::Down),
            2 => Ok(Action::Left),
            3 => Ok(Action::Right),
            other => Err(EngineError::InvalidAction(other)),
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Action::Up => 0,
            Action::Down => 1,
            Action::Left => 2,
            Action::Right => 3,
        }
    }

    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Action::Up),
            "down" => Ok(Action::Down),
            "left" => Ok(Action::Left),
            "right" => Ok(Action::Right),
            _ => Err(EngineError::UnknownAction(s.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Up => "up",
            Action::Down => "down",
            Action::Left => "left",
            Action::Right => "right",
        }
    }

    /// `(d_row, d_col)` offset of one move.
    pub fn delta(self) -> (i64, i64) {
        match self {
            Action::Up => (-1, 0),
            Action::Down => (1, 0),
            Action::Left => (0, -1),
            Action::Right => (0, 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(rename_all = "snake_case", try_from = "String")
)]
pub enum GameMode {
    /// Food only.
    #[default]
    Plain,
    /// Food plus the dynamic wall scheduler.
    Obstacles,
}

impl GameMode {
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "classic" => Ok(GameMode::Plain),
            "obstacles" | "walls" => Ok(GameMode::Obstacles),
            _ => Err(EngineError::UnknownMode(s.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GameMode::Plain => "plain",
            GameMode::Obstacles => "obstacles",
        }
    }
}

/// Wire names accept the same spellings as [`GameMode::parse`].
impl TryFrom<String> for GameMode {
    type Error = EngineError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        GameMode::parse(&s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum InteractionKind {
    PlaceFood,
    PlaceWall,
}

impl InteractionKind {
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s.trim() {
            "place_food" => Ok(InteractionKind::PlaceFood),
            "place_wall" => Ok(InteractionKind::PlaceWall),
            other => Err(EngineError::UnknownInteraction(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InteractionKind::PlaceFood => "place_food",
            InteractionKind::PlaceWall => "place_wall",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SnakeConfig {
    pub grid_size: usize,
    /// Step budget per episode; `truncated` is raised once it is reached.
    pub max_steps: u32,
    pub mode: GameMode,
    /// Steps a spawned wall stays on the board.
    pub wall_duration: u32,
    /// Wall-free steps after a wall disappears.
    pub wall_cooldown: u32,
    /// Per-step chance of a random wall while the scheduler is idle.
    pub wall_spawn_prob: f32,
    /// Reward for a legal, non-eating move.
    pub step_cost: f32,
}

impl Default for SnakeConfig {
    fn default() -> Self {
        Self {
            grid_size: 10,
            max_steps: 150,
            mode: GameMode::Plain,
            wall_duration: 3,
            wall_cooldown: 6,
            wall_spawn_prob: 0.05,
            step_cost: -0.01,
        }
    }
}

impl SnakeConfig {
    pub fn with_grid_size(grid_size: usize) -> Self {
        Self {
            grid_size,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: GameMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.grid_size < 2 {
            return Err(EngineError::GridTooSmall(self.grid_size));
        }
        if self.grid_size > MAX_GRID_SIZE || self.grid_size.checked_mul(self.grid_size).is_none() {
            return Err(EngineError::GridTooLarge(self.grid_size));
        }
        if self.max_steps == 0 {
            return Err(EngineError::InvalidConfig("max_steps must be positive"));
        }
        if self.wall_duration == 0 {
            return Err(EngineError::InvalidConfig("wall_duration must be positive"));
        }
        if !(0.0..=1.0).contains(&self.wall_spawn_prob) {
            return Err(EngineError::InvalidConfig(
                "wall_spawn_prob must be within [0, 1]",
            ));
        }
        if !self.step_cost.is_finite() {
            return Err(EngineError::InvalidConfig("step_cost must be finite"));
        }
        Ok(())
    }
}

/// Dense `n x n` grid of cell codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    size: usize,
    cells: Vec<u8>,
}

impl Observation {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn get(&self, row: usize, col: usize) -> Option<u8> {
        if row >= self.size || col >= self.size {
            return None;
        }
        self.cells.get(row * self.size + col).copied()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.cells
    }

    pub fn count(&self, code: u8) -> usize {
        self.cells.iter().filter(|&&c| c == code).count()
    }

    pub fn to_rows(&self) -> Vec<Vec<u8>> {
        self.cells.chunks(self.size).map(|r| r.to_vec()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StepInfo {
    pub ate: bool,
    pub length: usize,
    pub wall_active: bool,
    pub step: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub observation: Observation,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
    pub info: StepInfo,
}

impl StepResult {
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// Read-only snapshot for live viewers.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SnakeState {
    pub grid: Vec<Vec<u8>>,
    /// Steps survived in the current episode.
    pub score: u32,
    pub head: Option<Cell>,
    pub is_dead: bool,
    pub length: usize,
    pub mode: GameMode,
}

#[derive(Debug, Clone)]
pub struct SnakeSim {
    config: SnakeConfig,
    rng: Prng,
    body: VecDeque<Cell>,
    occupied: Vec<bool>,
    food: Option<Cell>,
    walls: HashSet<Cell>,
    scheduler: WallScheduler,
    pending_food: Option<Cell>,
    pending_wall: Option<Cell>,
    step_count: u32,
    is_dead: bool,
}

impl SnakeSim {
    pub fn new(config: SnakeConfig, seed: u64) -> Result<Self, EngineError> {
        config.validate()?;
        let n = config.grid_size;
        let mut sim = Self {
            scheduler: WallScheduler::new(config.wall_duration, config.wall_cooldown),
            config,
            rng: Prng::new(seed),
            body: VecDeque::with_capacity(n * n),
            occupied: vec![false; n * n],
            food: None,
            walls: HashSet::new(),
            pending_food: None,
            pending_wall: None,
            step_count: 0,
            is_dead: false,
        };
        sim.reset(None);
        Ok(sim)
    }

    pub fn config(&self) -> &SnakeConfig {
        &self.config
    }

    pub fn grid_size(&self) -> usize {
        self.config.grid_size
    }

    pub fn mode(&self) -> GameMode {
        self.config.mode
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn is_dead(&self) -> bool {
        self.is_dead
    }

    pub fn body(&self) -> impl ExactSizeIterator<Item = &Cell> + '_ {
        self.body.iter()
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn head(&self) -> Option<Cell> {
        self.body.front().copied()
    }

    pub fn food(&self) -> Option<Cell> {
        self.food
    }

    pub fn walls(&self) -> &HashSet<Cell> {
        &self.walls
    }

    pub fn wall_phase(&self) -> WallPhase {
        self.scheduler.phase()
    }

    pub fn wall_timer(&self) -> u32 {
        self.scheduler.timer()
    }

    pub fn wall_cooldown(&self) -> u32 {
        self.scheduler.cooldown()
    }

    pub fn pending_food(&self) -> Option<Cell> {
        self.pending_food
    }

    pub fn pending_wall(&self) -> Option<Cell> {
        self.pending_wall
    }

    /// Start a new episode. A food override queued before the reset is used
    /// for the first placement; every other pending override is dropped.
    pub fn reset(&mut self, seed: Option<u64>) -> Observation {
        if let Some(seed) = seed {
            self.rng = Prng::new(seed);
        }

        let food_override = self.pending_food.take();
        self.pending_wall = None;
        self.walls.clear();
        self.scheduler.clear();

        self.body.clear();
        self.occupied.fill(false);
        let mid = self.config.grid_size / 2;
        self.push_head(Cell::new(mid, mid));

        self.food = None;
        self.pending_food = food_override;
        self.place_food();

        self.step_count = 0;
        self.is_dead = false;
        self.observation()
    }

    pub fn step(&mut self, action: Action) -> StepResult {
        self.step_count = self.step_count.saturating_add(1);

        if self.config.mode == GameMode::Obstacles {
            self.advance_walls();
        }

        let mut terminated = false;
        let mut ate = false;
        let reward = match self.next_head(action) {
            None => {
                terminated = true;
                COLLISION_REWARD
            }
            Some(next) => {
                let eating = self.food == Some(next);
                let vacating_tail = !eating && self.body.back() == Some(&next);
                let hits_body = self.occupied[self.idx(next)] && !vacating_tail;

                if hits_body || self.walls.contains(&next) {
                    terminated = true;
                    COLLISION_REWARD
                } else if eating {
                    ate = true;
                    self.push_head(next);
                    if !self.place_food() {
                        // Board is full.
                        terminated = true;
                    }
                    FOOD_REWARD
                } else {
                    // Tail leaves first so the head may take its cell.
                    self.pop_tail();
                    self.push_head(next);
                    self.config.step_cost
                }
            }
        };

        if terminated && !ate {
            self.is_dead = true;
        }
        let truncated = self.step_count >= self.config.max_steps;

        StepResult {
            observation: self.observation(),
            reward,
            terminated,
            truncated,
            info: StepInfo {
                ate,
                length: self.body.len(),
                wall_active: !self.walls.is_empty(),
                step: self.step_count,
            },
        }
    }

    /// Step with a raw discrete action index.
    pub fn step_index(&mut self, action: u8) -> Result<StepResult, EngineError> {
        Ok(self.step(Action::from_index(action)?))
    }

    /// Queue an external override. `x` is the column and `y` the row.
    ///
    /// The override is consumed at the next food placement / wall spawn
    /// check. If the target cell is occupied at that point it is dropped.
    pub fn queue_interaction(
        &mut self,
        kind: InteractionKind,
        x: i64,
        y: i64,
    ) -> Result<(), EngineError> {
        let target = self
            .cell_at(y, x)
            .ok_or(EngineError::OutOfBounds {
                x,
                y,
                size: self.config.grid_size,
            })?;

        match kind {
            InteractionKind::PlaceFood => self.pending_food = Some(target),
            InteractionKind::PlaceWall => self.pending_wall = Some(target),
        }
        Ok(())
    }

    /// Switch modes on a live episode. Leaving obstacles mode removes any
    /// standing wall immediately.
    pub fn set_mode(&mut self, mode: GameMode) {
        self.config.mode = mode;
        if mode == GameMode::Plain {
            self.walls.clear();
            self.scheduler.clear();
            self.pending_wall = None;
        }
    }

    pub fn get_state(&self) -> SnakeState {
        SnakeState {
            grid: self.observation().to_rows(),
            score: self.step_count,
            head: self.head(),
            is_dead: self.is_dead,
            length: self.body.len(),
            mode: self.config.mode,
        }
    }

    pub fn observation(&self) -> Observation {
        let n = self.config.grid_size;
        let mut cells = vec![CELL_EMPTY; n * n];
        for c in &self.body {
            cells[c.row * n + c.col] = CELL_BODY;
        }
        if let Some(f) = self.food {
            cells[f.row * n + f.col] = CELL_FOOD;
        }
        for w in &self.walls {
            cells[w.row * n + w.col] = CELL_WALL;
        }
        Observation { size: n, cells }
    }

    /// True when moving onto `(row, col)` would end the episode, ignoring the
    /// tail exception. Out-of-bounds coordinates are blocked.
    pub fn is_blocked(&self, row: i64, col: i64) -> bool {
        match self.cell_at(row, col) {
            None => true,
            Some(c) => self.occupied[self.idx(c)] || self.walls.contains(&c),
        }
    }

    fn advance_walls(&mut self) {
        let tick = self.scheduler.advance();
        if tick.expired {
            self.walls.clear();
        }
        if !tick.can_spawn {
            return;
        }

        let target = match self.pending_wall.take() {
            Some(c) if self.is_free(c) => Some(c),
            _ => {
                if self.rng.chance(self.config.wall_spawn_prob) {
                    let empty = self.empty_cells();
                    self.rng.choose(&empty).copied()
                } else {
                    None
                }
            }
        };

        if let Some(c) = target {
            self.walls.insert(c);
            self.scheduler.activate();
        }
    }

    /// Returns `false` when no empty cell is left.
    fn place_food(&mut self) -> bool {
        if let Some(c) = self.pending_food.take() {
            if self.is_free(c) {
                self.food = Some(c);
                return true;
            }
        }

        let empty = self.empty_cells();
        self.food = self.rng.choose(&empty).copied();
        self.food.is_some()
    }

    fn is_free(&self, c: Cell) -> bool {
        !self.occupied[self.idx(c)] && !self.walls.contains(&c) && self.food != Some(c)
    }

    fn empty_cells(&self) -> Vec<Cell> {
        let n = self.config.grid_size;
        (0..n)
            .flat_map(|row| (0..n).map(move |col| Cell::new(row, col)))
            .filter(|&c| self.is_free(c))
            .collect()
    }

    fn next_head(&self, action: Action) -> Option<Cell> {
        let head = self.head()?;
        let (dr, dc) = action.delta();
        self.cell_at(head.row as i64 + dr, head.col as i64 + dc)
    }

    fn cell_at(&self, row: i64, col: i64) -> Option<Cell> {
        let n = self.config.grid_size as i64;
        if row < 0 || col < 0 || row >= n || col >= n {
            return None;
        }
        Some(Cell::new(row as usize, col as usize))
    }

    fn idx(&self, c: Cell) -> usize {
        c.row * self.config.grid_size + c.col
    }

    fn push_head(&mut self, c: Cell) {
        let i = self.idx(c);
        self.occupied[i] = true;
        self.body.push_front(c);
    }

    fn pop_tail(&mut self) {
        if let Some(t) = self.body.pop_back() {
            let i = self.idx(t);
            self.occupied[i] = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(n: usize) -> SnakeSim {
        SnakeSim::new(SnakeConfig::with_grid_size(n), 1).unwrap()
    }

    fn obstacles_without_random_walls(n: usize) -> SnakeSim {
        let cfg = SnakeConfig {
            wall_spawn_prob: 0.0,
            ..SnakeConfig::with_grid_size(n).with_mode(GameMode::Obstacles)
        };
        SnakeSim::new(cfg, 1).unwrap()
    }

    fn assert_invariants(sim: &SnakeSim) {
        let body: Vec<Cell> = sim.body().copied().collect();
        for (i, a) in body.iter().enumerate() {
            for b in &body[i + 1..] {
                assert_ne!(a, b, "body cells must be unique");
            }
        }
        for pair in body.windows(2) {
            let d = pair[0].row.abs_diff(pair[1].row) + pair[0].col.abs_diff(pair[1].col);
            assert_eq!(d, 1, "body must be 4-connected");
        }
        if let Some(f) = sim.food() {
            assert!(!body.contains(&f));
            assert!(!sim.walls().contains(&f));
        }
        for w in sim.walls() {
            assert!(!body.contains(w));
        }
        assert!(sim.wall_timer() == 0 || sim.wall_cooldown() == 0);
    }

    #[test]
    fn forced_food_then_walking_off_the_top_edge() {
        let mut sim = plain(5);
        sim.queue_interaction(InteractionKind::PlaceFood, 0, 0).unwrap();
        sim.reset(None);

        let state = sim.get_state();
        assert_eq!(state.grid[0][0], CELL_FOOD);
        assert_eq!(state.head, Some(Cell::new(2, 2)));

        let r = sim.step(Action::Up);
        assert_eq!(r.reward, -0.01);
        assert!(!r.terminated);
        let r = sim.step(Action::Up);
        assert_eq!(r.reward, -0.01);
        assert!(!r.terminated);
        assert_eq!(sim.head(), Some(Cell::new(0, 2)));

        let r = sim.step(Action::Up);
        assert_eq!(r.reward, COLLISION_REWARD);
        assert!(r.terminated);
        assert!(sim.is_dead());
    }

    #[test]
    fn eating_grows_by_one_and_moving_keeps_length() {
        let mut sim = plain(5);
        sim.queue_interaction(InteractionKind::PlaceFood, 3, 2).unwrap();
        sim.reset(None);

        sim.queue_interaction(InteractionKind::PlaceFood, 0, 0).unwrap();
        let r = sim.step(Action::Right);
        assert_eq!(r.reward, FOOD_REWARD);
        assert!(r.info.ate);
        assert_eq!(sim.len(), 2);

        let r = sim.step(Action::Down);
        assert!(!r.info.ate);
        assert_eq!(sim.len(), 2);
        assert_invariants(&sim);
    }

    /// Grows the snake to length 4 around the 2x2 block at rows 2..=3,
    /// cols 2..=3. Returns the sim with head at (3,2) and tail at (2,2).
    fn curled_snake() -> SnakeSim {
        let mut sim = plain(5);
        sim.queue_interaction(InteractionKind::PlaceFood, 3, 2).unwrap();
        sim.reset(None);

        sim.queue_interaction(InteractionKind::PlaceFood, 3, 3).unwrap();
        assert!(sim.step(Action::Right).info.ate);
        sim.queue_interaction(InteractionKind::PlaceFood, 2, 3).unwrap();
        assert!(sim.step(Action::Down).info.ate);
        sim.queue_interaction(InteractionKind::PlaceFood, 0, 0).unwrap();
        assert!(sim.step(Action::Left).info.ate);

        assert_eq!(sim.len(), 4);
        assert_eq!(sim.food(), Some(Cell::new(0, 0)));
        sim
    }

    #[test]
    fn moving_into_the_vacating_tail_is_legal() {
        let mut sim = curled_snake();
        let r = sim.step(Action::Up);
        assert!(!r.terminated);
        assert_eq!(r.reward, -0.01);
        assert_eq!(sim.head(), Some(Cell::new(2, 2)));
        assert_eq!(sim.len(), 4);
        assert_invariants(&sim);
    }

    #[test]
    fn moving_into_the_neck_is_a_collision() {
        let mut sim = curled_snake();
        // Neck is (3,3), to the right of the head.
        let r = sim.step(Action::Right);
        assert!(r.terminated);
        assert_eq!(r.reward, COLLISION_REWARD);
        assert_eq!(sim.len(), 4);
    }

    #[test]
    fn filling_the_board_ends_the_episode_with_food_reward() {
        let mut sim = plain(2);
        assert_eq!(sim.head(), Some(Cell::new(1, 1)));
        sim.queue_interaction(InteractionKind::PlaceFood, 0, 1).unwrap();
        sim.reset(None);

        sim.queue_interaction(InteractionKind::PlaceFood, 0, 0).unwrap();
        let r = sim.step(Action::Left);
        assert!(r.info.ate && !r.terminated);
        sim.queue_interaction(InteractionKind::PlaceFood, 1, 0).unwrap();
        let r = sim.step(Action::Up);
        assert!(r.info.ate && !r.terminated);

        let r = sim.step(Action::Right);
        assert_eq!(r.reward, FOOD_REWARD);
        assert!(r.terminated);
        assert_eq!(sim.food(), None);
        assert_eq!(sim.len(), 4);
        assert!(!sim.is_dead());
    }

    #[test]
    fn truncation_is_independent_of_termination() {
        let cfg = SnakeConfig {
            max_steps: 3,
            ..SnakeConfig::with_grid_size(8)
        };
        let mut sim = SnakeSim::new(cfg, 5).unwrap();
        sim.queue_interaction(InteractionKind::PlaceFood, 0, 0).unwrap();
        sim.reset(None);

        assert!(!sim.step(Action::Left).truncated);
        assert!(!sim.step(Action::Right).truncated);
        let r = sim.step(Action::Left);
        assert!(r.truncated);
        assert!(!r.terminated);
    }

    #[test]
    fn queued_wall_stands_for_duration_then_cools_down() {
        let mut sim = obstacles_without_random_walls(10);
        sim.queue_interaction(InteractionKind::PlaceFood, 9, 9).unwrap();
        sim.reset(None);

        let corner = Cell::new(0, 0);
        let mut present = Vec::new();
        for i in 0..13 {
            sim.queue_interaction(InteractionKind::PlaceWall, 0, 0).unwrap();
            let action = if i % 2 == 0 { Action::Left } else { Action::Right };
            let r = sim.step(action);
            assert!(!r.terminated);
            assert_eq!(r.observation.get(0, 0) == Some(CELL_WALL), r.info.wall_active);
            present.push(sim.walls().contains(&corner));
            assert_invariants(&sim);
        }

        let expected = [
            true, true, true, false, false, false, false, false, false, true, true, true, false,
        ];
        assert_eq!(present, expected);
    }

    #[test]
    fn queued_wall_on_food_is_discarded() {
        let mut sim = obstacles_without_random_walls(6);
        sim.queue_interaction(InteractionKind::PlaceFood, 0, 0).unwrap();
        sim.reset(None);

        sim.queue_interaction(InteractionKind::PlaceWall, 0, 0).unwrap();
        sim.step(Action::Left);
        assert!(sim.walls().is_empty());
        assert_eq!(sim.pending_wall(), None);

        // Target the head cell.
        assert_eq!(sim.head(), Some(Cell::new(3, 2)));
        sim.queue_interaction(InteractionKind::PlaceWall, 2, 3).unwrap();
        sim.step(Action::Right);
        assert!(sim.walls().is_empty());
        assert_eq!(sim.pending_wall(), None);
    }

    #[test]
    fn queued_food_on_body_falls_back_to_random_placement() {
        let mut sim = plain(5);
        sim.queue_interaction(InteractionKind::PlaceFood, 3, 2).unwrap();
        sim.reset(None);

        // Ask for food on the cell the head is about to occupy.
        sim.queue_interaction(InteractionKind::PlaceFood, 3, 2).unwrap();
        let r = sim.step(Action::Right);
        assert!(r.info.ate);
        let food = sim.food().unwrap();
        assert_ne!(food, Cell::new(2, 3));
        assert_eq!(sim.pending_food(), None);
        assert_invariants(&sim);
    }

    #[test]
    fn plain_mode_clears_standing_walls() {
        let mut sim = obstacles_without_random_walls(6);
        sim.queue_interaction(InteractionKind::PlaceFood, 5, 5).unwrap();
        sim.reset(None);
        sim.queue_interaction(InteractionKind::PlaceWall, 0, 0).unwrap();
        sim.step(Action::Left);
        assert_eq!(sim.walls().len(), 1);

        sim.set_mode(GameMode::Plain);
        assert!(sim.walls().is_empty());
        assert_eq!(sim.wall_phase(), WallPhase::Idle);
        assert_eq!(sim.observation().count(CELL_WALL), 0);
    }

    #[test]
    fn malformed_input_is_rejected() {
        let mut sim = plain(5);
        assert_eq!(Action::from_index(4), Err(EngineError::InvalidAction(4)));
        assert!(sim.step_index(9).is_err());
        assert!(Action::parse("north").is_err());
        assert!(InteractionKind::parse("place_snake").is_err());
        assert!(GameMode::parse("chaos").is_err());
        assert_eq!(GameMode::parse("walls"), Ok(GameMode::Obstacles));

        let err = sim
            .queue_interaction(InteractionKind::PlaceFood, 5, 0)
            .unwrap_err();
        assert!(matches!(err, EngineError::OutOfBounds { x: 5, y: 0, .. }));
        assert!(sim
            .queue_interaction(InteractionKind::PlaceWall, 0, -1)
            .is_err());
        assert_eq!(sim.pending_food(), None);
        assert_eq!(sim.pending_wall(), None);

        assert!(SnakeSim::new(SnakeConfig::with_grid_size(1), 0).is_err());
    }

    #[test]
    fn oversized_grid_is_rejected_before_allocating() {
        assert_eq!(
            SnakeSim::new(SnakeConfig::with_grid_size(1_000_000), 0).unwrap_err(),
            EngineError::GridTooLarge(1_000_000)
        );
        assert_eq!(
            SnakeConfig::with_grid_size(usize::MAX).validate(),
            Err(EngineError::GridTooLarge(usize::MAX))
        );
        assert!(SnakeConfig::with_grid_size(MAX_GRID_SIZE).validate().is_ok());
        assert!(SnakeConfig::with_grid_size(MAX_GRID_SIZE + 1).validate().is_err());
    }

    #[test]
    fn collision_on_the_last_allowed_step_is_both_terminated_and_truncated() {
        let cfg = SnakeConfig {
            max_steps: 1,
            ..SnakeConfig::with_grid_size(2)
        };
        let mut sim = SnakeSim::new(cfg, 0).unwrap();
        // Head starts at (1, 1); moving down leaves the board at once.
        let r = sim.step(Action::Down);
        assert!(r.terminated);
        assert!(r.truncated);
        assert!(r.done());
        assert_eq!(r.reward, COLLISION_REWARD);
        assert!(sim.is_dead());
    }

    #[test]
    fn random_play_preserves_invariants_and_reward_contract() {
        let cfg = SnakeConfig {
            wall_spawn_prob: 0.3,
            ..SnakeConfig::with_grid_size(6).with_mode(GameMode::Obstacles)
        };
        let mut sim = SnakeSim::new(cfg, 42).unwrap();
        let mut pick = Prng::new(4242);

        for _ in 0..5_000 {
            let len_before = sim.len();
            let action = Action::ALL[pick.index(4)];
            let r = sim.step(action);
            assert_invariants(&sim);

            if r.info.ate {
                assert_eq!(r.reward, FOOD_REWARD);
                assert_eq!(sim.len(), len_before + 1);
            } else if r.terminated {
                assert_eq!(r.reward, COLLISION_REWARD);
                assert_eq!(sim.len(), len_before);
            } else {
                assert_eq!(r.reward, -0.01);
                assert_eq!(sim.len(), len_before);
            }

            let food_cells = r.observation.count(CELL_FOOD);
            assert_eq!(food_cells, usize::from(sim.food().is_some()));

            if r.done() {
                sim.reset(None);
            }
        }
    }

    #[test]
    fn same_seed_replays_the_same_episode() {
        let cfg = SnakeConfig::with_grid_size(7).with_mode(GameMode::Obstacles);
        let mut a = SnakeSim::new(cfg.clone(), 77).unwrap();
        let mut b = SnakeSim::new(cfg, 77).unwrap();
        let mut pick = Prng::new(3);
        for _ in 0..200 {
            let action = Action::ALL[pick.index(4)];
            let ra = a.step(action);
            let rb = b.step(action);
            assert_eq!(ra, rb);
            if ra.done() {
                a.reset(None);
                b.reset(None);
            }
        }
    }

    #[test]
    fn get_state_does_not_mutate() {
        let sim = plain(5);
        let before = sim.observation();
        let _ = sim.get_state();
        assert_eq!(sim.observation(), before);
        assert_eq!(sim.step_count(), 0);
    }
}
