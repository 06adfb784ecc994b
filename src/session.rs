//! One player's game run: gravity, lock delay, attacks and stats.
//!
//! The session is driven by the app's frame loop and never blocks on the
//! network: incoming attacks arrive through a channel drained each frame,
//! outgoing attacks and board snapshots go straight to the mesh's send
//! queues.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::SeedableRng as _;
use rand::rngs::StdRng;
use tracing::debug;

use crate::game::attack::resolve_lock;
use crate::game::board::{BOARD_HEIGHT, BOARD_WIDTH, Board};
use crate::game::combo::ComboTracker;
use crate::game::piece::{Piece, PieceGenerator, Tetromino};
use crate::input::Action;
use crate::lobby::GarbageAttack;
use crate::mesh::PeerMesh;
use crate::protocol::{ActivePiece, BoardSnapshot, PeerMessage};

/// Grace period between a piece touching the stack and locking.
const LOCK_DELAY: Duration = Duration::from_millis(500);
const INITIAL_FALL_DELAY: Duration = Duration::from_secs(1);
const MIN_FALL_DELAY: Duration = Duration::from_millis(100);
/// Fall delay shrinks by 5% at this interval.
const SPEEDUP_INTERVAL: Duration = Duration::from_secs(30);
const LEVEL_INTERVAL: Duration = Duration::from_secs(90);
const MAX_LEVEL: u32 = 10;
const SNAPSHOT_INTERVAL: Duration = Duration::from_millis(500);

/// Final numbers reported to the lobby when the run ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionStats {
    pub survival_secs: f64,
    pub attacks_sent: u32,
    pub attacks_received: u32,
    pub score: u32,
}

pub struct Session {
    mesh: Arc<PeerMesh>,
    board: Board,
    generator: PieceGenerator,
    current: Piece,
    next: Piece,
    held: Option<Tetromino>,
    can_hold: bool,
    combo: ComboTracker,
    pending_garbage: u32,
    score: u32,
    level: u32,
    attacks_sent: u32,
    attacks_received: u32,
    started_at: Instant,
    survived_secs: Option<f64>,
    last_fall: Instant,
    fall_delay: Duration,
    lock_since: Option<Instant>,
    landing_y: i32,
    last_speedup: Instant,
    last_level_up: Instant,
    last_snapshot: Instant,
    game_over: bool,
    rng: StdRng,
}

impl Session {
    pub fn new(mesh: Arc<PeerMesh>, seed: u64, now: Instant) -> Self {
        let mut generator = PieceGenerator::new(seed);
        let current = generator.next_piece();
        let next = generator.next_piece();
        Self {
            mesh,
            board: Board::new(),
            generator,
            current,
            next,
            held: None,
            can_hold: true,
            combo: ComboTracker::new(),
            pending_garbage: 0,
            score: 0,
            level: 1,
            attacks_sent: 0,
            attacks_received: 0,
            started_at: now,
            survived_secs: None,
            last_fall: now,
            fall_delay: INITIAL_FALL_DELAY,
            lock_since: None,
            landing_y: 0,
            last_speedup: now,
            last_level_up: now,
            last_snapshot: now,
            game_over: false,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Queue an opponent attack; it materializes on our next zero-clear lock.
    pub fn queue_attack(&mut self, attack: GarbageAttack) {
        debug!("{} garbage lines queued from {}", attack.lines, attack.from);
        self.pending_garbage += attack.lines;
        self.attacks_received += attack.lines;
    }

    pub fn apply_action(&mut self, action: Action, now: Instant) {
        if self.game_over {
            return;
        }
        let grounded = self.board.collides(&self.current, 0, 1, None);
        match action {
            Action::MoveLeft => {
                if self.attempt_move(-1, 0) && grounded {
                    self.reset_lock(now);
                }
            }
            Action::MoveRight => {
                if self.attempt_move(1, 0) && grounded {
                    self.reset_lock(now);
                }
            }
            Action::Rotate => {
                if self.attempt_rotation() && grounded {
                    self.reset_lock(now);
                }
            }
            Action::SoftDrop => {
                if self.attempt_move(0, 1) {
                    self.score += 1;
                    self.last_fall = now;
                }
            }
            Action::HardDrop => {
                let mut distance = 0;
                while self.attempt_move(0, 1) {
                    distance += 1;
                }
                self.score += distance * 2;
                self.lock_piece(now);
            }
            Action::Hold => self.hold(now),
            Action::Quit | Action::None => {}
        }
    }

    /// Advance timers: difficulty ramp, gravity, lock delay, snapshots.
    pub fn tick(&mut self, now: Instant) {
        if self.game_over {
            return;
        }
        if now.duration_since(self.last_speedup) >= SPEEDUP_INTERVAL {
            self.fall_delay = self.fall_delay.mul_f64(0.95).max(MIN_FALL_DELAY);
            self.last_speedup = now;
        }
        if now.duration_since(self.last_level_up) >= LEVEL_INTERVAL && self.level < MAX_LEVEL {
            self.level += 1;
            self.last_level_up = now;
        }

        if self.board.collides(&self.current, 0, 1, None) {
            match self.lock_since {
                None => self.reset_lock(now),
                Some(since) => {
                    if self.current.y != self.landing_y {
                        self.reset_lock(now);
                    } else if now.duration_since(since) >= LOCK_DELAY {
                        self.lock_piece(now);
                    }
                }
            }
        } else {
            self.lock_since = None;
            if now.duration_since(self.last_fall) >= self.fall_delay / self.level {
                self.attempt_move(0, 1);
                self.last_fall = now;
            }
        }

        if now.duration_since(self.last_snapshot) >= SNAPSHOT_INTERVAL {
            self.mesh.broadcast(&PeerMessage::GameState {
                board: self.snapshot(),
            });
            self.last_snapshot = now;
        }
    }

    fn attempt_move(&mut self, dx: i32, dy: i32) -> bool {
        if self.board.collides(&self.current, dx, dy, None) {
            false
        } else {
            self.current.x += dx;
            self.current.y += dy;
            true
        }
    }

    fn attempt_rotation(&mut self) -> bool {
        let rotated = self.current.rotated();
        // In-place first, then simple wall kicks.
        for (dx, dy) in [(0, 0), (1, 0), (-1, 0), (2, 0), (-2, 0), (0, -1)] {
            if !self.board.collides(&self.current, dx, dy, Some(&rotated)) {
                self.current.x += dx;
                self.current.y += dy;
                self.current.shape = rotated;
                self.current.rotation = self.current.rotation.wrapping_add(1);
                return true;
            }
        }
        false
    }

    fn reset_lock(&mut self, now: Instant) {
        self.lock_since = Some(now);
        self.landing_y = self.current.y;
    }

    fn hold(&mut self, now: Instant) {
        if !self.can_hold {
            return;
        }
        match self.held.take() {
            None => {
                self.held = Some(self.current.kind);
                self.current = std::mem::replace(&mut self.next, self.generator.next_piece());
            }
            Some(kind) => {
                self.held = Some(self.current.kind);
                self.current = Piece::new(kind);
            }
        }
        self.can_hold = false;
        self.lock_since = None;
        self.last_fall = now;
    }

    /// Settle the current piece and run the attack pipeline: clears cancel
    /// pending garbage before anything is sent; a zero-clear lock
    /// materializes whatever is still pending.
    fn lock_piece(&mut self, now: Instant) {
        self.board.merge(&self.current);
        let lines = self.board.clear_full_rows();
        let combo = self.combo.on_lock(lines, now);
        let resolution = resolve_lock(lines, combo.count, self.pending_garbage);

        self.pending_garbage -= resolution.cancelled;
        if resolution.attack_sent > 0 {
            self.attacks_sent += resolution.attack_sent;
            self.mesh.broadcast(&PeerMessage::Garbage {
                lines: resolution.attack_sent,
                sender: self.mesh.listen_addr().to_string(),
                name: self.mesh.player_name().to_string(),
            });
        }
        if resolution.materialized > 0 {
            self.board
                .add_garbage_rows(resolution.materialized, &mut self.rng);
            self.pending_garbage = 0;
        }
        self.score += line_score(lines, self.level);
        self.spawn_next(now);
    }

    fn spawn_next(&mut self, now: Instant) {
        self.current = std::mem::replace(&mut self.next, self.generator.next_piece());
        self.can_hold = true;
        self.lock_since = None;
        self.last_fall = now;
        // Block out: the fresh piece overlaps the stack and cannot move down.
        if self.board.collides(&self.current, 0, 0, None)
            && self.board.collides(&self.current, 0, 1, None)
        {
            debug!("spawned piece is blocked, game over");
            self.survived_secs = Some(now.duration_since(self.started_at).as_secs_f64());
            self.game_over = true;
        }
    }

    /// End the run early (player quit); counts as a loss at this instant.
    pub fn resign(&mut self, now: Instant) {
        if !self.game_over {
            self.survived_secs = Some(now.duration_since(self.started_at).as_secs_f64());
            self.game_over = true;
        }
    }

    pub fn stats(&self, now: Instant) -> SessionStats {
        SessionStats {
            survival_secs: self
                .survived_secs
                .unwrap_or_else(|| now.duration_since(self.started_at).as_secs_f64()),
            attacks_sent: self.attacks_sent,
            attacks_received: self.attacks_received,
            score: self.score,
        }
    }

    fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            cells: self.board.flatten(),
            width: BOARD_WIDTH as u16,
            height: BOARD_HEIGHT as u16,
            score: self.score,
            player_name: self.mesh.player_name().to_string(),
            active_piece: (!self.game_over).then(|| ActivePiece {
                piece_type: self.current.kind.label().to_string(),
                x: self.current.x,
                y: self.current.y,
                rotation: self.current.rotation % 4,
                color: self.current.kind.color(),
            }),
        }
    }

    // --- Read accessors for the renderer ---

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn current_piece(&self) -> &Piece {
        &self.current
    }

    /// Row the current piece would land on if hard-dropped, for the ghost.
    pub fn ghost_y(&self) -> i32 {
        let mut distance = 0;
        while !self.board.collides(&self.current, 0, distance + 1, None) {
            distance += 1;
        }
        self.current.y + distance
    }

    pub fn next_piece(&self) -> &Piece {
        &self.next
    }

    pub fn held_piece(&self) -> Option<Tetromino> {
        self.held
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn pending_garbage(&self) -> u32 {
        self.pending_garbage
    }

    pub fn combo_display(&self) -> String {
        self.combo.display()
    }

    pub fn combo_message(&mut self, now: Instant) -> Option<String> {
        self.combo.message(now).map(str::to_string)
    }

    pub fn is_game_over(&self) -> bool {
        self.game_over
    }
}

fn line_score(lines: u32, level: u32) -> u32 {
    let base = match lines {
        1 => 40,
        2 => 100,
        3 => 300,
        4 => 1200,
        _ => 0,
    };
    base * level
}
