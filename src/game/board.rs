//! The playfield grid: collision, merging, line clears and garbage rows.

use rand::Rng;

use super::piece::Piece;

pub const BOARD_WIDTH: usize = 10;
pub const BOARD_HEIGHT: usize = 20;
pub const EMPTY_CELL: u8 = 0;
/// Colour index for garbage rows, distinct from the seven piece colours.
pub const GARBAGE_CELL: u8 = 8;

#[derive(Debug, Clone)]
pub struct Board {
    rows: Vec<Vec<u8>>,
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    pub fn new() -> Self {
        Self {
            rows: vec![vec![EMPTY_CELL; BOARD_WIDTH]; BOARD_HEIGHT],
        }
    }

    pub fn rows(&self) -> &[Vec<u8>] {
        &self.rows
    }

    /// Whether `piece`, offset by (dx, dy) and optionally with a replacement
    /// shape, overlaps the walls, the floor or settled cells. Cells above the
    /// top of the board are allowed so pieces can spawn partially hidden.
    pub fn collides(&self, piece: &Piece, dx: i32, dy: i32, shape: Option<&[Vec<u8>]>) -> bool {
        let shape = shape.unwrap_or(&piece.shape);
        for (y, row) in shape.iter().enumerate() {
            for (x, &cell) in row.iter().enumerate() {
                if cell == EMPTY_CELL {
                    continue;
                }
                let nx = piece.x + x as i32 + dx;
                let ny = piece.y + y as i32 + dy;
                if nx < 0 || nx >= BOARD_WIDTH as i32 || ny >= BOARD_HEIGHT as i32 {
                    return true;
                }
                if ny < 0 {
                    continue;
                }
                if self.rows[ny as usize][nx as usize] != EMPTY_CELL {
                    return true;
                }
            }
        }
        false
    }

    /// Settle the piece's visible cells into the grid.
    pub fn merge(&mut self, piece: &Piece) {
        for (y, row) in piece.shape.iter().enumerate() {
            for (x, &cell) in row.iter().enumerate() {
                let ny = piece.y + y as i32;
                if cell != EMPTY_CELL && ny >= 0 {
                    self.rows[ny as usize][(piece.x + x as i32) as usize] = cell;
                }
            }
        }
    }

    /// Remove every full row, shifting the stack down. Returns the count.
    pub fn clear_full_rows(&mut self) -> u32 {
        let before = self.rows.len();
        self.rows.retain(|row| row.contains(&EMPTY_CELL));
        let cleared = before - self.rows.len();
        for _ in 0..cleared {
            self.rows.insert(0, vec![EMPTY_CELL; BOARD_WIDTH]);
        }
        cleared as u32
    }

    /// Push `count` garbage rows in at the bottom, each full-width with one
    /// random gap column, discarding the same number of rows off the top.
    pub fn add_garbage_rows<R: Rng>(&mut self, count: u32, rng: &mut R) {
        for _ in 0..count {
            let gap = rng.random_range(0..BOARD_WIDTH);
            let mut row = vec![GARBAGE_CELL; BOARD_WIDTH];
            row[gap] = EMPTY_CELL;
            self.rows.remove(0);
            self.rows.push(row);
        }
    }

    /// Row-major flattening for board snapshots.
    pub fn flatten(&self) -> Vec<u8> {
        self.rows.iter().flatten().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::piece::Tetromino;
    use rand::SeedableRng as _;
    use rand::rngs::StdRng;

    fn full_row_except(gap: usize) -> Vec<u8> {
        let mut row = vec![7u8; BOARD_WIDTH];
        row[gap] = EMPTY_CELL;
        row
    }

    #[test]
    fn clear_full_rows_shifts_stack_down() {
        let mut board = Board::new();
        board.rows[BOARD_HEIGHT - 1] = vec![1; BOARD_WIDTH];
        board.rows[BOARD_HEIGHT - 2] = full_row_except(3);
        board.rows[BOARD_HEIGHT - 3] = vec![2; BOARD_WIDTH];

        assert_eq!(board.clear_full_rows(), 2);
        assert_eq!(board.rows.len(), BOARD_HEIGHT);
        // The partial row is now the bottom row; everything above is empty.
        assert_eq!(board.rows[BOARD_HEIGHT - 1], full_row_except(3));
        assert!(board.rows[BOARD_HEIGHT - 2].iter().all(|&c| c == EMPTY_CELL));
    }

    #[test]
    fn garbage_rows_enter_at_the_bottom_with_one_gap_each() {
        let mut board = Board::new();
        board.rows[0] = vec![9; BOARD_WIDTH]; // marker that must be discarded
        board.rows[BOARD_HEIGHT - 1] = full_row_except(0);

        let mut rng = StdRng::seed_from_u64(7);
        board.add_garbage_rows(3, &mut rng);

        assert_eq!(board.rows.len(), BOARD_HEIGHT);
        // Top marker rows shifted out.
        assert!(!board.rows.iter().any(|row| row[0] == 9));
        // The previous bottom row moved up by three.
        assert_eq!(board.rows[BOARD_HEIGHT - 4], full_row_except(0));
        for row in &board.rows[BOARD_HEIGHT - 3..] {
            let gaps = row.iter().filter(|&&c| c == EMPTY_CELL).count();
            let garbage = row.iter().filter(|&&c| c == GARBAGE_CELL).count();
            assert_eq!(gaps, 1);
            assert_eq!(garbage, BOARD_WIDTH - 1);
        }
    }

    #[test]
    fn collision_against_walls_and_settled_cells() {
        let mut board = Board::new();
        let mut piece = Piece::new(Tetromino::O);
        assert!(!board.collides(&piece, 0, 0, None));
        // Walk the piece into the left wall.
        piece.x = -1;
        assert!(board.collides(&piece, 0, 0, None));
        piece.x = 0;
        board.rows[1][0] = 5;
        assert!(board.collides(&piece, 0, 1, None));
    }

    #[test]
    fn merge_skips_cells_above_the_board() {
        let mut board = Board::new();
        let mut piece = Piece::new(Tetromino::I);
        piece.y = -1;
        board.merge(&piece);
        assert!(board.rows.iter().flatten().all(|&c| c == EMPTY_CELL));
    }
}
