//! Layout and drawing: lobby menu, playfield, opponent boards, results.

use std::time::Instant;

use ratatui::Frame;
use ratatui::layout::{Alignment, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};

use crate::game::board::{BOARD_HEIGHT, BOARD_WIDTH, EMPTY_CELL, GARBAGE_CELL};
use crate::game::piece::shape_for;
use crate::game::piece::Tetromino;
use crate::protocol::BoardSnapshot;
use crate::session::Session;

/// Marker for ghost cells in the composed grid; outside the colour range.
const GHOST_CELL: u8 = 255;

const SIDEBAR_WIDTH: u16 = 22;
const MINI_HEIGHT: usize = 10;

/// Smallest terminal the game screen fits in: board, sidebar and margins.
pub const MIN_COLS: u16 = (BOARD_WIDTH as u16) * 2 + 2 + SIDEBAR_WIDTH + 4;
pub const MIN_ROWS: u16 = BOARD_HEIGHT as u16 + 2;

pub fn size_ok(area: Rect) -> bool {
    area.width >= MIN_COLS && area.height >= MIN_ROWS
}

/// Non-fatal "please resize" state, retried each frame.
pub fn draw_too_small(frame: &mut Frame) {
    let area = frame.area();
    let msg = Paragraph::new("Terminal too small! Please resize.")
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::Red));
    let rect = Rect::new(area.x, area.y + area.height / 2, area.width, 1).intersection(area);
    if !rect.is_empty() {
        frame.render_widget(msg, rect);
    }
}

fn cell_color(cell: u8) -> Color {
    match cell {
        1 => Color::Cyan,
        2 => Color::Yellow,
        3 => Color::Magenta,
        4 => Color::Green,
        5 => Color::Red,
        6 => Color::Blue,
        7 => Color::White,
        GARBAGE_CELL => Color::Gray,
        _ => Color::DarkGray,
    }
}

pub struct LobbyView<'a> {
    pub player_name: &'a str,
    pub ready_count: usize,
    pub expected: usize,
    pub options: &'a [&'a str],
    pub selected: usize,
    pub status_line: &'a str,
    /// Ready-peer identities, shown on the peers panel.
    pub peers: &'a [String],
    pub show_peers: bool,
}

pub fn draw_lobby(frame: &mut Frame, view: &LobbyView) {
    let area = frame.area();
    let title = format!("P2P Tetris Lobby - Player: {}", view.player_name);
    let mut lines = vec![
        Line::from(Span::styled(title, Style::default().add_modifier(Modifier::BOLD))),
        Line::from(""),
        Line::from(format!(
            "Status: waiting for players ({}/{} ready)",
            view.ready_count, view.expected
        )),
        Line::from(view.status_line.to_string()),
        Line::from(""),
    ];
    for (i, option) in view.options.iter().enumerate() {
        let line = if i == view.selected {
            Line::from(Span::styled(
                format!("> {option}"),
                Style::default().add_modifier(Modifier::REVERSED),
            ))
        } else {
            Line::from(format!("  {option}"))
        };
        lines.push(line);
    }
    if view.show_peers {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Ready peers:",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        if view.peers.is_empty() {
            lines.push(Line::from("  (none)"));
        } else {
            for (i, peer) in view.peers.iter().enumerate() {
                lines.push(Line::from(format!("  {}. {peer}", i + 1)));
            }
        }
    }
    frame.render_widget(Paragraph::new(lines).block(Block::default().borders(Borders::ALL)), area);
}

pub fn draw_game(
    frame: &mut Frame,
    session: &mut Session,
    opponents: &[BoardSnapshot],
    now: Instant,
) {
    let area = frame.area();
    if !size_ok(area) {
        draw_too_small(frame);
        return;
    }

    let board_w = BOARD_WIDTH as u16 * 2 + 2;
    let board_h = BOARD_HEIGHT as u16 + 2;
    let x0 = area.x + 1;
    let y0 = area.y + area.height.saturating_sub(board_h) / 2;

    draw_own_board(
        frame,
        session,
        Rect::new(x0, y0, board_w, board_h).intersection(area),
    );
    draw_sidebar(
        frame,
        session,
        now,
        Rect::new(x0 + board_w + 1, y0, SIDEBAR_WIDTH, board_h).intersection(area),
    );
    draw_opponents(
        frame,
        opponents,
        Rect::new(
            x0 + board_w + SIDEBAR_WIDTH + 2,
            y0,
            area.width.saturating_sub(board_w + SIDEBAR_WIDTH + 3),
            area.height,
        )
        .intersection(area),
    );
}

fn draw_own_board(frame: &mut Frame, session: &Session, rect: Rect) {
    // Compose settled cells, ghost, then the active piece on top.
    let mut grid: Vec<Vec<u8>> = session.board().rows().to_vec();
    let piece = session.current_piece();
    let ghost_y = session.ghost_y();
    for (dy, row) in piece.shape.iter().enumerate() {
        for (dx, &cell) in row.iter().enumerate() {
            if cell == EMPTY_CELL {
                continue;
            }
            let x = piece.x + dx as i32;
            if ghost_y != piece.y {
                let gy = ghost_y + dy as i32;
                if in_grid(x, gy) && grid[gy as usize][x as usize] == EMPTY_CELL {
                    grid[gy as usize][x as usize] = GHOST_CELL;
                }
            }
            let py = piece.y + dy as i32;
            if in_grid(x, py) {
                grid[py as usize][x as usize] = cell;
            }
        }
    }

    let lines: Vec<Line> = grid
        .iter()
        .map(|row| {
            Line::from(
                row.iter()
                    .map(|&cell| match cell {
                        EMPTY_CELL => Span::raw("  "),
                        GHOST_CELL => Span::styled("[]", Style::default().fg(Color::DarkGray)),
                        GARBAGE_CELL => Span::styled(
                            "░░",
                            Style::default().fg(Color::Gray).add_modifier(Modifier::DIM),
                        ),
                        c => Span::styled("[]", Style::default().fg(cell_color(c))),
                    })
                    .collect::<Vec<_>>(),
            )
        })
        .collect();
    frame.render_widget(Paragraph::new(lines).block(Block::default().borders(Borders::ALL)), rect);
}

fn draw_sidebar(frame: &mut Frame, session: &mut Session, now: Instant, rect: Rect) {
    let mut lines = vec![
        Line::from(format!("Score: {}", session.score())),
        Line::from(format!("Level: {}", session.level())),
        Line::from(format!("Combo: {}", session.combo_display())),
        Line::from(format!("Incoming: {}", session.pending_garbage())),
        Line::from(""),
        Line::from("Next:"),
    ];
    lines.extend(shape_lines(&session.next_piece().shape));
    lines.push(Line::from("Hold:"));
    match session.held_piece() {
        Some(kind) => lines.extend(shape_lines(&kind.grid())),
        None => lines.push(Line::from("  -")),
    }
    lines.push(Line::from(""));
    if let Some(message) = session.combo_message(now) {
        lines.push(Line::from(Span::styled(
            message,
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )));
    }
    lines.push(Line::from(""));
    lines.push(Line::from("←→ move  ↑ rotate"));
    lines.push(Line::from("↓ soft  space hard"));
    lines.push(Line::from("c hold   q quit"));
    frame.render_widget(Paragraph::new(lines), rect);
}

fn shape_lines(shape: &[Vec<u8>]) -> Vec<Line<'static>> {
    shape
        .iter()
        .map(|row| {
            Line::from(
                row.iter()
                    .map(|&cell| {
                        if cell == EMPTY_CELL {
                            Span::raw("  ")
                        } else {
                            Span::styled("[]", Style::default().fg(cell_color(cell)))
                        }
                    })
                    .collect::<Vec<_>>(),
            )
        })
        .collect()
}

/// Miniature opponent boards: bottom rows only, one character per cell.
fn draw_opponents(frame: &mut Frame, opponents: &[BoardSnapshot], rect: Rect) {
    let mini_w = BOARD_WIDTH as u16 + 2;
    let mini_h = MINI_HEIGHT as u16 + 2;
    let per_row = (rect.width / (mini_w + 1)).max(1);
    for (i, snapshot) in opponents.iter().enumerate() {
        let col = (i as u16) % per_row;
        let row = (i as u16) / per_row;
        let x = rect.x + col * (mini_w + 1);
        let y = rect.y + row * (mini_h + 2);
        let mini = Rect::new(x, y, mini_w, mini_h + 1);
        if mini.intersection(rect) != mini {
            continue;
        }
        draw_mini_board(frame, snapshot, mini);
    }
}

fn draw_mini_board(frame: &mut Frame, snapshot: &BoardSnapshot, rect: Rect) {
    let mut name = snapshot.player_name.clone();
    name.truncate(rect.width as usize);
    let title = Line::from(Span::styled(
        format!("{name} ({})", snapshot.score),
        Style::default().add_modifier(Modifier::BOLD),
    ));
    frame.render_widget(
        Paragraph::new(title),
        Rect::new(rect.x, rect.y, rect.width, 1),
    );

    let height = snapshot.height as usize;
    let start = height.saturating_sub(MINI_HEIGHT);
    let mut lines = Vec::with_capacity(MINI_HEIGHT);
    for y in start..height {
        let spans: Vec<Span> = (0..snapshot.width as usize)
            .map(|x| {
                let mut cell = snapshot.cell(x, y);
                if cell == EMPTY_CELL {
                    cell = active_piece_cell(snapshot, x, y);
                }
                match cell {
                    EMPTY_CELL => Span::raw(" "),
                    GARBAGE_CELL => Span::styled(
                        "░",
                        Style::default().fg(Color::Gray).add_modifier(Modifier::DIM),
                    ),
                    c => Span::styled("#", Style::default().fg(cell_color(c))),
                }
            })
            .collect();
        lines.push(Line::from(spans));
    }
    frame.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL)),
        Rect::new(rect.x, rect.y + 1, rect.width, rect.height - 1),
    );
}

/// Colour of the opponent's active piece at (x, y), or empty.
fn active_piece_cell(snapshot: &BoardSnapshot, x: usize, y: usize) -> u8 {
    let Some(active) = &snapshot.active_piece else {
        return EMPTY_CELL;
    };
    let Some(kind) = Tetromino::from_label(&active.piece_type) else {
        return EMPTY_CELL;
    };
    let shape = shape_for(kind, active.rotation);
    for (dy, row) in shape.iter().enumerate() {
        for (dx, &cell) in row.iter().enumerate() {
            if cell != EMPTY_CELL
                && active.x + dx as i32 == x as i32
                && active.y + dy as i32 == y as i32
            {
                return active.color;
            }
        }
    }
    EMPTY_CELL
}

pub fn draw_results(
    frame: &mut Frame,
    final_text: Option<&str>,
    collected: usize,
    expected: usize,
) {
    let area = frame.area();
    let mut lines = vec![
        Line::from(Span::styled(
            "=== FINAL RESULTS ===",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];
    match final_text {
        Some(text) => {
            for row in text.lines().skip(1) {
                lines.push(Line::from(row.to_string()));
            }
            lines.push(Line::from(""));
            lines.push(Line::from("Returning to lobby shortly..."));
        }
        None => {
            lines.push(Line::from(format!(
                "Waiting for results from other players ({collected}/{expected})..."
            )));
        }
    }
    frame.render_widget(Paragraph::new(lines).block(Block::default().borders(Borders::ALL)), area);
}

fn in_grid(x: i32, y: i32) -> bool {
    x >= 0 && x < BOARD_WIDTH as i32 && y >= 0 && y < BOARD_HEIGHT as i32
}
