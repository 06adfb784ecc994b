//! Round lifecycle orchestration: lobby menu, game, results, repeat.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::DefaultTerminal;
use tokio::sync::mpsc;
use tracing::info;

use crate::input::{Action, key_to_action};
use crate::lobby::{GarbageAttack, Lobby};
use crate::mesh::PeerMesh;
use crate::session::{Session, SessionStats};
use crate::ui;

const FRAME_INTERVAL: Duration = Duration::from_millis(33);
/// How long the final ranking stays up before returning to the lobby.
const RESULTS_LINGER: Duration = Duration::from_secs(5);

const LOBBY_OPTIONS: [&str; 3] = ["Ready", "View Peers", "Quit"];

pub struct App {
    mesh: Arc<PeerMesh>,
    lobby: Lobby,
    garbage_rx: mpsc::UnboundedReceiver<GarbageAttack>,
    player_name: String,
}

impl App {
    pub fn new(
        mesh: Arc<PeerMesh>,
        lobby: Lobby,
        garbage_rx: mpsc::UnboundedReceiver<GarbageAttack>,
        player_name: String,
    ) -> Self {
        Self {
            mesh,
            lobby,
            garbage_rx,
            player_name,
        }
    }

    /// Loop rounds until the player quits from the lobby.
    pub async fn run(&mut self, terminal: &mut DefaultTerminal) -> Result<()> {
        loop {
            self.lobby.reset_round();
            // Attacks still in flight from the previous round are stale.
            while self.garbage_rx.try_recv().is_ok() {}

            let Some(seed) = self.lobby_screen(terminal).await? else {
                info!("player quit from lobby");
                return Ok(());
            };
            info!("round starting with seed {seed}");
            let stats = self.game_screen(terminal, seed).await?;
            info!(
                "local game over: {:.1}s survived, {} sent, {} received, score {}",
                stats.survival_secs, stats.attacks_sent, stats.attacks_received, stats.score
            );
            self.lobby.finish_game(&stats);
            self.results_screen(terminal).await?;
        }
    }

    /// Menu until the round starts (locally or via a received START) or the
    /// player quits. Returns the shared seed.
    async fn lobby_screen(&mut self, terminal: &mut DefaultTerminal) -> Result<Option<u64>> {
        let mut selected = 0usize;
        let mut show_peers = false;
        let mut status_line = String::new();
        let start_rx = self.lobby.start_receiver();
        loop {
            if let Some(seed) = *start_rx.borrow() {
                return Ok(Some(seed));
            }

            let peers: Vec<String> = self
                .lobby
                .ready_peers()
                .iter()
                .map(ToString::to_string)
                .collect();
            let view = ui::LobbyView {
                player_name: &self.player_name,
                ready_count: self.lobby.ready_count(),
                expected: self.lobby.expected_peers(),
                options: &LOBBY_OPTIONS,
                selected,
                status_line: &status_line,
                peers: &peers,
                show_peers,
            };
            terminal.draw(|frame| ui::draw_lobby(frame, &view))?;

            while event::poll(Duration::ZERO)? {
                let Event::Key(key) = event::read()? else {
                    continue;
                };
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Up => {
                        selected = selected.checked_sub(1).unwrap_or(LOBBY_OPTIONS.len() - 1);
                    }
                    KeyCode::Down => selected = (selected + 1) % LOBBY_OPTIONS.len(),
                    KeyCode::Char('q') | KeyCode::Esc => return Ok(None),
                    KeyCode::Enter => match LOBBY_OPTIONS[selected] {
                        "Ready" => {
                            if self.lobby.is_self_ready() {
                                status_line = "Already marked as ready.".into();
                            } else {
                                status_line = match self.lobby.mark_ready() {
                                    Ok(()) => "You are ready!".into(),
                                    Err(e) => e.to_string(),
                                };
                            }
                        }
                        "View Peers" => show_peers = !show_peers,
                        _ => return Ok(None),
                    },
                    _ => {}
                }
            }
            tokio::time::sleep(FRAME_INTERVAL).await;
        }
    }

    /// Drive one game to its end and return the final stats.
    async fn game_screen(
        &mut self,
        terminal: &mut DefaultTerminal,
        seed: u64,
    ) -> Result<SessionStats> {
        let mut session = Session::new(self.mesh.clone(), seed, Instant::now());
        loop {
            let now = Instant::now();

            while let Ok(attack) = self.garbage_rx.try_recv() {
                session.queue_attack(attack);
            }

            while event::poll(Duration::ZERO)? {
                let Event::Key(key) = event::read()? else {
                    continue;
                };
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key_to_action(key) {
                    Action::Quit => session.resign(now),
                    action => session.apply_action(action, now),
                }
            }

            session.tick(now);

            let opponents = self.lobby.boards_snapshot();
            terminal.draw(|frame| ui::draw_game(frame, &mut session, &opponents, now))?;

            if session.is_game_over() {
                return Ok(session.stats(now));
            }
            tokio::time::sleep(FRAME_INTERVAL).await;
        }
    }

    /// Show collected results until the final ranking has been up a while.
    async fn results_screen(&mut self, terminal: &mut DefaultTerminal) -> Result<()> {
        let results_rx = self.lobby.results_receiver();
        let mut linger_until: Option<Instant> = None;
        loop {
            let final_text: Option<String> = (*results_rx.borrow()).clone();
            if final_text.is_some() && linger_until.is_none() {
                linger_until = Some(Instant::now() + RESULTS_LINGER);
            }

            terminal.draw(|frame| {
                ui::draw_results(
                    frame,
                    final_text.as_deref(),
                    self.lobby.record_count(),
                    self.lobby.expected_peers(),
                )
            })?;

            while event::poll(Duration::ZERO)? {
                let _ = event::read()?;
                if final_text.is_some() {
                    return Ok(());
                }
            }
            if linger_until.is_some_and(|until| Instant::now() >= until) {
                return Ok(());
            }
            tokio::time::sleep(FRAME_INTERVAL).await;
        }
    }
}
