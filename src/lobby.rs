//! Round lifecycle coordination without a central authority.
//!
//! Readiness, the shared seed and the final results are all agreed
//! leaderlessly: every peer observes the same READY set through full-mesh
//! broadcast, so every peer derives the same seed from it independently.
//! One consumer task drains the mesh's incoming queue and is the only
//! writer to the round state; the UI and session loop read it through
//! coarse snapshots.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::identity::PeerIdentity;
use crate::mesh::{Inbound, PeerMesh};
use crate::protocol::{BoardSnapshot, PeerMessage, ResultRecord};
use crate::session::SessionStats;

/// Seeds are reduced into this range so they stay short in logs and on
/// screen; every peer must apply the same reduction.
const SEED_RANGE: u64 = 1_000_000;
/// Queue poll timeout, short enough to observe deadlines and resets.
const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// While we are ready and waiting, our READY is re-broadcast at this
/// interval so links established after the first announcement (slow
/// starters, peers still on their results screen) still observe it.
/// Receivers treat READY idempotently, so duplicates are harmless.
const READY_REBROADCAST_INTERVAL: Duration = Duration::from_secs(1);

/// Derive the shared piece seed from the observed ready set.
///
/// The sorted, comma-joined identities are hashed with blake3 and the first
/// eight bytes reduced modulo [`SEED_RANGE`]. Every peer that observes the
/// same set computes the same seed, so no leader election is needed.
pub fn derive_seed(ready: &HashSet<PeerIdentity>) -> u64 {
    let mut ids: Vec<&str> = ready.iter().map(PeerIdentity::as_str).collect();
    ids.sort_unstable();
    let joined = ids.join(",");
    let hash = blake3::hash(joined.as_bytes());
    let mut eight = [0u8; 8];
    eight.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(eight) % SEED_RANGE
}

/// An opponent attack handed to the session loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GarbageAttack {
    pub lines: u32,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// Size of the deduplicated peer address list, including ourselves.
    pub expected_peers: usize,
    /// How long to wait for LOSE reports after the local game ends before
    /// publishing a locally assembled ranking.
    pub results_timeout: Duration,
}

impl LobbyConfig {
    pub fn new(expected_peers: usize) -> Self {
        Self {
            expected_peers,
            results_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultsSource {
    /// Assembled here after the deadline elapsed; superseded by the first
    /// consolidated broadcast received.
    Local,
    /// Received from a peer; final.
    Remote,
}

#[derive(Default)]
struct RoundState {
    ready: HashSet<PeerIdentity>,
    seed: Option<u64>,
    started: bool,
    records: HashMap<PeerIdentity, ResultRecord>,
    final_results: Option<(ResultsSource, String)>,
    results_deadline: Option<Instant>,
    boards: HashMap<PeerIdentity, BoardSnapshot>,
}

pub struct Lobby {
    mesh: Arc<PeerMesh>,
    config: LobbyConfig,
    state: Arc<Mutex<RoundState>>,
    start_tx: watch::Sender<Option<u64>>,
    results_tx: watch::Sender<Option<String>>,
    // Keep the initial receivers alive so the watch channels always retain
    // at least one receiver: `watch::Sender::send` drops the value when the
    // receiver count is zero, which would lose a seed/results published
    // before the first `start_receiver`/`results_receiver` subscription.
    _start_keepalive: watch::Receiver<Option<u64>>,
    _results_keepalive: watch::Receiver<Option<String>>,
    self_inject: mpsc::UnboundedSender<Inbound>,
    consumer: JoinHandle<()>,
}

impl Drop for Lobby {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}

impl Lobby {
    /// Spawn the consumer over the mesh's incoming queue. Returns the lobby
    /// and the channel on which opponent attacks are delivered.
    pub fn new(
        mesh: Arc<PeerMesh>,
        incoming: mpsc::UnboundedReceiver<Inbound>,
        config: LobbyConfig,
    ) -> (Self, mpsc::UnboundedReceiver<GarbageAttack>) {
        let state = Arc::new(Mutex::new(RoundState::default()));
        let (start_tx, start_keepalive) = watch::channel(None);
        let (results_tx, results_keepalive) = watch::channel(None);
        let (garbage_tx, garbage_rx) = mpsc::unbounded_channel();

        let consumer = Consumer {
            mesh: mesh.clone(),
            config: config.clone(),
            state: state.clone(),
            start_tx: start_tx.clone(),
            results_tx: results_tx.clone(),
            garbage_tx,
        };
        let self_inject = mesh.inbound_sender();
        let handle = tokio::spawn(consumer.run(incoming));

        (
            Self {
                mesh,
                config,
                state,
                start_tx,
                results_tx,
                _start_keepalive: start_keepalive,
                _results_keepalive: results_keepalive,
                self_inject,
                consumer: handle,
            },
            garbage_rx,
        )
    }

    /// Declare ourselves ready. The READY carries our self-reported listen
    /// address and is also routed through our own consumer, so local and
    /// remote readiness take the identical path.
    pub fn mark_ready(&self) -> Result<(), Error> {
        if self.state().started {
            return Err(Error::RoundInProgress);
        }
        let msg = PeerMessage::Ready {
            sender: self.mesh.listen_addr().to_string(),
        };
        self.mesh.broadcast(&msg);
        let _ = self.self_inject.send((self.mesh.identity().clone(), msg));
        Ok(())
    }

    /// Report the local game's end: broadcast our LOSE record and open the
    /// result-aggregation window.
    pub fn finish_game(&self, stats: &SessionStats) {
        let msg = PeerMessage::Lose {
            score: stats.survival_secs as u32,
            sender: self.mesh.listen_addr().to_string(),
            extra: format!(
                "{}:{}:{}",
                stats.attacks_sent, stats.attacks_received, stats.score
            ),
        };
        self.mesh.broadcast(&msg);
        let _ = self.self_inject.send((self.mesh.identity().clone(), msg));
    }

    /// Clear every per-round structure for the next round.
    pub fn reset_round(&self) {
        let mut state = self.state();
        *state = RoundState::default();
        drop(state);
        let _ = self.start_tx.send(None);
        let _ = self.results_tx.send(None);
        debug!("round state reset");
    }

    pub fn expected_peers(&self) -> usize {
        self.config.expected_peers
    }

    pub fn ready_count(&self) -> usize {
        self.state().ready.len()
    }

    pub fn ready_peers(&self) -> Vec<PeerIdentity> {
        let mut peers: Vec<_> = self.state().ready.iter().cloned().collect();
        peers.sort();
        peers
    }

    pub fn is_self_ready(&self) -> bool {
        self.state().ready.contains(self.mesh.identity())
    }

    pub fn is_started(&self) -> bool {
        self.state().started
    }

    /// Watch that resolves to the shared seed once the round starts.
    pub fn start_receiver(&self) -> watch::Receiver<Option<u64>> {
        self.start_tx.subscribe()
    }

    /// Watch that resolves to the final ranked results text.
    pub fn results_receiver(&self) -> watch::Receiver<Option<String>> {
        self.results_tx.subscribe()
    }

    pub fn record_count(&self) -> usize {
        self.state().records.len()
    }

    /// Copy of the opponent board cache, sorted by score descending.
    pub fn boards_snapshot(&self) -> Vec<BoardSnapshot> {
        let mut boards: Vec<_> = self.state().boards.values().cloned().collect();
        boards.sort_by(|a, b| b.score.cmp(&a.score));
        boards
    }

    fn state(&self) -> MutexGuard<'_, RoundState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The single writer of round state, draining the shared incoming queue.
struct Consumer {
    mesh: Arc<PeerMesh>,
    config: LobbyConfig,
    state: Arc<Mutex<RoundState>>,
    start_tx: watch::Sender<Option<u64>>,
    results_tx: watch::Sender<Option<String>>,
    garbage_tx: mpsc::UnboundedSender<GarbageAttack>,
}

impl Consumer {
    async fn run(self, mut incoming: mpsc::UnboundedReceiver<Inbound>) {
        let mut last_announce = Instant::now();
        loop {
            match tokio::time::timeout(POLL_INTERVAL, incoming.recv()).await {
                Ok(Some((from, msg))) => self.handle(from, msg),
                Ok(None) => break, // mesh gone
                Err(_) => {}       // poll timeout, fall through to timer checks
            }
            let now = Instant::now();
            self.check_results_deadline(now);
            if now.duration_since(last_announce) >= READY_REBROADCAST_INTERVAL {
                self.reannounce_ready();
                last_announce = now;
            }
        }
        debug!("lobby consumer stopped");
    }

    /// Re-broadcast our READY while the round has not started, so peers
    /// whose links came up late still observe the full ready set.
    fn reannounce_ready(&self) {
        let state = self.state();
        if state.started || !state.ready.contains(self.mesh.identity()) {
            return;
        }
        drop(state);
        self.mesh.broadcast(&PeerMessage::Ready {
            sender: self.mesh.listen_addr().to_string(),
        });
    }

    fn handle(&self, from: PeerIdentity, msg: PeerMessage) {
        match msg {
            PeerMessage::Ready { sender } => self.on_ready(&sender),
            PeerMessage::Start { seed } => self.on_start(seed),
            PeerMessage::Garbage {
                lines,
                sender,
                name,
            } => self.on_garbage(lines, &sender, name),
            PeerMessage::Lose {
                score,
                sender,
                extra,
            } => self.on_lose(score, &sender, &extra),
            PeerMessage::GameResults { results } => self.on_results(results),
            PeerMessage::GameState { board } => {
                self.state().boards.insert(from, board);
            }
            // Handshakes are consumed by the mesh layer.
            PeerMessage::Hello { .. } => {}
        }
    }

    fn on_ready(&self, sender: &str) {
        let identity = PeerIdentity::normalize(sender);
        let mut state = self.state();
        if state.started {
            info!("ignoring READY from {identity}: game already in progress");
            return;
        }
        if !state.ready.insert(identity.clone()) {
            return;
        }
        info!(
            "{identity} is ready ({}/{})",
            state.ready.len(),
            self.config.expected_peers
        );
        if state.ready.len() >= self.config.expected_peers {
            let seed = derive_seed(&state.ready);
            state.seed = Some(seed);
            state.started = true;
            info!("quorum reached, starting round with seed {seed}");
            drop(state);
            self.mesh.broadcast(&PeerMessage::Start { seed });
            let _ = self.start_tx.send(Some(seed));
        }
    }

    fn on_start(&self, seed: u64) {
        let mut state = self.state();
        if !state.started {
            // A peer that reached quorum before us; its seed is authoritative.
            state.seed = Some(seed);
            state.started = true;
            info!("received START, adopting seed {seed}");
            drop(state);
            let _ = self.start_tx.send(Some(seed));
            return;
        }
        match state.seed {
            Some(existing) if existing == seed => {
                debug!("duplicate START with seed {seed}");
            }
            existing => {
                // Should be impossible when every peer derives from the same
                // ready set; first start wins.
                warn!("divergent START seed {seed} after starting with {existing:?}");
            }
        }
    }

    fn on_garbage(&self, lines: u32, sender: &str, name: String) {
        if &PeerIdentity::normalize(sender) == self.mesh.identity() {
            debug!("ignoring our own garbage broadcast ({lines} lines)");
            return;
        }
        debug!("{lines} garbage lines incoming from {name}");
        let _ = self.garbage_tx.send(GarbageAttack { lines, from: name });
    }

    fn on_lose(&self, score: u32, sender: &str, extra: &str) {
        let identity = PeerIdentity::normalize(sender);
        let mut state = self.state();
        if state.records.contains_key(&identity) {
            return; // first report per peer wins
        }
        let name = if &identity == self.mesh.identity() {
            self.mesh.player_name().to_string()
        } else {
            state
                .boards
                .get(&identity)
                .map(|b| b.player_name.clone())
                .unwrap_or_else(|| identity.to_string())
        };
        let record = ResultRecord::from_lose(name, score, extra);
        info!(
            "recorded result for {identity}: {:.0}s survived ({}/{})",
            record.survival_secs,
            state.records.len() + 1,
            self.config.expected_peers
        );
        state.records.insert(identity.clone(), record);
        if &identity == self.mesh.identity() {
            state.results_deadline = Some(Instant::now() + self.config.results_timeout);
        }
    }

    fn on_results(&self, results: String) {
        let mut state = self.state();
        if matches!(state.final_results, Some((ResultsSource::Remote, _))) {
            debug!("ignoring duplicate GAME_RESULTS");
            return;
        }
        // The first consolidated broadcast received is final, even when we
        // already published our own local ranking.
        state.final_results = Some((ResultsSource::Remote, results.clone()));
        state.results_deadline = None;
        drop(state);
        info!("adopting received GAME_RESULTS");
        let _ = self.results_tx.send(Some(results));
    }

    fn check_results_deadline(&self, now: Instant) {
        let mut state = self.state();
        let Some(deadline) = state.results_deadline else {
            return;
        };
        if now < deadline || state.final_results.is_some() {
            return;
        }
        let text = render_rankings(state.records.values());
        state.final_results = Some((ResultsSource::Local, text.clone()));
        state.results_deadline = None;
        drop(state);
        info!("results deadline elapsed, publishing local ranking");
        self.mesh
            .broadcast(&PeerMessage::GameResults {
                results: text.clone(),
            });
        let _ = self.results_tx.send(Some(text));
    }

    fn state(&self) -> MutexGuard<'_, RoundState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Render the ranked results text, survival time descending.
fn render_rankings<'a>(records: impl Iterator<Item = &'a ResultRecord>) -> String {
    let mut ranked: Vec<&ResultRecord> = records.collect();
    ranked.sort_by(|a, b| {
        b.survival_secs
            .partial_cmp(&a.survival_secs)
            .unwrap_or(Ordering::Equal)
    });
    let mut out = String::from("=== FINAL RESULTS ===\n");
    for (place, record) in ranked.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. {}: {:.1}s (Atk: {} S / {} R, Score: {})",
            place + 1,
            record.name,
            record.survival_secs,
            record.attacks_sent,
            record.attacks_received,
            record.score
        );
    }
    out
}
