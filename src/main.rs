//! # P2P Tetris
//!
//! Terminal multiplayer Tetris over a full-mesh peer network. Every peer is
//! given the same address list; readiness, the shared piece seed and the
//! final rankings are agreed without any central server.
//!
//! ```sh
//! p2p-tetris --port 50051 --peers localhost:50051,localhost:50052
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use p2p_tetris::{App, Error, Lobby, LobbyConfig, PeerIdentity, PeerMesh, PlayerProfile};

#[derive(Parser, Debug)]
#[command(author, version, about = "Peer-to-peer terminal Tetris")]
struct Args {
    /// Port to listen on (e.g. 50051)
    #[arg(long)]
    port: u16,

    /// Peer addresses (host:port) including yourself; space or comma
    /// separated
    #[arg(long, required = true, num_args = 1..)]
    peers: Vec<String>,

    /// Display name; stored in the profile for future runs
    #[arg(long)]
    name: Option<String>,

    /// Log file (the terminal itself is owned by the UI)
    #[arg(long, default_value = "p2p-tetris.log")]
    log_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_file)?;

    let peer_list = split_peer_list(&args.peers);
    if peer_list.is_empty() {
        return Err(Error::EmptyPeerList.into());
    }
    let listen_addr = advertised_addr(args.port, &peer_list);
    let expected = expected_peers(&peer_list);
    let player_name = PlayerProfile::resolve(args.name.clone());

    tracing::info!(
        "starting as {player_name} on {listen_addr}; expecting {expected} peers: {peer_list:?}"
    );

    let (mesh, incoming) = PeerMesh::connect(&listen_addr, &peer_list, &player_name).await?;
    let mesh = Arc::new(mesh);
    let (lobby, garbage_rx) = Lobby::new(mesh.clone(), incoming, LobbyConfig::new(expected));

    let mut terminal = ratatui::init();
    let mut app = App::new(mesh.clone(), lobby, garbage_rx, player_name);
    let result = app.run(&mut terminal).await;
    ratatui::restore();
    mesh.shutdown();
    result
}

fn init_logging(path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating log file {}", path.display()))?;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "p2p_tetris=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false),
        )
        .init();
    Ok(())
}

/// Addresses can be passed space or comma separated; flatten both.
fn split_peer_list(raw: &[String]) -> Vec<String> {
    raw.iter()
        .flat_map(|entry| entry.split(','))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// The address we bind and report about ourselves: the peer-list entry for
/// our port, preferring a loopback one, so our identity matches what other
/// peers have in their lists.
fn advertised_addr(port: u16, peer_list: &[String]) -> String {
    let ours: Vec<&String> = peer_list
        .iter()
        .filter(|entry| {
            entry
                .rsplit_once(':')
                .is_some_and(|(_, p)| p == port.to_string())
        })
        .collect();
    let loopback = ours.iter().find(|entry| {
        PeerIdentity::normalize(entry)
            .as_str()
            .starts_with("localhost:")
    });
    match loopback.or(ours.first()) {
        Some(entry) => (*entry).clone(),
        None => {
            tracing::warn!("no peer-list entry matches port {port}; listening on loopback");
            format!("127.0.0.1:{port}")
        }
    }
}

/// Unique participants in the deduplicated address list, including us.
fn expected_peers(peer_list: &[String]) -> usize {
    peer_list
        .iter()
        .map(|addr| PeerIdentity::normalize(addr))
        .collect::<HashSet<_>>()
        .len()
}
