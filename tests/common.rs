#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use p2p_tetris::{GarbageAttack, Lobby, LobbyConfig, PeerIdentity, PeerMesh};
use tokio::sync::mpsc;

/// Reserve distinct loopback addresses by briefly binding port 0.
pub fn reserve_addrs(n: usize) -> Vec<String> {
    (0..n)
        .map(|_| {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("reserve port");
            let port = listener.local_addr().expect("local addr").port();
            format!("127.0.0.1:{port}")
        })
        .collect()
}

pub struct TestPeer {
    pub mesh: Arc<PeerMesh>,
    pub lobby: Lobby,
    pub garbage_rx: mpsc::UnboundedReceiver<GarbageAttack>,
}

/// Bring up one full peer: mesh plus lobby, as `main` wires them.
pub async fn spawn_peer(
    addr: &str,
    all_addrs: &[String],
    name: &str,
    results_timeout: Duration,
) -> Result<TestPeer> {
    let (mesh, incoming) = PeerMesh::connect(addr, all_addrs, name).await?;
    let mesh = Arc::new(mesh);
    let expected = all_addrs
        .iter()
        .map(|a| PeerIdentity::normalize(a))
        .collect::<HashSet<_>>()
        .len();
    let mut config = LobbyConfig::new(expected);
    config.results_timeout = results_timeout;
    let (lobby, garbage_rx) = Lobby::new(mesh.clone(), incoming, config);
    Ok(TestPeer {
        mesh,
        lobby,
        garbage_rx,
    })
}

/// Wait until the mesh has at least `expected` established links.
pub async fn wait_for_links(mesh: &PeerMesh, expected: usize) {
    for _ in 0..200 {
        if mesh.link_count() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!(
        "expected {expected} links, have {} after waiting",
        mesh.link_count()
    );
}

/// Wait for the round to start and return its seed.
pub async fn await_seed(lobby: &Lobby, within: Duration) -> Result<u64> {
    let mut rx = lobby.start_receiver();
    let seed = *tokio::time::timeout(within, rx.wait_for(|s| s.is_some())).await??;
    Ok(seed.expect("seed is present after wait_for"))
}

/// Wait for the final ranked results text.
pub async fn await_results(lobby: &Lobby, within: Duration) -> Result<String> {
    let mut rx = lobby.results_receiver();
    let text = {
        let published = tokio::time::timeout(within, rx.wait_for(|r| r.is_some())).await??;
        (*published).clone()
    };
    Ok(text.expect("results are present after wait_for"))
}
