mod common;
use common::*;

use std::time::Duration;

use anyhow::Result;
use p2p_tetris::PeerMessage;

#[tokio::test]
async fn attacks_reach_opponents_but_never_the_sender() -> Result<()> {
    let addrs = reserve_addrs(2);
    let mut a = spawn_peer(&addrs[0], &addrs, "alice", Duration::from_secs(10)).await?;
    let mut b = spawn_peer(&addrs[1], &addrs, "bob", Duration::from_secs(10)).await?;
    wait_for_links(&a.mesh, 1).await;
    wait_for_links(&b.mesh, 1).await;

    // What the session loop broadcasts when a lock sends garbage.
    a.mesh.broadcast(&PeerMessage::Garbage {
        lines: 3,
        sender: a.mesh.listen_addr().to_string(),
        name: "alice".into(),
    });

    let attack = tokio::time::timeout(Duration::from_secs(2), b.garbage_rx.recv())
        .await?
        .expect("channel closed");
    assert_eq!(attack.lines, 3);
    assert_eq!(attack.from, "alice");

    // An echo of alice's own attack routed back at her is dropped by the
    // sender-identity check.
    b.mesh.send(
        a.mesh.listen_addr(),
        &PeerMessage::Garbage {
            lines: 9,
            sender: a.mesh.listen_addr().to_string(),
            name: "alice".into(),
        },
    );
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(a.garbage_rx.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn board_snapshots_fill_the_opponent_cache() -> Result<()> {
    let addrs = reserve_addrs(2);
    let a = spawn_peer(&addrs[0], &addrs, "alice", Duration::from_secs(10)).await?;
    let b = spawn_peer(&addrs[1], &addrs, "bob", Duration::from_secs(10)).await?;
    wait_for_links(&a.mesh, 1).await;
    wait_for_links(&b.mesh, 1).await;

    a.mesh.broadcast(&PeerMessage::GameState {
        board: p2p_tetris::BoardSnapshot {
            cells: vec![0; 200],
            width: 10,
            height: 20,
            score: 1234,
            player_name: "alice".into(),
            active_piece: None,
        },
    });

    for _ in 0..100 {
        let boards = b.lobby.boards_snapshot();
        if let Some(board) = boards.first() {
            assert_eq!(board.player_name, "alice");
            assert_eq!(board.score, 1234);
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("snapshot never reached the opponent cache");
}
