mod common;
use common::*;

use std::time::Duration;

use anyhow::Result;
use p2p_tetris::SessionStats;

#[tokio::test]
async fn three_peers_converge_on_one_seed_in_any_ready_order() -> Result<()> {
    let addrs = reserve_addrs(3);
    let a = spawn_peer(&addrs[0], &addrs, "alice", Duration::from_secs(10)).await?;
    let b = spawn_peer(&addrs[1], &addrs, "bob", Duration::from_secs(10)).await?;
    let c = spawn_peer(&addrs[2], &addrs, "carol", Duration::from_secs(10)).await?;

    wait_for_links(&a.mesh, 2).await;
    wait_for_links(&b.mesh, 2).await;
    wait_for_links(&c.mesh, 2).await;

    // Readiness in an arbitrary order; only the eventually-observed set
    // matters for the seed.
    c.lobby.mark_ready()?;
    a.lobby.mark_ready()?;
    b.lobby.mark_ready()?;

    let seed_a = await_seed(&a.lobby, Duration::from_secs(5)).await?;
    let seed_b = await_seed(&b.lobby, Duration::from_secs(5)).await?;
    let seed_c = await_seed(&c.lobby, Duration::from_secs(5)).await?;

    assert_eq!(seed_a, seed_b);
    assert_eq!(seed_b, seed_c);
    assert!(seed_a < 1_000_000);
    Ok(())
}

#[tokio::test]
async fn late_joiner_is_rejected_for_the_running_round() -> Result<()> {
    let addrs = reserve_addrs(4);
    let first_three = addrs[..3].to_vec();
    let a = spawn_peer(&addrs[0], &first_three, "alice", Duration::from_secs(10)).await?;
    let b = spawn_peer(&addrs[1], &first_three, "bob", Duration::from_secs(10)).await?;
    let c = spawn_peer(&addrs[2], &first_three, "carol", Duration::from_secs(10)).await?;

    wait_for_links(&a.mesh, 2).await;
    wait_for_links(&b.mesh, 2).await;
    wait_for_links(&c.mesh, 2).await;

    a.lobby.mark_ready()?;
    b.lobby.mark_ready()?;
    c.lobby.mark_ready()?;
    await_seed(&a.lobby, Duration::from_secs(5)).await?;
    await_seed(&b.lobby, Duration::from_secs(5)).await?;
    await_seed(&c.lobby, Duration::from_secs(5)).await?;

    // A fourth peer shows up after the round started.
    let d = spawn_peer(&addrs[3], &addrs, "dave", Duration::from_secs(10)).await?;
    wait_for_links(&d.mesh, 3).await;
    d.lobby.mark_ready()?;

    // It never receives a START for the round in progress...
    assert!(
        await_seed(&d.lobby, Duration::from_secs(2)).await.is_err(),
        "late joiner must not be started into a running round"
    );
    assert!(!d.lobby.is_started());

    // ...and the running peers ignored its READY.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(a.lobby.ready_count(), 3);
    assert_eq!(b.lobby.ready_count(), 3);
    Ok(())
}

#[tokio::test]
async fn results_aggregate_and_rank_by_survival_descending() -> Result<()> {
    let addrs = reserve_addrs(3);
    let timeout = Duration::from_millis(400);
    let a = spawn_peer(&addrs[0], &addrs, "alice", timeout).await?;
    let b = spawn_peer(&addrs[1], &addrs, "bob", timeout).await?;
    let c = spawn_peer(&addrs[2], &addrs, "carol", timeout).await?;

    wait_for_links(&a.mesh, 2).await;
    wait_for_links(&b.mesh, 2).await;
    wait_for_links(&c.mesh, 2).await;

    a.lobby.mark_ready()?;
    b.lobby.mark_ready()?;
    c.lobby.mark_ready()?;
    await_seed(&a.lobby, Duration::from_secs(5)).await?;
    await_seed(&b.lobby, Duration::from_secs(5)).await?;
    await_seed(&c.lobby, Duration::from_secs(5)).await?;

    // Games end at different times with different survival times.
    a.lobby.finish_game(&SessionStats {
        survival_secs: 50.0,
        attacks_sent: 5,
        attacks_received: 1,
        score: 500,
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    b.lobby.finish_game(&SessionStats {
        survival_secs: 90.0,
        attacks_sent: 9,
        attacks_received: 0,
        score: 900,
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    c.lobby.finish_game(&SessionStats {
        survival_secs: 10.0,
        attacks_sent: 0,
        attacks_received: 7,
        score: 100,
    });

    for peer in [&a, &b, &c] {
        let text = await_results(&peer.lobby, Duration::from_secs(5)).await?;
        // All three records made it into the ranking...
        let longest = text.find("90.0s").expect("longest survivor listed");
        let middle = text.find("50.0s").expect("middle survivor listed");
        let shortest = text.find("10.0s").expect("shortest survivor listed");
        // ...sorted by survival time descending.
        assert!(longest < middle, "ranking out of order:\n{text}");
        assert!(middle < shortest, "ranking out of order:\n{text}");
    }
    Ok(())
}
