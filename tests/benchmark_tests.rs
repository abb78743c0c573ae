//! Performance benchmarks for the hot paths of the mesh

use client::authority::{decide, elect};
use client::peers::PeerTable;
use shared::{
    Message, P2pPlayer, PlatformLayout, PlatformRecord, PlatformWorld, PoseRecord, WorldSnapshot,
};
use std::time::{Duration, Instant};

fn snapshot(players: usize, platforms: usize) -> WorldSnapshot {
    WorldSnapshot {
        tick: 1,
        players: (0..players)
            .map(|i| PoseRecord {
                id: i as i32 + 1,
                x: i as f32,
                y: 2.0 * i as f32,
            })
            .collect(),
        platforms: (0..platforms)
            .map(|i| PlatformRecord {
                x: i as f32,
                y: 100.0,
                vx: 220.0,
                vy: 0.0,
            })
            .collect(),
    }
}

/// Benchmarks world snapshot encoding and decoding
#[test]
fn benchmark_world_snapshot_codec() {
    let message = Message::WorldSnapshot(snapshot(8, 16));
    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = message.encode().unwrap();
        let _ = Message::decode(&bytes).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "World snapshot codec: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks a full second of platform simulation with many movers
#[test]
fn benchmark_platform_simulation() {
    let layout = PlatformLayout {
        horizontal_movers: 20,
        vertical_movers: 10,
        ..PlatformLayout::default()
    };
    let mut world = PlatformWorld::from_layout(&layout);
    let iterations = 120 * 60;
    let start = Instant::now();

    for _ in 0..iterations {
        world.step(1.0 / 120.0);
    }

    let duration = start.elapsed();
    println!(
        "Platform simulation: {} steps of {} platforms in {:?}",
        iterations,
        world.platforms().len(),
        duration
    );

    assert_eq!(world.tick(), iterations as u64);
    // A minute of simulated time should take well under a second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks peer intake and the election evaluated every loop iteration
#[test]
fn benchmark_peer_intake_and_election() {
    let mut peers = PeerTable::new(1, Duration::from_secs(2), Duration::from_secs(3));
    let seen = Instant::now();
    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let packet = P2pPlayer {
            tick: i as u64,
            player_id: (i % 16) as i32 + 2,
            x: 1.0,
            y: 2.0,
            vx: 0.0,
            vy: 0.0,
            facing: 0,
            anim: 0,
        };
        peers.apply(&packet, seen);
        if i % 100 == 0 {
            let live = peers.live_ids(seen);
            let _ = decide(1, &live, Some(seen), seen, Duration::from_secs(1));
        }
    }

    let duration = start.elapsed();
    println!(
        "Peer intake: {} packets in {:?} ({:.2} ns/packet)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_eq!(elect(1, &peers.live_ids(seen)), 1);
    assert_eq!(peers.len(), 16);
    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}
