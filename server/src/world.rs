//! Central world simulation and its fixed-rate publisher
//!
//! Simulation and publishing run on independent schedules: simulation catches
//! up on missed ticks so platform motion stays deterministic, while publishing
//! skips missed cycles and always serializes the current state.

use log::{debug, info, warn};
use parking_lot::Mutex;
use shared::{
    FixedRate, Message, PlatformRecord, PlatformWorld, PlayerId, PoseRecord, Transport,
    WorldSnapshot,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Latest player poses and platform records, shared between server services
#[derive(Debug, Default)]
pub struct WorldBoard {
    poses: Mutex<BTreeMap<PlayerId, PoseRecord>>,
    platforms: Mutex<Vec<PlatformRecord>>,
}

impl WorldBoard {
    /// Stores `pose` as the latest known pose of its player
    pub fn record_pose(&self, pose: PoseRecord) {
        self.poses.lock().insert(pose.id, pose);
    }

    /// All known poses ordered by player id
    pub fn poses(&self) -> Vec<PoseRecord> {
        self.poses.lock().values().copied().collect()
    }

    /// Replaces the platforms with the most recently published ones
    pub fn set_platforms(&self, platforms: Vec<PlatformRecord>) {
        *self.platforms.lock() = platforms;
    }

    /// Platforms as of the last published snapshot
    pub fn platforms(&self) -> Vec<PlatformRecord> {
        self.platforms.lock().clone()
    }
}

/// Authoritative platform simulation plus its publish schedule
pub struct WorldService {
    world: PlatformWorld,
    simulate: FixedRate,
    publish: FixedRate,
    dt: f32,
}

impl WorldService {
    /// Both schedules start at `start`; [`WorldService::run`] restarts them
    pub fn new(world: PlatformWorld, simulation_hz: f64, publish_hz: f64, start: Instant) -> Self {
        let simulate = FixedRate::new(simulation_hz, start);
        let dt = simulate.period().as_secs_f32();
        Self {
            world,
            simulate,
            publish: FixedRate::new(publish_hz, start),
            dt,
        }
    }

    /// The simulated world as of the last step
    pub fn world(&self) -> &PlatformWorld {
        &self.world
    }

    /// Runs every simulation step due at `now` and returns a snapshot when a
    /// publish cycle is due
    pub fn advance(&mut self, now: Instant, board: &WorldBoard) -> Option<WorldSnapshot> {
        for _ in 0..self.simulate.due_steps(now) {
            self.world.step(self.dt);
        }

        if !self.publish.poll(now) {
            return None;
        }

        let platforms = self.world.records();
        board.set_platforms(platforms.clone());
        Some(WorldSnapshot {
            tick: self.world.tick(),
            players: board.poses(),
            platforms,
        })
    }

    fn idle_time(&self, now: Instant) -> Duration {
        self.simulate
            .until_next(now)
            .min(self.publish.until_next(now))
    }

    /// Simulates and publishes until `running` is cleared
    pub fn run(&mut self, transport: &dyn Transport, board: &WorldBoard, running: &AtomicBool) {
        info!(
            "World publisher running with {} platforms",
            self.world.platforms().len()
        );
        let start = Instant::now();
        self.simulate.reset(start);
        self.publish.reset(start);

        while running.load(Ordering::Relaxed) {
            if let Some(snapshot) = self.advance(Instant::now(), board) {
                match Message::WorldSnapshot(snapshot).encode() {
                    Ok(bytes) => {
                        if let Err(e) = transport.send(&bytes) {
                            warn!("Failed to publish world snapshot: {}", e);
                        }
                    }
                    Err(e) => warn!("Failed to encode world snapshot: {}", e),
                }
            }
            thread::sleep(self.idle_time(Instant::now()));
        }

        debug!("World publisher stopped at tick {}", self.world.tick());
    }
}
