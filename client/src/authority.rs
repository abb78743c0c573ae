//! Temporary world authority while the central server is unreachable
//!
//! Every client evaluates the same rule from its own view of the mesh: when
//! the server has gone stale, the lowest id among itself and its live peers
//! simulates and publishes the world. Views can differ for a moment, so two
//! clients may briefly both hold authority; there is no voting.

use log::info;
use shared::{
    is_valid_id, FixedRate, PlatformLayout, PlatformRecord, PlatformWorld, PlayerId,
    WorldSnapshot,
};
use std::time::{Duration, Instant};

/// Whether this client currently owns the world simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityState {
    NonAuthority,
    Authority,
}

/// Lowest valid id among `own` and `live`
pub fn elect(own: PlayerId, live: &[PlayerId]) -> PlayerId {
    live.iter()
        .copied()
        .filter(|id| is_valid_id(*id))
        .fold(own, PlayerId::min)
}

/// True once a server that was heard from has been silent for longer than `stale_after`
pub fn server_is_stale(last_server: Option<Instant>, now: Instant, stale_after: Duration) -> bool {
    last_server.is_some_and(|seen| now.saturating_duration_since(seen) > stale_after)
}

/// Authority state `own` should be in given its live peers and the server's freshness
pub fn decide(
    own: PlayerId,
    live: &[PlayerId],
    last_server: Option<Instant>,
    now: Instant,
    stale_after: Duration,
) -> AuthorityState {
    if server_is_stale(last_server, now, stale_after) && elect(own, live) == own {
        AuthorityState::Authority
    } else {
        AuthorityState::NonAuthority
    }
}

/// Simulation owned while authoritative
struct ActiveWorld {
    world: PlatformWorld,
    simulate: FixedRate,
    publish: FixedRate,
}

/// Election state plus the local world simulation it drives
pub struct AuthorityMachine {
    state: AuthorityState,
    layout: PlatformLayout,
    stale_after: Duration,
    simulation_hz: f64,
    publish_hz: f64,
    active: Option<ActiveWorld>,
}

impl AuthorityMachine {
    /// Starts as a non-authority; `layout` seeds any world this client takes over
    pub fn new(
        layout: PlatformLayout,
        stale_after: Duration,
        simulation_hz: f64,
        publish_hz: f64,
    ) -> Self {
        Self {
            state: AuthorityState::NonAuthority,
            layout,
            stale_after,
            simulation_hz,
            publish_hz,
            active: None,
        }
    }

    /// State after the most recent [`AuthorityMachine::evaluate`]
    pub fn state(&self) -> AuthorityState {
        self.state
    }

    /// True while this client simulates and publishes the world
    pub fn is_authority(&self) -> bool {
        self.state == AuthorityState::Authority
    }

    /// Whether a world snapshot published by a peer should replace the platforms
    ///
    /// Never while this client is the authority or while central snapshots are
    /// still fresh. A client that has not heard the server yet follows peers.
    pub fn accepts_peer_world(&self, last_server: Option<Instant>, now: Instant) -> bool {
        !self.is_authority()
            && (last_server.is_none() || server_is_stale(last_server, now, self.stale_after))
    }

    /// Re-evaluates the election and handles the transition, if any
    ///
    /// On becoming authority the simulation is seeded from `last_world`, the
    /// newest world snapshot this client observed.
    pub fn evaluate(
        &mut self,
        own: PlayerId,
        live: &[PlayerId],
        last_server: Option<Instant>,
        last_world: Option<&WorldSnapshot>,
        now: Instant,
    ) -> AuthorityState {
        let next = decide(own, live, last_server, now, self.stale_after);
        if next == self.state {
            return next;
        }

        match next {
            AuthorityState::Authority => {
                let world = match last_world {
                    Some(snapshot) => {
                        PlatformWorld::seeded(&self.layout, snapshot.tick, &snapshot.platforms)
                    }
                    None => PlatformWorld::from_layout(&self.layout),
                };
                info!(
                    "Player {} taking world authority at tick {}",
                    own,
                    world.tick()
                );
                self.active = Some(ActiveWorld {
                    world,
                    simulate: FixedRate::new(self.simulation_hz, now),
                    publish: FixedRate::new(self.publish_hz, now),
                });
            }
            AuthorityState::NonAuthority => {
                info!("Player {} handing world authority back", own);
                self.active = None;
            }
        }

        self.state = next;
        next
    }

    /// Steps the local simulation; returns a snapshot when one should be published
    pub fn advance(&mut self, now: Instant) -> Option<WorldSnapshot> {
        let active = self.active.as_mut()?;
        let dt = active.simulate.period().as_secs_f32();
        for _ in 0..active.simulate.due_steps(now) {
            active.world.step(dt);
        }

        if !active.publish.poll(now) {
            return None;
        }
        Some(WorldSnapshot {
            tick: active.world.tick(),
            players: Vec::new(),
            platforms: active.world.records(),
        })
    }

    /// Platforms of the local simulation while authoritative
    pub fn platforms(&self) -> Option<Vec<PlatformRecord>> {
        self.active.as_ref().map(|active| active.world.records())
    }

    /// Time until the local simulation next needs attention
    pub fn until_next(&self, now: Instant) -> Option<Duration> {
        self.active.as_ref().map(|active| {
            active
                .simulate
                .until_next(now)
                .min(active.publish.until_next(now))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STALE: Duration = Duration::from_secs(1);

    fn machine() -> AuthorityMachine {
        AuthorityMachine::new(PlatformLayout::default(), STALE, 120.0, 60.0)
    }

    #[test]
    fn test_elect_picks_lowest_valid_id() {
        assert_eq!(elect(3, &[5, 2, 9]), 2);
        assert_eq!(elect(1, &[5, 2]), 1);
        assert_eq!(elect(4, &[]), 4);
        assert_eq!(elect(4, &[0, -1]), 4);
    }

    #[test]
    fn test_server_never_heard_is_not_stale() {
        let now = Instant::now();
        assert!(!server_is_stale(None, now, STALE));
        assert!(!server_is_stale(Some(now), now + STALE, STALE));
        assert!(server_is_stale(
            Some(now),
            now + STALE + Duration::from_millis(1),
            STALE
        ));
    }

    #[test]
    fn test_fresh_server_means_no_authority() {
        let now = Instant::now();
        assert_eq!(
            decide(1, &[2, 3], Some(now), now, STALE),
            AuthorityState::NonAuthority
        );
        assert_eq!(decide(1, &[], None, now, STALE), AuthorityState::NonAuthority);
    }

    #[test]
    fn test_stale_server_elects_lowest() {
        let seen = Instant::now();
        let later = seen + Duration::from_millis(1500);
        assert_eq!(
            decide(1, &[2], Some(seen), later, STALE),
            AuthorityState::Authority
        );
        assert_eq!(
            decide(2, &[1], Some(seen), later, STALE),
            AuthorityState::NonAuthority
        );
    }

    #[test]
    fn test_takeover_seeds_from_last_snapshot() {
        let seen = Instant::now();
        let later = seen + Duration::from_millis(1500);
        let snapshot = WorldSnapshot {
            tick: 4242,
            players: Vec::new(),
            platforms: vec![PlatformRecord {
                x: 700.0,
                y: 560.0,
                vx: 220.0,
                vy: 0.0,
            }],
        };

        let mut machine = machine();
        let state = machine.evaluate(1, &[2], Some(seen), Some(&snapshot), later);
        assert_eq!(state, AuthorityState::Authority);

        let platforms = machine.platforms().unwrap();
        assert_eq!(platforms.len(), 1);
        assert_eq!(platforms[0].x, 700.0);

        let published = machine.advance(later).unwrap();
        assert_eq!(published.tick, 4243);
        assert!(published.players.is_empty());
    }

    #[test]
    fn test_takeover_without_snapshot_uses_layout() {
        let seen = Instant::now();
        let later = seen + Duration::from_millis(1500);
        let mut machine = machine();

        machine.evaluate(1, &[], Some(seen), None, later);
        let expected: Vec<PlatformRecord> = PlatformLayout::default()
            .build()
            .iter()
            .map(|p| p.record())
            .collect();
        assert_eq!(machine.platforms().unwrap(), expected);
    }

    #[test]
    fn test_authority_handed_back_when_server_fresh() {
        let seen = Instant::now();
        let later = seen + Duration::from_millis(1500);
        let mut machine = machine();

        machine.evaluate(1, &[2], Some(seen), None, later);
        assert!(machine.is_authority());

        let back = later + Duration::from_millis(10);
        machine.evaluate(1, &[2], Some(back), None, back);
        assert!(!machine.is_authority());
        assert!(machine.platforms().is_none());
        assert!(machine.advance(back).is_none());
    }

    #[test]
    fn test_peer_world_ignored_while_server_fresh() {
        let seen = Instant::now();
        let machine = machine();

        assert!(!machine.accepts_peer_world(Some(seen), seen + Duration::from_millis(500)));
        assert!(machine.accepts_peer_world(Some(seen), seen + Duration::from_millis(1500)));
        assert!(machine.accepts_peer_world(None, seen));
    }

    #[test]
    fn test_authority_ignores_peer_world() {
        let seen = Instant::now();
        let later = seen + Duration::from_millis(1500);
        let mut machine = machine();
        machine.evaluate(1, &[2], Some(seen), None, later);

        assert!(machine.is_authority());
        assert!(!machine.accepts_peer_world(Some(seen), later));
    }

    #[test]
    fn test_non_authority_never_publishes() {
        let now = Instant::now();
        let mut machine = machine();
        machine.evaluate(2, &[1], Some(now), None, now + Duration::from_secs(2));
        assert_eq!(machine.state(), AuthorityState::NonAuthority);
        assert!(machine.advance(now + Duration::from_secs(2)).is_none());
    }
}
