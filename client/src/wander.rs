//! Synthetic local pose for the headless client
//!
//! Stands in for real player input: the pose drifts in a random direction,
//! turning every so often, and stays inside the screen.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SPEED: f32 = 180.0;
/// Chance per second of picking a new direction
const TURN_RATE: f64 = 0.8;

/// Pose published for the local player each frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalPose {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    /// 0 facing left, 1 facing right
    pub facing: u8,
    /// 0 idle, 1 moving
    pub anim: u8,
}

/// Random walk confined to a `width` by `height` screen
pub struct Wanderer {
    pose: LocalPose,
    width: f32,
    height: f32,
    rng: StdRng,
}

impl Wanderer {
    /// Starts at a random spot with an entropy-seeded generator
    pub fn new(width: f32, height: f32) -> Self {
        Self::with_rng(width, height, StdRng::from_entropy())
    }

    /// Dimensions below one unit are raised to one
    pub fn with_rng(width: f32, height: f32, mut rng: StdRng) -> Self {
        let width = width.max(1.0);
        let height = height.max(1.0);
        let pose = LocalPose {
            x: rng.gen_range(0.0..width),
            y: rng.gen_range(0.0..height),
            vx: 0.0,
            vy: 0.0,
            facing: 1,
            anim: 0,
        };
        Self {
            pose,
            width,
            height,
            rng,
        }
    }

    pub fn pose(&self) -> LocalPose {
        self.pose
    }

    /// Moves the pose by `dt` seconds, turning now and then and bouncing off the edges
    pub fn step(&mut self, dt: f32) -> LocalPose {
        let still = self.pose.vx == 0.0 && self.pose.vy == 0.0;
        if still || self.rng.gen_bool((TURN_RATE * f64::from(dt)).clamp(0.0, 1.0)) {
            let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
            self.pose.vx = angle.cos() * SPEED;
            self.pose.vy = angle.sin() * SPEED;
        }

        let pose = &mut self.pose;
        pose.x += pose.vx * dt;
        pose.y += pose.vy * dt;
        if pose.x < 0.0 || pose.x > self.width {
            pose.x = pose.x.clamp(0.0, self.width);
            pose.vx = -pose.vx;
        }
        if pose.y < 0.0 || pose.y > self.height {
            pose.y = pose.y.clamp(0.0, self.height);
            pose.vy = -pose.vy;
        }
        pose.facing = u8::from(pose.vx >= 0.0);
        pose.anim = u8::from(pose.vx != 0.0 || pose.vy != 0.0);

        *pose
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wanderer_stays_on_screen() {
        let mut wanderer = Wanderer::with_rng(640.0, 480.0, StdRng::seed_from_u64(7));
        for _ in 0..5_000 {
            let pose = wanderer.step(1.0 / 60.0);
            assert!((0.0..=640.0).contains(&pose.x));
            assert!((0.0..=480.0).contains(&pose.y));
        }
    }

    #[test]
    fn test_degenerate_screen_is_clamped() {
        let mut wanderer = Wanderer::with_rng(0.0, -3.0, StdRng::seed_from_u64(3));
        for _ in 0..100 {
            let pose = wanderer.step(1.0 / 60.0);
            assert!((0.0..=1.0).contains(&pose.x));
            assert!((0.0..=1.0).contains(&pose.y));
        }
    }

    #[test]
    fn test_wanderer_moves_and_faces_travel() {
        let mut wanderer = Wanderer::with_rng(1920.0, 1080.0, StdRng::seed_from_u64(1));
        let start = wanderer.pose();
        let pose = wanderer.step(0.1);

        assert_ne!((pose.x, pose.y), (start.x, start.y));
        assert_eq!(pose.anim, 1);
        assert_eq!(pose.facing, u8::from(pose.vx >= 0.0));
    }
}
