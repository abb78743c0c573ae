//! Moving platform simulation shared by the server world and client authority

use crate::protocol::PlatformRecord;

/// Length of a platform moving along x
pub const HORIZONTAL_EXTENT: f32 = 250.0;
/// Height of a platform moving along y
pub const VERTICAL_EXTENT: f32 = 80.0;

/// Parses a screen dimension given on the command line; must be a positive number
pub fn parse_dimension(arg: &str) -> Result<f32, String> {
    let value: f32 = arg
        .parse()
        .map_err(|e| format!("`{}` is not a number: {}", arg, e))?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(format!("`{}` must be greater than zero", arg))
    }
}

/// Direction a platform travels in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Horizontal,
    Vertical,
}

impl Axis {
    /// Axis of the dominant velocity component; `None` for a resting record
    pub fn of_motion(record: &PlatformRecord) -> Option<Axis> {
        if record.vx == 0.0 && record.vy == 0.0 {
            None
        } else if record.vy.abs() > record.vx.abs() {
            Some(Axis::Vertical)
        } else {
            Some(Axis::Horizontal)
        }
    }
}

/// Travel limits along a platform's axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: f32,
    pub max: f32,
}

/// A platform ping-ponging between its bounds along one axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlatformState {
    pub x: f32,
    pub y: f32,
    /// Signed speed along `axis`
    pub velocity: f32,
    pub bounds: Bounds,
    pub axis: Axis,
    /// Size along `axis`; the far edge is kept inside `bounds.max`
    pub extent: f32,
}

impl PlatformState {
    /// Platform travelling along x between `min` and `max`
    pub fn horizontal(x: f32, y: f32, velocity: f32, min: f32, max: f32, extent: f32) -> Self {
        Self {
            x,
            y,
            velocity,
            bounds: Bounds { min, max },
            axis: Axis::Horizontal,
            extent,
        }
    }

    /// Platform travelling along y between `min` and `max`
    pub fn vertical(x: f32, y: f32, velocity: f32, min: f32, max: f32, extent: f32) -> Self {
        Self {
            x,
            y,
            velocity,
            bounds: Bounds { min, max },
            axis: Axis::Vertical,
            extent,
        }
    }

    /// Integrates one step and reflects velocity at the bounds
    pub fn step(&mut self, dt: f32) {
        let bounds = self.bounds;
        let extent = self.extent;
        let velocity = &mut self.velocity;
        let position = match self.axis {
            Axis::Horizontal => &mut self.x,
            Axis::Vertical => &mut self.y,
        };

        *position += *velocity * dt;
        if *position < bounds.min {
            *position = bounds.min;
            *velocity = velocity.abs();
        }
        if *position + extent > bounds.max {
            *position = bounds.max - extent;
            *velocity = -velocity.abs();
        }
    }

    /// Wire form of the current position and velocity
    pub fn record(&self) -> PlatformRecord {
        let (vx, vy) = match self.axis {
            Axis::Horizontal => (self.velocity, 0.0),
            Axis::Vertical => (0.0, self.velocity),
        };
        PlatformRecord {
            x: self.x,
            y: self.y,
            vx,
            vy,
        }
    }

    /// Takes position and velocity from an observed record, keeping bounds and axis
    pub fn adopt(&mut self, record: &PlatformRecord) {
        self.x = record.x;
        self.y = record.y;
        let velocity = match self.axis {
            Axis::Horizontal => record.vx,
            Axis::Vertical => record.vy,
        };
        if velocity != 0.0 {
            self.velocity = velocity;
        }
    }
}

/// Parameters the default platform arrangement is derived from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlatformLayout {
    pub width: f32,
    pub height: f32,
    pub horizontal_movers: usize,
    pub vertical_movers: usize,
}

impl Default for PlatformLayout {
    fn default() -> Self {
        Self {
            width: 1920.0,
            height: 1080.0,
            horizontal_movers: 2,
            vertical_movers: 1,
        }
    }
}

impl PlatformLayout {
    /// Platforms in their initial positions
    pub fn build(&self) -> Vec<PlatformState> {
        let (w, h) = (self.width, self.height);
        let left: f32 = 120.0;
        let right = w - 320.0;
        let mut platforms = Vec::with_capacity(self.horizontal_movers + self.vertical_movers);

        if self.horizontal_movers >= 1 {
            platforms.push(PlatformState::horizontal(
                200.0,
                h - 520.0,
                220.0,
                left,
                right,
                300.0,
            ));
        }
        if self.horizontal_movers >= 2 {
            platforms.push(PlatformState::horizontal(
                right - 64.0,
                h - 264.0,
                -260.0,
                10.0,
                w - 90.0,
                64.0,
            ));
        }
        for i in 2..self.horizontal_movers {
            let step = i as f32;
            let max_x = (right - step * 50.0).max(left + HORIZONTAL_EXTENT);
            platforms.push(PlatformState::horizontal(
                (left + step * 100.0).min(max_x - HORIZONTAL_EXTENT),
                h - 300.0 - step * 80.0,
                150.0 + step * 30.0,
                left,
                max_x,
                HORIZONTAL_EXTENT,
            ));
        }
        for i in 0..self.vertical_movers {
            let step = i as f32;
            let min_y = 200.0 + step * 50.0;
            let max_y = (h - 300.0 - step * 30.0).max(min_y + VERTICAL_EXTENT);
            platforms.push(PlatformState::vertical(
                800.0 + step * 200.0,
                min_y,
                180.0 + step * 40.0,
                min_y,
                max_y,
                VERTICAL_EXTENT,
            ));
        }

        platforms
    }

    /// Platform for an observed record with no matching platform in this layout
    ///
    /// The axis follows the dominant velocity component and the platform may
    /// travel across the whole screen along it.
    pub fn derive(&self, record: &PlatformRecord) -> PlatformState {
        let clamp = |position: f32, span: f32, extent: f32| {
            let max = span.max(extent);
            (position.clamp(0.0, max - extent), max)
        };

        if Axis::of_motion(record) == Some(Axis::Vertical) {
            let (y, max) = clamp(record.y, self.height, VERTICAL_EXTENT);
            PlatformState::vertical(record.x, y, record.vy, 0.0, max, VERTICAL_EXTENT)
        } else {
            let (x, max) = clamp(record.x, self.width, HORIZONTAL_EXTENT);
            PlatformState::horizontal(x, record.y, record.vx, 0.0, max, HORIZONTAL_EXTENT)
        }
    }
}

/// Tick counter plus the platforms one authority simulates
#[derive(Debug, Clone)]
pub struct PlatformWorld {
    tick: u64,
    platforms: Vec<PlatformState>,
}

impl PlatformWorld {
    /// World at tick 0 holding `platforms`
    pub fn new(platforms: Vec<PlatformState>) -> Self {
        Self { tick: 0, platforms }
    }

    pub fn from_layout(layout: &PlatformLayout) -> Self {
        Self::new(layout.build())
    }

    /// Continues an observed world: one platform per observed record
    ///
    /// Records are matched by index onto the layout's bounds when they move
    /// along the same axis. Any other record gets bounds derived from its own
    /// motion. With nothing observed the layout is used as built.
    pub fn seeded(layout: &PlatformLayout, tick: u64, observed: &[PlatformRecord]) -> Self {
        let built = layout.build();
        if observed.is_empty() {
            return Self {
                tick,
                platforms: built,
            };
        }

        let platforms = observed
            .iter()
            .enumerate()
            .map(|(i, record)| match built.get(i) {
                Some(base) if Axis::of_motion(record).map_or(true, |axis| axis == base.axis) => {
                    let mut platform = *base;
                    platform.adopt(record);
                    platform
                }
                _ => layout.derive(record),
            })
            .collect();
        Self { tick, platforms }
    }

    /// Advances every platform by `dt` seconds and the tick by one
    pub fn step(&mut self, dt: f32) {
        for platform in &mut self.platforms {
            platform.step(dt);
        }
        self.tick += 1;
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn platforms(&self) -> &[PlatformState] {
        &self.platforms
    }

    /// Wire form of every platform, in order
    pub fn records(&self) -> Vec<PlatformRecord> {
        self.platforms.iter().map(PlatformState::record).collect()
    }
}
