//! Kinematic value types and segment geometry

use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

/// Polar velocity: direction in radians plus magnitude (units per second)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    angle: f64,
    magnitude: f64,
}

impl Vector2 {
    pub const ZERO: Self = Self {
        angle: 0.0,
        magnitude: 0.0,
    };

    pub fn new(angle: f64, magnitude: f64) -> Self {
        // A negative magnitude is the same vector pointing the other way
        if magnitude < 0.0 {
            Self {
                angle: angle + PI,
                magnitude: -magnitude,
            }
        } else {
            Self { angle, magnitude }
        }
    }

    pub fn from_cartesian(x: f64, y: f64) -> Self {
        Self {
            angle: y.atan2(x),
            magnitude: x.hypot(y),
        }
    }

    /// Direction normalized to (-π, π]
    pub fn angle(&self) -> f64 {
        normalize_angle(self.angle)
    }

    pub fn magnitude(&self) -> f64 {
        self.magnitude
    }

    pub fn x(&self) -> f64 {
        self.magnitude * self.angle().cos()
    }

    pub fn y(&self) -> f64 {
        self.magnitude * self.angle().sin()
    }

    pub fn with_magnitude(self, magnitude: f64) -> Self {
        Self::new(self.angle, magnitude)
    }

    /// Shorten the vector to `max` if it is longer
    pub fn clamped(self, max: f64) -> Self {
        if self.magnitude > max {
            self.with_magnitude(max)
        } else {
            self
        }
    }
}

/// Wrap an angle into (-π, π]
pub fn normalize_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(TAU);
    if wrapped > PI {
        wrapped - TAU
    } else {
        wrapped
    }
}

/// Dead-reckoning position tracker.
///
/// Holds the current and previous point so collision checks can use the swept
/// segment between ticks. Every timestamped mutation is ignored unless its
/// timestamp is strictly newer than the last one applied.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionVector {
    x: f64,
    y: f64,
    prev_x: f64,
    prev_y: f64,
    velocity: Vector2,
    timestamp: u64,
}

impl PositionVector {
    pub fn new(x: f64, y: f64, velocity: Vector2, timestamp: u64) -> Self {
        Self {
            x,
            y,
            prev_x: x,
            prev_y: y,
            velocity,
            timestamp,
        }
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn previous(&self) -> (f64, f64) {
        (self.prev_x, self.prev_y)
    }

    pub fn velocity(&self) -> Vector2 {
        self.velocity
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn elapsed_secs(&self, timestamp: u64) -> f64 {
        (timestamp - self.timestamp) as f64 / 1000.0
    }

    /// Advance along the current velocity to `timestamp`
    pub fn update(&mut self, timestamp: u64) -> bool {
        if timestamp <= self.timestamp {
            return false;
        }
        let dt = self.elapsed_secs(timestamp);
        self.prev_x = self.x;
        self.prev_y = self.y;
        self.x += self.velocity.x() * dt;
        self.y += self.velocity.y() * dt;
        self.timestamp = timestamp;
        true
    }

    /// Jump to a reported position, deriving velocity from the displacement.
    ///
    /// With `max_speed` set, the derived velocity is clamped and the position
    /// is recomputed from the clamped velocity, so a client can never cover
    /// more ground than the limit allows.
    pub fn move_to(&mut self, x: f64, y: f64, timestamp: u64, max_speed: Option<f64>) -> bool {
        if timestamp <= self.timestamp {
            return false;
        }
        let dt = self.elapsed_secs(timestamp);
        let mut velocity = Vector2::from_cartesian((x - self.x) / dt, (y - self.y) / dt);

        self.prev_x = self.x;
        self.prev_y = self.y;

        match max_speed {
            Some(max) if velocity.magnitude() > max => {
                velocity = velocity.clamped(max);
                self.x += velocity.x() * dt;
                self.y += velocity.y() * dt;
            }
            _ => {
                self.x = x;
                self.y = y;
            }
        }

        self.velocity = velocity;
        self.timestamp = timestamp;
        true
    }

    /// Overwrite position and velocity with authoritative values
    pub fn reset(&mut self, x: f64, y: f64, velocity: Vector2, timestamp: u64) -> bool {
        if timestamp <= self.timestamp {
            return false;
        }
        self.prev_x = x;
        self.prev_y = y;
        self.x = x;
        self.y = y;
        self.velocity = velocity;
        self.timestamp = timestamp;
        true
    }

    /// Redirect mid-tick after a bounce; the swept segment restarts at `contact`
    pub fn bounce(&mut self, contact: (f64, f64), x: f64, y: f64, velocity: Vector2) {
        self.prev_x = contact.0;
        self.prev_y = contact.1;
        self.x = x;
        self.y = y;
        self.velocity = velocity;
    }
}

/// Shortest distance from point `p` to segment `a-b`
pub fn distance_to_segment(px: f64, py: f64, ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    let dx = bx - ax;
    let dy = by - ay;
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return (px - ax).hypot(py - ay);
    }
    let t = (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0);
    (px - (ax + t * dx)).hypot(py - (ay + t * dy))
}

/// Where segment `p0-p1` crosses segment `a-b`, as a fraction along `p0-p1`
pub fn segment_intersection(
    p0: (f64, f64),
    p1: (f64, f64),
    a: (f64, f64),
    b: (f64, f64),
) -> Option<f64> {
    let r = (p1.0 - p0.0, p1.1 - p0.1);
    let s = (b.0 - a.0, b.1 - a.1);
    let denom = r.0 * s.1 - r.1 * s.0;
    if denom.abs() < f64::EPSILON {
        return None;
    }
    let q = (a.0 - p0.0, a.1 - p0.1);
    let t = (q.0 * s.1 - q.1 * s.0) / denom;
    let u = (q.0 * r.1 - q.1 * r.0) / denom;
    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some(t)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn angle_reads_back_normalized() {
        assert!((Vector2::new(2.5 * PI, 1.0).angle() - 0.5 * PI).abs() < EPS);
        assert!((Vector2::new(-PI, 1.0).angle() - PI).abs() < EPS);
        assert!((Vector2::new(1.5 * PI, 1.0).angle() + 0.5 * PI).abs() < EPS);
        assert!((Vector2::new(-0.25, 1.0).angle() + 0.25).abs() < EPS);
    }

    #[test]
    fn negative_magnitude_flips_direction() {
        let v = Vector2::new(0.0, -2.0);
        assert!((v.magnitude() - 2.0).abs() < EPS);
        assert!((v.x() + 2.0).abs() < EPS);
    }

    #[test]
    fn cartesian_round_trip() {
        let v = Vector2::from_cartesian(3.0, -4.0);
        assert!((v.magnitude() - 5.0).abs() < EPS);
        assert!((v.x() - 3.0).abs() < EPS);
        assert!((v.y() + 4.0).abs() < EPS);
    }

    #[test]
    fn stale_timestamps_are_ignored() {
        let mut pos = PositionVector::new(1.0, 2.0, Vector2::new(0.0, 10.0), 1_000);
        let before = pos.clone();

        assert!(!pos.update(1_000));
        assert!(!pos.update(999));
        assert!(!pos.move_to(50.0, 50.0, 1_000, None));
        assert!(!pos.move_to(50.0, 50.0, 500, Some(1.0)));
        assert!(!pos.reset(0.0, 0.0, Vector2::ZERO, 1_000));

        assert_eq!(pos, before);
    }

    #[test]
    fn dead_reckoning_follows_velocity() {
        let mut pos = PositionVector::new(0.0, 0.0, Vector2::new(PI / 2.0, 4.0), 0);
        assert!(pos.update(500));
        assert!(pos.x().abs() < EPS);
        assert!((pos.y() - 2.0).abs() < EPS);
        assert_eq!(pos.previous(), (0.0, 0.0));
        assert_eq!(pos.timestamp(), 500);
    }

    #[test]
    fn move_derives_velocity_from_displacement() {
        let mut pos = PositionVector::new(0.0, 0.0, Vector2::ZERO, 0);
        assert!(pos.move_to(10.0, 0.0, 2_000, Some(100.0)));
        assert!((pos.velocity().magnitude() - 5.0).abs() < EPS);
        assert!((pos.x() - 10.0).abs() < EPS);
    }

    #[test]
    fn move_is_clamped_to_max_speed() {
        let mut pos = PositionVector::new(0.0, 0.0, Vector2::ZERO, 0);
        assert!(pos.move_to(1_000.0, 0.0, 1_000, Some(100.0)));
        assert!((pos.velocity().magnitude() - 100.0).abs() < EPS);
        assert!((pos.x() - 100.0).abs() < EPS);
        assert!(pos.y().abs() < EPS);
    }

    #[test]
    fn point_to_segment_distance() {
        assert!((distance_to_segment(5.0, 3.0, 0.0, 0.0, 10.0, 0.0) - 3.0).abs() < EPS);
        // Beyond the end of the segment the nearest point is the endpoint
        assert!((distance_to_segment(13.0, 4.0, 0.0, 0.0, 10.0, 0.0) - 5.0).abs() < EPS);
        // Degenerate segment
        assert!((distance_to_segment(3.0, 4.0, 0.0, 0.0, 0.0, 0.0) - 5.0).abs() < EPS);
    }

    #[test]
    fn crossing_segments_intersect() {
        let t = segment_intersection((0.0, 0.0), (10.0, 0.0), (4.0, -1.0), (4.0, 1.0));
        assert!((t.unwrap() - 0.4).abs() < EPS);
        assert!(segment_intersection((0.0, 0.0), (3.0, 0.0), (4.0, -1.0), (4.0, 1.0)).is_none());
        assert!(segment_intersection((0.0, 0.0), (10.0, 0.0), (0.0, 1.0), (10.0, 1.0)).is_none());
    }
}
