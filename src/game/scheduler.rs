//! Deterministic world events derived from wall-clock windows
//!
//! Time is cut into fixed windows. The events of a window come from an RNG
//! seeded only with the window's start timestamp, so any node evaluating the
//! same window, before or after a restart, generates the same sequence.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::{EntityId, GameSettings};

const MIN_HAZARDS_PER_WINDOW: u32 = 1;
const MAX_HAZARDS_PER_WINDOW: u32 = 3;
const MIN_HAZARD_RADIUS: f64 = 50.0;
const MAX_HAZARD_RADIUS: f64 = 150.0;
const MIN_HAZARD_DURATION_MS: u64 = 10_000;
const MAX_HAZARD_DURATION_MS: u64 = 30_000;

/// Circular zone that destroys spawned players while active
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hazard {
    pub id: EntityId,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub starts_at: u64,
    pub ends_at: u64,
}

impl Hazard {
    pub fn is_active(&self, now: u64) -> bool {
        self.starts_at <= now && now < self.ends_at
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        (x - self.x).hypot(y - self.y) <= self.radius
    }
}

/// World-level event generated by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorldEvent {
    HazardOpened(Hazard),
}

impl WorldEvent {
    /// When the event takes effect
    pub fn at(&self) -> u64 {
        match self {
            Self::HazardOpened(h) => h.starts_at,
        }
    }
}

#[derive(Debug)]
pub struct EventScheduler {
    window_ms: u64,
    replay_windows: u32,
    half_width: f64,
    half_height: f64,
    next_window: Option<u64>,
    pending: VecDeque<WorldEvent>,
}

impl EventScheduler {
    pub fn new(settings: &GameSettings) -> Self {
        Self {
            window_ms: settings.scheduler_window_ms.max(1),
            replay_windows: settings.scheduler_replay_windows,
            half_width: settings.arena_width / 2.0,
            half_height: settings.arena_height / 2.0,
            next_window: None,
            pending: VecDeque::new(),
        }
    }

    /// Start of the window containing `timestamp`
    pub fn window_start(&self, timestamp: u64) -> u64 {
        timestamp - timestamp % self.window_ms
    }

    /// Every event of the window starting at `window_start`, ordered by time.
    ///
    /// Pure: depends on nothing but the argument and the arena settings.
    pub fn events_for_window(&self, window_start: u64) -> Vec<WorldEvent> {
        let mut rng = ChaCha8Rng::seed_from_u64(window_start);
        let count = rng.gen_range(MIN_HAZARDS_PER_WINDOW..=MAX_HAZARDS_PER_WINDOW);

        let mut events: Vec<WorldEvent> = (0..count)
            .map(|_| {
                let id = EntityId::from_u128(rng.gen());
                let radius = rng.gen_range(MIN_HAZARD_RADIUS..MAX_HAZARD_RADIUS);
                let x = rng.gen_range(-self.half_width..=self.half_width);
                let y = rng.gen_range(-self.half_height..=self.half_height);
                let starts_at = window_start + rng.gen_range(0..self.window_ms);
                let duration = rng.gen_range(MIN_HAZARD_DURATION_MS..=MAX_HAZARD_DURATION_MS);
                WorldEvent::HazardOpened(Hazard {
                    id,
                    x,
                    y,
                    radius,
                    starts_at,
                    ends_at: starts_at + duration,
                })
            })
            .collect();

        events.sort_by_key(WorldEvent::at);
        events
    }

    /// Rewind over the last few windows and return whatever is already due
    pub fn start(&mut self, now: u64) -> Vec<WorldEvent> {
        let rewind = self.window_ms.saturating_mul(u64::from(self.replay_windows));
        self.next_window = Some(self.window_start(now).saturating_sub(rewind));
        self.pending.clear();
        self.poll(now)
    }

    /// Generate windows reached by `now` and drain events that are due
    pub fn poll(&mut self, now: u64) -> Vec<WorldEvent> {
        let Some(mut next) = self.next_window else {
            return Vec::new();
        };
        while next <= now {
            self.pending.extend(self.events_for_window(next));
            next += self.window_ms;
        }
        self.next_window = Some(next);

        let mut due = Vec::new();
        while self.pending.front().is_some_and(|e| e.at() <= now) {
            if let Some(event) = self.pending.pop_front() {
                due.push(event);
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: u64 = 180_000;

    fn scheduler() -> EventScheduler {
        EventScheduler::new(&GameSettings::default())
    }

    #[test]
    fn same_window_generates_identical_bytes() {
        let a = scheduler();
        let b = scheduler();
        let first = serde_json::to_vec(&a.events_for_window(WINDOW * 7)).unwrap();
        let second = serde_json::to_vec(&b.events_for_window(WINDOW * 7)).unwrap();
        assert_eq!(first, second);

        let other = serde_json::to_vec(&a.events_for_window(WINDOW * 8)).unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn events_stay_inside_their_window() {
        let s = scheduler();
        let events = s.events_for_window(WINDOW * 3);
        assert!(!events.is_empty());
        for pair in events.windows(2) {
            assert!(pair[0].at() <= pair[1].at());
        }
        for event in &events {
            let WorldEvent::HazardOpened(h) = event;
            assert!(h.starts_at >= WINDOW * 3 && h.starts_at < WINDOW * 4);
            assert!(h.ends_at > h.starts_at);
            assert!(h.x.abs() <= 1_000.0 && h.y.abs() <= 1_000.0);
        }
    }

    #[test]
    fn restart_replay_matches_live_sequence() {
        // Live node: started at the beginning of window 5, ticking until the end
        let mut live = scheduler();
        let mut live_events = live.start(WINDOW * 5);
        let mut t = WINDOW * 5;
        while t < WINDOW * 6 - 1 {
            t += 50;
            live_events.extend(live.poll(t.min(WINDOW * 6 - 1)));
        }

        // Restarted node: comes up at the very end of window 5 and replays
        let mut restarted = scheduler();
        let replayed = restarted.start(WINDOW * 6 - 1);

        assert_eq!(
            serde_json::to_vec(&live_events).unwrap(),
            serde_json::to_vec(&replayed).unwrap()
        );
    }

    #[test]
    fn poll_does_not_repeat_events() {
        let mut s = scheduler();
        let mut all = s.start(WINDOW * 2);
        for step in 1..=10 {
            all.extend(s.poll(WINDOW * 2 + step * (WINDOW / 10)));
        }
        let mut ids: Vec<_> = all
            .iter()
            .map(|e| match e {
                WorldEvent::HazardOpened(h) => h.id,
            })
            .collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn unstarted_scheduler_is_silent() {
        let mut s = scheduler();
        assert!(s.poll(WINDOW * 10).is_empty());
    }

    #[test]
    fn hazard_activity_window() {
        let h = Hazard {
            id: EntityId::from_u128(1),
            x: 0.0,
            y: 0.0,
            radius: 10.0,
            starts_at: 100,
            ends_at: 200,
        };
        assert!(!h.is_active(99));
        assert!(h.is_active(100));
        assert!(!h.is_active(200));
        assert!(h.contains(6.0, 8.0));
        assert!(!h.contains(6.0, 8.1));
    }
}
