//! Entity simulation.
//!
//! Entities wander inside a square arena with a slowly drifting heading.
//! Leaving the arena wraps the entity to the opposite edge, which clients
//! see as a teleport.

use driftsync_shared::{
    math::Vec2,
    snapshot::{EntitySnapshot, SnapshotBatch},
};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Maximum heading change, radians per second.
const TURN_RATE: f32 = 2.0;
const MIN_SPEED: f32 = 5.0;
const MAX_SPEED: f32 = 20.0;

/// One simulated entity.
#[derive(Debug, Clone, Copy)]
pub struct Wanderer {
    pub position: Vec2,
    pub heading: f32,
    pub speed: f32,
    /// Set for the tick in which the entity wrapped.
    pub teleported: bool,
}

impl Wanderer {
    pub fn velocity(&self) -> Vec2 {
        Vec2::from_angle(self.heading) * self.speed
    }

    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            position: self.position,
            velocity: self.velocity(),
            teleported: self.teleported,
        }
    }
}

/// Fixed population of wanderers.
pub struct Arena {
    half_extent: f32,
    entities: Vec<Wanderer>,
    rng: StdRng,
}

impl Arena {
    pub fn new(count: usize, half_extent: f32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let entities = (0..count)
            .map(|_| Wanderer {
                position: Vec2::new(
                    rng.gen_range(-half_extent..half_extent),
                    rng.gen_range(-half_extent..half_extent),
                ),
                heading: rng.gen_range(0.0..std::f32::consts::TAU),
                speed: rng.gen_range(MIN_SPEED..MAX_SPEED),
                teleported: false,
            })
            .collect();
        Self {
            half_extent,
            entities,
            rng,
        }
    }

    /// Advances every entity by `dt` seconds. Wrapping sets `teleported`;
    /// flags stay set until [`Arena::clear_teleports`].
    pub fn step(&mut self, dt: f32) {
        let half = self.half_extent;
        for e in &mut self.entities {
            e.heading += self.rng.gen_range(-TURN_RATE..TURN_RATE) * dt;
            e.position += e.velocity() * dt;

            for axis in [&mut e.position.x, &mut e.position.y] {
                if *axis > half {
                    *axis -= 2.0 * half;
                    e.teleported = true;
                } else if *axis < -half {
                    *axis += 2.0 * half;
                    e.teleported = true;
                }
            }
        }
    }

    /// Called once the tick's batch has gone out.
    pub fn clear_teleports(&mut self) {
        for e in &mut self.entities {
            e.teleported = false;
        }
    }

    /// Full-state batch for `tick`.
    pub fn snapshot(&self, tick: u32) -> SnapshotBatch {
        SnapshotBatch::new(tick, self.entities.iter().map(Wanderer::snapshot).collect())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entities(&self) -> &[Wanderer] {
        &self.entities
    }

    /// Moves an entity somewhere else outright (operator command / tests).
    pub fn teleport(&mut self, index: usize, to: Vec2) -> Option<()> {
        let e = self.entities.get_mut(index)?;
        e.position = to;
        e.teleported = true;
        Some(())
    }
}
