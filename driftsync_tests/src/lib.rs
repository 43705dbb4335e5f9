//! Shared fixtures for the integration tests.
//!
//! Builds batch streams and impairs them deterministically (drop, swap,
//! duplicate) so the reconciliation engine can be driven through loss and
//! reordering without sockets.

use driftsync_shared::{
    math::Vec2,
    snapshot::{EntitySnapshot, SnapshotBatch},
};

/// Batch with one entity per `(position, velocity)` pair.
pub fn batch(tick: u32, entities: &[((f32, f32), (f32, f32))]) -> SnapshotBatch {
    SnapshotBatch::new(
        tick,
        entities
            .iter()
            .map(|&((px, py), (vx, vy))| EntitySnapshot::new(Vec2::new(px, py), Vec2::new(vx, vy)))
            .collect(),
    )
}

/// `count` entities moving at constant `velocity`, sampled every `dt`
/// seconds from tick 1 onwards. Entity `i` starts at `(i * 10, 0)`.
pub fn constant_motion(count: usize, velocity: Vec2, dt: f32, ticks: u32) -> Vec<SnapshotBatch> {
    (1..=ticks)
        .map(|tick| {
            let t = (tick - 1) as f32 * dt;
            SnapshotBatch::new(
                tick,
                (0..count)
                    .map(|i| {
                        let start = Vec2::new(i as f32 * 10.0, 0.0);
                        EntitySnapshot::new(start + velocity * t, velocity)
                    })
                    .collect(),
            )
        })
        .collect()
}

/// One frame of impaired delivery.
pub type Delivery = Option<SnapshotBatch>;

/// Deterministic impairment applied to an in-order stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct Impairment {
    /// Drop every n-th batch (1-based), 0 disables.
    pub drop_every: usize,
    /// Swap every n-th batch with its successor, 0 disables.
    pub swap_every: usize,
    /// Deliver every n-th batch twice, 0 disables.
    pub duplicate_every: usize,
}

impl Impairment {
    /// Turns a stream into per-frame deliveries. Dropped batches become
    /// empty frames so the engine still extrapolates through them.
    pub fn apply(&self, stream: Vec<SnapshotBatch>) -> Vec<Delivery> {
        let hits = |every: usize, n: usize| every != 0 && n % every == 0;

        let mut frames: Vec<Delivery> = Vec::with_capacity(stream.len());
        for (i, b) in stream.into_iter().enumerate() {
            let n = i + 1;
            if hits(self.drop_every, n) {
                frames.push(None);
                continue;
            }
            let dup = hits(self.duplicate_every, n).then(|| b.clone());
            frames.push(Some(b));
            if let Some(d) = dup {
                frames.push(Some(d));
            }
        }

        if self.swap_every != 0 {
            let mut i = self.swap_every - 1;
            while i + 1 < frames.len() {
                frames.swap(i, i + 1);
                i += self.swap_every;
            }
        }
        frames
    }
}
