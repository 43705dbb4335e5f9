//! Exponential low-pass filter.
//!
//! `filtered = previous + factor * (raw - previous)`. A factor near 1 follows
//! the raw signal closely, a factor near 0 damps it heavily.

use driftsync_shared::math::Vec2;

/// Blends a scalar towards `raw`.
pub fn blend_scalar(previous: f32, raw: f32, factor: f32) -> f32 {
    previous + factor * (raw - previous)
}

/// Blends each axis of `previous` towards `raw` independently.
pub fn blend(previous: Vec2, raw: Vec2, factor: f32) -> Vec2 {
    Vec2::new(
        blend_scalar(previous.x, raw.x, factor),
        blend_scalar(previous.y, raw.y, factor),
    )
}
