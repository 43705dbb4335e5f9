//! Dead reckoning.
//!
//! When no authoritative update is applied in a frame, entities keep moving
//! along their last known velocity.

use driftsync_shared::snapshot::EntityMotion;

/// Advances `motion` by `elapsed` seconds. Velocity is unchanged.
pub fn advance(motion: EntityMotion, elapsed: f32) -> EntityMotion {
    EntityMotion {
        position: motion.position + motion.velocity * elapsed,
        velocity: motion.velocity,
    }
}

/// Advances every entry of `motions` in place.
pub fn advance_all(motions: &mut [EntityMotion], elapsed: f32) {
    for m in motions.iter_mut() {
        *m = advance(*m, elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_shared::math::Vec2;

    #[test]
    fn advance_moves_along_velocity() {
        let m = EntityMotion::new(Vec2::new(1.0, 1.0), Vec2::new(2.0, -4.0));
        let out = advance(m, 0.5);
        assert_eq!(out.position, Vec2::new(2.0, -1.0));
        assert_eq!(out.velocity, m.velocity);
    }

    #[test]
    fn zero_elapsed_is_identity() {
        let m = EntityMotion::new(Vec2::new(3.0, 4.0), Vec2::new(9.0, 9.0));
        assert_eq!(advance(m, 0.0), m);
    }

    #[test]
    fn advance_all_touches_every_entity() {
        let mut ms = vec![
            EntityMotion::new(Vec2::ZERO, Vec2::new(1.0, 0.0)),
            EntityMotion::new(Vec2::ZERO, Vec2::new(0.0, 2.0)),
        ];
        advance_all(&mut ms, 1.0);
        assert_eq!(ms[0].position, Vec2::new(1.0, 0.0));
        assert_eq!(ms[1].position, Vec2::new(0.0, 2.0));
    }
}
