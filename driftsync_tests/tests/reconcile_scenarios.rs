//! End-to-end behaviour of the reconciliation engine through its public API.

use driftsync_client::reconcile::{
    EngineError, ReconcileConfig, ReconciliationEngine, StepOutcome, SMOOTHING_FACTOR,
};
use driftsync_client::sequencer::{TickClass, TickPolicy};
use driftsync_shared::{
    math::Vec2,
    snapshot::{EntityMotion, EntitySnapshot, SnapshotBatch},
};
use driftsync_tests::{batch, constant_motion, Impairment};

const FRAME: f32 = 1.0 / 60.0;

#[test]
fn first_batch_then_blend_then_extrapolate() {
    let mut engine = ReconciliationEngine::default();

    let shown = engine
        .step(Some(&batch(1, &[((0.0, 0.0), (1.0, 0.0))])), FRAME)
        .unwrap()
        .to_vec();
    assert_eq!(
        shown,
        vec![EntityMotion::new(Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0))]
    );
    assert_eq!(engine.highest_accepted_tick(), Some(1));

    let shown = engine
        .step(Some(&batch(2, &[((1.0, 0.0), (1.0, 0.0))])), FRAME)
        .unwrap()
        .to_vec();
    assert!((shown[0].position.x - SMOOTHING_FACTOR).abs() < 1e-6);

    // No data this frame: dead reckoning from the blended state.
    let shown = engine.step(None, 0.5).unwrap().to_vec();
    assert!((shown[0].position.x - (SMOOTHING_FACTOR + 0.5)).abs() < 1e-6);
}

#[test]
fn extrapolation_uses_displayed_velocity() {
    let mut engine = ReconciliationEngine::default();
    engine
        .step(Some(&batch(1, &[((3.0, 3.0), (2.0, 0.0))])), 0.0)
        .unwrap();
    let shown = engine.step(None, 0.5).unwrap();
    assert_eq!(shown[0].position, Vec2::new(4.0, 3.0));
}

#[test]
fn duplicate_after_extrapolation_keeps_extrapolating() {
    let mut engine = ReconciliationEngine::default();
    engine
        .step(Some(&batch(1, &[((0.0, 0.0), (2.0, 0.0))])), 0.0)
        .unwrap();
    engine.step(None, 0.5).unwrap();
    let filtered_before = *engine.tracks()[0].filtered();
    let past_raw_before = *engine.tracks()[0].past_raw();

    let shown = engine
        .step(Some(&batch(1, &[((50.0, 50.0), (0.0, 0.0))])), 0.0)
        .unwrap()
        .to_vec();
    assert_eq!(shown[0].position, Vec2::new(1.0, 0.0));
    assert_eq!(*engine.tracks()[0].filtered(), filtered_before);
    assert_eq!(*engine.tracks()[0].past_raw(), past_raw_before);
}

#[test]
fn teleport_snaps_while_neighbours_blend() {
    let mut engine = ReconciliationEngine::default();
    engine
        .step(
            Some(&batch(1, &[((0.0, 0.0), (1.0, 0.0)), ((10.0, 0.0), (1.0, 0.0))])),
            0.0,
        )
        .unwrap();

    let next = SnapshotBatch::new(
        2,
        vec![
            EntitySnapshot::new(Vec2::new(1.0, 0.0), Vec2::new(1.0, 0.0)),
            EntitySnapshot::teleported(Vec2::new(-90.0, 5.0), Vec2::new(0.0, 2.0)),
        ],
    );
    let shown = engine.step(Some(&next), 0.25).unwrap();

    assert!((shown[0].position.x - 0.8).abs() < 1e-6);
    assert_eq!(shown[1].position, Vec2::new(-90.0, 5.5));
    assert_eq!(shown[1].velocity, Vec2::new(0.0, 2.0));
}

#[test]
fn strictly_increasing_ticks_track_watermark() {
    let mut engine = ReconciliationEngine::default();
    for b in constant_motion(4, Vec2::new(3.0, -1.0), 0.05, 40) {
        let tick = b.tick;
        engine.step(Some(&b), 0.05).unwrap();
        assert_eq!(engine.highest_accepted_tick(), Some(tick));
    }
    assert_eq!(engine.stats().discontinuities, 0);
    assert_eq!(engine.stats().gaps, 0);
}

#[test]
fn smoothed_state_converges_on_steady_motion() {
    let mut engine = ReconciliationEngine::default();
    let stream = constant_motion(2, Vec2::new(4.0, 2.0), 0.05, 60);
    let last = stream.last().cloned().unwrap();
    for b in stream {
        engine.step(Some(&b), 0.05).unwrap();
    }
    for (shown, raw) in engine.displayed().iter().zip(&last.entities) {
        // Exponential lag for constant velocity settles at v*dt*(1-f)/f.
        assert!((shown.position - raw.position).max_abs() < 0.1);
        assert!((shown.velocity - raw.velocity).max_abs() < 1e-4);
    }
}

#[test]
fn lossy_reordered_stream_never_regresses_watermark() {
    let stream = constant_motion(3, Vec2::new(5.0, 0.0), 0.05, 120);
    let frames = Impairment {
        drop_every: 7,
        swap_every: 5,
        duplicate_every: 11,
    }
    .apply(stream);

    let mut engine = ReconciliationEngine::default();
    let mut watermark = 0;
    for frame in &frames {
        engine.step(frame.as_ref(), 0.05).unwrap();
        let now = engine.highest_accepted_tick().unwrap_or(0);
        assert!(now >= watermark);
        watermark = now;
    }

    let stats = engine.stats();
    assert!(stats.gaps > 0);
    assert!(stats.dropped_stale > 0);
    assert_eq!(stats.discontinuities, 0);
    assert!(engine.displayed().iter().all(|m| m.position.is_finite()));
}

#[test]
fn reject_gaps_policy_waits_for_contiguous_tick() {
    let cfg = ReconcileConfig::default().with_policy(TickPolicy::RejectGaps);
    let mut engine = ReconciliationEngine::new(cfg);
    engine
        .step(Some(&batch(1, &[((0.0, 0.0), (1.0, 0.0))])), 0.0)
        .unwrap();

    engine
        .step(Some(&batch(3, &[((2.0, 0.0), (1.0, 0.0))])), 0.0)
        .unwrap();
    assert_eq!(
        engine.last_outcome(),
        Some(StepOutcome::Dropped(TickClass::Gap { missed: 1 }))
    );

    engine
        .step(Some(&batch(4, &[((3.0, 0.0), (1.0, 0.0))])), 0.0)
        .unwrap();
    assert_eq!(
        engine.last_outcome(),
        Some(StepOutcome::Reconciled(TickClass::InOrder))
    );
}

#[test]
fn accept_with_loss_policy_reconciles_gaps() {
    let mut engine = ReconciliationEngine::default();
    engine
        .step(Some(&batch(1, &[((0.0, 0.0), (1.0, 0.0))])), 0.0)
        .unwrap();
    engine
        .step(Some(&batch(10, &[((9.0, 0.0), (1.0, 0.0))])), 0.0)
        .unwrap();
    assert_eq!(
        engine.last_outcome(),
        Some(StepOutcome::Reconciled(TickClass::Gap { missed: 8 }))
    );
    assert_eq!(engine.stats().ticks_lost, 8);
}

#[test]
fn count_mismatch_is_surfaced() {
    let mut engine = ReconciliationEngine::default();
    engine
        .step(Some(&batch(1, &[((0.0, 0.0), (0.0, 0.0))])), 0.0)
        .unwrap();
    let err = engine
        .step(
            Some(&batch(2, &[((0.0, 0.0), (0.0, 0.0)), ((1.0, 0.0), (0.0, 0.0))])),
            0.0,
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::EntityCountMismatch { .. }));
    assert!(err.to_string().contains("engine tracks 1"));
}
