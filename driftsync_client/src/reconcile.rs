//! Reconciliation engine.
//!
//! Owns the per-entity state layers for one session:
//! - raw: the latest accepted batch, as received;
//! - past raw: the batch accepted before it, for jump detection;
//! - filtered: the reference point for the next low-pass blend;
//! - displayed: what rendering draws this frame.
//!
//! Each frame the caller hands in at most one batch plus the elapsed time.
//! Without fresh data the displayed state is extrapolated; with an accepted
//! batch it is blended towards the new data, except across discontinuities
//! (teleports or jumps beyond the threshold) which snap immediately.

use std::fmt;

use driftsync_shared::{
    config::EngineConfig,
    snapshot::{EntityMotion, EntitySnapshot, SnapshotBatch},
};
use tracing::{debug, info};

use crate::{
    extrapolate::{advance, advance_all},
    filter::blend,
    sequencer::{Admission, TickClass, TickPolicy, TickSequencer},
};

/// Default weight given to new data by the low-pass filter.
pub const SMOOTHING_FACTOR: f32 = 0.8;

/// Per-axis displacement between accepted batches above which an entity is
/// treated as having jumped.
pub const JUMP_THRESHOLD: f32 = 40.0;

/// Engine tuning. Construct through [`ReconcileConfig::new`] so the ranges are
/// checked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcileConfig {
    policy: TickPolicy,
    smoothing_factor: f32,
    jump_threshold: f32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            policy: TickPolicy::default(),
            smoothing_factor: SMOOTHING_FACTOR,
            jump_threshold: JUMP_THRESHOLD,
        }
    }
}

impl ReconcileConfig {
    /// `smoothing_factor` must lie strictly between 0 and 1; `jump_threshold`
    /// must be finite and positive.
    pub fn new(
        policy: TickPolicy,
        smoothing_factor: f32,
        jump_threshold: f32,
    ) -> Result<Self, ConfigError> {
        if !(smoothing_factor > 0.0 && smoothing_factor < 1.0) {
            return Err(ConfigError::SmoothingOutOfRange(smoothing_factor));
        }
        if !(jump_threshold.is_finite() && jump_threshold > 0.0) {
            return Err(ConfigError::InvalidJumpThreshold(jump_threshold));
        }
        Ok(Self {
            policy,
            smoothing_factor,
            jump_threshold,
        })
    }

    pub fn from_engine_config(cfg: &EngineConfig) -> Result<Self, ConfigError> {
        Self::new(cfg.tick_policy, cfg.smoothing_factor, cfg.jump_threshold)
    }

    pub fn with_policy(mut self, policy: TickPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> TickPolicy {
        self.policy
    }

    pub fn smoothing_factor(&self) -> f32 {
        self.smoothing_factor
    }

    pub fn jump_threshold(&self) -> f32 {
        self.jump_threshold
    }
}

/// Rejected engine tuning.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    SmoothingOutOfRange(f32),
    InvalidJumpThreshold(f32),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::SmoothingOutOfRange(v) => {
                write!(f, "smoothing factor {v} must be within (0, 1)")
            }
            ConfigError::InvalidJumpThreshold(v) => {
                write!(f, "jump threshold {v} must be finite and positive")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Precondition violations. Any of these leaves the engine untouched; the
/// session is expected to be torn down.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A batch was reconciled before the first batch initialized the engine.
    Uninitialized,
    /// The first batch of a session carried no entities.
    EmptyBatch { tick: u32 },
    /// Batch length differs from the count fixed by the first batch.
    EntityCountMismatch {
        tick: u32,
        expected: usize,
        actual: usize,
    },
    /// Elapsed time was negative or not finite.
    InvalidElapsed(f32),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Uninitialized => write!(f, "engine has not received its first batch"),
            EngineError::EmptyBatch { tick } => {
                write!(f, "initial batch at tick {tick} has no entities")
            }
            EngineError::EntityCountMismatch {
                tick,
                expected,
                actual,
            } => write!(
                f,
                "batch at tick {tick} has {actual} entities, engine tracks {expected}"
            ),
            EngineError::InvalidElapsed(v) => write!(f, "invalid elapsed time {v}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Stable key of a tracked entity: its index in the session's batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(pub u32);

/// Lifecycle of one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Tracking,
}

/// What the last call to [`ReconciliationEngine::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing tracked yet and no batch given.
    Idle,
    /// No batch; displayed state was dead-reckoned.
    Extrapolated,
    /// First batch adopted as-is.
    Initialized,
    /// Batch accepted and blended.
    Reconciled(TickClass),
    /// Batch dropped by the sequencer; displayed state was dead-reckoned.
    Dropped(TickClass),
}

/// Running counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub accepted: u64,
    pub dropped_stale: u64,
    pub dropped_gap: u64,
    pub gaps: u64,
    pub ticks_lost: u64,
    pub discontinuities: u64,
    pub teleports: u64,
}

/// Per-entity history kept between accepted batches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityTrack {
    raw: EntitySnapshot,
    past_raw: EntitySnapshot,
    filtered: EntityMotion,
}

impl EntityTrack {
    fn seeded(snap: EntitySnapshot) -> Self {
        Self {
            raw: snap,
            past_raw: snap,
            filtered: snap.motion(),
        }
    }

    /// Latest accepted raw snapshot.
    pub fn raw(&self) -> &EntitySnapshot {
        &self.raw
    }

    /// Raw snapshot that the next displacement check compares against.
    pub fn past_raw(&self) -> &EntitySnapshot {
        &self.past_raw
    }

    /// Reference point for the next blend.
    pub fn filtered(&self) -> &EntityMotion {
        &self.filtered
    }
}

/// Client-side display smoothing for server-authoritative entities.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationEngine {
    config: ReconcileConfig,
    sequencer: TickSequencer,
    tracks: Vec<EntityTrack>,
    displayed: Vec<EntityMotion>,
    stats: EngineStats,
    last_outcome: Option<StepOutcome>,
}

impl ReconciliationEngine {
    pub fn new(config: ReconcileConfig) -> Self {
        Self {
            config,
            sequencer: TickSequencer::new(config.policy()),
            tracks: Vec::new(),
            displayed: Vec::new(),
            stats: EngineStats::default(),
            last_outcome: None,
        }
    }

    /// Runs one frame and returns the state to draw.
    ///
    /// With no batch (or a batch the sequencer drops) the displayed state is
    /// extrapolated by `elapsed` seconds. The first batch of a session is
    /// adopted without blending.
    pub fn step(
        &mut self,
        batch: Option<&SnapshotBatch>,
        elapsed: f32,
    ) -> Result<&[EntityMotion], EngineError> {
        check_elapsed(elapsed)?;
        match batch {
            None => self.extrapolate(elapsed)?,
            Some(batch) if self.state() == EngineState::Uninitialized => self.initialize(batch)?,
            Some(batch) => {
                self.reconcile(batch, elapsed)?;
            }
        }
        Ok(&self.displayed)
    }

    /// Dead-reckons every displayed entity by `elapsed` seconds.
    pub fn extrapolate(&mut self, elapsed: f32) -> Result<(), EngineError> {
        check_elapsed(elapsed)?;
        if self.state() == EngineState::Uninitialized {
            self.last_outcome = Some(StepOutcome::Idle);
            return Ok(());
        }
        advance_all(&mut self.displayed, elapsed);
        self.last_outcome = Some(StepOutcome::Extrapolated);
        Ok(())
    }

    /// Feeds a batch to an initialized engine and returns how its tick was
    /// classified.
    pub fn reconcile(
        &mut self,
        batch: &SnapshotBatch,
        elapsed: f32,
    ) -> Result<TickClass, EngineError> {
        check_elapsed(elapsed)?;
        if self.state() == EngineState::Uninitialized {
            return Err(EngineError::Uninitialized);
        }
        if batch.len() != self.tracks.len() {
            return Err(EngineError::EntityCountMismatch {
                tick: batch.tick,
                expected: self.tracks.len(),
                actual: batch.len(),
            });
        }

        let (class, admission) = self.sequencer.admit(batch.tick);
        if let TickClass::Gap { missed } = class {
            self.stats.gaps += 1;
            self.stats.ticks_lost += u64::from(missed);
        }

        match admission {
            Admission::Accept => {
                self.apply(batch, elapsed);
                self.stats.accepted += 1;
                self.last_outcome = Some(StepOutcome::Reconciled(class));
            }
            Admission::Drop => {
                match class {
                    TickClass::Gap { .. } => self.stats.dropped_gap += 1,
                    _ => self.stats.dropped_stale += 1,
                }
                advance_all(&mut self.displayed, elapsed);
                self.last_outcome = Some(StepOutcome::Dropped(class));
            }
        }
        Ok(class)
    }

    fn initialize(&mut self, batch: &SnapshotBatch) -> Result<(), EngineError> {
        if batch.is_empty() {
            return Err(EngineError::EmptyBatch { tick: batch.tick });
        }
        self.sequencer.admit(batch.tick);
        self.tracks = batch.entities.iter().copied().map(EntityTrack::seeded).collect();
        self.displayed = batch.entities.iter().map(EntitySnapshot::motion).collect();
        self.stats.accepted += 1;
        self.last_outcome = Some(StepOutcome::Initialized);
        info!(
            tick = batch.tick,
            entities = self.tracks.len(),
            "Tracking started"
        );
        Ok(())
    }

    fn apply(&mut self, batch: &SnapshotBatch, elapsed: f32) {
        let factor = self.config.smoothing_factor();
        let threshold = self.config.jump_threshold();

        for (index, ((track, shown), snap)) in self
            .tracks
            .iter_mut()
            .zip(self.displayed.iter_mut())
            .zip(&batch.entities)
            .enumerate()
        {
            track.raw = *snap;
            let moved = snap.position - track.past_raw.position;
            let jumped = moved.max_abs() > threshold;

            *shown = if snap.teleported || jumped {
                self.stats.discontinuities += 1;
                if snap.teleported {
                    self.stats.teleports += 1;
                }
                debug!(
                    tick = batch.tick,
                    entity = index,
                    teleported = snap.teleported,
                    dx = moved.x,
                    dy = moved.y,
                    "Discontinuity, skipping blend"
                );
                advance(snap.motion(), elapsed)
            } else {
                EntityMotion {
                    position: blend(track.filtered.position, snap.position, factor),
                    velocity: blend(track.filtered.velocity, snap.velocity, factor),
                }
            };

            track.filtered = *shown;
            track.past_raw = *snap;
        }
    }

    /// Drops all tracked state. The next batch initializes a new session.
    pub fn reset(&mut self) {
        if self.state() == EngineState::Tracking {
            info!(
                highest_tick = ?self.sequencer.highest_accepted(),
                "Tracking reset"
            );
        }
        self.sequencer.reset();
        self.tracks.clear();
        self.displayed.clear();
        self.stats = EngineStats::default();
        self.last_outcome = None;
    }

    pub fn state(&self) -> EngineState {
        if self.tracks.is_empty() {
            EngineState::Uninitialized
        } else {
            EngineState::Tracking
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn highest_accepted_tick(&self) -> Option<u32> {
        self.sequencer.highest_accepted()
    }

    pub fn entity_count(&self) -> usize {
        self.tracks.len()
    }

    /// Current frame's output, indexed by entity.
    pub fn displayed(&self) -> &[EntityMotion] {
        &self.displayed
    }

    pub fn displayed_with_keys(&self) -> impl Iterator<Item = (EntityKey, &EntityMotion)> {
        self.displayed
            .iter()
            .enumerate()
            .map(|(i, m)| (EntityKey(i as u32), m))
    }

    pub fn entity(&self, key: EntityKey) -> Option<&EntityMotion> {
        self.displayed.get(key.0 as usize)
    }

    pub fn track(&self, key: EntityKey) -> Option<&EntityTrack> {
        self.tracks.get(key.0 as usize)
    }

    pub fn tracks(&self) -> &[EntityTrack] {
        &self.tracks
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn last_outcome(&self) -> Option<StepOutcome> {
        self.last_outcome
    }
}

fn check_elapsed(elapsed: f32) -> Result<(), EngineError> {
    if elapsed.is_finite() && elapsed >= 0.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidElapsed(elapsed))
    }
}
