//! Snapshot batches.
//!
//! The server sends one full-state batch per tick. Entities carry no id on
//! the wire: identity is the index inside `entities`, and the ordering is
//! fixed for the lifetime of a session.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::math::Vec2;

/// Observed state of one entity at the batch tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct EntitySnapshot {
    pub position: Vec2,
    pub velocity: Vec2,
    /// Set by the server when the entity was relocated rather than moved.
    #[serde(default)]
    pub teleported: bool,
}

impl EntitySnapshot {
    pub const fn new(position: Vec2, velocity: Vec2) -> Self {
        Self {
            position,
            velocity,
            teleported: false,
        }
    }

    pub const fn teleported(position: Vec2, velocity: Vec2) -> Self {
        Self {
            position,
            velocity,
            teleported: true,
        }
    }

    pub fn motion(&self) -> EntityMotion {
        EntityMotion {
            position: self.position,
            velocity: self.velocity,
        }
    }
}

/// One set of entity snapshots, all taken at the same server tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotBatch {
    pub tick: u32,
    pub entities: Vec<EntitySnapshot>,
}

impl SnapshotBatch {
    pub fn new(tick: u32, entities: Vec<EntitySnapshot>) -> Self {
        Self { tick, entities }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Checks a decoded batch before it is handed to the reconciliation
    /// engine. `expected_len` is the entity count agreed for the session,
    /// if known.
    pub fn validate(&self, expected_len: Option<usize>) -> Result<(), BatchError> {
        if self.entities.is_empty() {
            return Err(BatchError::Empty { tick: self.tick });
        }
        if let Some(expected) = expected_len {
            if self.entities.len() != expected {
                return Err(BatchError::WrongEntityCount {
                    tick: self.tick,
                    expected,
                    actual: self.entities.len(),
                });
            }
        }
        if let Some(index) = self
            .entities
            .iter()
            .position(|e| !e.position.is_finite() || !e.velocity.is_finite())
        {
            return Err(BatchError::NonFinite {
                tick: self.tick,
                index,
            });
        }
        Ok(())
    }
}

/// Position and velocity of an entity as handed to rendering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct EntityMotion {
    pub position: Vec2,
    pub velocity: Vec2,
}

impl EntityMotion {
    pub const fn new(position: Vec2, velocity: Vec2) -> Self {
        Self { position, velocity }
    }
}

impl From<EntitySnapshot> for EntityMotion {
    fn from(snap: EntitySnapshot) -> Self {
        snap.motion()
    }
}

/// Reasons a decoded batch is refused at the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    Empty {
        tick: u32,
    },
    WrongEntityCount {
        tick: u32,
        expected: usize,
        actual: usize,
    },
    NonFinite {
        tick: u32,
        index: usize,
    },
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchError::Empty { tick } => write!(f, "batch at tick {tick} has no entities"),
            BatchError::WrongEntityCount {
                tick,
                expected,
                actual,
            } => write!(
                f,
                "batch at tick {tick} has {actual} entities, expected {expected}"
            ),
            BatchError::NonFinite { tick, index } => {
                write!(f, "batch at tick {tick}: entity {index} has a non-finite value")
            }
        }
    }
}

impl std::error::Error for BatchError {}
