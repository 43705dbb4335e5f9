//! Tick sequencing.
//!
//! Batches arrive over an unordered transport. The sequencer keeps the
//! highest tick accepted so far (the watermark) and decides, per batch,
//! whether it is fresh enough to reconcile against.

use tracing::{debug, warn};

pub use driftsync_shared::config::TickPolicy;

/// Where an incoming tick falls relative to the watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickClass {
    /// First batch of the session, or exactly `watermark + 1`.
    InOrder,
    /// Ahead of `watermark + 1`; `missed` intermediate ticks never arrived.
    Gap { missed: u32 },
    /// At or below the watermark.
    StaleOrDuplicate,
}

/// Whether a classified batch should reach reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    Drop,
}

/// Classifies `incoming` against an optional watermark.
pub fn classify(incoming: u32, watermark: Option<u32>) -> TickClass {
    let Some(highest) = watermark else {
        return TickClass::InOrder;
    };
    if incoming <= highest {
        TickClass::StaleOrDuplicate
    } else if incoming - highest == 1 {
        TickClass::InOrder
    } else {
        TickClass::Gap {
            missed: incoming - highest - 1,
        }
    }
}

/// Watermark tracker with a configurable gap policy.
#[derive(Debug, Clone, Default)]
pub struct TickSequencer {
    policy: TickPolicy,
    highest: Option<u32>,
}

impl TickSequencer {
    pub fn new(policy: TickPolicy) -> Self {
        Self {
            policy,
            highest: None,
        }
    }

    pub fn policy(&self) -> TickPolicy {
        self.policy
    }

    /// Highest tick accepted so far, `None` before the first batch.
    pub fn highest_accepted(&self) -> Option<u32> {
        self.highest
    }

    /// Classifies `tick`, moves the watermark as the policy allows, and
    /// reports whether the batch should be reconciled.
    ///
    /// The watermark never moves backwards. Under `RejectGaps` a gapped tick
    /// still advances it so that the following contiguous tick is accepted.
    pub fn admit(&mut self, tick: u32) -> (TickClass, Admission) {
        let class = classify(tick, self.highest);
        let admission = match class {
            TickClass::InOrder => {
                self.highest = Some(tick);
                Admission::Accept
            }
            TickClass::Gap { missed } => {
                self.highest = Some(tick);
                match self.policy {
                    TickPolicy::AcceptWithLoss => {
                        warn!(tick, missed, "Skipped {missed} ticks");
                        Admission::Accept
                    }
                    TickPolicy::RejectGaps => {
                        warn!(tick, missed, "Rejecting batch after {missed} missing ticks");
                        Admission::Drop
                    }
                }
            }
            TickClass::StaleOrDuplicate => {
                debug!(tick, highest = ?self.highest, "Dropping stale batch");
                Admission::Drop
            }
        };
        (class, admission)
    }

    /// Forgets the watermark (new session).
    pub fn reset(&mut self) {
        self.highest = None;
    }
}
