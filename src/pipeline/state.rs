//! Scheduler state machine.
//!
//! ```text
//! Idle ──item/tick──▶ Accumulating ──batch──▶ Exporting ──done──▶ Idle
//!   └──────────────── any ──shutdown──▶ ShuttingDown ──drained──▶ Terminated
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SchedulerState {
    Idle = 0,
    Accumulating = 1,
    Exporting = 2,
    ShuttingDown = 3,
    /// Absorbing
    Terminated = 4,
}

impl SchedulerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SchedulerState::Idle,
            1 => SchedulerState::Accumulating,
            2 => SchedulerState::Exporting,
            3 => SchedulerState::ShuttingDown,
            _ => SchedulerState::Terminated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Accumulating => "accumulating",
            SchedulerState::Exporting => "exporting",
            SchedulerState::ShuttingDown => "shutting_down",
            SchedulerState::Terminated => "terminated",
        }
    }

    /// True once shutdown has begun
    pub fn is_closing(&self) -> bool {
        *self >= SchedulerState::ShuttingDown
    }
}

/// Lock-free holder of the current [`SchedulerState`]
#[derive(Debug)]
pub struct AtomicState(AtomicU8);

impl AtomicState {
    pub fn new(state: SchedulerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn get(&self) -> SchedulerState {
        SchedulerState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` if the transition is legal. Returns whether it happened.
    ///
    /// Running states move freely between each other; `ShuttingDown` only
    /// moves forward to `Terminated`, which never changes again.
    pub fn transition(&self, next: SchedulerState) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                let current = SchedulerState::from_u8(raw);
                let allowed = match current {
                    SchedulerState::Terminated => false,
                    SchedulerState::ShuttingDown => next == SchedulerState::Terminated,
                    _ => true,
                };
                allowed.then_some(next as u8)
            })
            .is_ok()
    }
}
