//! Debounce/hold controller: the only owner of the talk-active state.
//!
//! Strategies never flip the state themselves.  They report edges, and
//! [`HoldController`] reconciles them into a single boolean:
//!
//! * `activate` / `deactivate` are no-ops when the state already matches, so
//!   the consumer only ever sees real flips.
//! * `release` schedules a deactivation instead of performing it, honouring
//!   the configured release delay and the minimum hold duration.
//! * A pending deactivation that comes due inside the minimum hold window is
//!   pushed out to the end of that window rather than honoured.
//!
//! Time is always passed in explicitly so the controller stays deterministic.

pub mod timer;

pub use timer::HoldTimer;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::events::{EventSink, PttEvent};
use crate::hotkey::StrategyKind;

// ---------------------------------------------------------------------------
// Reason
// ---------------------------------------------------------------------------

/// Why the controller was asked to change state.  Used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// An edge reported by a capture strategy.
    Strategy(StrategyKind),
    /// A consumer-side override (`setManualState`).
    Manual,
    /// The release timer came due.
    HoldTimer,
    /// The binding is being torn down.
    Teardown,
}

// ---------------------------------------------------------------------------
// HoldTiming
// ---------------------------------------------------------------------------

/// Timing knobs for Hold mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldTiming {
    /// Minimum time the state stays active once activated by a release-able
    /// edge.
    pub min_hold: Duration,
    /// Delay between a release edge and the actual deactivation.
    pub release_delay: Duration,
}

impl Default for HoldTiming {
    fn default() -> Self {
        Self {
            min_hold: Duration::from_millis(600),
            release_delay: Duration::ZERO,
        }
    }
}

// ---------------------------------------------------------------------------
// HoldController
// ---------------------------------------------------------------------------

pub struct HoldController {
    active: bool,
    activated_at: Option<Instant>,
    timer: HoldTimer,
    timing: HoldTiming,
    sink: Arc<dyn EventSink>,
}

impl HoldController {
    pub fn new(sink: Arc<dyn EventSink>, timing: HoldTiming) -> Self {
        Self {
            active: false,
            activated_at: None,
            timer: HoldTimer::Idle,
            timing,
            sink,
        }
    }

    pub fn current_state(&self) -> bool {
        self.active
    }

    pub fn timer(&self) -> HoldTimer {
        self.timer
    }

    pub fn set_timing(&mut self, timing: HoldTiming) {
        self.timing = timing;
    }

    /// When the driver should next call [`on_timer`](Self::on_timer).
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// Turn talk on.  Cancels any pending release.  Returns `true` if the
    /// state actually flipped.
    pub fn activate(&mut self, reason: Reason, now: Instant) -> bool {
        self.timer.cancel();
        if self.active {
            log::trace!("[ptt] activate ({reason:?}) ignored, already active");
            return false;
        }
        self.active = true;
        self.activated_at = Some(now);
        log::debug!("[ptt] active ({reason:?})");
        self.sink.emit(PttEvent::PttStateChanged { active: true });
        true
    }

    /// Turn talk off immediately, bypassing the hold rules.  Returns `true`
    /// if the state actually flipped.
    pub fn deactivate(&mut self, reason: Reason) -> bool {
        self.timer.cancel();
        if !self.active {
            log::trace!("[ptt] deactivate ({reason:?}) ignored, already inactive");
            return false;
        }
        self.active = false;
        self.activated_at = None;
        log::debug!("[ptt] inactive ({reason:?})");
        self.sink.emit(PttEvent::PttStateChanged { active: false });
        true
    }

    /// Flip the state.  Returns the new state.
    pub fn toggle(&mut self, reason: Reason, now: Instant) -> bool {
        if self.active {
            self.deactivate(reason);
        } else {
            self.activate(reason, now);
        }
        self.active
    }

    /// A Hold-mode release edge: schedule deactivation after the release
    /// delay, subject to the minimum hold.
    pub fn release(&mut self, reason: Reason, now: Instant) {
        if !self.active {
            self.timer.cancel();
            return;
        }
        log::trace!("[ptt] release requested ({reason:?})");
        self.arm_release(now + self.timing.release_delay, now);
    }

    /// Arm (or re-arm) the auto-deactivation timer for `deadline`.  If the
    /// deadline has already passed it is evaluated right away.
    pub fn arm_release(&mut self, deadline: Instant, now: Instant) {
        if !self.active {
            return;
        }
        self.timer.arm(deadline);
        self.on_timer(now);
    }

    /// Evaluate the release timer.  Returns `true` if this call deactivated.
    pub fn on_timer(&mut self, now: Instant) -> bool {
        if !self.timer.is_due(now) {
            return false;
        }
        if let Some(floor) = self.hold_floor() {
            if now < floor {
                log::trace!("[ptt] release inside minimum hold, extending");
                self.timer.extend(floor);
                return false;
            }
        }
        self.deactivate(Reason::HoldTimer)
    }

    fn hold_floor(&self) -> Option<Instant> {
        self.activated_at.map(|at| at + self.timing.min_hold)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
