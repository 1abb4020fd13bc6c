//! Single-shot release timer owned by the hold controller.
//!
//! The timer never runs by itself.  It only records a deadline; whoever
//! drives the event loop asks [`HoldTimer::deadline`] when to wake up and
//! calls back into the controller once that instant has passed.

use std::time::Instant;

/// States of the auto-deactivation timer.
///
/// ```text
/// Idle ──arm──▶ Armed ──fires before min hold──▶ Extended ──fires──▶ Idle
///   ▲             │                                  │
///   └────cancel───┴──────────────cancel──────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HoldTimer {
    /// No deactivation pending.
    #[default]
    Idle,
    /// A deactivation is scheduled for `deadline`.
    Armed { deadline: Instant },
    /// The original deadline fell inside the minimum hold window and was
    /// pushed out to the end of that window.
    Extended { deadline: Instant },
}

impl HoldTimer {
    pub fn deadline(&self) -> Option<Instant> {
        match *self {
            HoldTimer::Idle => None,
            HoldTimer::Armed { deadline } | HoldTimer::Extended { deadline } => Some(deadline),
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|d| now >= d)
    }

    /// (Re)arm for `deadline`.  Any previous deadline is discarded.
    pub fn arm(&mut self, deadline: Instant) {
        *self = HoldTimer::Armed { deadline };
    }

    pub fn extend(&mut self, deadline: Instant) {
        *self = HoldTimer::Extended { deadline };
    }

    pub fn cancel(&mut self) {
        *self = HoldTimer::Idle;
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, HoldTimer::Idle)
    }
}
