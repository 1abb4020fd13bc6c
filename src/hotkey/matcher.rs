//! Key matching for the low-level (system-wide) key stream.
//!
//! The low-level stream reports independent physical keys, not accelerator
//! matches, so the matcher has to keep its own picture of which modifiers are
//! held ([`ModifierTrackingState`]).  Left and right variants of a modifier
//! count as the same modifier.
//!
//! Matching is deliberately loose compared to the focus-scoped interceptor:
//!
//! * the event's key name must equal **or contain** the target key name,
//!   because platform key names are not standardised;
//! * every modifier the accelerator requires must be held, but extra held
//!   modifiers are tolerated.

use crate::accelerator::{Accelerator, Modifier};

use super::Edge;

// ---------------------------------------------------------------------------
// ModifierTrackingState
// ---------------------------------------------------------------------------

/// Which modifier keys are currently held, as far as the stream has told us.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierTrackingState {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub meta: bool,
}

impl ModifierTrackingState {
    pub fn update(&mut self, modifier: Modifier, down: bool) {
        match modifier {
            Modifier::Ctrl => self.ctrl = down,
            Modifier::Shift => self.shift = down,
            Modifier::Alt => self.alt = down,
            Modifier::Meta => self.meta = down,
        }
    }

    /// `true` when every modifier `acc` requires is held.  Extra modifiers
    /// are ignored.
    pub fn satisfies(&self, acc: &Accelerator) -> bool {
        (!acc.ctrl || self.ctrl)
            && (!acc.shift || self.shift)
            && (!acc.alt || self.alt)
            && (!acc.meta || self.meta)
    }
}

// ---------------------------------------------------------------------------
// HookMatcher
// ---------------------------------------------------------------------------

/// What the hook callback should do with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookVerdict {
    /// Let the event through untouched.
    Pass,
    /// Swallow the event and report the edge.
    Consume(Edge),
}

/// Stateful matcher fed with every event from the low-level stream.
#[derive(Debug, Clone)]
pub struct HookMatcher {
    accelerator: Accelerator,
    modifiers: ModifierTrackingState,
    /// The target key went down as a qualifying edge and has not come up.
    engaged: bool,
}

impl HookMatcher {
    pub fn new(accelerator: Accelerator) -> Self {
        Self {
            accelerator,
            modifiers: ModifierTrackingState::default(),
            engaged: false,
        }
    }

    pub fn modifiers(&self) -> ModifierTrackingState {
        self.modifiers
    }

    /// Feed one key event.
    ///
    /// * `token`: lower-case key name from the stream (`"v"`, `"f8"`,
    ///   `"shiftleft"`).
    /// * `modifier`: set when the physical key is a modifier.
    /// * `down`: `true` for press, `false` for release.
    pub fn on_key(&mut self, token: &str, modifier: Option<Modifier>, down: bool) -> HookVerdict {
        if let Some(m) = modifier {
            self.modifiers.update(m, down);
        }

        if !self.key_matches(token) {
            return HookVerdict::Pass;
        }

        if down {
            if self.modifiers.satisfies(&self.accelerator) {
                self.engaged = true;
                return HookVerdict::Consume(Edge::Down);
            }
            return HookVerdict::Pass;
        }

        // The release of an engaged key always qualifies, even if a modifier
        // was let go first; otherwise the state would stay stuck on.
        if self.engaged || self.modifiers.satisfies(&self.accelerator) {
            self.engaged = false;
            return HookVerdict::Consume(Edge::Up);
        }
        HookVerdict::Pass
    }

    fn key_matches(&self, token: &str) -> bool {
        let key = self.accelerator.key.as_str();
        // TODO: containment lets "a" match "capslock"; tighten once every
        // backend reports canonical key names.
        !key.is_empty() && (token == key || token.contains(key))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
