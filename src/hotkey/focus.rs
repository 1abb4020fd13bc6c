//! Focus-scoped key interceptor: the last-resort strategy.
//!
//! The host forwards every raw keystroke its window receives while focused.
//! Unlike the low-level hook this matcher is strict: key **and** all four
//! modifier flags must match exactly, so `Ctrl+V` typed into a text field is
//! never mistaken for a bare `V` binding.
//!
//! | Mode   | key-down (exact match)      | key-up (engaged key)       |
//! |--------|-----------------------------|----------------------------|
//! | Hold   | consumed, reports `Down`    | consumed, reports `Up`     |
//! | Toggle | consumed, reports `Down`    | passed through             |
//!
//! Auto-repeated key-downs are consumed without reporting an edge.  Anything
//! that does not match passes through untouched.
//!
//! Once a key-down has matched, the key is *engaged*: its repeats and its
//! key-up are recognised by key alone, so letting go of `Shift` before `V`
//! still ends a `Shift+V` hold.

use serde::{Deserialize, Serialize};

use crate::accelerator::{normalize_key, Accelerator, Modifier};
use crate::config::Mode;

use super::Edge;

// ---------------------------------------------------------------------------
// KeyInput
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyEventKind {
    KeyDown,
    KeyUp,
}

/// One raw keyboard event as delivered by the host window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInput {
    #[serde(rename = "type")]
    pub kind: KeyEventKind,
    /// Key name as reported by the window toolkit (`"V"`, `"F8"`, `"Enter"`).
    pub key: String,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub meta: bool,
    /// Set for auto-repeat key-downs.
    #[serde(default)]
    pub repeat: bool,
}

impl KeyInput {
    pub fn down(key: &str) -> Self {
        Self {
            kind: KeyEventKind::KeyDown,
            key: key.to_string(),
            ctrl: false,
            shift: false,
            alt: false,
            meta: false,
            repeat: false,
        }
    }

    pub fn up(key: &str) -> Self {
        Self {
            kind: KeyEventKind::KeyUp,
            ..Self::down(key)
        }
    }

    pub fn with(mut self, modifier: Modifier) -> Self {
        match modifier {
            Modifier::Ctrl => self.ctrl = true,
            Modifier::Shift => self.shift = true,
            Modifier::Alt => self.alt = true,
            Modifier::Meta => self.meta = true,
        }
        self
    }

    fn held(&self, modifier: Modifier) -> bool {
        match modifier {
            Modifier::Ctrl => self.ctrl,
            Modifier::Shift => self.shift,
            Modifier::Alt => self.alt,
            Modifier::Meta => self.meta,
        }
    }
}

// ---------------------------------------------------------------------------
// Disposition / FocusVerdict
// ---------------------------------------------------------------------------

/// Answer returned to the host for each raw keystroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Disposition {
    /// The host must stop the event from reaching normal input handling.
    Consumed,
    PassThrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusVerdict {
    Pass,
    /// Swallow the event; report the edge if there is one.
    Consume(Option<Edge>),
}

// ---------------------------------------------------------------------------
// FocusInterceptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FocusInterceptor {
    accelerator: Accelerator,
    mode: Mode,
    /// The bound key went down with the exact modifiers and has not been
    /// released yet.
    engaged: bool,
}

impl FocusInterceptor {
    pub fn new(accelerator: Accelerator, mode: Mode) -> Self {
        Self {
            accelerator,
            mode,
            engaged: false,
        }
    }

    fn same_key(&self, input: &KeyInput) -> bool {
        !self.accelerator.key.is_empty()
            && normalize_key(&input.key.to_lowercase()) == self.accelerator.key
    }

    /// Exact match: same key, and each modifier held iff required.
    pub fn matches(&self, input: &KeyInput) -> bool {
        self.same_key(input)
            && [Modifier::Ctrl, Modifier::Shift, Modifier::Alt, Modifier::Meta]
                .into_iter()
                .all(|m| input.held(m) == self.accelerator.has(m))
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    /// Forget the engaged key (the window lost focus).
    pub fn reset(&mut self) {
        self.engaged = false;
    }

    pub fn classify(&mut self, input: &KeyInput) -> FocusVerdict {
        let engaged_key = self.engaged && self.same_key(input);
        if !engaged_key && !self.matches(input) {
            return FocusVerdict::Pass;
        }
        match (self.mode, input.kind) {
            (_, KeyEventKind::KeyDown) if input.repeat || engaged_key => {
                FocusVerdict::Consume(None)
            }
            (_, KeyEventKind::KeyDown) => {
                self.engaged = true;
                FocusVerdict::Consume(Some(Edge::Down))
            }
            (Mode::Hold, KeyEventKind::KeyUp) => {
                self.engaged = false;
                FocusVerdict::Consume(Some(Edge::Up))
            }
            (Mode::Toggle, KeyEventKind::KeyUp) => {
                self.engaged = false;
                FocusVerdict::Pass
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
