//! Accelerator parsing: turns a human-readable key combination such as
//! `"Shift+V"` or `"ctrl-alt-Q"` into a canonical [`Accelerator`].
//!
//! Parsing never fails.  The final token is always the key; every preceding
//! token is looked up in a small modifier vocabulary and silently dropped if
//! it is not recognised, so sloppy user input still produces something usable.
//!
//! ```
//! use talkgate::accelerator::Accelerator;
//!
//! let acc = Accelerator::parse("Shift+V");
//! assert_eq!(acc.key, "v");
//! assert!(acc.shift && !acc.ctrl);
//! ```

use std::fmt;

// ---------------------------------------------------------------------------
// Accelerator
// ---------------------------------------------------------------------------

/// Canonical key-combination descriptor: one non-modifier key plus a set of
/// modifier flags.
///
/// Built once per registration and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Accelerator {
    /// Normalised lower-case key name (`"v"`, `"f8"`, `"space"`).
    pub key: String,
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub meta: bool,
}

/// Modifier classes understood by the parser and the key matchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Ctrl,
    Shift,
    Alt,
    Meta,
}

impl Modifier {
    /// Look up a (lower-case) token in the modifier vocabulary.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "ctrl" | "control" => Some(Modifier::Ctrl),
            "shift" => Some(Modifier::Shift),
            "alt" | "option" => Some(Modifier::Alt),
            "meta" | "cmd" | "command" | "super" => Some(Modifier::Meta),
            _ => None,
        }
    }
}

impl Accelerator {
    /// Parse an accelerator string.  See the module docs for the rules.
    pub fn parse(input: &str) -> Self {
        let tokens: Vec<String> = input
            .split(['+', '-'])
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        let mut acc = Accelerator::default();
        let Some((key, modifiers)) = tokens.split_last() else {
            return acc;
        };

        acc.key = normalize_key(key);
        for token in modifiers {
            match Modifier::from_token(token) {
                Some(m) => acc.set(m, true),
                None => log::debug!("[ptt] ignoring unknown modifier token {token:?} in {input:?}"),
            }
        }
        acc
    }

    /// Whether the given modifier is part of this accelerator.
    pub fn has(&self, modifier: Modifier) -> bool {
        match modifier {
            Modifier::Ctrl => self.ctrl,
            Modifier::Shift => self.shift,
            Modifier::Alt => self.alt,
            Modifier::Meta => self.meta,
        }
    }

    fn set(&mut self, modifier: Modifier, on: bool) {
        match modifier {
            Modifier::Ctrl => self.ctrl = on,
            Modifier::Shift => self.shift = on,
            Modifier::Alt => self.alt = on,
            Modifier::Meta => self.meta = on,
        }
    }

    /// Trigger string in the XDG shortcuts notation used by the
    /// GlobalShortcuts portal (`"CTRL+SHIFT+v"`).
    pub fn to_portal_trigger(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if self.ctrl {
            parts.push("CTRL");
        }
        if self.alt {
            parts.push("ALT");
        }
        if self.shift {
            parts.push("SHIFT");
        }
        if self.meta {
            parts.push("LOGO");
        }
        parts.push(&self.key);
        parts.join("+")
    }

    /// String form accepted by `global_hotkey::hotkey::HotKey::from_str`.
    pub fn to_hotkey_string(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if self.ctrl {
            parts.push("control".into());
        }
        if self.alt {
            parts.push("alt".into());
        }
        if self.shift {
            parts.push("shift".into());
        }
        if self.meta {
            parts.push("super".into());
        }
        parts.push(self.key.clone());
        parts.join("+")
    }
}

impl fmt::Display for Accelerator {
    /// Renders as `Ctrl+Alt+Shift+Meta+Key` with the key capitalised.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (on, label) in [
            (self.ctrl, "Ctrl"),
            (self.alt, "Alt"),
            (self.shift, "Shift"),
            (self.meta, "Meta"),
        ] {
            if on {
                write!(f, "{label}+")?;
            }
        }
        let mut chars = self.key.chars();
        match chars.next() {
            Some(first) => write!(f, "{}{}", first.to_uppercase(), chars.as_str()),
            None => Ok(()),
        }
    }
}

/// Collapse common spellings of the same key onto one name.  Expects a
/// lower-case key name.
pub(crate) fn normalize_key(key: &str) -> String {
    match key {
        "control" => "ctrl",
        "option" => "alt",
        "cmd" | "command" | "super" => "meta",
        "esc" => "escape",
        "return" => "enter",
        "del" => "delete",
        "spacebar" => "space",
        "arrowup" => "up",
        "arrowdown" => "down",
        "arrowleft" => "left",
        "arrowright" => "right",
        other => other,
    }
    .to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
