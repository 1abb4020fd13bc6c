//! Push-to-talk capture strategies.
//!
//! # Design
//!
//! Each way of observing the push-to-talk key lives behind the [`Strategy`]
//! trait.  The orchestrator asks a strategy whether it can work at all
//! ([`Strategy::probe`]), registers a [`Binding`] with it, and later tears it
//! down again.  Strategies never touch the talk-active state: they report
//! [`Edge`]s as [`Signal`]s over a channel, tagged with the binding's
//! generation so that late events from a released resource can be discarded.
//!
//! | Strategy | Module | Delivers |
//! |----------|--------|----------|
//! | Low-level key hook | [`listener`] | `Down` / `Up` |
//! | Native global shortcut | [`native`] | `Triggered` only |
//! | Desktop portal | [`portal`] | `Down` / `Up` |
//! | Focus-scoped interceptor | [`focus`] | `Down` / `Up` (in-process) |
//!
//! The focus-scoped interceptor is not a [`Strategy`]: it runs synchronously
//! inside the orchestrator because the host needs an immediate
//! consume/pass-through answer for every keystroke.

pub mod focus;
pub mod listener;
pub mod matcher;
pub mod native;
pub mod portal;

pub use focus::{Disposition, FocusInterceptor, FocusVerdict, KeyEventKind, KeyInput};
pub use listener::LowLevelHook;
pub use matcher::{HookMatcher, HookVerdict, ModifierTrackingState};
pub use native::NativeShortcut;
pub use portal::PortalStrategy;

use std::fmt;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::accelerator::Accelerator;
use crate::config::Mode;

// ---------------------------------------------------------------------------
// StrategyKind
// ---------------------------------------------------------------------------

/// Identifies a capture strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    LowLevelHook,
    NativeShortcut,
    Portal,
    FocusScoped,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StrategyKind::LowLevelHook => "low-level key hook",
            StrategyKind::NativeShortcut => "native global shortcut",
            StrategyKind::Portal => "desktop portal",
            StrategyKind::FocusScoped => "focus-scoped interceptor",
        })
    }
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// Result of a capability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Available,
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Edge / Signal
// ---------------------------------------------------------------------------

/// A raw key edge as seen by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// The key went down.
    Down,
    /// The key came back up.
    Up,
    /// The shortcut fired; no release will follow.
    Triggered,
}

/// Payload of a [`Signal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalKind {
    Edge(Edge),
    /// Asynchronous negotiation finished; edges may now be trusted.
    Ready,
    /// Asynchronous negotiation failed after `register` had returned.
    Failed(StrategyError),
}

/// Message sent from a strategy (possibly on another thread) to the
/// orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub generation: u64,
    pub source: StrategyKind,
    pub kind: SignalKind,
}

impl Signal {
    pub fn edge(binding: &Binding, source: StrategyKind, edge: Edge) -> Self {
        Self {
            generation: binding.generation,
            source,
            kind: SignalKind::Edge(edge),
        }
    }
}

pub type SignalSender = mpsc::UnboundedSender<Signal>;
pub type SignalReceiver = mpsc::UnboundedReceiver<Signal>;

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// What a strategy is asked to watch for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub accelerator: Accelerator,
    /// The keybind exactly as configured, used in consumer-facing events.
    pub keybind: String,
    pub mode: Mode,
    /// Incremented on every (re)registration and teardown.
    pub generation: u64,
}

// ---------------------------------------------------------------------------
// StrategyError
// ---------------------------------------------------------------------------

/// Failures a strategy can report.  None of them is fatal; the orchestrator
/// turns each into "try the next strategy" or "log and continue".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyError {
    /// A prerequisite (platform API, bus service, permission) is missing.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The accelerator is already owned by another process.
    #[error("shortcut already registered elsewhere: {0}")]
    Conflict(String),

    /// The accelerator cannot be expressed for this backend.
    #[error("unsupported accelerator: {0}")]
    UnsupportedAccelerator(String),

    /// Bus or protocol failure while negotiating.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// Releasing an OS or bus resource failed.
    #[error("teardown failed: {0}")]
    Teardown(String),
}

impl StrategyError {
    /// `true` for the "capability absent" class, which is logged at info
    /// level rather than as a warning.
    pub fn is_capability_absent(&self) -> bool {
        matches!(self, StrategyError::Unavailable(_))
    }
}

// ---------------------------------------------------------------------------
// Strategy trait
// ---------------------------------------------------------------------------

/// Common interface of the global capture strategies.
///
/// Implementations are not required to be `Send`: some OS shortcut
/// registrars must stay on the thread that created them.  Anything that runs
/// on another thread talks back exclusively through the [`SignalSender`].
pub trait Strategy {
    fn kind(&self) -> StrategyKind;

    /// Cheap check whether this strategy can work in the current
    /// environment.
    fn probe(&self) -> Capability;

    /// Start delivering edges for `binding`.  Must not block on external
    /// services.
    fn register(&mut self, binding: &Binding, signals: SignalSender) -> Result<(), StrategyError>;

    /// Stop delivering edges and release resources.  Idempotent.
    fn unregister(&mut self) -> Result<(), StrategyError>;

    /// Background work still releasing resources after `unregister`.  The
    /// driver awaits it, bounded, before the runtime goes away.
    fn take_pending(&mut self) -> Vec<JoinHandle<()>> {
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// StrategySet
// ---------------------------------------------------------------------------

/// The global strategies available to the orchestrator.
pub struct StrategySet {
    pub low_level: Box<dyn Strategy>,
    pub native: Box<dyn Strategy>,
    pub portal: Box<dyn Strategy>,
}

impl StrategySet {
    /// The real platform implementations.  `host_event_loop` tells the
    /// native registrar whether the host pumps a main-thread event loop.
    pub fn platform_default(hook_grace: std::time::Duration, host_event_loop: bool) -> Self {
        Self {
            low_level: Box::new(LowLevelHook::new(hook_grace)),
            native: Box::new(NativeShortcut::new(host_event_loop)),
            portal: Box::new(PortalStrategy::new()),
        }
    }

    pub fn get_mut(&mut self, kind: StrategyKind) -> Option<&mut Box<dyn Strategy>> {
        match kind {
            StrategyKind::LowLevelHook => Some(&mut self.low_level),
            StrategyKind::NativeShortcut => Some(&mut self.native),
            StrategyKind::Portal => Some(&mut self.portal),
            StrategyKind::FocusScoped => None,
        }
    }

    /// All strategies, in priority order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Strategy>> {
        [&mut self.low_level, &mut self.native, &mut self.portal].into_iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_capability_absent() {
        assert!(StrategyError::Unavailable("no display".into()).is_capability_absent());
        assert!(!StrategyError::Conflict("Shift+V".into()).is_capability_absent());
        assert!(!StrategyError::Negotiation("timeout".into()).is_capability_absent());
    }

    #[test]
    fn signal_carries_binding_generation() {
        let binding = Binding {
            accelerator: Accelerator::parse("F8"),
            keybind: "F8".into(),
            mode: Mode::Hold,
            generation: 7,
        };
        let signal = Signal::edge(&binding, StrategyKind::LowLevelHook, Edge::Down);
        assert_eq!(signal.generation, 7);
        assert_eq!(signal.kind, SignalKind::Edge(Edge::Down));
    }

    #[test]
    fn focus_scoped_has_no_global_strategy() {
        struct Dummy(StrategyKind);
        impl Strategy for Dummy {
            fn kind(&self) -> StrategyKind {
                self.0
            }
            fn probe(&self) -> Capability {
                Capability::Available
            }
            fn register(&mut self, _: &Binding, _: SignalSender) -> Result<(), StrategyError> {
                Ok(())
            }
            fn unregister(&mut self) -> Result<(), StrategyError> {
                Ok(())
            }
        }

        let mut set = StrategySet {
            low_level: Box::new(Dummy(StrategyKind::LowLevelHook)),
            native: Box::new(Dummy(StrategyKind::NativeShortcut)),
            portal: Box::new(Dummy(StrategyKind::Portal)),
        };
        assert!(set.get_mut(StrategyKind::FocusScoped).is_none());
        assert_eq!(
            set.get_mut(StrategyKind::Portal).map(|s| s.kind()),
            Some(StrategyKind::Portal)
        );
        assert_eq!(set.iter_mut().count(), 3);
    }
}
