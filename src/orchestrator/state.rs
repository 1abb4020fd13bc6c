//! Registration state of the orchestrator.
//!
//! ```text
//! Unregistered ──register──▶ Probing ──strategy bound──▶ Bound(strategy)
//!      ▲                                                    │
//!      └──────── disable / rebind / shutdown (teardown) ────┘
//! ```

use crate::hotkey::{Binding, StrategyKind};

/// A live binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub strategy: StrategyKind,
    pub binding: Binding,
    /// `false` while an asynchronous strategy (the portal) is still
    /// negotiating; edges are ignored until it turns `true`.
    pub ready: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Registration {
    #[default]
    Unregistered,
    /// Walking the strategy chain.  Never observable from outside a
    /// `register` call.
    Probing,
    Bound(Bound),
}

impl Registration {
    pub fn bound(&self) -> Option<&Bound> {
        match self {
            Registration::Bound(bound) => Some(bound),
            _ => None,
        }
    }

    pub fn strategy(&self) -> Option<StrategyKind> {
        self.bound().map(|b| b.strategy)
    }

    pub fn is_unregistered(&self) -> bool {
        matches!(self, Registration::Unregistered)
    }
}
