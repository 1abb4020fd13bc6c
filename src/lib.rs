//! Push-to-talk key detection across heterogeneous desktop input stacks.
//!
//! Raw key events from whichever capture strategy works in the current
//! environment (low-level hook, native global shortcut, desktop portal, or
//! focus-scoped interception) are reconciled into one debounced
//! "talk active" signal.
//!
//! ```text
//! config ──▶ orchestrator ──probe/register──▶ hotkey::{listener, native, portal}
//!                 │   ▲                                   │
//!                 │   └────────────── Signal ─────────────┘
//!                 ▼
//!            controller ──PttEvent──▶ events::EventSink ──▶ consumer
//! ```

pub mod accelerator;
pub mod config;
pub mod controller;
pub mod events;
pub mod hotkey;
pub mod orchestrator;
pub mod session;
