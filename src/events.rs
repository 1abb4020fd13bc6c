//! Consumer boundary: the events the core emits and the collaborators it
//! needs from the host.
//!
//! The core never talks to a UI directly.  Every outbound notification is a
//! [`PttEvent`] handed to an [`EventSink`].  [`ChannelSink`] is the production
//! sink: it checks that the host window is still alive and forwards the event
//! over a `tokio::sync::mpsc` channel, which the host bridges onto whatever
//! inter-process transport it uses.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// PttEvent
// ---------------------------------------------------------------------------

/// Outbound notifications delivered to the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PttEvent {
    /// The talk-active signal flipped.  Sent exactly once per actual flip.
    PttStateChanged { active: bool },

    /// Global capture is unavailable; the consumer should handle the key
    /// itself while its window is focused.
    LocalKeybindFallback { accelerator: String },

    /// A degraded mode was entered.  Informational for the user.
    Warning { kind: WarningKind, message: String },
}

/// Classes of user-facing warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarningKind {
    /// Hold mode is emulated from repeated shortcut triggers.
    HoldEmulated,
    /// Only focus-scoped capture works.
    GlobalCaptureUnavailable,
    /// The desktop portal accepted the request but negotiation failed.
    PortalNegotiationFailed,
}

impl PttEvent {
    pub fn warning(kind: WarningKind, message: impl Into<String>) -> Self {
        PttEvent::Warning {
            kind,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// Destination for [`PttEvent`]s.
///
/// Delivery is fire-and-forget; a sink that cannot deliver drops the event.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PttEvent);
}

// ---------------------------------------------------------------------------
// HostWindow
// ---------------------------------------------------------------------------

/// What the core needs to know about the host window.
pub trait HostWindow: Send + Sync {
    /// `true` while the window owns keyboard focus.
    fn is_focused(&self) -> bool;

    /// `true` once the window has been torn down.  Nothing may be delivered
    /// to a destroyed window.
    fn is_destroyed(&self) -> bool;
}

/// A window that is never focused and never destroyed.  Used by the headless
/// daemon where the consumer lives in another process.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessWindow;

impl HostWindow for HeadlessWindow {
    fn is_focused(&self) -> bool {
        false
    }

    fn is_destroyed(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// ChannelSink
// ---------------------------------------------------------------------------

/// Forwards events to the consumer over an unbounded channel, after checking
/// that the host window is still alive.
pub struct ChannelSink {
    window: Arc<dyn HostWindow>,
    tx: mpsc::UnboundedSender<PttEvent>,
}

impl ChannelSink {
    pub fn new(window: Arc<dyn HostWindow>, tx: mpsc::UnboundedSender<PttEvent>) -> Self {
        Self { window, tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: PttEvent) {
        if self.window.is_destroyed() {
            log::debug!("[ptt] window destroyed, dropping {event:?}");
            return;
        }
        if self.tx.send(event).is_err() {
            log::debug!("[ptt] consumer channel closed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
