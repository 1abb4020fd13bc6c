//! Desktop-portal strategy (`org.freedesktop.portal.GlobalShortcuts`).
//!
//! # Design
//!
//! ```text
//!  register()                      negotiation task (tokio)
//!  ──────────                      ─────────────────────────────────────────
//!  spawn task ──────────────────►  subscribe to portal signals
//!  return Ok  (Bound, not ready)   CreateSession ──► Response(session_handle)
//!                                  BindShortcuts ──► Response(0) ──► Ready
//!                                  Activated   ──► Edge::Down
//!                                  Deactivated ──► Edge::Up
//!  unregister() ── shutdown ────►  Session.Close / Request.Close
//! ```
//!
//! Registration never waits for the bus.  Bus messages are decoded into a
//! typed [`PortalEvent`] and fed to [`PortalSession::apply`], which owns all
//! protocol bookkeeping and is independent of the bus library.
//!
//! A single negotiation attempt is made per registration.  If the portal
//! service is absent the failure is classified as capability-absent;
//! anything else is a negotiation error.  Either way the task reports
//! [`SignalKind::Failed`](super::SignalKind::Failed) and exits.

#[cfg(target_os = "linux")]
mod dbus;

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use super::{Binding, Capability, Edge, SignalSender, Strategy, StrategyError, StrategyKind};

/// Shortcut id registered with the portal.
pub const SHORTCUT_ID: &str = "push-to-talk";
pub const SHORTCUT_DESCRIPTION: &str = "Push to talk";

pub const DESTINATION: &str = "org.freedesktop.portal.Desktop";
pub const PORTAL_PATH: &str = "/org/freedesktop/portal/desktop";
pub const SHORTCUTS_INTERFACE: &str = "org.freedesktop.portal.GlobalShortcuts";
pub const REQUEST_INTERFACE: &str = "org.freedesktop.portal.Request";
pub const SESSION_INTERFACE: &str = "org.freedesktop.portal.Session";

/// `Request.Response` codes.
pub const RESPONSE_SUCCESS: u32 = 0;
pub const RESPONSE_CANCELLED: u32 = 1;

// ---------------------------------------------------------------------------
// PortalError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortalError {
    /// No portal (or no GlobalShortcuts interface) on the bus.
    #[error("portal service unavailable: {0}")]
    ServiceUnknown(String),

    /// The user dismissed the portal dialog.
    #[error("shortcut request cancelled by the user")]
    Cancelled,

    #[error("{0}")]
    Negotiation(String),
}

impl From<PortalError> for StrategyError {
    fn from(e: PortalError) -> Self {
        match e {
            PortalError::ServiceUnknown(reason) => StrategyError::Unavailable(reason),
            other => StrategyError::Negotiation(other.to_string()),
        }
    }
}

/// Classify a D-Bus error name returned by a method call.
pub fn classify_error_name(name: &str, detail: &str) -> PortalError {
    match name {
        "org.freedesktop.DBus.Error.ServiceUnknown"
        | "org.freedesktop.DBus.Error.NameHasNoOwner"
        | "org.freedesktop.DBus.Error.UnknownInterface"
        | "org.freedesktop.DBus.Error.UnknownMethod"
        | "org.freedesktop.DBus.Error.UnknownObject" => {
            PortalError::ServiceUnknown(format!("{name}: {detail}"))
        }
        _ => PortalError::Negotiation(format!("{name}: {detail}")),
    }
}

// ---------------------------------------------------------------------------
// Tokens and paths
// ---------------------------------------------------------------------------

static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Fresh handle token, unique within this process.
pub fn new_token() -> String {
    let n = TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("talkgate_{}_{n}", std::process::id())
}

/// Object path the portal will use for the `Request` created with `token`.
///
/// The unique bus name `:1.42` becomes the path element `1_42`.
pub fn request_path(unique_name: &str, token: &str) -> String {
    let sender = unique_name.trim_start_matches(':').replace('.', "_");
    format!("{PORTAL_PATH}/request/{sender}/{token}")
}

// ---------------------------------------------------------------------------
// PortalEvent
// ---------------------------------------------------------------------------

/// Signals the strategy cares about, decoded from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalEvent {
    /// `Request.Response` for a pending call.
    Response {
        request_path: String,
        code: u32,
        /// `results["session_handle"]`, present for CreateSession.
        session_handle: Option<String>,
    },
    /// `GlobalShortcuts.Activated`.
    Activated {
        session_path: String,
        shortcut_id: String,
    },
    /// `GlobalShortcuts.Deactivated`.
    Deactivated {
        session_path: String,
        shortcut_id: String,
    },
}

/// What the negotiation task should do after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalStep {
    /// Session created; call BindShortcuts next.
    Bind { session_path: String },
    /// Shortcuts bound; edges may be trusted.
    Ready,
    Edge(Edge),
    Ignore,
}

// ---------------------------------------------------------------------------
// PortalSession
// ---------------------------------------------------------------------------

/// Protocol bookkeeping for one negotiation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortalSession {
    /// Request currently awaiting a `Response`, if any.
    pub request_path: Option<String>,
    /// Session handle once CreateSession succeeded.
    pub session_path: Option<String>,
    /// BindShortcuts succeeded.
    pub bound: bool,
}

impl PortalSession {
    pub fn apply(&mut self, event: PortalEvent) -> Result<PortalStep, PortalError> {
        match event {
            PortalEvent::Response {
                request_path,
                code,
                session_handle,
            } => {
                if self.request_path.as_deref() != Some(request_path.as_str()) {
                    return Ok(PortalStep::Ignore);
                }
                self.request_path = None;
                let phase = if self.session_path.is_none() {
                    "CreateSession"
                } else {
                    "BindShortcuts"
                };
                match code {
                    RESPONSE_SUCCESS => {}
                    RESPONSE_CANCELLED => return Err(PortalError::Cancelled),
                    other => {
                        return Err(PortalError::Negotiation(format!(
                            "{phase} failed with response code {other}"
                        )))
                    }
                }

                if self.session_path.is_some() {
                    self.bound = true;
                    return Ok(PortalStep::Ready);
                }
                let session_path = session_handle.ok_or_else(|| {
                    PortalError::Negotiation("CreateSession response without session_handle".into())
                })?;
                self.session_path = Some(session_path.clone());
                Ok(PortalStep::Bind { session_path })
            }
            PortalEvent::Activated {
                session_path,
                shortcut_id,
            } => Ok(self.edge(&session_path, &shortcut_id, Edge::Down)),
            PortalEvent::Deactivated {
                session_path,
                shortcut_id,
            } => Ok(self.edge(&session_path, &shortcut_id, Edge::Up)),
        }
    }

    fn edge(&self, session_path: &str, shortcut_id: &str, edge: Edge) -> PortalStep {
        if self.bound
            && shortcut_id == SHORTCUT_ID
            && self.session_path.as_deref() == Some(session_path)
        {
            PortalStep::Edge(edge)
        } else {
            PortalStep::Ignore
        }
    }
}

// ---------------------------------------------------------------------------
// PortalStrategy
// ---------------------------------------------------------------------------

/// Global shortcut through the desktop portal.  Linux only.
#[derive(Default)]
pub struct PortalStrategy {
    #[cfg(target_os = "linux")]
    task: Option<dbus::PortalTask>,
    /// Tasks told to shut down that may still be closing their session.
    #[cfg(target_os = "linux")]
    closing: Vec<tokio::task::JoinHandle<()>>,
}

impl PortalStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(target_os = "linux")]
impl Strategy for PortalStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Portal
    }

    fn probe(&self) -> Capability {
        if std::env::var_os("DBUS_SESSION_BUS_ADDRESS").is_none()
            && std::env::var_os("XDG_RUNTIME_DIR").is_none()
        {
            return Capability::Unavailable("no session bus".into());
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Capability::Unavailable("no async runtime to drive the portal session".into());
        }
        Capability::Available
    }

    fn register(&mut self, binding: &Binding, signals: SignalSender) -> Result<(), StrategyError> {
        self.unregister()?;
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| StrategyError::Unavailable(format!("no async runtime: {e}")))?;
        self.task = Some(dbus::PortalTask::spawn(&handle, binding.clone(), signals));
        log::info!("[portal] negotiating global shortcut {}", binding.accelerator);
        Ok(())
    }

    fn unregister(&mut self) -> Result<(), StrategyError> {
        if let Some(task) = self.task.take() {
            self.closing.push(task.shutdown());
        }
        self.closing.retain(|task| !task.is_finished());
        Ok(())
    }

    fn take_pending(&mut self) -> Vec<tokio::task::JoinHandle<()>> {
        std::mem::take(&mut self.closing)
    }
}

#[cfg(not(target_os = "linux"))]
impl Strategy for PortalStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Portal
    }

    fn probe(&self) -> Capability {
        Capability::Unavailable("desktop portals exist only on Linux".into())
    }

    fn register(&mut self, _binding: &Binding, _signals: SignalSender) -> Result<(), StrategyError> {
        Err(StrategyError::Unavailable("desktop portals exist only on Linux".into()))
    }

    fn unregister(&mut self) -> Result<(), StrategyError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
